//! Emergency contacts and group memberships held for offline use.

use chrono::Utc;

use crate::codec::FieldCodec;
use crate::error::{Error, Result};
use crate::merge::merge_by_updated_at;
use crate::models::{
    CheckInStatus, EmergencyContact, GroupAction, GroupActionKind, GroupMembership,
};
use crate::remote::RemoteAuthority;
use crate::services::LocalStore;

/// The user's emergency contacts. Phones are obfuscated at rest.
#[derive(Clone)]
pub struct ContactBook {
    store: LocalStore,
    codec: FieldCodec,
    capacity: usize,
}

impl ContactBook {
    pub const fn new(store: LocalStore, codec: FieldCodec, capacity: usize) -> Self {
        Self {
            store,
            codec,
            capacity,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a contact. A full list is an error; nothing is evicted.
    pub async fn add(&self, contact: EmergencyContact) -> Result<EmergencyContact> {
        let contact = validate(contact)?;
        self.store
            .insert_contact_bounded(&self.encoded(&contact), self.capacity)
            .await?;
        tracing::debug!("Added contact {}", contact.id);
        Ok(contact)
    }

    /// Overwrite an existing contact and bump its timestamp
    pub async fn update(&self, mut contact: EmergencyContact) -> Result<EmergencyContact> {
        contact.touch();
        let contact = validate(contact)?;
        self.store.update_contact(&self.encoded(&contact)).await?;
        Ok(contact)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.store.delete_contact(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<EmergencyContact>> {
        Ok(self
            .store
            .contact(id)
            .await?
            .map(|contact| self.decoded(contact)))
    }

    /// Contacts with phones decoded, most recently updated first
    pub async fn list(&self) -> Result<Vec<EmergencyContact>> {
        Ok(self
            .store
            .contacts()
            .await?
            .into_iter()
            .map(|contact| self.decoded(contact))
            .collect())
    }

    /// Merge with the server copy, store the result locally and send it back
    pub async fn sync<R: RemoteAuthority>(&self, remote: &R) -> Result<Vec<EmergencyContact>> {
        let fetched = remote.fetch_contacts().await?;

        let mut local_count = 0;
        let stored = self
            .store
            .rewrite_contacts(|stored| {
                local_count = stored.len();
                let local = stored
                    .into_iter()
                    .map(|contact| self.decoded(contact))
                    .collect::<Vec<_>>();
                merge_by_updated_at(&local, &fetched, Some(self.capacity))
                    .iter()
                    .map(|contact| self.encoded(contact))
                    .collect()
            })
            .await?;
        let merged = stored
            .into_iter()
            .map(|contact| self.decoded(contact))
            .collect::<Vec<_>>();
        remote.push_contacts(&merged).await?;

        tracing::info!(
            "Contacts synced: {local_count} local, {} remote, {} kept",
            fetched.len(),
            merged.len()
        );
        Ok(merged)
    }

    fn encoded(&self, contact: &EmergencyContact) -> EmergencyContact {
        EmergencyContact {
            phone: self.codec.encode(&contact.phone),
            ..contact.clone()
        }
    }

    fn decoded(&self, contact: EmergencyContact) -> EmergencyContact {
        EmergencyContact {
            phone: self.codec.decode(&contact.phone),
            ..contact
        }
    }
}

fn validate(mut contact: EmergencyContact) -> Result<EmergencyContact> {
    contact.name = contact.name.trim().to_string();
    contact.phone = contact.phone.trim().to_string();
    if contact.name.is_empty() {
        return Err(Error::InvalidInput("Contact name is required".into()));
    }
    if contact.phone.is_empty() {
        return Err(Error::InvalidInput("Contact phone is required".into()));
    }
    contact.relationship = crate::util::normalize_text_option(contact.relationship);
    Ok(contact)
}

/// Group memberships, editable offline and reconciled by last write
#[derive(Clone)]
pub struct GroupBook {
    store: LocalStore,
}

impl GroupBook {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<GroupMembership>> {
        self.store.memberships().await
    }

    /// Reflect a locally taken action in the membership record
    pub async fn apply(&self, action: &GroupAction) -> Result<GroupMembership> {
        let existing = self
            .list()
            .await?
            .into_iter()
            .find(|membership| membership.group_id == action.group_id);
        let mut membership = existing.unwrap_or_else(|| GroupMembership {
            group_id: action.group_id.clone(),
            group_name: action.group_id.clone(),
            status: None,
            active: false,
            updated_at: Utc::now(),
        });

        match action.kind {
            GroupActionKind::Join => membership.active = true,
            GroupActionKind::Leave => membership.active = false,
            GroupActionKind::Status => membership.status = action.status,
        }
        membership.updated_at = Utc::now();

        self.store.put_membership(&membership).await?;
        Ok(membership)
    }

    pub async fn set_status(&self, group_id: &str, status: CheckInStatus) -> Result<GroupMembership> {
        self.apply(&GroupAction::status_update(group_id, status)).await
    }

    pub async fn sync<R: RemoteAuthority>(&self, remote: &R) -> Result<Vec<GroupMembership>> {
        let fetched = remote.fetch_group_memberships().await?;
        self.store
            .rewrite_memberships(|local| merge_by_updated_at(&local, &fetched, None))
            .await
    }
}
