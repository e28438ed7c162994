//! Contact and group membership repositories
//!
//! Both partitions are replaced wholesale after a merge, so the write side is
//! an upsert plus a `replace_all` transaction.

use chrono::{DateTime, Utc};

use crate::db::{classify_write_error, Partition};
use crate::error::{Error, Result};
use crate::models::{CheckInStatus, EmergencyContact, GroupMembership};
use libsql::Connection;

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| Error::DecodeCorruption(format!("timestamp '{raw}': {error}")))
}

/// libSQL storage for emergency contacts (phones arrive already encoded)
pub struct LibSqlContactRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlContactRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn list(&self) -> Result<Vec<EmergencyContact>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, phone, relationship, updated_at
                 FROM contacts
                 ORDER BY updated_at DESC, id ASC",
                (),
            )
            .await?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let updated_at: String = row.get(4)?;
            let updated_at = match parse_timestamp(&updated_at) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!("Skipping contact {id}: {error}");
                    continue;
                }
            };
            contacts.push(EmergencyContact {
                id,
                name: row.get(1)?,
                phone: row.get(2)?,
                relationship: row.get(3)?,
                updated_at,
            });
        }
        Ok(contacts)
    }

    pub async fn get(&self, id: &str) -> Result<Option<EmergencyContact>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|contact| contact.id == id))
    }

    pub async fn count(&self) -> Result<usize> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM contacts", ()).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub async fn upsert(&self, contact: &EmergencyContact) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO contacts (id, name, phone, relationship, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    contact.id.as_str(),
                    contact.name.as_str(),
                    contact.phone.as_str(),
                    contact.relationship.clone(),
                    contact.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|error| classify_write_error(Partition::Contacts, error))?;
        Ok(())
    }

    /// Idempotent delete
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM contacts WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    /// Atomically swap the stored set for `contacts`
    pub async fn replace_all(&self, contacts: &[EmergencyContact]) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        if let Err(error) = self.conn.execute("DELETE FROM contacts", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
        for contact in contacts {
            if let Err(error) = self.upsert(contact).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        }
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }
}

/// libSQL storage for group memberships
pub struct LibSqlGroupRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlGroupRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn list(&self) -> Result<Vec<GroupMembership>> {
        let mut rows = self
            .conn
            .query(
                "SELECT group_id, group_name, status, active, updated_at
                 FROM group_memberships
                 ORDER BY updated_at DESC, group_id ASC",
                (),
            )
            .await?;

        let mut memberships = Vec::new();
        while let Some(row) = rows.next().await? {
            let group_id: String = row.get(0)?;
            let status: Option<String> = row.get(2)?;
            let updated_at: String = row.get(4)?;
            let parsed = parse_timestamp(&updated_at).and_then(|updated_at| {
                let status = status.map(|value| value.parse::<CheckInStatus>()).transpose()?;
                Ok((status, updated_at))
            });
            let (status, updated_at) = match parsed {
                Ok(values) => values,
                Err(error) => {
                    tracing::warn!("Skipping membership {group_id}: {error}");
                    continue;
                }
            };
            memberships.push(GroupMembership {
                group_id,
                group_name: row.get(1)?,
                status,
                active: row.get::<i64>(3)? != 0,
                updated_at,
            });
        }
        Ok(memberships)
    }

    pub async fn upsert(&self, membership: &GroupMembership) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO group_memberships (group_id, group_name, status, active, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    membership.group_id.as_str(),
                    membership.group_name.as_str(),
                    membership.status.map(|status| status.as_str().to_string()),
                    i64::from(membership.active),
                    membership.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|error| classify_write_error(Partition::GroupMemberships, error))?;
        Ok(())
    }

    pub async fn replace_all(&self, memberships: &[GroupMembership]) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        if let Err(error) = self.conn.execute("DELETE FROM group_memberships", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
        for membership in memberships {
            if let Err(error) = self.upsert(membership).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        }
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }
}
