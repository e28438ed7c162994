//! Emergency contact model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default capacity of the contact list
pub const MAX_CONTACTS: usize = 5;

/// A person notified when the user raises an alert
///
/// `phone` is plaintext here; it is obfuscated only inside the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EmergencyContact {
    #[must_use]
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            phone: phone.into(),
            relationship: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = Some(relationship.into());
        self
    }

    /// Bump `updated_at` after a local edit
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
