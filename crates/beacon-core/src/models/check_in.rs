//! Check-in model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Safety status reported by a check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInStatus {
    Safe,
    Help,
}

impl CheckInStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Help => "help",
        }
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckInStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "help" => Ok(Self::Help),
            other => Err(Error::InvalidInput(format!(
                "unknown check-in status '{other}' (expected safe or help)"
            ))),
        }
    }
}

/// A safety check-in recorded on this device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInRecord {
    /// Local autoincrement key (0 until stored)
    pub id: i64,
    /// Replication document id, stable across devices
    pub doc_id: String,
    pub status: CheckInStatus,
    /// Unix ms
    pub timestamp: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub user_id: Option<String>,
    /// Set only by the replication driver
    pub synced: bool,
}

impl CheckInRecord {
    /// Create an unsynced check-in stamped with the current time
    #[must_use]
    pub fn new(status: CheckInStatus) -> Self {
        Self {
            id: 0,
            doc_id: Uuid::now_v7().to_string(),
            status,
            timestamp: chrono::Utc::now().timestamp_millis(),
            latitude: None,
            longitude: None,
            user_id: None,
            synced: false,
        }
    }

    #[must_use]
    pub const fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Outbound copy posted to `POST /status`
    #[must_use]
    pub fn to_payload(&self) -> StatusPayload {
        StatusPayload {
            check_in_id: self.id,
            doc_id: self.doc_id.clone(),
            status: self.status,
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            user_id: self.user_id.clone(),
        }
    }
}

/// Transient queue copy of a check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub check_in_id: i64,
    pub doc_id: String,
    pub status: CheckInStatus,
    pub timestamp: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub user_id: Option<String>,
}

/// Replicated form of a check-in as exchanged over the changes feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(rename = "_id")]
    pub doc_id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub status: CheckInStatus,
    pub timestamp: i64,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

impl From<&CheckInRecord> for StatusDocument {
    fn from(record: &CheckInRecord) -> Self {
        Self {
            doc_id: record.doc_id.clone(),
            rev: None,
            status: record.status,
            timestamp: record.timestamp,
            latitude: record.latitude,
            longitude: record.longitude,
            user_id: record.user_id.clone(),
        }
    }
}

impl From<StatusDocument> for CheckInRecord {
    fn from(doc: StatusDocument) -> Self {
        Self {
            id: 0,
            doc_id: doc.doc_id,
            status: doc.status,
            timestamp: doc.timestamp,
            latitude: doc.latitude,
            longitude: doc.longitude,
            user_id: doc.user_id,
            synced: true,
        }
    }
}

/// Query over the check-in partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckInFilter {
    pub synced: Option<bool>,
    pub user_id: Option<String>,
    /// Only records at or after this Unix ms timestamp
    pub since: Option<i64>,
    pub oldest_first: bool,
    pub limit: Option<usize>,
}

impl CheckInFilter {
    /// Oldest unsynced record first
    #[must_use]
    pub const fn unsynced() -> Self {
        Self {
            synced: Some(false),
            user_id: None,
            since: None,
            oldest_first: true,
            limit: None,
        }
    }
}
