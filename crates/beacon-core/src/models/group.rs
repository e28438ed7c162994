//! Group membership and pending group actions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::DUPLICATE_WINDOW_MS;
use super::CheckInStatus;
use crate::util::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupActionKind {
    Join,
    Leave,
    Status,
}

/// A group action taken while offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAction {
    pub group_id: String,
    pub kind: GroupActionKind,
    #[serde(default)]
    pub status: Option<CheckInStatus>,
    /// Unix ms
    pub performed_at: i64,
}

impl GroupAction {
    #[must_use]
    pub fn new(group_id: impl Into<String>, kind: GroupActionKind) -> Self {
        Self {
            group_id: group_id.into(),
            kind,
            status: None,
            performed_at: now_millis(),
        }
    }

    #[must_use]
    pub fn status_update(group_id: impl Into<String>, status: CheckInStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::new(group_id, GroupActionKind::Status)
        }
    }

    pub fn is_duplicate_of(&self, other: &Self) -> bool {
        self.group_id == other.group_id
            && self.kind == other.kind
            && self.status == other.status
            && (self.performed_at - other.performed_at).abs() <= DUPLICATE_WINDOW_MS
    }
}

/// The user's membership in a group, editable offline on several devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembership {
    pub group_id: String,
    pub group_name: String,
    #[serde(default)]
    pub status: Option<CheckInStatus>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}
