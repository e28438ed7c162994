//! Durable local store for Beacon
//!
//! One libSQL database file with one table per partition. Repositories borrow
//! a connection; [`crate::services::LocalStore`] owns it.

mod check_in_repository;
mod connection;
mod contact_repository;
mod migrations;
mod queue_repository;
mod resource_repository;
mod snapshot_repository;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use check_in_repository::{CheckInRepository, LibSqlCheckInRepository};
pub use connection::Database;
pub use contact_repository::{LibSqlContactRepository, LibSqlGroupRepository};
pub use migrations::CURRENT_VERSION;
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
pub use resource_repository::{
    LibSqlCheckpointRepository, LibSqlCredentialRepository, LibSqlResourceRepository,
};
pub use snapshot_repository::LibSqlSnapshotRepository;

/// Named storage partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    CheckIns,
    AlertQueue,
    StatusQueue,
    GroupActionQueue,
    Contacts,
    MapSnapshots,
    GroupMemberships,
    SavedResources,
}

impl Partition {
    pub const ALL: [Self; 8] = [
        Self::CheckIns,
        Self::AlertQueue,
        Self::StatusQueue,
        Self::GroupActionQueue,
        Self::Contacts,
        Self::MapSnapshots,
        Self::GroupMemberships,
        Self::SavedResources,
    ];

    /// Namespaced physical key, also stored in `queued_items.queue`
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::CheckIns => "beacon:status_history",
            Self::AlertQueue => "beacon:offline_alerts_queue",
            Self::StatusQueue => "beacon:offline_status_queue",
            Self::GroupActionQueue => "beacon:pending_group_actions",
            Self::Contacts => "beacon:offline_contacts",
            Self::MapSnapshots => "beacon:cached_map_snapshots",
            Self::GroupMemberships => "beacon:group_memberships",
            Self::SavedResources => "beacon:saved_resources",
        }
    }

    /// Human-readable plural used in sync summaries
    pub const fn label(self) -> &'static str {
        match self {
            Self::CheckIns => "check-ins",
            Self::AlertQueue => "alerts",
            Self::StatusQueue => "status updates",
            Self::GroupActionQueue => "group actions",
            Self::Contacts => "contacts",
            Self::MapSnapshots => "map snapshots",
            Self::GroupMemberships => "group memberships",
            Self::SavedResources => "saved resources",
        }
    }

    pub const fn is_queue(self) -> bool {
        matches!(
            self,
            Self::AlertQueue | Self::StatusQueue | Self::GroupActionQueue
        )
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_key())
    }
}

/// Map a failed write onto the error taxonomy.
///
/// `SQLite` reports a full disk or an exhausted page budget as
/// `SQLITE_FULL`; that is a quota problem for the caller, not a crash.
pub(crate) fn classify_write_error(partition: Partition, error: libsql::Error) -> crate::Error {
    let message = error.to_string().to_ascii_lowercase();
    if message.contains("database or disk is full") || message.contains("sqlite_full") {
        crate::Error::StorageQuotaExceeded { partition }
    } else {
        crate::Error::LibSql(error)
    }
}
