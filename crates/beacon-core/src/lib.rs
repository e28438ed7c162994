//! beacon-core - Offline sync core for Beacon
//!
//! This crate holds everything needed to record check-ins, alerts and
//! contacts while disconnected and reconcile them with the remote authority
//! once connectivity returns: the durable local store, outbound queues,
//! connectivity monitoring, changes-feed replication and last-write-wins
//! merging. Interfaces (the CLI, mobile shells) drive it through
//! [`SyncContext`].

pub mod auth;
pub mod codec;
pub mod config;
pub mod connectivity;
pub mod contacts;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod merge;
pub mod models;
pub mod queue;
pub mod remote;
pub mod replication;
pub mod services;
pub mod snapshots;
pub mod state;
pub mod util;

#[cfg(test)]
mod tests;

pub use config::{parse_config, SyncConfig};
pub use context::{ManualSyncReport, SyncContext};
pub use error::{Error, Result};
pub use events::SyncNotice;
pub use models::{AlertPayload, CheckInRecord, CheckInStatus, EmergencyContact};
pub use remote::{HttpRemote, RemoteAuthority, RemoteError};
pub use replication::{ChangeFeed, HttpChangeFeed};
pub use services::{LocalStore, StoreLimits};
pub use state::{SyncEvent, SyncState, SyncStatus};
