//! Sync status state machine.
//!
//! Every status change goes through [`transition`]. Events that do not apply
//! to the current status are ignored rather than forcing a change.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Replication status shown to the user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    /// Changes are flowing
    Active,
    /// Caught up, waiting for new changes
    Paused,
    /// Transport lost; retried quietly, never shown as an error
    NetworkPaused,
    /// Unrecoverable failure such as a rejected token
    Error,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::NetworkPaused => "network-paused",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine, produced by the replication driver and the
/// sync context
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync cycle or live session begins
    Started,
    /// Documents were transferred
    Activity,
    /// Nothing left to transfer
    CaughtUp,
    /// A manual cycle finished
    Completed,
    /// Network-class failure
    NetworkLost(String),
    /// Any other failure
    Failed(String),
    /// Live session stopped or context disposed
    Stopped,
}

/// The transition table.
///
/// Returns `None` when the event leaves the status unchanged.
pub const fn transition(from: SyncStatus, event: &SyncEvent) -> Option<SyncStatus> {
    use SyncEvent as E;
    use SyncStatus as S;

    let to = match (from, event) {
        (S::Idle | S::Paused | S::NetworkPaused | S::Error, E::Started) => S::Syncing,
        (S::Syncing | S::Paused | S::NetworkPaused, E::Activity) => S::Active,
        (S::Syncing | S::Active | S::NetworkPaused, E::CaughtUp) => S::Paused,
        (S::Syncing | S::Active | S::Paused | S::NetworkPaused, E::Completed)
        | (S::Syncing | S::Active | S::Paused | S::NetworkPaused | S::Error, E::Stopped) => {
            S::Idle
        }
        (S::Idle | S::Syncing | S::Active | S::Paused, E::NetworkLost(_)) => S::NetworkPaused,
        (S::Idle | S::Syncing | S::Active | S::Paused | S::NetworkPaused, E::Failed(_)) => S::Error,
        _ => return None,
    };
    Some(to)
}

/// Process-wide sync state; lives in memory only
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_sync_time: None,
            last_error: None,
        }
    }
}

impl SyncState {
    /// Apply an event; returns whether anything observable changed
    pub fn apply(&mut self, event: &SyncEvent) -> bool {
        let Some(next) = transition(self.status, event) else {
            return false;
        };

        match event {
            SyncEvent::Completed | SyncEvent::CaughtUp => {
                self.last_sync_time = Some(Utc::now());
                self.last_error = None;
            }
            SyncEvent::Failed(message) => self.last_error = Some(message.clone()),
            _ => {}
        }
        self.status = next;
        true
    }

    /// Only unrecoverable failures are surfaced
    pub const fn visible_error(&self) -> Option<&String> {
        match self.status {
            SyncStatus::Error => self.last_error.as_ref(),
            _ => None,
        }
    }
}
