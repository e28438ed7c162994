//! Notices emitted to the UI layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::db::Partition;
use crate::state::SyncState;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    /// Debounced connectivity transition
    Connectivity { online: bool },
    /// The sync state changed
    Status(SyncState),
    /// A queued item reached the server. `local_id` is the client id the item
    /// was queued under; `server_id` is set when the server assigned one.
    Delivered {
        queue: Partition,
        local_id: String,
        server_id: Option<String>,
    },
    /// A queued item was dropped without being delivered
    DeliveryAbandoned {
        queue: Partition,
        local_id: String,
        reason: String,
    },
    /// Stored data was evicted to make room; sent once per session
    QuotaWarning { partition: Partition, evicted: usize },
    /// Human-readable summary of a sync cycle
    Summary(String),
}

/// Cloneable sender half of the notice channel
#[derive(Debug, Clone)]
pub struct NoticeSink {
    sender: broadcast::Sender<SyncNotice>,
    quota_warned: Arc<AtomicBool>,
}

impl NoticeSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            quota_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.sender.subscribe()
    }

    /// Nobody listening is not an error
    pub fn emit(&self, notice: SyncNotice) {
        self.sender.send(notice).ok();
    }

    pub(crate) fn quota_evicted(&self, partition: Partition, evicted: usize) {
        tracing::warn!("Storage quota reached for {partition}; evicted {evicted} oldest entries");
        if !self.quota_warned.swap(true, Ordering::SeqCst) {
            self.emit(SyncNotice::QuotaWarning { partition, evicted });
        }
    }
}

impl Default for NoticeSink {
    fn default() -> Self {
        Self::new(256)
    }
}
