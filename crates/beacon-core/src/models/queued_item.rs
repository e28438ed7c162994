//! Outbound queue envelope

use serde::{Deserialize, Serialize};

use crate::util::{client_id, now_millis};

/// Generic envelope for an action waiting to reach the remote authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedItem<T> {
    /// Client-generated id (timestamp + random suffix)
    pub id: String,
    pub payload: T,
    /// Unix ms
    pub enqueued_at: i64,
    pub retry_count: u32,
}

impl<T> QueuedItem<T> {
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            id: client_id(),
            payload,
            enqueued_at: now_millis(),
            retry_count: 0,
        }
    }

    /// True once the item has used up its delivery attempts
    pub const fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}
