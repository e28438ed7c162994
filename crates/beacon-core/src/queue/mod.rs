//! Outbound queues for actions that could not reach the remote authority.

mod outbound;
mod report;

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::Partition;
use crate::models::{AlertPayload, GroupAction, StatusPayload};
use crate::remote::{RemoteAuthority, RemoteResult};

pub use outbound::{EnqueueOutcome, OutboundQueue, QueuePolicy};
pub use report::{Delivery, FlushReport};

/// A payload type with its own queue
pub trait QueuePayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const PARTITION: Partition;

    /// Semantic duplicate check against an already queued payload
    fn is_duplicate_of(&self, queued: &Self) -> bool;

    /// Send the payload; resolves to the server-assigned id when there is one
    fn deliver<R: RemoteAuthority>(
        &self,
        remote: &R,
    ) -> impl Future<Output = RemoteResult<Option<String>>> + Send;
}

impl QueuePayload for AlertPayload {
    const PARTITION: Partition = Partition::AlertQueue;

    fn is_duplicate_of(&self, queued: &Self) -> bool {
        Self::is_duplicate_of(self, queued)
    }

    async fn deliver<R: RemoteAuthority>(&self, remote: &R) -> RemoteResult<Option<String>> {
        remote.post_alert(self).await.map(Some)
    }
}

impl QueuePayload for StatusPayload {
    const PARTITION: Partition = Partition::StatusQueue;

    /// The same check-in is only ever queued once
    fn is_duplicate_of(&self, queued: &Self) -> bool {
        self.doc_id == queued.doc_id
    }

    async fn deliver<R: RemoteAuthority>(&self, remote: &R) -> RemoteResult<Option<String>> {
        remote.post_status(self).await.map(|()| None)
    }
}

impl QueuePayload for GroupAction {
    const PARTITION: Partition = Partition::GroupActionQueue;

    fn is_duplicate_of(&self, queued: &Self) -> bool {
        Self::is_duplicate_of(self, queued)
    }

    async fn deliver<R: RemoteAuthority>(&self, remote: &R) -> RemoteResult<Option<String>> {
        remote.post_group_action(self).await.map(|()| None)
    }
}
