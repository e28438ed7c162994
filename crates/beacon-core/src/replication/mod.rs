//! Two-way replication of the check-in partition over a changes feed.

mod driver;
mod http;

use std::future::Future;
use std::time::Duration;

use crate::models::StatusDocument;
use crate::remote::RemoteResult;

pub use driver::{ReplicationDriver, ReplicationReport};
pub use http::HttpChangeFeed;

/// Longest wait between live retries
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Documents changed since a checkpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub docs: Vec<StatusDocument>,
    /// Checkpoint to resume from next time
    pub last_seq: String,
    /// More changes are waiting behind this batch
    pub has_more: bool,
}

/// Per-document outcome of a push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Doc ids the remote stored
    pub accepted: Vec<String>,
    /// Doc ids the remote already holds in a different revision
    pub conflicts: Vec<String>,
    /// Doc ids the remote turned down for reasons a retry will not change
    pub refused: Vec<String>,
}

/// Abstract bidirectional log replication endpoint
pub trait ChangeFeed: Send + Sync + 'static {
    /// Stable name used to key the stored checkpoint
    fn name(&self) -> &str;

    fn pull_changes(
        &self,
        since: Option<&str>,
    ) -> impl Future<Output = RemoteResult<ChangeBatch>> + Send;

    /// Like [`ChangeFeed::pull_changes`], but hold the request open for up
    /// to `wait` when nothing has changed since `since`. An empty batch
    /// means the wait ran out.
    fn pull_changes_live(
        &self,
        since: Option<&str>,
        wait: Duration,
    ) -> impl Future<Output = RemoteResult<ChangeBatch>> + Send;

    fn push_changes(
        &self,
        docs: &[StatusDocument],
    ) -> impl Future<Output = RemoteResult<PushOutcome>> + Send;
}

/// Delay before the next live attempt: 1 s after the first failure, then
/// doubling, never above [`MAX_BACKOFF`]. Callers reset to zero after a
/// successful exchange.
pub fn next_backoff(previous: Duration) -> Duration {
    if previous.is_zero() {
        Duration::from_secs(1)
    } else {
        previous.saturating_mul(2).min(MAX_BACKOFF)
    }
}
