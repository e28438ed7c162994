use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::report::{Delivery, FlushReport};
use super::QueuePayload;
use crate::db::{Database, LibSqlQueueRepository, QueueRepository};
use crate::error::{Error, Result};
use crate::events::{NoticeSink, SyncNotice};
use crate::models::QueuedItem;
use crate::remote::{RemoteAuthority, RemoteError};
use crate::services::LocalStore;

/// Capacity and retry policy shared by every queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub max_size: usize,
    pub max_retries: u32,
    /// Upper bound for one delivery attempt
    pub attempt_timeout: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_size: 50,
            max_retries: 3,
            attempt_timeout: Duration::from_millis(3_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored under `id`; `evicted` lists the ids dropped to make room
    Queued { id: String, evicted: Vec<String> },
    /// An equivalent item is already waiting
    Duplicate { existing_id: String },
}

impl EnqueueOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Queued { id, .. } => id,
            Self::Duplicate { existing_id } => existing_id,
        }
    }
}

/// Durable outbound queue for one payload type.
///
/// Items are delivered oldest first, one at a time. A flush requested while
/// another flush of the same queue is running is folded into the running one.
#[derive(Clone)]
pub struct OutboundQueue<T> {
    store: LocalStore,
    policy: QueuePolicy,
    notices: NoticeSink,
    running: Arc<Mutex<()>>,
    rerun: Arc<AtomicBool>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: QueuePayload> OutboundQueue<T> {
    pub fn new(store: LocalStore, policy: QueuePolicy, notices: NoticeSink) -> Self {
        Self {
            store,
            policy,
            notices,
            running: Arc::new(Mutex::new(())),
            rerun: Arc::new(AtomicBool::new(false)),
            _payload: PhantomData,
        }
    }

    pub const fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Queue a payload, dropping it if an equivalent one is already waiting
    pub async fn enqueue(&self, payload: T) -> Result<EnqueueOutcome> {
        let partition = T::PARTITION;
        let db = self.store.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let queued: Vec<QueuedItem<T>> = repo.list(partition).await?;
        if let Some(existing) = queued
            .iter()
            .find(|item| payload.is_duplicate_of(&item.payload))
        {
            tracing::debug!("Dropping duplicate of {} in {partition}", existing.id);
            return Ok(EnqueueOutcome::Duplicate {
                existing_id: existing.id.clone(),
            });
        }

        let mut evicted = Vec::new();
        let overflow = (queued.len() + 1).saturating_sub(self.policy.max_size);
        if overflow > 0 {
            evicted = repo.evict_oldest(partition, overflow).await?;
            tracing::warn!(
                "{partition} is full ({} items); evicted {} oldest",
                self.policy.max_size,
                evicted.len()
            );
        }

        let item = QueuedItem::new(payload);
        match self.push(&db, &repo, &item).await {
            Ok(()) => {}
            Err(Error::StorageQuotaExceeded { partition }) => {
                let freed = repo.evict_oldest(partition, 1).await?;
                self.notices.quota_evicted(partition, freed.len());
                evicted.extend(freed);
                self.push(&db, &repo, &item).await?;
            }
            Err(error) => return Err(error),
        }

        tracing::debug!("Queued {} in {partition}", item.id);
        Ok(EnqueueOutcome::Queued {
            id: item.id,
            evicted,
        })
    }

    async fn push(
        &self,
        db: &Database,
        repo: &LibSqlQueueRepository<'_>,
        item: &QueuedItem<T>,
    ) -> Result<()> {
        self.store.ensure_capacity(db, T::PARTITION).await?;
        repo.push(T::PARTITION, item).await
    }

    /// Queued items, oldest first
    pub async fn items(&self) -> Result<Vec<QueuedItem<T>>> {
        self.store.queued(T::PARTITION).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.queue_len(T::PARTITION).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.store.remove_queued(id).await
    }

    /// Deliver every queued item in order.
    ///
    /// The pass stops at the first retryable failure so later items never
    /// overtake an earlier one.
    pub async fn flush<R: RemoteAuthority>(&self, remote: &R) -> Result<FlushReport> {
        let mut report = FlushReport::new(T::PARTITION);
        let mut attempted = HashSet::new();
        let mut first = true;
        loop {
            let Ok(running) = self.running.try_lock() else {
                self.rerun.store(true, Ordering::SeqCst);
                if first {
                    tracing::debug!("Flush of {} already running; coalescing", T::PARTITION);
                    return Ok(FlushReport::coalesced(T::PARTITION));
                }
                break;
            };
            first = false;

            let blocked = loop {
                self.rerun.store(false, Ordering::SeqCst);
                let blocked = self.flush_pass(remote, &mut report, &mut attempted).await?;
                if blocked || !self.rerun.swap(false, Ordering::SeqCst) {
                    break blocked;
                }
                tracing::debug!("Re-running flush of {} for items queued mid-flight", T::PARTITION);
            };
            drop(running);

            // A request that lost the race for the lock after the last swap
            // has only left `rerun` behind
            if blocked || !self.rerun.load(Ordering::SeqCst) {
                break;
            }
        }

        report.remaining = self.len().await?;
        Ok(report)
    }

    /// Returns true when a retryable failure stopped the pass
    async fn flush_pass<R: RemoteAuthority>(
        &self,
        remote: &R,
        report: &mut FlushReport,
        attempted: &mut HashSet<String>,
    ) -> Result<bool> {
        let queue = T::PARTITION;
        let items = self.items().await?;

        for item in items {
            if !attempted.insert(item.id.clone()) {
                continue;
            }

            if item.is_exhausted(self.policy.max_retries) {
                self.store.remove_queued(&item.id).await?;
                report.exhausted += 1;
                report.abandoned.push(item.id.clone());
                tracing::warn!(
                    "Dropping {} from {queue} after {} failed attempts",
                    item.id,
                    item.retry_count
                );
                self.notices.emit(SyncNotice::DeliveryAbandoned {
                    queue,
                    local_id: item.id,
                    reason: format!("gave up after {} attempts", item.retry_count),
                });
                continue;
            }

            let attempt = tokio::time::timeout(
                self.policy.attempt_timeout,
                item.payload.deliver(remote),
            )
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Transient(format!(
                    "no response within {} ms",
                    self.policy.attempt_timeout.as_millis()
                )))
            });

            match attempt {
                Ok(server_id) => {
                    self.store.remove_queued(&item.id).await?;
                    tracing::debug!("Delivered {} from {queue} as {server_id:?}", item.id);
                    self.notices.emit(SyncNotice::Delivered {
                        queue,
                        local_id: item.id.clone(),
                        server_id: server_id.clone(),
                    });
                    report.deliveries.push(Delivery {
                        local_id: item.id,
                        server_id,
                    });
                }
                Err(RemoteError::Rejected { status, message }) => {
                    self.store.remove_queued(&item.id).await?;
                    report.rejected += 1;
                    report.abandoned.push(item.id.clone());
                    tracing::warn!("Server rejected {} from {queue} ({status}): {message}", item.id);
                    self.notices.emit(SyncNotice::DeliveryAbandoned {
                        queue,
                        local_id: item.id,
                        reason: format!("rejected with HTTP {status}: {message}"),
                    });
                }
                Err(error) => {
                    let retries = self.store.increment_retry(&item.id).await?;
                    report.retried += 1;
                    tracing::debug!(
                        "Delivery of {} from {queue} failed ({error}); retry count now {}",
                        item.id,
                        retries.unwrap_or_default()
                    );
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Partition;
    use crate::models::{AlertPayload, CheckInRecord, CheckInStatus, GroupAction, StatusPayload};
    use crate::services::StoreLimits;
    use crate::tests::FakeRemote;
    use pretty_assertions::assert_eq;

    async fn alert_queue() -> (OutboundQueue<AlertPayload>, NoticeSink) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let notices = NoticeSink::default();
        (
            OutboundQueue::new(store, QueuePolicy::default(), notices.clone()),
            notices,
        )
    }

    fn located(title: &str, lat: f64) -> AlertPayload {
        AlertPayload::new(title).with_location(lat, 10.0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_alerts_collapse_into_one_item() {
        let (queue, _) = alert_queue().await;

        let first = queue.enqueue(located("Fire", 40.71280)).await.unwrap();
        let second = queue.enqueue(located("FIRE", 40.71284)).await.unwrap();

        assert_eq!(
            second,
            EnqueueOutcome::Duplicate {
                existing_id: first.id().to_string()
            }
        );
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overflow_evicts_oldest_items() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let policy = QueuePolicy {
            max_size: 3,
            ..QueuePolicy::default()
        };
        let queue = OutboundQueue::new(store, policy, NoticeSink::default());

        for index in 0..5 {
            queue
                .enqueue(located(&format!("alert {index}"), f64::from(index)))
                .await
                .unwrap();
        }

        let titles = queue
            .items()
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.payload.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, ["alert 2", "alert 3", "alert 4"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quota_failure_evicts_and_warns_once() {
        let store = LocalStore::open_in_memory_with(StoreLimits {
            max_rows_per_partition: 2,
        })
        .await
        .unwrap();
        let notices = NoticeSink::default();
        let mut receiver = notices.subscribe();
        let queue: OutboundQueue<AlertPayload> =
            OutboundQueue::new(store, QueuePolicy::default(), notices);

        for index in 0..4 {
            let outcome = queue
                .enqueue(located(&format!("alert {index}"), f64::from(index)))
                .await
                .unwrap();
            assert!(matches!(outcome, EnqueueOutcome::Queued { .. }));
        }

        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(
            receiver.recv().await.unwrap(),
            SyncNotice::QuotaWarning {
                partition: Partition::AlertQueue,
                evicted: 1
            }
        );
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_delivers_in_order_and_reports_server_ids() {
        let (queue, notices) = alert_queue().await;
        let mut receiver = notices.subscribe();
        let remote = FakeRemote::default();

        let first = queue.enqueue(located("one", 1.0)).await.unwrap();
        queue.enqueue(located("two", 2.0)).await.unwrap();

        let report = queue.flush(&remote).await.unwrap();
        assert_eq!(report.delivered(), 2);
        assert_eq!(report.remaining, 0);
        assert_eq!(remote.alert_titles(), ["one", "two"]);
        assert_eq!(
            receiver.recv().await.unwrap(),
            SyncNotice::Delivered {
                queue: Partition::AlertQueue,
                local_id: first.id().to_string(),
                server_id: Some("srv-1".into()),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failure_keeps_item_and_stops_the_pass() {
        let (queue, _) = alert_queue().await;
        let remote = FakeRemote::default();
        remote.fail_next(RemoteError::Transient("connection reset".into()));

        queue.enqueue(located("one", 1.0)).await.unwrap();
        queue.enqueue(located("two", 2.0)).await.unwrap();

        let report = queue.flush(&remote).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(remote.call_count(), 1);

        let items = queue.items().await.unwrap();
        assert_eq!(items[0].retry_count, 1);
        assert_eq!(items[1].retry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejection_evicts_immediately() {
        let (queue, notices) = alert_queue().await;
        let mut receiver = notices.subscribe();
        let remote = FakeRemote::default();
        remote.fail_next(RemoteError::Rejected {
            status: 403,
            message: "forbidden".into(),
        });

        let queued = queue.enqueue(located("one", 1.0)).await.unwrap();
        let report = queue.flush(&remote).await.unwrap();

        assert_eq!(report.rejected, 1);
        assert!(queue.is_empty().await.unwrap());
        assert!(matches!(
            receiver.recv().await.unwrap(),
            SyncNotice::DeliveryAbandoned { local_id, .. } if local_id == queued.id()
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_items_are_dropped_without_a_call() {
        let (queue, _) = alert_queue().await;
        let remote = FakeRemote::default();
        let queued = queue.enqueue(located("one", 1.0)).await.unwrap();

        for _ in 0..3 {
            remote.fail_next(RemoteError::Transient("timeout".into()));
            queue.flush(&remote).await.unwrap();
        }
        assert_eq!(remote.call_count(), 3);

        let report = queue.flush(&remote).await.unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(remote.call_count(), 3);
        assert!(!queue.remove(queued.id()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_and_group_queues_use_their_own_partitions() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let notices = NoticeSink::default();
        let status: OutboundQueue<StatusPayload> =
            OutboundQueue::new(store.clone(), QueuePolicy::default(), notices.clone());
        let groups: OutboundQueue<GroupAction> =
            OutboundQueue::new(store.clone(), QueuePolicy::default(), notices);

        let check_in = CheckInRecord::new(CheckInStatus::Help);
        status.enqueue(check_in.to_payload()).await.unwrap();
        let again = status.enqueue(check_in.to_payload()).await.unwrap();
        assert!(matches!(again, EnqueueOutcome::Duplicate { .. }));
        groups
            .enqueue(GroupAction::status_update("g-1", CheckInStatus::Help))
            .await
            .unwrap();

        assert_eq!(store.queue_len(Partition::StatusQueue).await.unwrap(), 1);
        assert_eq!(store.queue_len(Partition::GroupActionQueue).await.unwrap(), 1);

        let remote = FakeRemote::default();
        assert_eq!(status.flush(&remote).await.unwrap().delivered(), 1);
        assert_eq!(groups.flush(&remote).await.unwrap().delivered(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_attempts_count_as_transient() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let policy = QueuePolicy {
            attempt_timeout: Duration::from_millis(20),
            ..QueuePolicy::default()
        };
        let queue: OutboundQueue<AlertPayload> =
            OutboundQueue::new(store, policy, NoticeSink::default());
        let remote = FakeRemote::default();
        remote.set_latency(Duration::from_millis(500));

        queue.enqueue(located("slow", 1.0)).await.unwrap();
        let report = queue.flush(&remote).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(queue.items().await.unwrap()[0].retry_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_flush_requests_deliver_everything_once() {
        let (queue, _) = alert_queue().await;
        let remote = FakeRemote::default();
        remote.set_latency(Duration::from_millis(2));

        let mut requests = Vec::new();
        for index in 0..20 {
            queue
                .enqueue(located(&format!("alert {index}"), f64::from(index)))
                .await
                .unwrap();
            let queue = queue.clone();
            let remote = remote.clone();
            requests.push(tokio::spawn(async move { queue.flush(&remote).await.unwrap() }));
        }
        for request in requests {
            request.await.unwrap();
        }

        assert!(queue.is_empty().await.unwrap());
        assert_eq!(remote.alert_titles().len(), 20);
    }
}
