use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify, OnceCell};

use super::{next_backoff, ChangeBatch, ChangeFeed};
use crate::error::{Error, Result};
use crate::models::{CheckInFilter, CheckInRecord, StatusDocument};
use crate::services::LocalStore;
use crate::state::SyncEvent;

/// Check-ins pushed per request
const PUSH_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub pushed: usize,
    pub conflicts: usize,
    /// Check-ins the remote refused outright and that were settled locally
    pub refused: usize,
    pub pulled: usize,
}

impl ReplicationReport {
    pub const fn transferred(&self) -> usize {
        self.pushed + self.pulled
    }
}

/// Keeps the local check-in partition and the changes feed convergent.
///
/// Only this type sets `synced` on check-ins.
pub struct ReplicationDriver<F> {
    store: LocalStore,
    feed: Arc<F>,
    /// How long a live pull waits on the server for new changes
    live_wait: Duration,
    local_changes: Notify,
    indexes_ready: OnceCell<()>,
}

impl<F: ChangeFeed> ReplicationDriver<F> {
    pub fn new(store: LocalStore, feed: Arc<F>, live_wait: Duration) -> Self {
        Self {
            store,
            feed,
            live_wait,
            local_changes: Notify::new(),
            indexes_ready: OnceCell::new(),
        }
    }

    /// Wake a live session waiting on the feed so a new local check-in is
    /// pushed without waiting out the long poll.
    pub fn local_change(&self) {
        self.local_changes.notify_one();
    }

    /// Create the status query indexes once per driver
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.indexes_ready
            .get_or_try_init(|| async {
                self.store.ensure_status_indexes().await?;
                tracing::info!("Status indexes ready");
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Send unsynced check-ins, oldest first, and mark the ones the remote
    /// now holds as synced. Conflicting documents already exist remotely and
    /// keep the remote revision.
    pub async fn push(&self) -> Result<ReplicationReport> {
        let mut report = ReplicationReport::default();
        loop {
            let filter = CheckInFilter {
                limit: Some(PUSH_BATCH),
                ..CheckInFilter::unsynced()
            };
            let pending = self.store.check_ins(&filter).await?;
            if pending.is_empty() {
                break;
            }

            let docs = pending.iter().map(StatusDocument::from).collect::<Vec<_>>();
            let outcome = self.feed.push_changes(&docs).await?;
            for doc_id in &outcome.conflicts {
                tracing::warn!("Status document {doc_id} conflicts with the remote copy; keeping remote");
            }
            // Refused documents would come back first in every batch.
            for doc_id in &outcome.refused {
                tracing::warn!("Status document {doc_id} was refused by the remote; no longer pushing it");
            }

            let mut settled = outcome.accepted;
            settled.extend(outcome.conflicts.iter().cloned());
            let accepted = self.store.mark_synced(&settled).await?;
            let refused = self.store.mark_synced(&outcome.refused).await?;
            let marked = accepted + refused;
            report.pushed += accepted;
            report.conflicts += outcome.conflicts.len();
            report.refused += refused;

            if marked == 0 || pending.len() < PUSH_BATCH {
                break;
            }
        }
        if report.pushed > 0 {
            tracing::debug!("Pushed {} check-ins", report.pushed);
        }
        Ok(report)
    }

    /// Pull remote changes since the stored checkpoint
    pub async fn pull(&self) -> Result<ReplicationReport> {
        let mut report = ReplicationReport::default();
        loop {
            let since = self.store.load_checkpoint(self.feed.name()).await?;
            let batch = self.feed.pull_changes(since.as_deref()).await?;
            let (pulled, more) = self.apply_batch(since.as_deref(), batch).await?;
            report.pulled += pulled;
            if !more {
                break;
            }
        }
        if report.pulled > 0 {
            tracing::debug!("Pulled {} check-ins", report.pulled);
        }
        Ok(report)
    }

    /// Store a pulled batch and advance the checkpoint. Returns how many
    /// check-ins were new and whether the feed has more waiting.
    async fn apply_batch(&self, since: Option<&str>, batch: ChangeBatch) -> Result<(usize, bool)> {
        let doc_ids = batch
            .docs
            .iter()
            .map(|doc| doc.doc_id.clone())
            .collect::<Vec<_>>();
        let records = batch
            .docs
            .into_iter()
            .map(CheckInRecord::from)
            .collect::<Vec<_>>();
        let pulled = self.store.insert_replicated(&records).await?;
        // Local copies that came back through the feed are on the remote too.
        self.store.mark_synced(&doc_ids).await?;

        let advanced = since != Some(batch.last_seq.as_str());
        if advanced {
            self.store
                .save_checkpoint(self.feed.name(), &batch.last_seq)
                .await?;
        }
        Ok((pulled, batch.has_more && advanced))
    }

    /// One explicit push-then-pull exchange
    pub async fn sync_once(&self) -> Result<ReplicationReport> {
        self.ensure_indexes().await?;
        let pushed = self.push().await?;
        let pulled = self.pull().await?;
        Ok(ReplicationReport {
            pushed: pushed.pushed,
            conflicts: pushed.conflicts,
            refused: pushed.refused,
            pulled: pulled.pulled,
        })
    }

    /// One live round: push, then hold a long poll on the feed until
    /// something arrives, a local check-in is recorded, or `stop` fires.
    /// Returns `None` once the session should end.
    async fn live_round(
        &self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<ReplicationReport>> {
        self.ensure_indexes().await?;
        let mut report = self.push().await?;

        let since = self.store.load_checkpoint(self.feed.name()).await?;
        let batch = tokio::select! {
            batch = self.feed.pull_changes_live(since.as_deref(), self.live_wait) => batch?,
            () = self.local_changes.notified() => return Ok(Some(report)),
            changed = stop.changed() => {
                return Ok(if changed.is_err() || *stop.borrow() { None } else { Some(report) });
            }
        };

        let (pulled, more) = self.apply_batch(since.as_deref(), batch).await?;
        report.pulled = pulled;
        if more {
            report.pulled += self.pull().await?.pulled;
        }
        Ok(Some(report))
    }

    /// Run live replication until `stop` flips to true.
    ///
    /// Network-class failures back off and retry; any other failure ends
    /// the session with the error after reporting it through `dispatch`.
    pub async fn run_live(
        &self,
        dispatch: &(dyn Fn(SyncEvent) + Send + Sync),
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut backoff = Duration::ZERO;
        dispatch(SyncEvent::Started);

        while !*stop.borrow() {
            let backoff_delay = match self.live_round(&mut stop).await {
                Ok(Some(report)) => {
                    backoff = Duration::ZERO;
                    if report.transferred() > 0 {
                        dispatch(SyncEvent::Activity);
                    }
                    dispatch(SyncEvent::CaughtUp);
                    continue;
                }
                Ok(None) => break,
                Err(error) if error.is_network_class() => {
                    backoff = next_backoff(backoff);
                    tracing::debug!("Live replication paused ({error}); retrying in {backoff:?}");
                    dispatch(SyncEvent::NetworkLost(error.to_string()));
                    backoff
                }
                Err(error) => {
                    tracing::error!("Live replication failed: {error}");
                    dispatch(SyncEvent::Failed(error.to_string()));
                    return Err(error);
                }
            };

            tokio::select! {
                () = tokio::time::sleep(backoff_delay) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
