//! The sync context: one explicit handle owning every sync component.
//!
//! [`SyncContext::init`] wires the queues, the connectivity monitor and the
//! replication driver together and starts a scheduler task. The scheduler
//! reacts to three triggers: debounced connectivity transitions, a periodic
//! retry tick, and manual requests. [`SyncContext::dispose`] stops it.
//! Contexts share nothing, so several can run side by side.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::contacts::{ContactBook, GroupBook};
use crate::error::{Error, Result};
use crate::events::{NoticeSink, SyncNotice};
use crate::models::{
    AlertPayload, CheckInFilter, CheckInRecord, GroupAction, GroupMembership, MapSnapshot,
    StatusPayload,
};
use crate::queue::{EnqueueOutcome, FlushReport, OutboundQueue};
use crate::remote::RemoteAuthority;
use crate::replication::{ChangeFeed, ReplicationDriver, ReplicationReport};
use crate::services::LocalStore;
use crate::snapshots::MapSnapshotCache;
use crate::state::{SyncEvent, SyncState};

/// Outcome of [`SyncContext::sync_now`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualSyncReport {
    pub flushes: Vec<FlushReport>,
    pub replication: ReplicationReport,
    pub contacts: usize,
    pub memberships: usize,
}

struct Shared<R, F> {
    store: LocalStore,
    remote: Arc<R>,
    config: SyncConfig,
    alerts: OutboundQueue<AlertPayload>,
    statuses: OutboundQueue<StatusPayload>,
    group_actions: OutboundQueue<GroupAction>,
    snapshots: MapSnapshotCache,
    contacts: ContactBook,
    groups: GroupBook,
    monitor: ConnectivityMonitor,
    driver: Arc<ReplicationDriver<F>>,
    notices: NoticeSink,
    state: Mutex<SyncState>,
    manual: Notify,
    cycle: tokio::sync::Mutex<()>,
}

pub struct SyncContext<R, F> {
    shared: Arc<Shared<R, F>>,
    shutdown: watch::Sender<bool>,
    scheduler: Option<JoinHandle<()>>,
}

impl<R: RemoteAuthority, F: ChangeFeed> SyncContext<R, F> {
    /// Build every component and start the scheduler.
    ///
    /// Must be called inside a tokio runtime. The context starts offline and
    /// checks the remote right away.
    pub fn init(store: LocalStore, remote: Arc<R>, feed: Arc<F>, config: SyncConfig) -> Result<Self> {
        let config = config.validated()?;
        let notices = NoticeSink::default();
        let policy = config.queue_policy();

        let shared = Arc::new(Shared {
            alerts: OutboundQueue::new(store.clone(), policy, notices.clone()),
            statuses: OutboundQueue::new(store.clone(), policy, notices.clone()),
            group_actions: OutboundQueue::new(store.clone(), policy, notices.clone()),
            snapshots: MapSnapshotCache::new(
                store.clone(),
                policy.max_retries,
                policy.attempt_timeout,
            ),
            contacts: ContactBook::new(store.clone(), config.codec()?, config.max_contacts),
            groups: GroupBook::new(store.clone()),
            monitor: ConnectivityMonitor::start(false, config.reconnect_debounce()),
            driver: Arc::new(ReplicationDriver::new(
                store.clone(),
                feed,
                config.live_poll_wait(),
            )),
            store,
            remote,
            config,
            notices,
            state: Mutex::new(SyncState::default()),
            manual: Notify::new(),
            cycle: tokio::sync::Mutex::new(()),
        });

        if shared.store.is_degraded() {
            tracing::warn!("Sync context running on in-memory storage; nothing will survive a restart");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = tokio::spawn(schedule(Arc::clone(&shared), shutdown_rx));
        tracing::info!("Sync context started");

        Ok(Self {
            shared,
            shutdown,
            scheduler: Some(scheduler),
        })
    }

    /// Stop the scheduler and any live replication session
    pub async fn dispose(mut self) {
        self.shutdown.send_replace(true);
        if let Some(scheduler) = self.scheduler.take() {
            if let Err(error) = scheduler.await {
                tracing::warn!("Sync scheduler ended abnormally: {error}");
            }
        }
        self.shared.dispatch(SyncEvent::Stopped);
        tracing::info!("Sync context disposed");
    }

    pub fn state(&self) -> SyncState {
        self.shared.snapshot_state()
    }

    /// Feed an event through the state machine and broadcast the result
    pub fn dispatch(&self, event: SyncEvent) {
        self.shared.dispatch(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.shared.notices.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.shared.monitor.is_online()
    }

    /// Pass a raw platform connectivity observation to the monitor
    pub fn report_connectivity(&self, online: bool) {
        self.shared.monitor.report(online);
    }

    /// Ask the scheduler for a flush of every queue
    pub fn request_flush(&self) {
        self.shared.manual.notify_one();
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.shared.store
    }

    pub fn alerts(&self) -> &OutboundQueue<AlertPayload> {
        &self.shared.alerts
    }

    pub fn statuses(&self) -> &OutboundQueue<StatusPayload> {
        &self.shared.statuses
    }

    pub fn group_actions(&self) -> &OutboundQueue<GroupAction> {
        &self.shared.group_actions
    }

    pub fn snapshots(&self) -> &MapSnapshotCache {
        &self.shared.snapshots
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.shared.contacts
    }

    pub fn groups(&self) -> &GroupBook {
        &self.shared.groups
    }

    /// Record a check-in locally and queue its copy for `POST /status`.
    ///
    /// When the store is full, the oldest already-synced check-in makes room.
    pub async fn record_check_in(&self, record: CheckInRecord) -> Result<CheckInRecord> {
        let store = &self.shared.store;
        let id = match store.add_check_in(&record).await {
            Err(Error::StorageQuotaExceeded { partition }) => {
                let oldest_synced = store
                    .check_ins(&CheckInFilter {
                        synced: Some(true),
                        oldest_first: true,
                        limit: Some(1),
                        ..CheckInFilter::default()
                    })
                    .await?;
                let Some(oldest) = oldest_synced.first() else {
                    return Err(Error::StorageQuotaExceeded { partition });
                };
                store.delete_check_in(oldest.id).await?;
                self.shared.notices.quota_evicted(partition, 1);
                store.add_check_in(&record).await?
            }
            other => other?,
        };

        let record = CheckInRecord { id, ..record };
        self.shared.statuses.enqueue(record.to_payload()).await?;
        tracing::debug!("Recorded {} check-in {}", record.status, record.doc_id);
        self.shared.driver.local_change();
        self.nudge();
        Ok(record)
    }

    /// Queue an alert, caching its map snapshot under the alert's queue id
    pub async fn raise_alert(
        &self,
        alert: AlertPayload,
        snapshot: Option<MapSnapshot>,
    ) -> Result<EnqueueOutcome> {
        let outcome = self.shared.alerts.enqueue(alert).await?;
        if let EnqueueOutcome::Queued { evicted, .. } = &outcome {
            for evicted_id in evicted {
                self.shared.snapshots.discard(evicted_id).await?;
            }
        }
        if let Some(snapshot) = snapshot {
            self.shared.snapshots.store(outcome.id(), snapshot).await?;
        }
        self.nudge();
        Ok(outcome)
    }

    /// Apply a group action locally and queue it for the server
    pub async fn group_action(&self, action: GroupAction) -> Result<GroupMembership> {
        let membership = self.shared.groups.apply(&action).await?;
        self.shared.group_actions.enqueue(action).await?;
        self.nudge();
        Ok(membership)
    }

    /// Flush every queue now, alerts first so their snapshots can follow
    pub async fn flush_all(&self) -> Result<Vec<FlushReport>> {
        self.shared.flush_all().await
    }

    /// Explicit push-then-pull replication plus queue and contact sync.
    ///
    /// Network failures leave the state network-paused and are returned to
    /// the caller; anything else puts the state into error.
    pub async fn sync_now(&self) -> Result<ManualSyncReport> {
        let shared = &self.shared;
        shared.dispatch(SyncEvent::Started);

        let outcome = async {
            let flushes = shared.flush_all().await?;
            let replication = shared.driver.sync_once().await?;
            let contacts = shared.contacts.sync(shared.remote.as_ref()).await?.len();
            let memberships = shared.groups.sync(shared.remote.as_ref()).await?.len();
            Ok::<_, Error>(ManualSyncReport {
                flushes,
                replication,
                contacts,
                memberships,
            })
        }
        .await;

        match outcome {
            Ok(report) => {
                if report.replication.transferred() > 0 {
                    shared.dispatch(SyncEvent::Activity);
                }
                shared.dispatch(SyncEvent::Completed);
                tracing::info!(
                    "Manual sync finished: {} pushed, {} pulled",
                    report.replication.pushed,
                    report.replication.pulled
                );
                Ok(report)
            }
            Err(error) => {
                shared.report_failure(&error);
                Err(error)
            }
        }
    }

    fn nudge(&self) {
        if self.shared.monitor.is_online() {
            self.request_flush();
        }
    }
}

impl<R, F> Drop for SyncContext<R, F> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
        }
    }
}

impl<R: RemoteAuthority, F: ChangeFeed> Shared<R, F> {
    fn snapshot_state(&self) -> SyncState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispatch(&self, event: SyncEvent) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.apply(&event).then(|| state.clone())
        };
        if let Some(state) = changed {
            tracing::debug!("Sync status is now {}", state.status);
            self.notices.emit(SyncNotice::Status(state));
        }
    }

    fn report_failure(&self, error: &Error) {
        if error.is_network_class() {
            tracing::debug!("Sync paused by network failure: {error}");
            self.dispatch(SyncEvent::NetworkLost(error.to_string()));
        } else {
            tracing::error!("Sync failed: {error}");
            self.dispatch(SyncEvent::Failed(error.to_string()));
        }
    }

    async fn flush_all(&self) -> Result<Vec<FlushReport>> {
        let _cycle = self.cycle.lock().await;
        let remote = self.remote.as_ref();

        let alerts = self.alerts.flush(remote).await?;
        for delivery in &alerts.deliveries {
            if let Some(server_id) = &delivery.server_id {
                self.snapshots.remap(&delivery.local_id, server_id).await?;
            }
        }
        for abandoned_id in &alerts.abandoned {
            self.snapshots.discard(abandoned_id).await?;
        }
        let snapshots = self.snapshots.flush(remote).await?;
        let statuses = self.statuses.flush(remote).await?;
        let groups = self.group_actions.flush(remote).await?;

        let reports = vec![alerts, snapshots, statuses, groups];
        let lines = reports
            .iter()
            .filter_map(FlushReport::summary)
            .collect::<Vec<_>>();
        if !lines.is_empty() {
            let summary = lines.join("; ");
            tracing::info!("{summary}");
            self.notices.emit(SyncNotice::Summary(summary));
        }
        Ok(reports)
    }
}

/// A running live replication session
struct LiveSession {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LiveSession {
    fn start<R: RemoteAuthority, F: ChangeFeed>(shared: &Arc<Shared<R, F>>) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::clone(shared);
        let task = tokio::spawn(async move {
            let events = Arc::clone(&shared);
            let dispatch = move |event: SyncEvent| events.dispatch(event);
            if let Err(error) = shared.driver.run_live(&dispatch, stop_rx).await {
                tracing::debug!("Live replication ended: {error}");
            }
        });
        Self { stop, task }
    }

    async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(error) = self.task.await {
            tracing::warn!("Live replication task ended abnormally: {error}");
        }
    }
}

/// Start a flush on `flushes`.
///
/// One flush running plus one waiting on the cycle lock covers any trigger,
/// so further requests are dropped while two are in the set.
fn spawn_flush<R: RemoteAuthority, F: ChangeFeed>(
    flushes: &mut JoinSet<()>,
    shared: &Arc<Shared<R, F>>,
    reason: &'static str,
) {
    if flushes.len() >= 2 {
        tracing::debug!("Flush already pending; ignoring {reason}");
        return;
    }
    let shared = Arc::clone(shared);
    flushes.spawn(async move {
        tracing::debug!("Flushing outbound queues ({reason})");
        if let Err(error) = shared.flush_all().await {
            shared.report_failure(&error);
        }
    });
}

fn log_flush_exit(result: std::result::Result<(), JoinError>) {
    if let Err(error) = result {
        tracing::warn!("Flush task ended abnormally: {error}");
    }
}

async fn schedule<R: RemoteAuthority, F: ChangeFeed>(
    shared: Arc<Shared<R, F>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connectivity = shared.monitor.subscribe();
    let mut retry = tokio::time::interval(shared.config.periodic_retry());
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut live: Option<LiveSession> = None;
    let mut flushes = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *connectivity.borrow_and_update();
                shared.notices.emit(SyncNotice::Connectivity { online });
                if online {
                    if live.is_none() {
                        live = Some(LiveSession::start(&shared));
                    }
                    spawn_flush(&mut flushes, &shared, "connectivity restored");
                } else {
                    if let Some(session) = live.take() {
                        session.stop().await;
                    }
                    shared.dispatch(SyncEvent::NetworkLost("device went offline".into()));
                }
            }
            _ = retry.tick() => {
                if shared.monitor.is_online() {
                    spawn_flush(&mut flushes, &shared, "periodic retry");
                } else {
                    shared.monitor.check_reachability(shared.remote.as_ref()).await;
                }
            }
            Some(result) = flushes.join_next(), if !flushes.is_empty() => {
                log_flush_exit(result);
            }
            () = shared.manual.notified() => {
                spawn_flush(&mut flushes, &shared, "manual trigger");
            }
        }
    }

    if let Some(session) = live.take() {
        session.stop().await;
    }
    // Let deliveries already in flight complete
    while let Some(result) = flushes.join_next().await {
        log_flush_exit(result);
    }
    tracing::debug!("Sync scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Partition;
    use crate::models::{CheckInStatus, GroupActionKind};
    use crate::remote::RemoteError;
    use crate::state::SyncStatus;
    use crate::tests::FakeRemote;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn fast_config() -> SyncConfig {
        SyncConfig {
            reconnect_debounce_ms: 10,
            ..SyncConfig::default()
        }
    }

    async fn context(reachable: bool) -> (SyncContext<FakeRemote, FakeRemote>, FakeRemote) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = FakeRemote::default();
        remote.set_reachable(reachable);
        let context = SyncContext::init(
            store,
            Arc::new(remote.clone()),
            Arc::new(remote.clone()),
            fast_config(),
        )
        .unwrap();
        (context, remote)
    }

    async fn wait_for(
        notices: &mut broadcast::Receiver<SyncNotice>,
        matches: impl Fn(&SyncNotice) -> bool,
    ) -> SyncNotice {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notice = notices.recv().await.unwrap();
                if matches(&notice) {
                    return notice;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_in_is_stored_and_queued() {
        let (context, remote) = context(false).await;

        let record = context
            .record_check_in(CheckInRecord::new(CheckInStatus::Help).with_location(1.0, 2.0))
            .await
            .unwrap();
        assert!(record.id > 0);
        assert_eq!(context.statuses().len().await.unwrap(), 1);

        context.flush_all().await.unwrap();
        assert!(context.statuses().is_empty().await.unwrap());
        assert_eq!(remote.statuses()[0].check_in_id, record.id);
        assert!(!context.store().check_in(record.id).await.unwrap().unwrap().synced);

        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_sync_replicates_and_returns_to_idle() {
        let (context, remote) = context(false).await;
        let record = context
            .record_check_in(CheckInRecord::new(CheckInStatus::Safe))
            .await
            .unwrap();

        let report = context.sync_now().await.unwrap();
        assert_eq!(report.replication.pushed, 1);
        assert_eq!(remote.feed_doc_count(), 1);
        assert!(context.store().check_in(record.id).await.unwrap().unwrap().synced);

        let state = context.state();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.last_sync_time.is_some());
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn network_failure_pauses_without_visible_error() {
        let (context, remote) = context(false).await;
        remote.fail_feed_next(RemoteError::Transient("connection refused".into()));

        assert!(context.sync_now().await.is_err());
        let state = context.state();
        assert_eq!(state.status, SyncStatus::NetworkPaused);
        assert_eq!(state.visible_error(), None);
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejection_surfaces_as_error() {
        let (context, remote) = context(false).await;
        remote.fail_feed_next(RemoteError::Rejected {
            status: 401,
            message: "token expired".into(),
        });

        assert!(context.sync_now().await.is_err());
        let state = context.state();
        assert_eq!(state.status, SyncStatus::Error);
        assert!(state.visible_error().unwrap().contains("401"));
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_changes_are_broadcast() {
        let (context, _remote) = context(false).await;
        let mut notices = context.subscribe();

        context.dispatch(SyncEvent::Started);
        context.dispatch(SyncEvent::Started);
        context.dispatch(SyncEvent::CaughtUp);

        let first = wait_for(&mut notices, |notice| matches!(notice, SyncNotice::Status(_))).await;
        assert!(matches!(first, SyncNotice::Status(state) if state.status == SyncStatus::Syncing));
        let second = wait_for(&mut notices, |notice| matches!(notice, SyncNotice::Status(_))).await;
        assert!(matches!(second, SyncNotice::Status(state) if state.status == SyncStatus::Paused));
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reachable_remote_gets_queued_alerts_delivered() {
        let (context, remote) = context(true).await;
        let mut notices = context.subscribe();
        context
            .raise_alert(AlertPayload::new("Trapped"), None)
            .await
            .unwrap();

        wait_for(&mut notices, |notice| matches!(notice, SyncNotice::Delivered { .. })).await;
        assert_eq!(remote.alert_titles(), ["Trapped"]);
        assert!(context.is_online());
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reported_outage_pauses_sync() {
        let (context, remote) = context(true).await;
        let mut notices = context.subscribe();
        wait_for(&mut notices, |notice| {
            matches!(notice, SyncNotice::Connectivity { online: true })
        })
        .await;

        remote.set_reachable(false);
        context.report_connectivity(false);
        wait_for(&mut notices, |notice| {
            matches!(notice, SyncNotice::Connectivity { online: false })
        })
        .await;
        wait_for(&mut notices, |notice| {
            matches!(notice, SyncNotice::Status(state) if state.status == SyncStatus::NetworkPaused)
        })
        .await;
        assert!(!context.is_online());
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_action_updates_membership_and_queues() {
        let (context, remote) = context(false).await;
        let membership = context
            .group_action(GroupAction::new("g-7", GroupActionKind::Join))
            .await
            .unwrap();
        assert!(membership.active);
        assert_eq!(context.group_actions().len().await.unwrap(), 1);

        context.flush_all().await.unwrap();
        assert_eq!(remote.group_actions()[0].group_id, "g-7");
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn contexts_are_isolated() {
        let (first, _) = context(false).await;
        let (second, _) = context(false).await;

        first.dispatch(SyncEvent::Started);
        first
            .record_check_in(CheckInRecord::new(CheckInStatus::Safe))
            .await
            .unwrap();

        assert_eq!(first.state().status, SyncStatus::Syncing);
        assert_eq!(second.state().status, SyncStatus::Idle);
        assert_eq!(
            second.store().partition_len(Partition::CheckIns).await.unwrap(),
            0
        );

        first.dispose().await;
        second.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispose_waits_for_a_delivery_in_flight() {
        let (context, remote) = context(false).await;
        let store = context.store().clone();
        remote.set_latency(Duration::from_millis(200));
        context
            .raise_alert(AlertPayload::new("Trapped"), None)
            .await
            .unwrap();

        context.request_flush();
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.call_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        context.dispose().await;

        assert_eq!(remote.alert_titles(), ["Trapped"]);
        assert_eq!(store.queue_len(Partition::AlertQueue).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispose_returns_state_to_idle() {
        let (context, _remote) = context(false).await;
        let mut notices = context.subscribe();
        context.dispatch(SyncEvent::Started);
        context.dispose().await;

        let last = wait_for(&mut notices, |notice| {
            matches!(notice, SyncNotice::Status(state) if state.status == SyncStatus::Idle)
        })
        .await;
        assert!(matches!(last, SyncNotice::Status(_)));
    }
}
