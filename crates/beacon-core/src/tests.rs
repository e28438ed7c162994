//! Scripted remote used across the crate's tests, plus end-to-end scenarios.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::models::{
    AlertPayload, EmergencyContact, GroupAction, GroupMembership, MapSnapshot, StatusDocument,
    StatusPayload,
};
use crate::remote::{RemoteAuthority, RemoteError, RemoteResult};
use crate::replication::{ChangeBatch, ChangeFeed, PushOutcome};

#[derive(Default)]
struct FakeState {
    failures: VecDeque<RemoteError>,
    feed_failures: VecDeque<RemoteError>,
    latency: Option<Duration>,
    unreachable: bool,
    calls: usize,
    alerts_created: u32,
    known_alerts: HashSet<String>,
    alert_titles: Vec<String>,
    statuses: Vec<StatusPayload>,
    group_actions: Vec<GroupAction>,
    snapshot_uploads: Vec<String>,
    remote_contacts: Vec<EmergencyContact>,
    contact_fetches: usize,
    contact_fetch_gate: Option<Arc<Notify>>,
    pushed_contacts: Vec<EmergencyContact>,
    memberships: Vec<GroupMembership>,
    feed: Vec<(u64, StatusDocument)>,
    refused_docs: HashSet<String>,
    live_pulls: usize,
}

/// In-memory remote authority and changes feed with scripted failures
#[derive(Clone, Default)]
pub(crate) struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
    feed_changed: Arc<Notify>,
}

impl FakeRemote {
    /// Fail the next delivery call with `error`
    pub(crate) fn fail_next(&self, error: RemoteError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Fail the next changes-feed or contact fetch with `error`
    pub(crate) fn fail_feed_next(&self, error: RemoteError) {
        self.state.lock().unwrap().feed_failures.push_back(error);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().unreachable = !reachable;
    }

    pub(crate) fn register_alert(&self, alert_id: &str) {
        self.state
            .lock()
            .unwrap()
            .known_alerts
            .insert(alert_id.to_string());
    }

    pub(crate) fn alert_titles(&self) -> Vec<String> {
        self.state.lock().unwrap().alert_titles.clone()
    }

    pub(crate) fn statuses(&self) -> Vec<StatusPayload> {
        self.state.lock().unwrap().statuses.clone()
    }

    pub(crate) fn group_actions(&self) -> Vec<GroupAction> {
        self.state.lock().unwrap().group_actions.clone()
    }

    /// Delivery attempts, failed ones included
    pub(crate) fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub(crate) fn snapshot_uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().snapshot_uploads.clone()
    }

    pub(crate) fn set_remote_contacts(&self, contacts: Vec<EmergencyContact>) {
        self.state.lock().unwrap().remote_contacts = contacts;
    }

    /// Make `fetch_contacts` wait until the returned gate is notified
    pub(crate) fn hold_contact_fetch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().contact_fetch_gate = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn contact_fetches(&self) -> usize {
        self.state.lock().unwrap().contact_fetches
    }

    pub(crate) fn pushed_contacts(&self) -> Vec<EmergencyContact> {
        self.state.lock().unwrap().pushed_contacts.clone()
    }

    pub(crate) fn set_remote_memberships(&self, memberships: Vec<GroupMembership>) {
        self.state.lock().unwrap().memberships = memberships;
    }

    /// Put a document on the feed as if another device had pushed it
    pub(crate) fn seed_feed_doc(&self, doc: StatusDocument) {
        let mut state = self.state.lock().unwrap();
        let seq = state.feed.len() as u64 + 1;
        state.feed.push((seq, doc));
        self.feed_changed.notify_one();
    }

    pub(crate) fn feed_doc_count(&self) -> usize {
        self.state.lock().unwrap().feed.len()
    }

    /// Refuse `doc_id` on every push, as a validation rule would
    pub(crate) fn refuse_feed_doc(&self, doc_id: &str) {
        self.state.lock().unwrap().refused_docs.insert(doc_id.to_string());
    }

    /// Live pulls that found nothing and had to wait
    pub(crate) fn live_pulls(&self) -> usize {
        self.state.lock().unwrap().live_pulls
    }

    /// Simulated latency, then the next scripted failure if any
    async fn delivery_attempt(&self) -> RemoteResult<()> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.state.lock().unwrap().failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn feed_attempt(&self) -> RemoteResult<()> {
        match self.state.lock().unwrap().feed_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl RemoteAuthority for FakeRemote {
    async fn post_status(&self, payload: &StatusPayload) -> RemoteResult<()> {
        self.delivery_attempt().await?;
        self.state.lock().unwrap().statuses.push(payload.clone());
        Ok(())
    }

    async fn post_alert(&self, alert: &AlertPayload) -> RemoteResult<String> {
        self.delivery_attempt().await?;
        let mut state = self.state.lock().unwrap();
        state.alerts_created += 1;
        let id = format!("srv-{}", state.alerts_created);
        state.known_alerts.insert(id.clone());
        state.alert_titles.push(alert.title.clone());
        Ok(id)
    }

    async fn post_group_action(&self, action: &GroupAction) -> RemoteResult<()> {
        self.delivery_attempt().await?;
        self.state.lock().unwrap().group_actions.push(action.clone());
        Ok(())
    }

    async fn post_map_snapshot(&self, alert_id: &str, _snapshot: &MapSnapshot) -> RemoteResult<()> {
        self.delivery_attempt().await?;
        let mut state = self.state.lock().unwrap();
        if !state.known_alerts.contains(alert_id) {
            return Err(RemoteError::NotYetAvailable(format!("alert {alert_id} not found")));
        }
        state.snapshot_uploads.push(alert_id.to_string());
        Ok(())
    }

    async fn fetch_contacts(&self) -> RemoteResult<Vec<EmergencyContact>> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.contact_fetches += 1;
            state.contact_fetch_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.feed_attempt()?;
        Ok(self.state.lock().unwrap().remote_contacts.clone())
    }

    async fn push_contacts(&self, contacts: &[EmergencyContact]) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state.pushed_contacts = contacts.to_vec();
        state.remote_contacts = contacts.to_vec();
        Ok(())
    }

    async fn fetch_group_memberships(&self) -> RemoteResult<Vec<GroupMembership>> {
        Ok(self.state.lock().unwrap().memberships.clone())
    }

    async fn ping(&self) -> RemoteResult<()> {
        if self.state.lock().unwrap().unreachable {
            Err(RemoteError::Transient("host unreachable".into()))
        } else {
            Ok(())
        }
    }
}

impl ChangeFeed for FakeRemote {
    fn name(&self) -> &str {
        "fake-status"
    }

    async fn pull_changes(&self, since: Option<&str>) -> RemoteResult<ChangeBatch> {
        self.feed_attempt()?;
        let since = since.and_then(|seq| seq.parse::<u64>().ok()).unwrap_or(0);
        let state = self.state.lock().unwrap();
        let changed = state
            .feed
            .iter()
            .filter(|(seq, _)| *seq > since)
            .collect::<Vec<_>>();
        let last_seq = changed.last().map_or(since, |(seq, _)| *seq);
        Ok(ChangeBatch {
            docs: changed.into_iter().map(|(_, doc)| doc.clone()).collect(),
            last_seq: last_seq.to_string(),
            has_more: false,
        })
    }

    async fn pull_changes_live(
        &self,
        since: Option<&str>,
        wait: Duration,
    ) -> RemoteResult<ChangeBatch> {
        let batch = self.pull_changes(since).await?;
        if !batch.docs.is_empty() {
            return Ok(batch);
        }
        self.state.lock().unwrap().live_pulls += 1;
        let _ = tokio::time::timeout(wait, self.feed_changed.notified()).await;
        self.pull_changes(since).await
    }

    async fn push_changes(&self, docs: &[StatusDocument]) -> RemoteResult<PushOutcome> {
        self.feed_attempt()?;
        let mut state = self.state.lock().unwrap();
        let mut outcome = PushOutcome::default();
        for doc in docs {
            if state.refused_docs.contains(&doc.doc_id) {
                outcome.refused.push(doc.doc_id.clone());
            } else if state.feed.iter().any(|(_, known)| known.doc_id == doc.doc_id) {
                outcome.conflicts.push(doc.doc_id.clone());
            } else {
                let seq = state.feed.len() as u64 + 1;
                state.feed.push((seq, doc.clone()));
                outcome.accepted.push(doc.doc_id.clone());
            }
        }
        if !outcome.accepted.is_empty() {
            self.feed_changed.notify_one();
        }
        Ok(outcome)
    }
}

mod scenarios {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, Utc};
    use pretty_assertions::assert_eq;

    use super::FakeRemote;
    use crate::codec::FieldCodec;
    use crate::config::SyncConfig;
    use crate::contacts::ContactBook;
    use crate::context::SyncContext;
    use crate::events::{NoticeSink, SyncNotice};
    use crate::merge::merge_by_updated_at;
    use crate::models::{AlertPayload, EmergencyContact, MapSnapshot, MAX_CONTACTS};
    use crate::queue::{EnqueueOutcome, OutboundQueue, QueuePolicy};
    use crate::remote::RemoteError;
    use crate::services::LocalStore;

    async fn offline_context() -> (SyncContext<FakeRemote, FakeRemote>, FakeRemote) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = FakeRemote::default();
        remote.set_reachable(false);
        let context = SyncContext::init(
            store,
            Arc::new(remote.clone()),
            Arc::new(remote.clone()),
            SyncConfig::default(),
        )
        .unwrap();
        (context, remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_alerts_flush_in_order_and_snapshot_follows_its_alert() {
        let (context, remote) = offline_context().await;
        let mut notices = context.subscribe();

        let first = context
            .raise_alert(
                AlertPayload::new("Fire").with_location(1.0, 1.0),
                Some(MapSnapshot::at(1.0, 1.0)),
            )
            .await
            .unwrap();
        context
            .raise_alert(AlertPayload::new("Flood").with_location(2.0, 2.0), None)
            .await
            .unwrap();
        context
            .raise_alert(AlertPayload::new("Smoke").with_location(3.0, 3.0), None)
            .await
            .unwrap();
        assert!(context.snapshots().get(first.id()).await.unwrap().is_some());

        remote.set_reachable(true);
        let reports = context.flush_all().await.unwrap();

        assert_eq!(remote.alert_titles(), ["Fire", "Flood", "Smoke"]);
        let server_ids = reports[0]
            .deliveries
            .iter()
            .map(|delivery| delivery.server_id.clone().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(server_ids, ["srv-1", "srv-2", "srv-3"]);
        assert_eq!(remote.snapshot_uploads(), ["srv-1"]);
        assert!(context.snapshots().list().await.unwrap().is_empty());

        let mut delivered = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            if let SyncNotice::Delivered { local_id, server_id, .. } = notice {
                delivered.push((local_id, server_id));
            }
        }
        assert_eq!(delivered[0], (first.id().to_string(), Some("srv-1".to_string())));

        context.dispose().await;
    }

    #[test]
    fn later_contact_edit_wins_across_sessions() {
        let t1 = Utc::now() - ChronoDuration::minutes(5);
        let t2 = Utc::now();

        let mut session_a = EmergencyContact::new("Ana", "+1 555 0100");
        session_a.id = "c-1".into();
        session_a.updated_at = t1;
        let mut session_b = session_a.clone();
        session_b.name = "Ana Maria".into();
        session_b.updated_at = t2;

        let merged = merge_by_updated_at(&[session_a.clone()], &[session_b.clone()], Some(5));
        assert_eq!(merged, [session_b.clone()]);
        let merged = merge_by_updated_at(&[session_b.clone()], &[session_a], Some(5));
        assert_eq!(merged, [session_b]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn contact_sync_keeps_the_newer_remote_edit() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let book = ContactBook::new(store, FieldCodec::new("k").unwrap(), MAX_CONTACTS);
        let remote = FakeRemote::default();

        let local = book
            .add(EmergencyContact::new("Ana", "+1 555 0100"))
            .await
            .unwrap();
        let mut edited = local.clone();
        edited.phone = "+1 555 0199".into();
        edited.updated_at = local.updated_at + ChronoDuration::seconds(30);
        remote.set_remote_contacts(vec![edited]);

        book.sync(&remote).await.unwrap();
        let stored = book.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.phone, "+1 555 0199");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn item_at_two_retries_is_evicted_after_one_more_failure() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue: OutboundQueue<AlertPayload> =
            OutboundQueue::new(store.clone(), QueuePolicy::default(), NoticeSink::default());
        let remote = FakeRemote::default();
        let queued = queue.enqueue(AlertPayload::new("Help")).await.unwrap();
        store.increment_retry(queued.id()).await.unwrap();
        store.increment_retry(queued.id()).await.unwrap();

        remote.fail_next(RemoteError::Transient("timeout".into()));
        let report = queue.flush(&remote).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(remote.call_count(), 1);

        let report = queue.flush(&remote).await.unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(remote.call_count(), 1);
        assert!(remote.alert_titles().is_empty());
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overflow_keeps_the_most_recent_items() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let policy = QueuePolicy::default();
        let queue: OutboundQueue<AlertPayload> =
            OutboundQueue::new(store, policy, NoticeSink::default());

        let extra = 4;
        for index in 0..policy.max_size + extra {
            queue
                .enqueue(AlertPayload::new(format!("alert {index}")))
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
        let expected = (extra..policy.max_size + extra)
            .map(|index| format!("alert {index}"))
            .collect::<Vec<_>>();
        assert_eq!(titles, expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_alert_is_queued_once() {
        let (context, _remote) = offline_context().await;

        let first = context
            .raise_alert(AlertPayload::new("Fire").with_location(40.7128, -74.0060), None)
            .await
            .unwrap();
        let second = context
            .raise_alert(AlertPayload::new("fire").with_location(40.71285, -74.00605), None)
            .await
            .unwrap();

        assert!(matches!(first, EnqueueOutcome::Queued { .. }));
        assert!(matches!(second, EnqueueOutcome::Duplicate { .. }));
        assert_eq!(context.alerts().len().await.unwrap(), 1);
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_of_a_rejected_alert_is_discarded() {
        let (context, remote) = offline_context().await;
        context
            .raise_alert(
                AlertPayload::new("Fire").with_location(1.0, 1.0),
                Some(MapSnapshot::at(1.0, 1.0)),
            )
            .await
            .unwrap();
        remote.fail_next(RemoteError::Rejected {
            status: 422,
            message: "missing field".into(),
        });

        let reports = context.flush_all().await.unwrap();
        assert_eq!(reports[0].rejected, 1);
        assert!(context.snapshots().list().await.unwrap().is_empty());

        for _ in 0..3 {
            context.flush_all().await.unwrap();
        }
        assert_eq!(remote.call_count(), 1);
        context.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_of_an_evicted_alert_is_discarded() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = FakeRemote::default();
        remote.set_reachable(false);
        let context = SyncContext::init(
            store,
            Arc::new(remote.clone()),
            Arc::new(remote),
            SyncConfig {
                max_queue_size: 1,
                ..SyncConfig::default()
            },
        )
        .unwrap();

        let first = context
            .raise_alert(AlertPayload::new("Fire"), Some(MapSnapshot::at(1.0, 1.0)))
            .await
            .unwrap();
        let second = context
            .raise_alert(AlertPayload::new("Flood"), None)
            .await
            .unwrap();

        assert_eq!(
            second,
            EnqueueOutcome::Queued {
                id: second.id().to_string(),
                evicted: vec![first.id().to_string()],
            }
        );
        assert!(context.snapshots().get(first.id()).await.unwrap().is_none());
        context.dispose().await;
    }
}
