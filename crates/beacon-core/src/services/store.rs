//! Shared local store used by every sync component.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::db::{
    CheckInRepository, Database, LibSqlCheckInRepository, LibSqlCheckpointRepository,
    LibSqlContactRepository, LibSqlCredentialRepository, LibSqlGroupRepository,
    LibSqlQueueRepository, LibSqlResourceRepository, LibSqlSnapshotRepository, Partition,
    QueueRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    CachedMapSnapshot, CheckInFilter, CheckInRecord, EmergencyContact, GroupMembership,
    QueuedItem,
};

/// Per-partition row budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_rows_per_partition: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_rows_per_partition: 1_000,
        }
    }
}

/// Thread-safe handle over the local database.
///
/// Each method takes the lock once, so a read-then-write inside one method is
/// never interleaved with another operation on the store.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    limits: StoreLimits,
    degraded: bool,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a database is quarantined and the open is retried
    /// once before giving up with [`Error::StorageUnavailable`].
    pub async fn open_path(db_path: impl Into<PathBuf>, limits: StoreLimits) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| Error::StorageUnavailable(error.to_string()))?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is corrupted: {}. Quarantining and retrying once.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)
                    .map_err(|error| Error::StorageUnavailable(error.to_string()))?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            limits,
            degraded: false,
        })
    }

    /// Open the store, falling back to a session-only in-memory store when
    /// persistent storage is unavailable.
    pub async fn open_or_degrade(db_path: impl Into<PathBuf>, limits: StoreLimits) -> Result<Self> {
        let db_path = db_path.into();
        match Self::open_path(&db_path, limits).await {
            Ok(store) => Ok(store),
            Err(Error::StorageUnavailable(reason)) => {
                tracing::warn!(
                    "Persistent storage unavailable at {} ({reason}); continuing in memory for this session",
                    db_path.display()
                );
                let mut store = Self::open_in_memory_with(limits).await?;
                store.degraded = true;
                Ok(store)
            }
            Err(error) => Err(error),
        }
    }

    /// Open an in-memory store (tests and degraded sessions).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(StoreLimits::default()).await
    }

    pub async fn open_in_memory_with(limits: StoreLimits) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            limits,
            degraded: false,
        })
    }

    /// True when persistent storage failed and writes only live for this session
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub const fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Exclusive access for multi-step read-modify-write sequences.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("beacon.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale sidecar file {}", path.display());
            }
        }

        Ok(())
    }

    /// Fail with `StorageQuotaExceeded` when the partition is at its budget
    pub(crate) async fn ensure_capacity(&self, db: &Database, partition: Partition) -> Result<()> {
        let len = partition_len(db, partition).await?;
        if len >= self.limits.max_rows_per_partition {
            return Err(Error::StorageQuotaExceeded { partition });
        }
        Ok(())
    }

    pub async fn partition_len(&self, partition: Partition) -> Result<usize> {
        let db = self.db.lock().await;
        partition_len(&db, partition).await
    }

    // ----- check-ins -------------------------------------------------------

    /// Store a check-in; returns its local key.
    pub async fn add_check_in(&self, record: &CheckInRecord) -> Result<i64> {
        let db = self.db.lock().await;
        self.ensure_capacity(&db, Partition::CheckIns).await?;
        LibSqlCheckInRepository::new(db.connection())
            .add(record)
            .await
    }

    pub async fn check_in(&self, id: i64) -> Result<Option<CheckInRecord>> {
        let db = self.db.lock().await;
        LibSqlCheckInRepository::new(db.connection()).get(id).await
    }

    pub async fn check_ins(&self, filter: &CheckInFilter) -> Result<Vec<CheckInRecord>> {
        let db = self.db.lock().await;
        LibSqlCheckInRepository::new(db.connection())
            .list(filter)
            .await
    }

    /// All check-ins (newest first) matching an arbitrary predicate
    pub async fn check_ins_where<F>(&self, predicate: F) -> Result<Vec<CheckInRecord>>
    where
        F: Fn(&CheckInRecord) -> bool,
    {
        let records = self.check_ins(&CheckInFilter::default()).await?;
        Ok(records.into_iter().filter(|record| predicate(record)).collect())
    }

    /// Oldest unsynced check-in
    pub async fn first_unsynced(&self) -> Result<Option<CheckInRecord>> {
        let filter = CheckInFilter {
            limit: Some(1),
            ..CheckInFilter::unsynced()
        };
        Ok(self.check_ins(&filter).await?.into_iter().next())
    }

    pub async fn mark_synced(&self, doc_ids: &[String]) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlCheckInRepository::new(db.connection())
            .mark_synced(doc_ids)
            .await
    }

    /// Insert pulled documents that are not known locally; returns how many were new
    pub async fn insert_replicated(&self, records: &[CheckInRecord]) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlCheckInRepository::new(db.connection());
        let mut inserted = 0;
        for record in records {
            if repo.insert_replicated(record).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub async fn delete_check_in(&self, id: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCheckInRepository::new(db.connection())
            .delete(id)
            .await
    }

    /// Explicit history clear
    pub async fn clear_history(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let cleared = LibSqlCheckInRepository::new(db.connection()).clear().await?;
        tracing::info!("Cleared {cleared} check-ins from local history");
        Ok(cleared)
    }

    pub async fn ensure_status_indexes(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCheckInRepository::new(db.connection())
            .ensure_indexes()
            .await
    }

    // ----- outbound queues -------------------------------------------------

    pub async fn queued<T: DeserializeOwned>(&self, queue: Partition) -> Result<Vec<QueuedItem<T>>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).list(queue).await
    }

    pub async fn queue_len(&self, queue: Partition) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .count(queue)
            .await
    }

    pub async fn increment_retry(&self, id: &str) -> Result<Option<u32>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .increment_retry(id)
            .await
    }

    /// Idempotent removal of a queued item
    pub async fn remove_queued(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).remove(id).await
    }

    pub async fn clear_queue(&self, queue: Partition) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .clear(queue)
            .await
    }

    // ----- contacts and groups ---------------------------------------------

    /// Stored contacts with phones as persisted (encoded)
    pub async fn contacts(&self) -> Result<Vec<EmergencyContact>> {
        let db = self.db.lock().await;
        LibSqlContactRepository::new(db.connection()).list().await
    }

    pub async fn contact(&self, id: &str) -> Result<Option<EmergencyContact>> {
        let db = self.db.lock().await;
        LibSqlContactRepository::new(db.connection()).get(id).await
    }

    /// Insert a new contact unless the list already holds `capacity` entries
    pub async fn insert_contact_bounded(
        &self,
        contact: &EmergencyContact,
        capacity: usize,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlContactRepository::new(db.connection());
        if repo.count().await? >= capacity {
            return Err(Error::ContactLimitReached(capacity));
        }
        self.ensure_capacity(&db, Partition::Contacts).await?;
        repo.upsert(contact).await
    }

    /// Overwrite an existing contact
    pub async fn update_contact(&self, contact: &EmergencyContact) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlContactRepository::new(db.connection());
        if repo.get(&contact.id).await?.is_none() {
            return Err(Error::NotFound(contact.id.clone()));
        }
        repo.upsert(contact).await
    }

    pub async fn delete_contact(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlContactRepository::new(db.connection())
            .delete(id)
            .await
    }

    /// Swap the stored contacts for `rewrite(current)`.
    ///
    /// The read and the write happen under one lock, so a contact added while
    /// the caller was waiting on the network is part of `current`.
    pub async fn rewrite_contacts<F>(&self, rewrite: F) -> Result<Vec<EmergencyContact>>
    where
        F: FnOnce(Vec<EmergencyContact>) -> Vec<EmergencyContact> + Send,
    {
        let db = self.db.lock().await;
        let repo = LibSqlContactRepository::new(db.connection());
        let rewritten = rewrite(repo.list().await?);
        repo.replace_all(&rewritten).await?;
        Ok(rewritten)
    }

    pub async fn memberships(&self) -> Result<Vec<GroupMembership>> {
        let db = self.db.lock().await;
        LibSqlGroupRepository::new(db.connection()).list().await
    }

    pub async fn put_membership(&self, membership: &GroupMembership) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlGroupRepository::new(db.connection())
            .upsert(membership)
            .await
    }

    /// Membership counterpart of [`Self::rewrite_contacts`]
    pub async fn rewrite_memberships<F>(&self, rewrite: F) -> Result<Vec<GroupMembership>>
    where
        F: FnOnce(Vec<GroupMembership>) -> Vec<GroupMembership> + Send,
    {
        let db = self.db.lock().await;
        let repo = LibSqlGroupRepository::new(db.connection());
        let rewritten = rewrite(repo.list().await?);
        repo.replace_all(&rewritten).await?;
        Ok(rewritten)
    }

    // ----- map snapshots ---------------------------------------------------

    pub async fn put_snapshot(&self, cached: &CachedMapSnapshot) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlSnapshotRepository::new(db.connection());
        if repo.get(&cached.alert_id).await?.is_none() {
            self.ensure_capacity(&db, Partition::MapSnapshots).await?;
        }
        repo.put(cached).await
    }

    pub async fn snapshot(&self, alert_id: &str) -> Result<Option<CachedMapSnapshot>> {
        let db = self.db.lock().await;
        LibSqlSnapshotRepository::new(db.connection())
            .get(alert_id)
            .await
    }

    pub async fn snapshots(&self) -> Result<Vec<CachedMapSnapshot>> {
        let db = self.db.lock().await;
        LibSqlSnapshotRepository::new(db.connection()).list().await
    }

    pub async fn rekey_snapshot(&self, old_id: &str, new_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlSnapshotRepository::new(db.connection())
            .rekey(old_id, new_id)
            .await
    }

    pub async fn increment_snapshot_retry(&self, alert_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSnapshotRepository::new(db.connection())
            .increment_retry(alert_id)
            .await
    }

    pub async fn delete_snapshot(&self, alert_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSnapshotRepository::new(db.connection())
            .delete(alert_id)
            .await
    }

    // ----- saved resources, checkpoints, credentials -------------------------

    pub async fn put_resource<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlResourceRepository::new(db.connection());
        if repo.get::<serde_json::Value>(key).await.ok().flatten().is_none() {
            self.ensure_capacity(&db, Partition::SavedResources).await?;
        }
        repo.put(key, value).await
    }

    pub async fn get_resource<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let db = self.db.lock().await;
        LibSqlResourceRepository::new(db.connection())
            .get(key)
            .await
    }

    pub async fn resource_keys(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        LibSqlResourceRepository::new(db.connection()).keys().await
    }

    pub async fn delete_resource(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlResourceRepository::new(db.connection())
            .delete(key)
            .await
    }

    pub async fn load_checkpoint(&self, feed: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        LibSqlCheckpointRepository::new(db.connection())
            .load(feed)
            .await
    }

    pub async fn save_checkpoint(&self, feed: &str, since: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCheckpointRepository::new(db.connection())
            .save(feed, since)
            .await
    }

    pub async fn load_credential(&self, username: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        LibSqlCredentialRepository::new(db.connection())
            .load_hash(username)
            .await
    }

    pub async fn save_credential(&self, username: &str, password_hash: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCredentialRepository::new(db.connection())
            .save_hash(username, password_hash)
            .await
    }

    pub async fn forget_credential(&self, username: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCredentialRepository::new(db.connection())
            .forget(username)
            .await
    }
}

async fn partition_len(db: &Database, partition: Partition) -> Result<usize> {
    let conn = db.connection();
    if partition.is_queue() {
        return LibSqlQueueRepository::new(conn).count(partition).await;
    }
    let table = match partition {
        Partition::CheckIns => "check_ins",
        Partition::Contacts => "contacts",
        Partition::MapSnapshots => "map_snapshots",
        Partition::GroupMemberships => "group_memberships",
        _ => "saved_resources",
    };
    let mut rows = conn
        .query(&format!("SELECT COUNT(*) FROM {table}"), ())
        .await?;
    let count: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };
    Ok(usize::try_from(count).unwrap_or(0))
}
