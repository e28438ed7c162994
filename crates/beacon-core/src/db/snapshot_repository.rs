//! Cached map snapshot repository

use crate::db::{classify_write_error, Partition};
use crate::error::Result;
use crate::models::{CachedMapSnapshot, MapSnapshot};
use libsql::Connection;

pub struct LibSqlSnapshotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSnapshotRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace the snapshot for an alert
    pub async fn put(&self, cached: &CachedMapSnapshot) -> Result<()> {
        let snapshot = serde_json::to_string(&cached.snapshot)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO map_snapshots (alert_id, snapshot, timestamp, retry_count)
                 VALUES (?, ?, ?, ?)",
                libsql::params![
                    cached.alert_id.as_str(),
                    snapshot,
                    cached.timestamp,
                    i64::from(cached.retry_count)
                ],
            )
            .await
            .map_err(|error| classify_write_error(Partition::MapSnapshots, error))?;
        Ok(())
    }

    pub async fn get(&self, alert_id: &str) -> Result<Option<CachedMapSnapshot>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|cached| cached.alert_id == alert_id))
    }

    /// Oldest first; undecodable snapshots are skipped
    pub async fn list(&self) -> Result<Vec<CachedMapSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT alert_id, snapshot, timestamp, retry_count
                 FROM map_snapshots
                 ORDER BY timestamp ASC, alert_id ASC",
                (),
            )
            .await?;

        let mut snapshots = Vec::new();
        while let Some(row) = rows.next().await? {
            let alert_id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let snapshot = match serde_json::from_str::<MapSnapshot>(&raw) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    tracing::warn!("Skipping corrupted map snapshot for {alert_id}: {error}");
                    continue;
                }
            };
            let retry_count: i64 = row.get(3)?;
            snapshots.push(CachedMapSnapshot {
                alert_id,
                snapshot,
                timestamp: row.get(2)?,
                retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            });
        }
        Ok(snapshots)
    }

    /// Move a snapshot from a temporary alert id to the server id.
    ///
    /// Runs in one transaction; an existing record under `new_id` is
    /// replaced. Returns false when nothing was cached under `old_id`.
    pub async fn rekey(&self, old_id: &str, new_id: &str) -> Result<bool> {
        if old_id == new_id {
            return Ok(false);
        }
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            self.conn
                .execute(
                    "DELETE FROM map_snapshots
                     WHERE alert_id = ?
                       AND EXISTS (SELECT 1 FROM map_snapshots WHERE alert_id = ?)",
                    [new_id, old_id],
                )
                .await?;
            self.conn
                .execute(
                    "UPDATE map_snapshots SET alert_id = ? WHERE alert_id = ?",
                    [new_id, old_id],
                )
                .await
        }
        .await;

        match result {
            Ok(rows) => {
                self.conn.execute("COMMIT", ()).await?;
                Ok(rows > 0)
            }
            Err(error) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                Err(error.into())
            }
        }
    }

    pub async fn increment_retry(&self, alert_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE map_snapshots SET retry_count = retry_count + 1 WHERE alert_id = ?",
                [alert_id],
            )
            .await?;
        Ok(())
    }

    /// Idempotent delete
    pub async fn delete(&self, alert_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM map_snapshots WHERE alert_id = ?", [alert_id])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn cached(alert_id: &str, timestamp: i64) -> CachedMapSnapshot {
        CachedMapSnapshot {
            alert_id: alert_id.to_string(),
            snapshot: MapSnapshot::at(1.0, 2.0),
            timestamp,
            retry_count: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rekey_moves_snapshot() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSnapshotRepository::new(db.connection());

        repo.put(&cached("tmp-1", 10)).await.unwrap();
        assert!(repo.rekey("tmp-1", "srv-1").await.unwrap());

        assert!(repo.get("tmp-1").await.unwrap().is_none());
        let moved = repo.get("srv-1").await.unwrap().unwrap();
        assert_eq!(moved.snapshot, MapSnapshot::at(1.0, 2.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rekey_missing_is_noop() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSnapshotRepository::new(db.connection());

        repo.put(&cached("srv-1", 10)).await.unwrap();
        assert!(!repo.rekey("tmp-unknown", "srv-1").await.unwrap());
        assert!(repo.get("srv-1").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_increment_and_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSnapshotRepository::new(db.connection());

        repo.put(&cached("a", 1)).await.unwrap();
        repo.increment_retry("a").await.unwrap();
        assert_eq!(repo.get("a").await.unwrap().unwrap().retry_count, 1);

        repo.delete("a").await.unwrap();
        repo.delete("a").await.unwrap();
        assert!(repo.list().await.unwrap().is_empty());
    }
}
