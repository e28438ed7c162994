//! Outbound queue repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{classify_write_error, Partition};
use crate::error::Result;
use crate::models::QueuedItem;
use libsql::Connection;

/// Trait for outbound queue storage operations (async)
///
/// Items are returned in enqueue order. Payloads are stored as JSON.
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    async fn push<T: Serialize>(&self, queue: Partition, item: &QueuedItem<T>) -> Result<()>;

    /// All items of a queue, oldest first; undecodable rows are skipped
    async fn list<T: DeserializeOwned>(&self, queue: Partition) -> Result<Vec<QueuedItem<T>>>;

    /// Increment an item's retry counter and return the new value
    async fn increment_retry(&self, id: &str) -> Result<Option<u32>>;

    /// Idempotent removal; returns whether a row was deleted
    async fn remove(&self, id: &str) -> Result<bool>;

    async fn count(&self, queue: Partition) -> Result<usize>;

    /// Drop the `n` oldest items and return their ids
    async fn evict_oldest(&self, queue: Partition, n: usize) -> Result<Vec<String>>;

    async fn clear(&self, queue: Partition) -> Result<usize>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn push<T: Serialize>(&self, queue: Partition, item: &QueuedItem<T>) -> Result<()> {
        let payload = serde_json::to_string(&item.payload)?;
        self.conn
            .execute(
                "INSERT INTO queued_items (id, queue, payload, enqueued_at, retry_count)
                 VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    item.id.as_str(),
                    queue.storage_key(),
                    payload,
                    item.enqueued_at,
                    i64::from(item.retry_count)
                ],
            )
            .await
            .map_err(|error| classify_write_error(queue, error))?;
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, queue: Partition) -> Result<Vec<QueuedItem<T>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload, enqueued_at, retry_count
                 FROM queued_items
                 WHERE queue = ?
                 ORDER BY seq ASC",
                [queue.storage_key()],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let payload: String = row.get(1)?;
            let payload = match serde_json::from_str::<T>(&payload) {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::warn!("Skipping undecodable item {id} in {queue}: {error}");
                    continue;
                }
            };
            let retry_count: i64 = row.get(3)?;
            items.push(QueuedItem {
                id,
                payload,
                enqueued_at: row.get(2)?,
                retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            });
        }
        Ok(items)
    }

    async fn increment_retry(&self, id: &str) -> Result<Option<u32>> {
        let mut rows = self
            .conn
            .query(
                "UPDATE queued_items SET retry_count = retry_count + 1
                 WHERE id = ?
                 RETURNING retry_count",
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => {
                let retry_count: i64 = row.get(0)?;
                Ok(Some(u32::try_from(retry_count).unwrap_or(u32::MAX)))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM queued_items WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    async fn count(&self, queue: Partition) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM queued_items WHERE queue = ?",
                [queue.storage_key()],
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn evict_oldest(&self, queue: Partition, n: usize) -> Result<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut rows = self
            .conn
            .query(
                "DELETE FROM queued_items
                 WHERE seq IN (
                     SELECT seq FROM queued_items WHERE queue = ? ORDER BY seq ASC LIMIT ?
                 )
                 RETURNING id",
                libsql::params![queue.storage_key(), n as i64],
            )
            .await?;
        let mut evicted = Vec::new();
        while let Some(row) = rows.next().await? {
            evicted.push(row.get::<String>(0)?);
        }
        Ok(evicted)
    }

    async fn clear(&self, queue: Partition) -> Result<usize> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM queued_items WHERE queue = ?",
                [queue.storage_key()],
            )
            .await?;
        Ok(usize::try_from(rows).unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::AlertPayload;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_and_list_in_order() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        for title in ["first", "second", "third"] {
            repo.push(Partition::AlertQueue, &QueuedItem::new(AlertPayload::new(title)))
                .await
                .unwrap();
        }

        let items: Vec<QueuedItem<AlertPayload>> =
            repo.list(Partition::AlertQueue).await.unwrap();
        let titles = items
            .iter()
            .map(|item| item.payload.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, ["first", "second", "third"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queues_are_isolated() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        repo.push(Partition::AlertQueue, &QueuedItem::new(AlertPayload::new("a")))
            .await
            .unwrap();
        assert_eq!(repo.count(Partition::AlertQueue).await.unwrap(), 1);
        assert_eq!(repo.count(Partition::StatusQueue).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_increment_and_remove() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let item = QueuedItem::new(AlertPayload::new("retry me"));
        repo.push(Partition::AlertQueue, &item).await.unwrap();

        assert_eq!(repo.increment_retry(&item.id).await.unwrap(), Some(1));
        assert_eq!(repo.increment_retry(&item.id).await.unwrap(), Some(2));
        assert_eq!(repo.increment_retry("missing").await.unwrap(), None);

        assert!(repo.remove(&item.id).await.unwrap());
        assert!(!repo.remove(&item.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_evict_oldest() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let mut ids = Vec::new();
        for index in 0..4 {
            let item = QueuedItem::new(AlertPayload::new(format!("alert {index}")));
            ids.push(item.id.clone());
            repo.push(Partition::AlertQueue, &item).await.unwrap();
        }

        let evicted = repo.evict_oldest(Partition::AlertQueue, 2).await.unwrap();
        assert_eq!(evicted.len(), 2);
        assert!(evicted.contains(&ids[0]));
        assert!(evicted.contains(&ids[1]));
        assert_eq!(repo.count(Partition::AlertQueue).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_corrupted_payload_is_skipped() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        repo.push(Partition::AlertQueue, &QueuedItem::new(AlertPayload::new("ok")))
            .await
            .unwrap();
        db.connection()
            .execute(
                "INSERT INTO queued_items (id, queue, payload, enqueued_at) VALUES ('bad', ?, '{not json', 0)",
                [Partition::AlertQueue.storage_key()],
            )
            .await
            .unwrap();

        let items: Vec<QueuedItem<AlertPayload>> =
            repo.list(Partition::AlertQueue).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload.title, "ok");
    }
}
