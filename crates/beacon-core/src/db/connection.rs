//! Database connection management

use crate::error::{Error, Result};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Database wrapper for a local libSQL file
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
    in_memory: bool,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically. Failure to open or migrate the file is
    /// reported as [`Error::StorageUnavailable`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        Self::open_with(&path_str, false)
            .await
            .map_err(|error| match error {
                Error::LibSql(inner) => Error::StorageUnavailable(inner.to_string()),
                other => other,
            })
    }

    /// Open an in-memory database (session-only fallback and tests)
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_with(":memory:", true).await
    }

    async fn open_with(location: &str, in_memory: bool) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            in_memory,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for crash safety
    async fn configure(&self) -> Result<()> {
        // WAL is not available for :memory: databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = FULL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Whether this database lives only for the current session
    pub const fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.is_in_memory());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_on_disk_persists_schema() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("beacon.db");
        {
            let db = Database::open(&path).await.unwrap();
            assert!(!db.is_in_memory());
        }
        let reopened = Database::open(&path).await.unwrap();
        let mut rows = reopened
            .connection()
            .query("SELECT COUNT(*) FROM check_ins", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_rejects_non_database_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("beacon.db");
        std::fs::write(&path, vec![0xA5_u8; 4096]).unwrap();

        let error = Database::open(&path).await.err().unwrap();
        assert!(matches!(error, Error::StorageUnavailable(_)));
    }
}
