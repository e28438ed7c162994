//! Key/value partitions: saved resources, replication checkpoints and
//! offline credentials.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{classify_write_error, Partition};
use crate::error::{Error, Result};
use crate::util::now_millis;
use libsql::Connection;

/// Generic JSON cache for resources the user saved for offline use
pub struct LibSqlResourceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlResourceRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_string(value)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO saved_resources (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![key, value, now_millis()],
            )
            .await
            .map_err(|error| classify_write_error(Partition::SavedResources, error))?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM saved_resources WHERE key = ?", [key])
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let raw: String = row.get(0)?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|error| Error::DecodeCorruption(format!("saved resource '{key}': {error}")))
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query("SELECT key FROM saved_resources ORDER BY key ASC", ())
            .await?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get::<String>(0)?);
        }
        Ok(keys)
    }

    /// Idempotent delete
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM saved_resources WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}

/// Last pulled sequence per changes feed
pub struct LibSqlCheckpointRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCheckpointRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn load(&self, feed: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT since FROM replication_checkpoints WHERE feed = ?",
                [feed],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, feed: &str, since: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO replication_checkpoints (feed, since, updated_at) VALUES (?, ?, ?)",
                libsql::params![feed, since, now_millis()],
            )
            .await?;
        Ok(())
    }
}

/// Password hashes remembered for offline login
pub struct LibSqlCredentialRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCredentialRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn load_hash(&self, username: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT password_hash FROM offline_credentials WHERE username = ?",
                [username],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub async fn save_hash(&self, username: &str, password_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO offline_credentials (username, password_hash, updated_at) VALUES (?, ?, ?)",
                libsql::params![username, password_hash, now_millis()],
            )
            .await?;
        Ok(())
    }

    pub async fn forget(&self, username: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM offline_credentials WHERE username = ?",
                [username],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Shelter {
        name: String,
        capacity: u32,
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resource_put_get_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlResourceRepository::new(db.connection());

        let shelter = Shelter {
            name: "Community Hall".into(),
            capacity: 120,
        };
        repo.put("shelter:1", &shelter).await.unwrap();
        assert_eq!(repo.get::<Shelter>("shelter:1").await.unwrap(), Some(shelter));
        assert_eq!(repo.keys().await.unwrap(), vec!["shelter:1".to_string()]);

        repo.delete("shelter:1").await.unwrap();
        repo.delete("shelter:1").await.unwrap();
        assert_eq!(repo.get::<Shelter>("shelter:1").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_checkpoint_overwrites() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCheckpointRepository::new(db.connection());

        assert_eq!(repo.load("status").await.unwrap(), None);
        repo.save("status", "12-abc").await.unwrap();
        repo.save("status", "15-def").await.unwrap();
        assert_eq!(repo.load("status").await.unwrap().as_deref(), Some("15-def"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_credentials_are_case_insensitive_on_username() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCredentialRepository::new(db.connection());

        repo.save_hash("Ana", "$2b$04$hash").await.unwrap();
        assert_eq!(
            repo.load_hash("ana").await.unwrap().as_deref(),
            Some("$2b$04$hash")
        );
        repo.forget("ANA").await.unwrap();
        assert_eq!(repo.load_hash("ana").await.unwrap(), None);
    }
}
