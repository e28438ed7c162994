//! Check-in repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::db::{classify_write_error, Partition};
use crate::error::{Error, Result};
use crate::models::{CheckInFilter, CheckInRecord};
use libsql::params::Params;
use libsql::{Connection, Value};

const COLUMNS: &str = "id, doc_id, status, timestamp, latitude, longitude, user_id, synced";

/// Trait for check-in storage operations (async)
#[allow(async_fn_in_trait)]
pub trait CheckInRepository {
    /// Store a new check-in and return its local key
    async fn add(&self, record: &CheckInRecord) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Option<CheckInRecord>>;

    async fn get_by_doc_id(&self, doc_id: &str) -> Result<Option<CheckInRecord>>;

    /// List check-ins matching the filter (newest first unless asked otherwise)
    async fn list(&self, filter: &CheckInFilter) -> Result<Vec<CheckInRecord>>;

    /// Flag replicated documents; returns how many rows changed
    async fn mark_synced(&self, doc_ids: &[String]) -> Result<usize>;

    /// Insert a document pulled from the remote unless it is already known
    async fn insert_replicated(&self, record: &CheckInRecord) -> Result<bool>;

    /// Idempotent delete
    async fn delete(&self, id: i64) -> Result<()>;

    /// Remove the whole history; returns the number of deleted rows
    async fn clear(&self) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    /// Query indexes used by replication; safe to call repeatedly
    async fn ensure_indexes(&self) -> Result<()>;
}

/// libSQL implementation of `CheckInRepository`
pub struct LibSqlCheckInRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCheckInRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &libsql::Row) -> Result<CheckInRecord> {
        let status: String = row.get(2)?;
        Ok(CheckInRecord {
            id: row.get(0)?,
            doc_id: row.get(1)?,
            status: status
                .parse()
                .map_err(|_| Error::DecodeCorruption(format!("check-in status '{status}'")))?,
            timestamp: row.get(3)?,
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            user_id: row.get(6)?,
            synced: row.get::<i64>(7)? != 0,
        })
    }

    async fn query_records(&self, sql: &str, params: Params) -> Result<Vec<CheckInRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_row(&row)?);
        }
        Ok(records)
    }
}

fn build_list_query(filter: &CheckInFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(synced) = filter.synced {
        clauses.push("synced = ?");
        values.push(Value::Integer(i64::from(synced)));
    }
    if let Some(user_id) = &filter.user_id {
        clauses.push("user_id = ?");
        values.push(Value::Text(user_id.clone()));
    }
    if let Some(since) = filter.since {
        clauses.push("timestamp >= ?");
        values.push(Value::Integer(since));
    }

    let mut sql = format!("SELECT {COLUMNS} FROM check_ins");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if filter.oldest_first {
        sql.push_str(" ORDER BY timestamp ASC, id ASC");
    } else {
        sql.push_str(" ORDER BY timestamp DESC, id DESC");
    }
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(limit as i64));
    }

    (sql, values)
}

impl CheckInRepository for LibSqlCheckInRepository<'_> {
    async fn add(&self, record: &CheckInRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO check_ins (doc_id, status, timestamp, latitude, longitude, user_id, synced)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    record.doc_id.as_str(),
                    record.status.as_str(),
                    record.timestamp,
                    record.latitude,
                    record.longitude,
                    record.user_id.clone(),
                    i64::from(record.synced)
                ],
            )
            .await
            .map_err(|error| classify_write_error(Partition::CheckIns, error))?;

        Ok(self.conn.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> Result<Option<CheckInRecord>> {
        let records = self
            .query_records(
                &format!("SELECT {COLUMNS} FROM check_ins WHERE id = ?"),
                Params::Positional(vec![Value::Integer(id)]),
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn get_by_doc_id(&self, doc_id: &str) -> Result<Option<CheckInRecord>> {
        let records = self
            .query_records(
                &format!("SELECT {COLUMNS} FROM check_ins WHERE doc_id = ?"),
                Params::Positional(vec![Value::Text(doc_id.to_string())]),
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn list(&self, filter: &CheckInFilter) -> Result<Vec<CheckInRecord>> {
        let (sql, values) = build_list_query(filter);
        self.query_records(&sql, Params::Positional(values)).await
    }

    async fn mark_synced(&self, doc_ids: &[String]) -> Result<usize> {
        let mut changed = 0usize;
        for doc_id in doc_ids {
            let rows = self
                .conn
                .execute(
                    "UPDATE check_ins SET synced = 1 WHERE doc_id = ? AND synced = 0",
                    [doc_id.as_str()],
                )
                .await?;
            changed += usize::try_from(rows).unwrap_or(usize::MAX);
        }
        Ok(changed)
    }

    async fn insert_replicated(&self, record: &CheckInRecord) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO check_ins (doc_id, status, timestamp, latitude, longitude, user_id, synced)
                 VALUES (?, ?, ?, ?, ?, ?, 1)",
                libsql::params![
                    record.doc_id.as_str(),
                    record.status.as_str(),
                    record.timestamp,
                    record.latitude,
                    record.longitude,
                    record.user_id.clone()
                ],
            )
            .await
            .map_err(|error| classify_write_error(Partition::CheckIns, error))?;
        Ok(rows > 0)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM check_ins WHERE id = ?", [id])
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM check_ins", ()).await?;
        Ok(usize::try_from(rows).unwrap_or(usize::MAX))
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM check_ins", ()).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let statements = [
            "CREATE INDEX IF NOT EXISTS idx_check_ins_timestamp ON check_ins(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_check_ins_synced ON check_ins(synced)",
            "CREATE INDEX IF NOT EXISTS idx_check_ins_user ON check_ins(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_check_ins_synced_timestamp ON check_ins(synced, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_check_ins_user_timestamp ON check_ins(user_id, timestamp)",
        ];
        for stmt in statements {
            self.conn.execute(stmt, ()).await?;
        }
        Ok(())
    }
}
