//! CouchDB-style changes feed over HTTP.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::{ChangeBatch, ChangeFeed, PushOutcome};
use crate::error::{Error, Result};
use crate::models::StatusDocument;
use crate::remote::{normalize_base_url, RemoteError, RemoteResult};

const DEFAULT_BATCH_LIMIT: usize = 100;

#[derive(Clone)]
pub struct HttpChangeFeed {
    database_url: String,
    name: String,
    access_token: String,
    timeout: Duration,
    batch_limit: usize,
    client: Client,
}

impl fmt::Debug for HttpChangeFeed {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpChangeFeed")
            .field("database_url", &self.database_url)
            .field("access_token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpChangeFeed {
    /// `server_url` is the replication server, `database` the status database on it
    pub fn new(
        server_url: &str,
        database: &str,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let server_url = normalize_base_url(server_url)?;
        let database = database.trim().trim_matches('/');
        if database.is_empty() {
            return Err(Error::InvalidInput(
                "Status database name must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .build()
            .map_err(|error| Error::InvalidInput(format!("Failed to build HTTP client: {error}")))?;

        Ok(Self {
            database_url: format!("{server_url}/{}", urlencoding::encode(database)),
            name: database.to_string(),
            access_token: access_token.into(),
            timeout,
            batch_limit: DEFAULT_BATCH_LIMIT,
            client,
        })
    }

    #[must_use]
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("Accept", "application/json")
            .timeout(self.timeout);
        self.with_token(request)
    }

    fn with_token(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.access_token.trim().is_empty() {
            request
        } else {
            request.bearer_auth(&self.access_token)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> RemoteResult<reqwest::Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status, &body))
    }

    async fn fetch_changes(
        &self,
        query: &[(&'static str, String)],
        timeout: Duration,
    ) -> RemoteResult<ChangeBatch> {
        let request = self.with_token(
            self.client
                .get(format!("{}/_changes", self.database_url))
                .header("Accept", "application/json")
                .query(query)
                .timeout(timeout),
        );
        let response = self.send(request).await?;
        let changes = response
            .json::<ChangesResponse>()
            .await
            .map_err(|error| RemoteError::Transient(format!("unreadable changes feed: {error}")))?;
        Ok(changes.into_batch(self.batch_limit))
    }
}

/// Query for `_changes`. With `live` set the server long-polls: it answers
/// as soon as something changes, or with an empty batch once `live` passes.
/// No heartbeat is requested since it would override the timeout.
fn changes_query(
    batch_limit: usize,
    since: Option<&str>,
    live: Option<Duration>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("include_docs", "true".to_string()),
        ("style", "main_only".to_string()),
        ("limit", batch_limit.to_string()),
    ];
    if let Some(since) = since {
        query.push(("since", since.to_string()));
    }
    if let Some(wait) = live {
        query.push(("feed", "longpoll".to_string()));
        query.push(("timeout", wait.as_millis().to_string()));
    }
    query
}

impl ChangeFeed for HttpChangeFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull_changes(&self, since: Option<&str>) -> RemoteResult<ChangeBatch> {
        let query = changes_query(self.batch_limit, since, None);
        self.fetch_changes(&query, self.timeout).await
    }

    async fn pull_changes_live(
        &self,
        since: Option<&str>,
        wait: Duration,
    ) -> RemoteResult<ChangeBatch> {
        let query = changes_query(self.batch_limit, since, Some(wait));
        // The server holds the request for `wait` before answering empty.
        self.fetch_changes(&query, wait + self.timeout).await
    }

    async fn push_changes(&self, docs: &[StatusDocument]) -> RemoteResult<PushOutcome> {
        if docs.is_empty() {
            return Ok(PushOutcome::default());
        }
        let request = self.authorized(
            self.client
                .post(format!("{}/_bulk_docs", self.database_url))
                .json(&serde_json::json!({ "docs": docs })),
        );
        let response = self.send(request).await?;
        let results = response
            .json::<Vec<BulkDocResult>>()
            .await
            .map_err(|error| RemoteError::Transient(format!("unreadable bulk response: {error}")))?;
        into_push_outcome(results)
    }
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    results: Vec<ChangeRow>,
    last_seq: serde_json::Value,
    #[serde(default)]
    pending: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChangeRow {
    id: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    doc: Option<serde_json::Value>,
}

impl ChangesResponse {
    fn into_batch(self, batch_limit: usize) -> ChangeBatch {
        let has_more = self
            .pending
            .map_or(self.results.len() >= batch_limit, |pending| pending > 0);
        let docs = self
            .results
            .into_iter()
            .filter(|row| !row.deleted && !row.id.starts_with("_design/"))
            .filter_map(|row| {
                let doc = row.doc?;
                match serde_json::from_value::<StatusDocument>(doc) {
                    Ok(doc) => Some(doc),
                    Err(error) => {
                        tracing::warn!("Skipping undecodable status document {}: {error}", row.id);
                        None
                    }
                }
            })
            .collect();

        ChangeBatch {
            docs,
            last_seq: seq_to_string(self.last_seq),
            has_more,
        }
    }
}

fn seq_to_string(seq: serde_json::Value) -> String {
    match seq {
        serde_json::Value::String(seq) => seq,
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct BulkDocResult {
    id: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn into_push_outcome(results: Vec<BulkDocResult>) -> RemoteResult<PushOutcome> {
    let mut outcome = PushOutcome::default();
    for result in results {
        match result.error.as_deref() {
            None => outcome.accepted.push(result.id),
            Some("conflict") => outcome.conflicts.push(result.id),
            Some("unauthorized" | "forbidden") => {
                return Err(RemoteError::Rejected {
                    status: 403,
                    message: result.reason.unwrap_or_else(|| "write refused".to_string()),
                });
            }
            Some(other) => {
                tracing::warn!(
                    "Remote refused status document {}: {other} ({})",
                    result.id,
                    result.reason.unwrap_or_default()
                );
                outcome.refused.push(result.id);
            }
        }
    }
    Ok(outcome)
}
