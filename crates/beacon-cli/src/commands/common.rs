use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use beacon_core::events::NoticeSink;
use beacon_core::models::QueuedItem;
use beacon_core::queue::{OutboundQueue, QueuePayload};
use beacon_core::snapshots::MapSnapshotCache;
use beacon_core::util::normalize_text_option;
use beacon_core::{
    CheckInRecord, HttpChangeFeed, HttpRemote, LocalStore, StoreLimits, SyncConfig, SyncContext,
    SyncNotice,
};
use chrono::Utc;
use serde::Serialize;

use crate::error::CliError;

pub type CliContext = SyncContext<HttpRemote, HttpChangeFeed>;

#[derive(Debug, Serialize)]
pub struct CheckInItem {
    pub id: i64,
    pub doc_id: String,
    pub status: String,
    pub timestamp: i64,
    pub relative_time: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub user_id: Option<String>,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct QueuedEntry {
    pub queue: String,
    pub id: String,
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub description: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("BEACON_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("beacon")
        .join("beacon.db")
}

/// Open the local store, falling back to memory when the file is unusable
pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    let store = LocalStore::open_or_degrade(path, StoreLimits::default()).await?;
    if store.is_degraded() {
        eprintln!("Warning: local storage unavailable; changes will not be kept after exit");
    }
    Ok(store)
}

pub fn load_config() -> Result<SyncConfig, CliError> {
    Ok(SyncConfig::from_env()?)
}

pub fn outbound_queue<T: QueuePayload>(store: &LocalStore, config: &SyncConfig) -> OutboundQueue<T> {
    OutboundQueue::new(store.clone(), config.queue_policy(), NoticeSink::default())
}

pub fn snapshot_cache(store: &LocalStore, config: &SyncConfig) -> MapSnapshotCache {
    let policy = config.queue_policy();
    MapSnapshotCache::new(store.clone(), policy.max_retries, policy.attempt_timeout)
}

fn access_token() -> Result<String, CliError> {
    normalize_text_option(env::var("BEACON_TOKEN").ok())
        .ok_or(CliError::NotConfigured("BEACON_TOKEN"))
}

pub fn http_remote(config: &SyncConfig) -> Result<HttpRemote, CliError> {
    let base_url = config
        .api_base_url
        .as_deref()
        .ok_or(CliError::NotConfigured("BEACON_API_URL"))?;
    Ok(HttpRemote::new(
        base_url,
        access_token()?,
        config.remote_timeouts(),
    )?)
}

pub fn change_feed(config: &SyncConfig) -> Result<HttpChangeFeed, CliError> {
    let server_url = config
        .change_feed_url
        .as_deref()
        .ok_or(CliError::NotConfigured("BEACON_CHANGE_FEED_URL"))?;
    Ok(HttpChangeFeed::new(
        server_url,
        &config.status_database,
        access_token()?,
        config.remote_timeouts().background,
    )?)
}

/// Sync context over the HTTP remote and changes feed
pub async fn open_context(db_path: &Path) -> Result<CliContext, CliError> {
    let config = load_config()?;
    let remote = http_remote(&config)?;
    let feed = change_feed(&config)?;
    let store = open_store(db_path).await?;
    Ok(SyncContext::init(
        store,
        Arc::new(remote),
        Arc::new(feed),
        config,
    )?)
}

pub fn check_in_to_item(record: &CheckInRecord, now_ms: i64) -> CheckInItem {
    CheckInItem {
        id: record.id,
        doc_id: record.doc_id.clone(),
        status: record.status.to_string(),
        timestamp: record.timestamp,
        relative_time: format_relative_time(record.timestamp, now_ms),
        latitude: record.latitude,
        longitude: record.longitude,
        user_id: record.user_id.clone(),
        synced: record.synced,
    }
}

pub fn format_check_in_lines(records: &[CheckInRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let location = match (record.latitude, record.longitude) {
                (Some(lat), Some(lon)) => format!(" at {lat:.5},{lon:.5}"),
                _ => String::new(),
            };
            let pending = if record.synced { "" } else { " (not synced)" };
            format!(
                "#{:<5} {:<4}{location}  {}{pending}",
                record.id,
                record.status,
                format_relative_time(record.timestamp, now_ms)
            )
        })
        .collect()
}

pub fn queued_entries<T>(
    queue: &str,
    items: &[QueuedItem<T>],
    describe: impl Fn(&T) -> String,
) -> Vec<QueuedEntry> {
    items
        .iter()
        .map(|item| QueuedEntry {
            queue: queue.to_string(),
            id: item.id.clone(),
            enqueued_at: item.enqueued_at,
            retry_count: item.retry_count,
            description: describe(&item.payload),
        })
        .collect()
}

/// One line per notice worth showing in `beacon watch`
pub fn format_notice(notice: &SyncNotice) -> Option<String> {
    match notice {
        SyncNotice::Connectivity { online: true } => Some("Back online".to_string()),
        SyncNotice::Connectivity { online: false } => Some("Offline; changes will be queued".to_string()),
        SyncNotice::Status(state) => match state.visible_error() {
            Some(error) => Some(format!("Sync error: {error}")),
            None => Some(format!("Sync {}", state.status)),
        },
        SyncNotice::DeliveryAbandoned { queue, reason, .. } => {
            Some(format!("Could not deliver one of the {}: {reason}", queue.label()))
        }
        SyncNotice::QuotaWarning { partition, evicted } => Some(format!(
            "Storage is full; dropped {evicted} old {}",
            partition.label()
        )),
        SyncNotice::Summary(summary) => Some(summary.clone()),
        SyncNotice::Delivered { .. } => None,
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
