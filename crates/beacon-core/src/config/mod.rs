//! Sync configuration.
//!
//! `SyncConfig` is loaded from `BEACON_*` environment variables or from a JSON
//! document. Every field has a default so a bare config works fully offline;
//! the remote endpoints are only needed for delivery and replication.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::FieldCodec;
use crate::error::{Error, Result};
use crate::queue::QueuePolicy;
use crate::remote::RemoteTimeouts;
use crate::util::{is_http_url, normalize_text_option};

/// Key used when no codec key is configured
const DEFAULT_CODEC_KEY: &str = "beacon-local-obfuscation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Base URL of the remote authority HTTP surface
    pub api_base_url: Option<String>,
    /// Replication server hosting the status database
    pub change_feed_url: Option<String>,
    pub status_database: String,
    pub codec_key: Option<String>,
    pub max_queue_size: usize,
    pub max_retries: u32,
    pub max_contacts: usize,
    pub reconnect_debounce_ms: u64,
    pub periodic_retry_secs: u64,
    pub interactive_timeout_ms: u64,
    pub background_timeout_ms: u64,
    /// How long a live pull holds the changes feed open
    pub live_poll_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            change_feed_url: None,
            status_database: "beacon-status".to_string(),
            codec_key: None,
            max_queue_size: 50,
            max_retries: 3,
            max_contacts: 5,
            reconnect_debounce_ms: 1_000,
            periodic_retry_secs: 30,
            interactive_timeout_ms: 800,
            background_timeout_ms: 3_000,
            live_poll_secs: 25,
        }
    }
}

impl SyncConfig {
    /// Read `BEACON_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let text = |key: &str| normalize_text_option(lookup(key));

        let config = Self {
            api_base_url: text("BEACON_API_URL"),
            change_feed_url: text("BEACON_CHANGE_FEED_URL"),
            status_database: text("BEACON_STATUS_DB").unwrap_or(defaults.status_database),
            codec_key: text("BEACON_CODEC_KEY"),
            max_queue_size: parse_number(&text, "BEACON_MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_retries: parse_number(&text, "BEACON_MAX_RETRIES", defaults.max_retries)?,
            max_contacts: parse_number(&text, "BEACON_MAX_CONTACTS", defaults.max_contacts)?,
            reconnect_debounce_ms: parse_number(
                &text,
                "BEACON_RECONNECT_DEBOUNCE_MS",
                defaults.reconnect_debounce_ms,
            )?,
            periodic_retry_secs: parse_number(
                &text,
                "BEACON_PERIODIC_RETRY_SECS",
                defaults.periodic_retry_secs,
            )?,
            interactive_timeout_ms: parse_number(
                &text,
                "BEACON_INTERACTIVE_TIMEOUT_MS",
                defaults.interactive_timeout_ms,
            )?,
            background_timeout_ms: parse_number(
                &text,
                "BEACON_BACKGROUND_TIMEOUT_MS",
                defaults.background_timeout_ms,
            )?,
            live_poll_secs: parse_number(&text, "BEACON_LIVE_POLL_SECS", defaults.live_poll_secs)?,
        };
        config.validated()
    }

    /// Normalize URLs and reject values the sync core cannot run with
    pub fn validated(mut self) -> Result<Self> {
        self.api_base_url = normalize_optional_url(self.api_base_url, "api_base_url")?;
        self.change_feed_url = normalize_optional_url(self.change_feed_url, "change_feed_url")?;
        self.codec_key = normalize_text_option(self.codec_key);
        self.status_database = self.status_database.trim().to_string();

        if self.status_database.is_empty() {
            return Err(invalid("status_database must not be empty"));
        }
        if self.max_queue_size == 0 {
            return Err(invalid("max_queue_size must be at least 1"));
        }
        if self.max_contacts == 0 {
            return Err(invalid("max_contacts must be at least 1"));
        }
        if self.interactive_timeout_ms == 0 || self.background_timeout_ms == 0 {
            return Err(invalid("network timeouts must be positive"));
        }
        if self.periodic_retry_secs == 0 || self.live_poll_secs == 0 {
            return Err(invalid("retry and poll intervals must be positive"));
        }
        Ok(self)
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_size: self.max_queue_size,
            max_retries: self.max_retries,
            attempt_timeout: Duration::from_millis(self.background_timeout_ms),
        }
    }

    pub const fn remote_timeouts(&self) -> RemoteTimeouts {
        RemoteTimeouts {
            interactive: Duration::from_millis(self.interactive_timeout_ms),
            background: Duration::from_millis(self.background_timeout_ms),
        }
    }

    pub const fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }

    pub const fn periodic_retry(&self) -> Duration {
        Duration::from_secs(self.periodic_retry_secs)
    }

    pub const fn live_poll_wait(&self) -> Duration {
        Duration::from_secs(self.live_poll_secs)
    }

    /// Codec for sensitive fields, using the built-in key when none is set
    pub fn codec(&self) -> Result<FieldCodec> {
        match self.codec_key.as_deref() {
            Some(key) => FieldCodec::new(key),
            None => {
                tracing::debug!("No codec key configured; using the built-in key");
                FieldCodec::new(DEFAULT_CODEC_KEY)
            }
        }
    }
}

/// Parse and validate a JSON config document
pub fn parse_config(payload: &str) -> Result<SyncConfig> {
    let config: SyncConfig = serde_json::from_str(payload)
        .map_err(|error| invalid(&format!("invalid config JSON: {error}")))?;
    config.validated()
}

fn parse_number<T: std::str::FromStr>(
    text: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match text(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(&format!("{key} must be a non-negative integer, got '{raw}'"))),
        None => Ok(default),
    }
}

fn normalize_optional_url(raw: Option<String>, field: &str) -> Result<Option<String>> {
    let Some(value) = normalize_text_option(raw) else {
        return Ok(None);
    };
    if is_http_url(&value) {
        Ok(Some(value.trim_end_matches('/').to_string()))
    } else {
        Err(invalid(&format!(
            "config field '{field}' must include http:// or https://"
        )))
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidInput(message.to_string())
}
