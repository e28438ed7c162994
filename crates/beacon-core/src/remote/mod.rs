//! Remote authority boundary.
//!
//! Everything the sync core sends to or fetches from the backend goes through
//! [`RemoteAuthority`]. Responses are classified once, here, into
//! [`RemoteError`] so queue and replication code only branch on three cases.

mod http;

use std::future::Future;

use thiserror::Error;

use crate::models::{
    AlertPayload, EmergencyContact, GroupAction, GroupMembership, MapSnapshot, StatusPayload,
};
use crate::util::compact_text;

pub use http::{normalize_base_url, HttpRemote, RemoteTimeouts};

/// Failure reported by the remote authority or the transport underneath it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Timeout, connection failure or a retryable HTTP status
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server definitively refused the request
    #[error("rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// A dependent resource whose parent has not synced yet
    #[error("not yet available: {0}")]
    NotYetAvailable(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    /// Classify a non-success HTTP status.
    ///
    /// 401/403 (auth) and 400/422 (validation) are definitive; 404 means the
    /// parent record is not there yet; everything else is retried.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            compact_text(body)
        };
        match status {
            400 | 401 | 403 | 422 => Self::Rejected { status, message },
            404 => Self::NotYetAvailable(message),
            _ => Self::Transient(message),
        }
    }

    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Transient(format!("request timed out: {error}"))
        } else {
            Self::Transient(error.to_string())
        }
    }
}

/// HTTP surface of the backend as seen by the sync core
pub trait RemoteAuthority: Send + Sync + 'static {
    /// `POST /status`
    fn post_status(&self, payload: &StatusPayload) -> impl Future<Output = RemoteResult<()>> + Send;

    /// `POST /alerts`; returns the server-assigned alert id
    fn post_alert(&self, alert: &AlertPayload)
        -> impl Future<Output = RemoteResult<String>> + Send;

    /// `POST /groups/{id}/actions`
    fn post_group_action(
        &self,
        action: &GroupAction,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// `POST /alerts/{id}/map`
    fn post_map_snapshot(
        &self,
        alert_id: &str,
        snapshot: &MapSnapshot,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// `GET /contacts/sync`
    fn fetch_contacts(&self) -> impl Future<Output = RemoteResult<Vec<EmergencyContact>>> + Send;

    /// `POST /contacts/sync`
    fn push_contacts(
        &self,
        contacts: &[EmergencyContact],
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// `GET /groups/memberships`
    fn fetch_group_memberships(
        &self,
    ) -> impl Future<Output = RemoteResult<Vec<GroupMembership>>> + Send;

    /// Cheap reachability check used by the connectivity monitor
    fn ping(&self) -> impl Future<Output = RemoteResult<()>> + Send;
}
