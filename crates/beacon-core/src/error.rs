//! Error types for beacon-core

use thiserror::Error;

use crate::db::Partition;
use crate::remote::RemoteError;

/// Result type alias using beacon-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in beacon-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence backend missing or denied
    #[error("Local storage is unavailable: {0}")]
    StorageUnavailable(String),

    /// A partition hit its storage quota; callers evict and retry
    #[error("Storage quota exceeded for {partition}")]
    StorageQuotaExceeded { partition: Partition },

    /// Retryable transport failure (timeout, connection reset, 5xx)
    #[error("Transient network failure: {0}")]
    TransientNetworkFailure(String),

    /// The remote authority definitively refused the request
    #[error("Rejected by remote ({status}): {message}")]
    NonRetryableRejection { status: u16, message: String },

    /// A dependent resource whose parent has not synced yet
    #[error("Not yet available: {0}")]
    NotYetAvailable(String),

    /// A single stored value could not be decoded
    #[error("Stored value could not be decoded: {0}")]
    DecodeCorruption(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The contact list is full; the user has to remove one first
    #[error("Contact list is full (maximum {0})")]
    ContactLimitReached(usize),

    /// Offline credential error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Network-class errors are expected during connectivity flaps and are
    /// never shown to the user.
    pub const fn is_network_class(&self) -> bool {
        matches!(
            self,
            Self::TransientNetworkFailure(_) | Self::NotYetAvailable(_)
        )
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Transient(message) => Self::TransientNetworkFailure(message),
            RemoteError::Rejected { status, message } => {
                Self::NonRetryableRejection { status, message }
            }
            RemoteError::NotYetAvailable(message) => Self::NotYetAvailable(message),
        }
    }
}
