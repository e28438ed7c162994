use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] beacon_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Alert title cannot be empty")]
    EmptyTitle,
    #[error("Map image must be PNG or JPEG: {0}")]
    UnsupportedImage(String),
    #[error("A map image needs --lat and --lon")]
    MapImageWithoutLocation,
    #[error("Resource key cannot be empty")]
    EmptyResourceKey,
    #[error("Password verification failed for {0}")]
    VerificationFailed(String),
    #[error(
        "Remote sync is not configured. Set {0} (and BEACON_TOKEN) in the environment or a .env file."
    )]
    NotConfigured(&'static str),
}
