//! Cached map snapshot model

use serde::{Deserialize, Serialize};

/// Upper bound for the decoded snapshot image
pub const MAX_SNAPSHOT_IMAGE_BYTES: usize = 500 * 1024;

/// Map context attached to an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub zoom: Option<u8>,
    /// Base64-encoded image
    #[serde(default)]
    pub image_base64: Option<String>,
}

impl MapSnapshot {
    #[must_use]
    pub const fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            zoom: None,
            image_base64: None,
        }
    }

    #[must_use]
    pub fn with_image(mut self, image_base64: impl Into<String>) -> Self {
        self.image_base64 = Some(image_base64.into());
        self
    }
}

/// Snapshot waiting to be uploaded for an alert
///
/// `alert_id` starts as the alert's client-side queue id and is remapped to
/// the server id once the alert is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMapSnapshot {
    pub alert_id: String,
    pub snapshot: MapSnapshot,
    /// Unix ms
    pub timestamp: i64,
    pub retry_count: u32,
}
