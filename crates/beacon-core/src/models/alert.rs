//! Emergency alert payload

use serde::{Deserialize, Serialize};

use crate::util::now_millis;

/// Coordinate tolerance for duplicate detection (about 11 m at the equator)
pub const DUPLICATE_COORDINATE_TOLERANCE: f64 = 0.0001;

/// Submissions closer together than this are considered the same alert
pub const DUPLICATE_WINDOW_MS: i64 = 60_000;

/// An emergency alert raised by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Unix ms
    pub submitted_at: i64,
}

impl AlertPayload {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: None,
            latitude: None,
            longitude: None,
            submitted_at: now_millis(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub const fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Same title, same place, submitted within the duplicate window
    pub fn is_duplicate_of(&self, other: &Self) -> bool {
        self.title.trim().eq_ignore_ascii_case(other.title.trim())
            && same_place(
                (self.latitude, self.longitude),
                (other.latitude, other.longitude),
            )
            && (self.submitted_at - other.submitted_at).abs() <= DUPLICATE_WINDOW_MS
    }
}

fn same_place(a: (Option<f64>, Option<f64>), b: (Option<f64>, Option<f64>)) -> bool {
    match (a, b) {
        ((Some(lat_a), Some(lon_a)), (Some(lat_b), Some(lon_b))) => {
            (lat_a - lat_b).abs() <= DUPLICATE_COORDINATE_TOLERANCE
                && (lon_a - lon_b).abs() <= DUPLICATE_COORDINATE_TOLERANCE
        }
        ((None, None), (None, None)) => true,
        _ => false,
    }
}
