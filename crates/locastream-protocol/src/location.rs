//! The location sample carried by every message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Valid latitude range in degrees.
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);

/// Valid longitude range in degrees.
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// A single position update pushed by a producer.
///
/// Only `latitude` and `longitude` are required. Journey metadata and the
/// producer's identity are optional, and any other field is kept in
/// [`Location::extra`] so re-encoding a sample does not drop data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Cumulative journey distance in kilometres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Cumulative journey duration in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Identifies the producer so viewers can keep one marker per user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Fields this crate does not know about.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Location {
    /// Create a bare sample.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            distance: None,
            duration: None,
            user_id: None,
            extra: Map::new(),
        }
    }

    /// Attach journey metadata (kilometres, minutes).
    #[must_use]
    pub fn with_journey(mut self, distance: f64, duration: f64) -> Self {
        self.distance = Some(distance);
        self.duration = Some(duration);
        self
    }

    /// Attach a producer identity.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
