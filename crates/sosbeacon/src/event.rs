//! Core SOS data types.
//!
//! A [`SosEvent`] is the durable record of one successful activation. It is
//! only ever built from a [`NewSosEvent`], which requires both a location fix
//! and an uploaded audio URL.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single resolved geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, if the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl LocationFix {
    /// Create a fix without accuracy information.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    /// Attach an accuracy radius in meters.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

impl fmt::Display for LocationFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)?;
        if let Some(accuracy) = self.accuracy {
            write!(f, " (±{accuracy:.0} m)")?;
        }
        Ok(())
    }
}

/// The fields needed to insert an SOS event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSosEvent {
    /// The user who triggered the activation.
    pub user_id: String,
    /// Latitude of the fix taken at activation.
    pub latitude: f64,
    /// Longitude of the fix taken at activation.
    pub longitude: f64,
    /// Public URL of the uploaded recording.
    pub audio_url: String,
}

impl NewSosEvent {
    /// Build an insertable event from a fix and an uploaded clip URL.
    #[must_use]
    pub fn new(user_id: impl Into<String>, fix: LocationFix, audio_url: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            audio_url: audio_url.into(),
        }
    }
}

/// A persisted SOS event.
///
/// Immutable once stored; removed only by an explicit delete from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosEvent {
    /// Identifier assigned by the store.
    pub id: i64,
    /// The user who triggered the activation.
    pub user_id: String,
    /// Latitude of the fix taken at activation.
    pub latitude: f64,
    /// Longitude of the fix taken at activation.
    pub longitude: f64,
    /// Public URL of the uploaded recording.
    pub audio_url: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl SosEvent {
    /// The coordinates of this event as a fix.
    #[must_use]
    pub fn location(&self) -> LocationFix {
        LocationFix::new(self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_fix_display() {
        let fix = LocationFix::new(12.9, 77.6);
        assert_eq!(fix.to_string(), "12.900000, 77.600000");

        let fix = fix.with_accuracy(8.4);
        assert_eq!(fix.to_string(), "12.900000, 77.600000 (±8 m)");
    }

    #[test]
    fn test_new_sos_event_from_fix() {
        let fix = LocationFix::new(12.9, 77.6).with_accuracy(5.0);
        let event = NewSosEvent::new("user-1", fix, "https://x/y.m4a");

        assert_eq!(event.user_id, "user-1");
        assert!((event.latitude - 12.9).abs() < f64::EPSILON);
        assert!((event.longitude - 77.6).abs() < f64::EPSILON);
        assert_eq!(event.audio_url, "https://x/y.m4a");
    }

    #[test]
    fn test_sos_event_location() {
        let event = SosEvent {
            id: 1,
            user_id: "user-1".to_string(),
            latitude: -33.86,
            longitude: 151.21,
            audio_url: "https://x/y.m4a".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(event.location(), LocationFix::new(-33.86, 151.21));
    }

    #[test]
    fn test_location_fix_skips_missing_accuracy() {
        let json = serde_json::to_string(&LocationFix::new(1.0, 2.0)).unwrap();
        assert!(!json.contains("accuracy"));
    }

    #[test]
    fn test_sos_event_serialization() {
        let event = SosEvent {
            id: 7,
            user_id: "user-1".to_string(),
            latitude: 12.9,
            longitude: 77.6,
            audio_url: "https://x/y.m4a".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: SosEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }
}
