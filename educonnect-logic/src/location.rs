use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the unix epoch, the resolution geolocation APIs report in
pub type EpochMillis = i64;

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

/// A "part" of a location
pub type LocationComponent = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, specta::Type)]
/// A single captured position. Latitude, longitude and capture time always travel
/// together, a reading can't exist with only some of them.
pub struct LocationReading {
    /// Latitude in degrees
    pub latitude: LocationComponent,
    /// Longitude in degrees
    pub longitude: LocationComponent,
    /// Radius of uncertainty in meters, not every platform reports this
    pub accuracy: Option<LocationComponent>,
    /// When the platform captured this position
    pub captured_at: EpochMillis,
}

impl LocationReading {
    /// Whether this reading was captured before `other`
    pub fn is_older_than(&self, other: &Self) -> bool {
        self.captured_at < other.captured_at
    }

    /// Capture time as a UTC datetime, `None` if it's outside of chrono's range
    pub fn captured_at_utc(&self) -> Option<UtcDT> {
        DateTime::from_timestamp_millis(self.captured_at)
    }
}

pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_at_utc() {
        let reading = LocationReading {
            latitude: -23.5,
            longitude: -46.6,
            accuracy: Some(5.0),
            captured_at: 1_700_000_000_000,
        };
        let dt = reading.captured_at_utc().expect("In range");
        assert_eq!(dt.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn test_captured_at_out_of_range() {
        let reading = LocationReading {
            latitude: 0.0,
            longitude: 0.0,
            accuracy: None,
            captured_at: i64::MAX,
        };
        assert!(reading.captured_at_utc().is_none());
    }
}
