use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::{geolocation::PositionOptions, prelude::*};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, specta::Type)]
#[serde(default)]
/// Settings for location tracking
pub struct TrackingSettings {
    /// Seconds between automatic location refreshes, at least 1
    pub poll_interval_seconds: u64,
    /// Ask the platform for its most accurate (usually GPS) position
    pub high_accuracy: bool,
    /// How long a single position request may take
    pub timeout_ms: u64,
    /// Max age of a cached position the platform may reuse
    pub maximum_age_ms: u64,
    /// Keep re-checking permission on every refresh after the user denied it. They may
    /// change it in their settings at any time, but this does mean polling forever.
    pub recheck_when_denied: bool,
}

impl TrackingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    /// Reject settings that would parse but can't be used as-is
    pub fn validate(&self) -> Result {
        if self.poll_interval_seconds == 0 {
            bail!("Poll interval must be at least 1 second");
        }
        if self.timeout_ms == 0 {
            bail!("Position timeout must be greater than 0");
        }
        Ok(())
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            enable_high_accuracy: self.high_accuracy,
            timeout_ms: self.timeout_ms,
            maximum_age_ms: self.maximum_age_ms,
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            high_accuracy: true,
            timeout_ms: 10_000,
            maximum_age_ms: 0,
            recheck_when_denied: true,
        }
    }
}
