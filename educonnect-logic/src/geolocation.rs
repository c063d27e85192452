use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    location::{EpochMillis, LocationComponent, LocationReading},
    prelude::*,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, specta::Type)]
/// Permission to read the device location, as reported by the platform
pub enum PermissionState {
    Granted,
    Denied,
    /// The platform will ask the user on the next position request
    Prompt,
    /// Permission hasn't been queried yet
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Options passed along with each position request
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    /// Max time the platform may take to resolve a position
    pub timeout_ms: u64,
    /// Max age of a cached position the platform may hand back, 0 means always fetch a new one
    pub maximum_age_ms: u64,
}

impl PositionOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// A resolved position from the platform
pub struct Position {
    pub latitude: LocationComponent,
    pub longitude: LocationComponent,
    pub accuracy: Option<LocationComponent>,
    pub timestamp: EpochMillis,
}

impl From<Position> for LocationReading {
    fn from(pos: Position) -> Self {
        Self {
            latitude: pos.latitude,
            longitude: pos.longitude,
            accuracy: pos.accuracy,
            captured_at: pos.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why a position request failed
pub enum PositionError {
    PermissionDenied,
    Unavailable,
    Timeout,
}

impl PositionError {
    /// Message shown to the user for this failure
    pub fn message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "Permission to access your location was denied.",
            Self::Unavailable => "Location unavailable.",
            Self::Timeout => "Timed out while trying to get your location.",
        }
    }
}

impl std::fmt::Display for PositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for PositionError {}

/// Access to the device's location
pub trait Geolocation: Send + Sync {
    /// Whether the platform can provide a location at all
    fn is_supported(&self) -> bool {
        true
    }
    /// Check the current permission state without prompting
    fn query_permission(&self) -> impl Future<Output = Result<PermissionState>> + Send;
    /// Request a single position, may prompt the user if permission is [PermissionState::Prompt]
    fn current_position(
        &self,
        options: PositionOptions,
    ) -> impl Future<Output = Result<Position, PositionError>> + Send;
}

impl<T: Geolocation> Geolocation for Arc<T> {
    fn is_supported(&self) -> bool {
        (**self).is_supported()
    }

    fn query_permission(&self) -> impl Future<Output = Result<PermissionState>> + Send {
        (**self).query_permission()
    }

    fn current_position(
        &self,
        options: PositionOptions,
    ) -> impl Future<Output = Result<Position, PositionError>> + Send {
        (**self).current_position(options)
    }
}
