use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    geolocation::{PermissionState, PositionError},
    location::{EpochMillis, LocationComponent, LocationReading},
};

pub const UNSUPPORTED_MESSAGE: &str = "Geolocation is not supported on this device.";
pub const DENIED_MESSAGE: &str = "Permission to access your location was denied. Please enable location access in your device settings.";
pub const PERMISSION_QUERY_MESSAGE: &str = "Error requesting location permission.";
pub const NO_SUBJECT_MESSAGE: &str = "No signed-in student to send the location for.";
pub const INCOMPLETE_MESSAGE: &str = "Incomplete location data.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
/// Where location acquisition currently is
pub enum AcquisitionPhase {
    /// Nothing has been acquired yet
    Idle,
    /// A position request is out to the platform
    AwaitingFix,
    /// We have a reading, latest request succeeded or failed transiently
    Fixed,
    /// The user denied location access
    Denied,
    /// The platform can't provide locations, nothing more will happen until restart
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Submission side of the state, an error can't be present while sending
pub enum SendState {
    Idle {
        last_sent: Option<EpochMillis>,
        error: Option<String>,
    },
    Sending {
        last_sent: Option<EpochMillis>,
    },
}

impl SendState {
    pub fn last_sent(&self) -> Option<EpochMillis> {
        match self {
            Self::Idle { last_sent, .. } | Self::Sending { last_sent } => *last_sent,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Idle { error, .. } => error.as_deref(),
            Self::Sending { .. } => None,
        }
    }

    pub fn is_sending(&self) -> bool {
        matches!(self, Self::Sending { .. })
    }
}

impl Default for SendState {
    fn default() -> Self {
        Self::Idle {
            last_sent: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What a refresh should do after checking permission
pub enum PermissionOutcome {
    /// Go ahead and request a position
    Request,
    /// Permission denied, stop here
    Denied,
}

/// State of location tracking, only ever mutated by the controller
#[derive(Debug, Clone)]
pub struct LocationState {
    phase: AcquisitionPhase,
    permission: PermissionState,
    reading: Option<LocationReading>,
    error: Option<String>,
    send: SendState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, specta::Type)]
/// Flattened view of [LocationState] for the UI
pub struct LocationUiState {
    pub latitude: Option<LocationComponent>,
    pub longitude: Option<LocationComponent>,
    pub accuracy: Option<LocationComponent>,
    pub timestamp: Option<EpochMillis>,
    pub error: Option<String>,
    pub permission_status: PermissionState,
    pub phase: AcquisitionPhase,
    pub is_sending: bool,
    pub last_sent_time: Option<EpochMillis>,
    pub sending_error: Option<String>,
}

impl Default for LocationState {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationState {
    pub fn new() -> Self {
        Self {
            phase: AcquisitionPhase::Idle,
            permission: PermissionState::Unknown,
            reading: None,
            error: None,
            send: SendState::default(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> AcquisitionPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn reading(&self) -> Option<&LocationReading> {
        self.reading.as_ref()
    }

    #[cfg(test)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[cfg(test)]
    pub fn send_state(&self) -> &SendState {
        &self.send
    }

    pub fn is_unsupported(&self) -> bool {
        self.phase == AcquisitionPhase::Unsupported
    }

    pub fn mark_unsupported(&mut self) {
        self.phase = AcquisitionPhase::Unsupported;
        self.error = Some(UNSUPPORTED_MESSAGE.to_string());
    }

    pub fn permission_query_failed(&mut self) {
        self.error = Some(PERMISSION_QUERY_MESSAGE.to_string());
    }

    /// Record the permission state the platform reported
    pub fn apply_permission(&mut self, permission: PermissionState) -> PermissionOutcome {
        self.permission = permission;
        if permission == PermissionState::Denied {
            self.phase = AcquisitionPhase::Denied;
            self.error = Some(DENIED_MESSAGE.to_string());
            PermissionOutcome::Denied
        } else {
            self.phase = AcquisitionPhase::AwaitingFix;
            PermissionOutcome::Request
        }
    }

    /// Phase to fall back to when a request doesn't produce a new reading
    fn settled_phase(&self) -> AcquisitionPhase {
        if self.reading.is_some() {
            AcquisitionPhase::Fixed
        } else {
            AcquisitionPhase::Idle
        }
    }

    /// Replace the current reading, returns `false` if the reading was older than the
    /// one we already have and was discarded.
    pub fn apply_fix(&mut self, reading: LocationReading) -> bool {
        if let Some(current) = &self.reading {
            if reading.is_older_than(current) {
                debug!(
                    "Discarding stale fix from {}, have {}",
                    reading.captured_at, current.captured_at
                );
                self.phase = self.settled_phase();
                return false;
            }
        }

        self.reading = Some(reading);
        self.error = None;
        self.phase = AcquisitionPhase::Fixed;
        true
    }

    /// A position request failed, coordinates are kept as-is
    pub fn apply_position_error(&mut self, err: PositionError) {
        self.error = Some(err.message().to_string());
        self.phase = self.settled_phase();
    }

    /// Check preconditions and switch to sending. Returns what to send on success, `None`
    /// if a submission is already running, or the message set for a failed precondition.
    pub fn begin_send(
        &mut self,
        subject: Option<String>,
    ) -> Option<Result<(LocationReading, String), String>> {
        let last_sent = match &self.send {
            SendState::Sending { .. } => return None,
            SendState::Idle { last_sent, .. } => *last_sent,
        };

        let precondition = match (subject, self.reading) {
            (None, _) => Err(NO_SUBJECT_MESSAGE),
            (Some(id), _) if id.trim().is_empty() => Err(NO_SUBJECT_MESSAGE),
            (Some(_), None) => Err(INCOMPLETE_MESSAGE),
            (Some(id), Some(reading)) => Ok((reading, id)),
        };

        match precondition {
            Ok(pair) => {
                self.send = SendState::Sending { last_sent };
                Some(Ok(pair))
            }
            Err(msg) => {
                self.send = SendState::Idle {
                    last_sent,
                    error: Some(msg.to_string()),
                };
                Some(Err(msg.to_string()))
            }
        }
    }

    /// Finish a submission started with [Self::begin_send]
    pub fn finish_send(&mut self, sent_at: EpochMillis, error: Option<String>) {
        let last_sent = self.send.last_sent();
        self.send = match error {
            None => SendState::Idle {
                last_sent: Some(sent_at),
                error: None,
            },
            Some(error) => SendState::Idle {
                last_sent,
                error: Some(error),
            },
        };
    }

    pub fn as_ui_state(&self) -> LocationUiState {
        LocationUiState {
            latitude: self.reading.map(|r| r.latitude),
            longitude: self.reading.map(|r| r.longitude),
            accuracy: self.reading.and_then(|r| r.accuracy),
            timestamp: self.reading.map(|r| r.captured_at),
            error: self.error.clone(),
            permission_status: self.permission,
            phase: self.phase,
            is_sending: self.send.is_sending(),
            last_sent_time: self.send.last_sent(),
            sending_error: self.send.error().map(str::to_string),
        }
    }
}
