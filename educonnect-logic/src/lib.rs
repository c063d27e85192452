mod auth;
mod controller;
mod geolocation;
mod location;
mod settings;
mod store;
mod submission;
mod tracking_state;

pub use auth::{SessionSubject, SubjectProvider};
pub use controller::{LocationController, StateUpdateSender, SubmitAttempt, UNEXPECTED_SEND_ERROR};
pub use geolocation::{Geolocation, PermissionState, Position, PositionError, PositionOptions};
pub use location::{EpochMillis, LocationComponent, LocationReading, UtcDT, now_millis};
pub use settings::TrackingSettings;
pub use store::{LocationRecord, LocationStore};
pub use submission::{GENERIC_SEND_ERROR, SubmissionOutcome, fetch_latest_location, send_location};
pub use tracking_state::{AcquisitionPhase, LocationUiState};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
