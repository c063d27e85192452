use anyhow::bail;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    location::LocationReading,
    prelude::*,
    store::{LocationRecord, LocationStore},
};

pub const GENERIC_SEND_ERROR: &str = "Error sending location.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Result of one attempt to send a reading
pub enum SubmissionOutcome {
    Sent,
    /// Contains a message suitable to show the user, never empty
    Failed(String),
}

impl SubmissionOutcome {
    pub fn failed(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if msg.trim().is_empty() {
            Self::Failed(GENERIC_SEND_ERROR.to_string())
        } else {
            Self::Failed(msg)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Sent)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Sent => None,
            Self::Failed(msg) => Some(msg),
        }
    }
}

fn make_record(reading: &LocationReading, student_id: &str) -> Result<LocationRecord> {
    if student_id.trim().is_empty() {
        bail!("Student id must not be empty.");
    }

    let Some(timestamp) = reading.captured_at_utc() else {
        bail!("Location timestamp is out of range.");
    };

    Ok(LocationRecord {
        student_id: student_id.to_string(),
        latitude: reading.latitude,
        longitude: reading.longitude,
        accuracy: reading.accuracy,
        timestamp,
    })
}

/// Append `reading` for `student_id` to the store. Makes exactly one insert
/// attempt, retrying is up to the caller.
pub async fn send_location<S: LocationStore>(
    store: &S,
    reading: &LocationReading,
    student_id: &str,
) -> SubmissionOutcome {
    let record = match make_record(reading, student_id) {
        Ok(record) => record,
        Err(why) => return SubmissionOutcome::failed(why.to_string()),
    };

    match store.insert_location_record(record).await {
        Ok(()) => SubmissionOutcome::Sent,
        Err(why) => {
            warn!("Error sending location: {why:?}");
            SubmissionOutcome::failed(why.to_string())
        }
    }
}

/// Get the newest stored location for a student
pub async fn fetch_latest_location<S: LocationStore>(
    store: &S,
    student_id: &str,
) -> Result<Option<LocationRecord>> {
    if student_id.trim().is_empty() {
        bail!("Student id must not be empty.");
    }

    store
        .latest_location(student_id)
        .await
        .context("Error getting latest location")
}
