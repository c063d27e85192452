use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    location::{LocationComponent, UtcDT},
    prelude::*,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A row in the remote `student_locations` table
pub struct LocationRecord {
    pub student_id: String,
    pub latitude: LocationComponent,
    pub longitude: LocationComponent,
    pub accuracy: Option<LocationComponent>,
    pub timestamp: UtcDT,
}

/// Remote store location records are appended to
pub trait LocationStore: Send + Sync {
    /// Insert a single record, errors should carry the store's own message
    fn insert_location_record(
        &self,
        record: LocationRecord,
    ) -> impl Future<Output = Result> + Send;
    /// Get the most recent record for a student
    fn latest_location(
        &self,
        student_id: &str,
    ) -> impl Future<Output = Result<Option<LocationRecord>>> + Send;
}

impl<T: LocationStore> LocationStore for Arc<T> {
    fn insert_location_record(
        &self,
        record: LocationRecord,
    ) -> impl Future<Output = Result> + Send {
        (**self).insert_location_record(record)
    }

    fn latest_location(
        &self,
        student_id: &str,
    ) -> impl Future<Output = Result<Option<LocationRecord>>> + Send {
        (**self).latest_location(student_id)
    }
}
