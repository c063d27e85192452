use educonnect_logic::{
    Geolocation, PermissionState, Position, PositionError, PositionOptions, now_millis,
    prelude::*,
};

/// Stands in for a device's geolocation, always reports the same coordinates with the
/// current time as the capture time.
pub struct FixedDevice {
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
}

impl FixedDevice {
    pub fn new(latitude: f64, longitude: f64, accuracy: Option<f64>) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            anyhow::bail!("Latitude {latitude} is out of range");
        }
        if !(-180.0..=180.0).contains(&longitude) {
            anyhow::bail!("Longitude {longitude} is out of range");
        }
        Ok(Self {
            latitude,
            longitude,
            accuracy,
        })
    }
}

impl Geolocation for FixedDevice {
    async fn query_permission(&self) -> Result<PermissionState> {
        Ok(PermissionState::Granted)
    }

    async fn current_position(
        &self,
        _options: PositionOptions,
    ) -> Result<Position, PositionError> {
        Ok(Position {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            timestamp: now_millis(),
        })
    }
}
