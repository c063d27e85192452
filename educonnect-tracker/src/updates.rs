use educonnect_logic::{LocationReading, StateUpdateSender};
use log::{info, warn};
use tokio::sync::mpsc;

/// Logs new fixes and forwards them so the driver can submit each one
pub struct FixForwarder(mpsc::Sender<LocationReading>);

impl FixForwarder {
    pub fn new() -> (Self, mpsc::Receiver<LocationReading>) {
        let (tx, rx) = mpsc::channel(4);
        (Self(tx), rx)
    }
}

impl StateUpdateSender for FixForwarder {
    fn send_update(&self) {}

    fn show_fix(&self, reading: &LocationReading) {
        info!(
            "New fix at {:.6}, {:.6} (accuracy {})",
            reading.latitude,
            reading.longitude,
            reading
                .accuracy
                .map(|a| format!("{a:.2} m"))
                .unwrap_or_else(|| "unknown".to_string())
        );

        if let Err(why) = self.0.try_send(*reading) {
            warn!("Dropping fix, previous ones haven't been sent yet: {why}");
        }
    }
}
