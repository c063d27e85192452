use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use log::{error, info, warn};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::SubjectProvider,
    geolocation::{Geolocation, PositionError},
    location::{LocationReading, now_millis},
    settings::TrackingSettings,
    store::LocationStore,
    submission::{SubmissionOutcome, send_location},
    tracking_state::{LocationState, LocationUiState, PermissionOutcome},
};

pub const UNEXPECTED_SEND_ERROR: &str = "Unknown error sending location.";

/// Receives notice that the tracking state changed
pub trait StateUpdateSender {
    /// State changed, the UI should re-read it
    fn send_update(&self);
    /// A new fix was applied, hand it to the map
    fn show_fix(&self, _reading: &LocationReading) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What happened when a submission was requested
pub enum SubmitAttempt {
    /// Another submission is still in flight, nothing was done
    AlreadySending,
    /// A precondition failed before contacting the store, contains the message set in state
    Rejected(String),
    /// The store was called
    Finished(SubmissionOutcome),
    /// The controller was shut down, nothing was done or the result was dropped
    ShutDown,
}

/// Whether the polling loop should keep going after a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    Continue,
    Stop,
}

/// Acquires the device location on an interval and sends it to the [LocationStore] on
/// request. Owns the tracking state, everything else only reads snapshots of it.
pub struct LocationController<G, S, A, U>
where
    G: Geolocation,
    S: LocationStore,
    A: SubjectProvider,
    U: StateUpdateSender,
{
    state: RwLock<LocationState>,
    geolocation: G,
    store: S,
    auth: A,
    state_update_sender: U,
    settings: TrackingSettings,
    cancel: CancellationToken,
}

impl<G, S, A, U> LocationController<G, S, A, U>
where
    G: Geolocation,
    S: LocationStore,
    A: SubjectProvider,
    U: StateUpdateSender,
{
    pub fn new(
        settings: TrackingSettings,
        geolocation: G,
        store: S,
        auth: A,
        state_update_sender: U,
    ) -> Self {
        Self {
            state: RwLock::new(LocationState::new()),
            geolocation,
            store,
            auth,
            state_update_sender,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn get_ui_state(&self) -> LocationUiState {
        self.state.read().await.as_ui_state()
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop polling. Anything still in flight will finish without touching state.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Check permission and request a new position, updating state with the result
    pub async fn request_location(&self) {
        self.refresh().await;
    }

    async fn refresh(&self) -> Refresh {
        if self.is_shut_down() {
            return Refresh::Stop;
        }

        if !self.geolocation.is_supported() {
            let mut state = self.state.write().await;
            if !state.is_unsupported() {
                warn!("Geolocation is not supported, location tracking disabled");
                state.mark_unsupported();
                drop(state);
                self.state_update_sender.send_update();
            }
            return Refresh::Stop;
        }

        let permission = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => { return Refresh::Stop; }
            res = self.geolocation.query_permission() => res,
        };

        let mut state = self.state.write().await;

        if self.is_shut_down() {
            return Refresh::Stop;
        }

        let outcome = match permission {
            Ok(permission) => state.apply_permission(permission),
            Err(why) => {
                warn!("Failed to query location permission: {why:?}");
                state.permission_query_failed();
                drop(state);
                self.state_update_sender.send_update();
                return Refresh::Continue;
            }
        };

        drop(state);
        self.state_update_sender.send_update();

        if outcome == PermissionOutcome::Denied {
            info!("Location permission denied");
            return if self.settings.recheck_when_denied {
                Refresh::Continue
            } else {
                Refresh::Stop
            };
        }

        let options = self.settings.position_options();
        let position = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => { return Refresh::Stop; }
            res = tokio::time::timeout(options.timeout(), self.geolocation.current_position(options)) => {
                res.unwrap_or(Err(PositionError::Timeout))
            }
        };

        let mut state = self.state.write().await;

        if self.is_shut_down() {
            return Refresh::Stop;
        }

        match position {
            Ok(pos) => {
                let reading = LocationReading::from(pos);
                let applied = state.apply_fix(reading);
                drop(state);
                if applied {
                    self.state_update_sender.show_fix(&reading);
                }
            }
            Err(why) => {
                warn!("Failed to get location: {why:?}");
                state.apply_position_error(why);
                drop(state);
            }
        }

        self.state_update_sender.send_update();

        Refresh::Continue
    }

    /// Send the current reading for the signed-in student. Only one submission runs at a
    /// time, calling this while one is in flight does nothing.
    pub async fn submit(&self) -> SubmitAttempt {
        if self.is_shut_down() {
            return SubmitAttempt::ShutDown;
        }

        let subject = self.auth.current_subject().await;

        let mut state = self.state.write().await;

        if self.is_shut_down() {
            return SubmitAttempt::ShutDown;
        }

        let (reading, subject) = match state.begin_send(subject) {
            None => return SubmitAttempt::AlreadySending,
            Some(Err(msg)) => {
                drop(state);
                self.state_update_sender.send_update();
                return SubmitAttempt::Rejected(msg);
            }
            Some(Ok(pair)) => pair,
        };

        drop(state);
        self.state_update_sender.send_update();

        let outcome = AssertUnwindSafe(send_location(&self.store, &reading, &subject))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!("Location store panicked while sending location");
                SubmissionOutcome::failed(UNEXPECTED_SEND_ERROR)
            });

        let mut state = self.state.write().await;

        if self.is_shut_down() {
            return SubmitAttempt::ShutDown;
        }

        state.finish_send(now_millis(), outcome.error_message().map(str::to_string));
        drop(state);
        self.state_update_sender.send_update();

        SubmitAttempt::Finished(outcome)
    }

    /// Main loop of tracking, refreshes the location immediately and then every
    /// [TrackingSettings::poll_interval] until [Self::shutdown] is called.
    pub async fn main_loop(&self) {
        let mut interval = tokio::time::interval(self.settings.poll_interval());

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break;
                }

                _ = interval.tick() => {
                    if self.refresh().await == Refresh::Stop {
                        break;
                    }
                }
            }
        }

        info!("Location tracking stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        auth::SessionSubject,
        geolocation::{PermissionState, Position},
        tests::{CountingSender, MockGeolocation, MockStore, PermissionReply, StoreReply},
        tracking_state::{
            AcquisitionPhase, DENIED_MESSAGE, INCOMPLETE_MESSAGE, NO_SUBJECT_MESSAGE,
            PERMISSION_QUERY_MESSAGE, UNSUPPORTED_MESSAGE,
        },
    };
    use tokio::{task::yield_now, test};

    type TestController =
        LocationController<Arc<MockGeolocation>, Arc<MockStore>, SessionSubject, CountingSender>;

    const INTERVAL: Duration = Duration::from_secs(60);

    struct Harness {
        geo: Arc<MockGeolocation>,
        store: Arc<MockStore>,
        sender: CountingSender,
        controller: Arc<TestController>,
    }

    impl Harness {
        fn with_settings(settings: TrackingSettings, subject: Option<&str>) -> Self {
            tokio::time::pause();
            let geo = Arc::new(MockGeolocation::new());
            let store = Arc::new(MockStore::new(StoreReply::Ok));
            let sender = CountingSender::default();
            let auth = subject.map(SessionSubject::signed_in).unwrap_or_default();
            let controller = Arc::new(TestController::new(
                settings,
                geo.clone(),
                store.clone(),
                auth,
                sender.clone(),
            ));

            Self {
                geo,
                store,
                sender,
                controller,
            }
        }

        fn new(subject: Option<&str>) -> Self {
            Self::with_settings(TrackingSettings::default(), subject)
        }

        fn start(&self) -> tokio::task::JoinHandle<()> {
            let controller = self.controller.clone();
            tokio::spawn(async move { controller.main_loop().await })
        }

        async fn ui(&self) -> LocationUiState {
            self.controller.get_ui_state().await
        }

        async fn tick(&self) {
            tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
            settle().await;
        }
    }

    /// Let spawned tasks run, the paused clock only moves when something sleeps
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
        for _ in 0..10 {
            yield_now().await;
        }
    }

    fn pos(lat: f64, lon: f64, accuracy: Option<f64>, timestamp: i64) -> Position {
        Position {
            latitude: lat,
            longitude: lon,
            accuracy,
            timestamp,
        }
    }

    #[test]
    async fn test_end_to_end_success() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(-23.5, -46.6, Some(5.0), 1000)));

        let handle = h.start();
        settle().await;

        let ui = h.ui().await;
        assert_eq!(ui.latitude, Some(-23.5));
        assert_eq!(ui.longitude, Some(-46.6));
        assert_eq!(ui.accuracy, Some(5.0));
        assert_eq!(ui.timestamp, Some(1000));
        assert_eq!(ui.error, None);
        assert_eq!(ui.permission_status, PermissionState::Granted);
        assert_eq!(ui.phase, AcquisitionPhase::Fixed);
        assert_eq!(h.sender.fixes(), 1);

        let res = h.controller.submit().await;
        assert_eq!(res, SubmitAttempt::Finished(SubmissionOutcome::Sent));

        let ui = h.ui().await;
        assert!(!ui.is_sending);
        assert!(ui.last_sent_time.is_some());
        assert_eq!(ui.sending_error, None);

        let inserted = h.store.inserted().await;
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].student_id, "s1");

        h.controller.shutdown();
        handle.await.expect("Loop panicked");
    }

    #[test]
    async fn test_end_to_end_store_fault() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(-23.5, -46.6, Some(5.0), 1000)));
        h.start();
        settle().await;

        h.controller.submit().await;
        let first_sent = h.ui().await.last_sent_time;
        assert!(first_sent.is_some());

        h.store.set_reply(StoreReply::Fault("network down".to_string()));
        let res = h.controller.submit().await;
        assert_eq!(
            res,
            SubmitAttempt::Finished(SubmissionOutcome::Failed("network down".to_string()))
        );

        let ui = h.ui().await;
        assert!(!ui.is_sending);
        assert_eq!(ui.sending_error.as_deref(), Some("network down"));
        assert_eq!(ui.last_sent_time, first_sent);
    }

    #[test]
    async fn test_second_submit_while_sending_is_noop() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(1.0, 2.0, None, 1000)));
        h.start();
        settle().await;

        let gate = h.store.hold();

        let first = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.submit().await }
        });
        settle().await;

        let during = h.ui().await;
        assert!(during.is_sending);
        let updates = h.sender.updates();

        let second = h.controller.submit().await;
        assert_eq!(second, SubmitAttempt::AlreadySending);
        assert_eq!(h.ui().await, during, "Second submit changed state");
        assert_eq!(h.sender.updates(), updates);

        gate.notify_one();
        let first = first.await.expect("Submit panicked");
        assert_eq!(first, SubmitAttempt::Finished(SubmissionOutcome::Sent));
        assert_eq!(h.store.calls(), 1);
        assert!(!h.ui().await.is_sending);
    }

    #[test]
    async fn test_submit_preconditions() {
        let h = Harness::new(None);

        let res = h.controller.submit().await;
        assert_eq!(res, SubmitAttempt::Rejected(NO_SUBJECT_MESSAGE.to_string()));
        assert_eq!(h.ui().await.sending_error.as_deref(), Some(NO_SUBJECT_MESSAGE));

        h.controller.auth.sign_in("s1").await;
        let res = h.controller.submit().await;
        assert_eq!(res, SubmitAttempt::Rejected(INCOMPLETE_MESSAGE.to_string()));
        assert_eq!(h.ui().await.sending_error.as_deref(), Some(INCOMPLETE_MESSAGE));

        assert_eq!(h.store.calls(), 0, "Store called despite failed precondition");
    }

    #[test]
    async fn test_submit_after_sign_in() {
        let h = Harness::new(None);
        h.geo.push_position(Ok(pos(1.0, 2.0, None, 1000)));
        h.controller.request_location().await;

        h.controller.submit().await;
        assert!(h.ui().await.sending_error.is_some());

        h.controller.auth.sign_in("s9").await;
        let res = h.controller.submit().await;
        assert_eq!(res, SubmitAttempt::Finished(SubmissionOutcome::Sent));
        assert_eq!(h.ui().await.sending_error, None);
    }

    #[test]
    async fn test_store_panic_is_caught() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(1.0, 2.0, None, 1000)));
        h.controller.request_location().await;
        h.store.set_reply(StoreReply::Panic);

        let res = h.controller.submit().await;
        assert_eq!(
            res,
            SubmitAttempt::Finished(SubmissionOutcome::Failed(UNEXPECTED_SEND_ERROR.to_string()))
        );

        let ui = h.ui().await;
        assert!(!ui.is_sending);
        assert_eq!(ui.sending_error.as_deref(), Some(UNEXPECTED_SEND_ERROR));
    }

    #[test]
    async fn test_denied_keeps_coordinates() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(-23.5, -46.6, Some(5.0), 1000)));
        h.start();
        settle().await;

        h.geo.set_permission(PermissionReply::State(PermissionState::Denied));
        h.tick().await;

        let ui = h.ui().await;
        assert_eq!(ui.permission_status, PermissionState::Denied);
        assert_eq!(ui.phase, AcquisitionPhase::Denied);
        assert_eq!(ui.error.as_deref(), Some(DENIED_MESSAGE));
        assert_eq!(ui.latitude, Some(-23.5));
        assert_eq!(ui.longitude, Some(-46.6));
        assert_eq!(h.geo.position_calls(), 1, "Position requested while denied");
    }

    #[test]
    async fn test_denied_rechecks_and_recovers() {
        let h = Harness::new(Some("s1"));
        h.geo.set_permission(PermissionReply::State(PermissionState::Denied));
        h.start();
        settle().await;

        assert_eq!(h.ui().await.error.as_deref(), Some(DENIED_MESSAGE));

        h.tick().await;
        assert_eq!(h.geo.permission_calls(), 2, "Permission not re-checked");

        h.geo.set_permission(PermissionReply::State(PermissionState::Prompt));
        h.geo.push_position(Ok(pos(3.0, 4.0, None, 5000)));
        h.tick().await;

        let ui = h.ui().await;
        assert_eq!(ui.error, None);
        assert_eq!(ui.latitude, Some(3.0));
        assert_eq!(ui.permission_status, PermissionState::Prompt);
    }

    #[test]
    async fn test_denied_without_recheck_stops() {
        let settings = TrackingSettings {
            recheck_when_denied: false,
            ..Default::default()
        };
        let h = Harness::with_settings(settings, Some("s1"));
        h.geo.set_permission(PermissionReply::State(PermissionState::Denied));

        let handle = h.start();
        settle().await;
        handle.await.expect("Loop panicked");

        h.tick().await;
        assert_eq!(h.geo.permission_calls(), 1);
    }

    #[test]
    async fn test_timeout_keeps_reading() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(-23.5, -46.6, Some(5.0), 1000)));
        h.start();
        settle().await;
        let before = h.ui().await;

        h.geo.push_position(Err(PositionError::Timeout));
        h.tick().await;

        let ui = h.ui().await;
        assert_eq!(ui.error.as_deref(), Some(PositionError::Timeout.message()));
        assert_eq!(ui.latitude, before.latitude);
        assert_eq!(ui.longitude, before.longitude);
        assert_eq!(ui.accuracy, before.accuracy);
        assert_eq!(ui.timestamp, before.timestamp);
        assert_eq!(ui.phase, AcquisitionPhase::Fixed);
    }

    #[test]
    async fn test_platform_never_answers() {
        let h = Harness::new(Some("s1"));
        h.geo.set_hang(true);

        h.controller.request_location().await;

        let ui = h.ui().await;
        assert_eq!(ui.error.as_deref(), Some(PositionError::Timeout.message()));
        assert_eq!(ui.phase, AcquisitionPhase::Idle);
        assert_eq!(ui.latitude, None);
    }

    #[test]
    async fn test_position_errors_classified() {
        let h = Harness::new(Some("s1"));

        for err in [
            PositionError::PermissionDenied,
            PositionError::Unavailable,
            PositionError::Timeout,
        ] {
            h.geo.push_position(Err(err));
            h.controller.request_location().await;
            assert_eq!(h.ui().await.error.as_deref(), Some(err.message()));
        }
    }

    #[test]
    async fn test_permission_query_fault() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(1.0, 2.0, None, 1000)));
        h.controller.request_location().await;

        h.geo.set_permission(PermissionReply::Fault);
        h.controller.request_location().await;

        let ui = h.ui().await;
        assert_eq!(ui.error.as_deref(), Some(PERMISSION_QUERY_MESSAGE));
        assert_eq!(ui.latitude, Some(1.0));
        assert_eq!(h.geo.position_calls(), 1);
    }

    #[test]
    async fn test_stale_fix_discarded() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(1.0, 2.0, None, 5000)));
        h.controller.request_location().await;

        h.geo.push_position(Ok(pos(9.0, 9.0, None, 4000)));
        h.controller.request_location().await;

        let ui = h.ui().await;
        assert_eq!(ui.latitude, Some(1.0));
        assert_eq!(ui.timestamp, Some(5000));
        assert_eq!(h.sender.fixes(), 1);
    }

    #[test]
    async fn test_unsupported_is_terminal() {
        let h = Harness::new(Some("s1"));
        h.geo.set_supported(false);

        let handle = h.start();
        settle().await;
        handle.await.expect("Loop panicked");

        let ui = h.ui().await;
        assert_eq!(ui.phase, AcquisitionPhase::Unsupported);
        assert_eq!(ui.error.as_deref(), Some(UNSUPPORTED_MESSAGE));
        assert_eq!(h.geo.permission_calls(), 0);

        h.controller.request_location().await;
        assert_eq!(h.geo.permission_calls(), 0);
    }

    #[test]
    async fn test_polls_on_interval() {
        let h = Harness::new(Some("s1"));
        h.start();
        settle().await;
        assert_eq!(h.geo.position_calls(), 1);

        h.tick().await;
        h.tick().await;
        assert_eq!(h.geo.position_calls(), 3);
    }

    #[test]
    async fn test_zero_interval_still_polls() {
        let settings = TrackingSettings {
            poll_interval_seconds: 0,
            ..Default::default()
        };
        let h = Harness::with_settings(settings, Some("s1"));

        let handle = h.start();
        settle().await;
        assert_eq!(h.geo.position_calls(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        settle().await;
        assert_eq!(h.geo.position_calls(), 2);

        h.controller.shutdown();
        handle.await.expect("Loop panicked");
    }

    #[test]
    async fn test_shutdown_stops_timer() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(-23.5, -46.6, Some(5.0), 1000)));
        let handle = h.start();
        settle().await;

        let before = h.ui().await;
        let updates = h.sender.updates();

        h.controller.shutdown();
        handle.await.expect("Loop panicked");

        h.geo.push_position(Ok(pos(1.0, 1.0, None, 9000)));
        h.tick().await;
        h.tick().await;

        assert_eq!(h.ui().await, before);
        assert_eq!(h.sender.updates(), updates);
        assert_eq!(h.geo.permission_calls(), 1);
    }

    #[test]
    async fn test_shutdown_during_poll() {
        let h = Harness::new(Some("s1"));
        let gate = h.geo.hold();
        h.geo.push_position(Ok(pos(1.0, 1.0, None, 1000)));

        let handle = h.start();
        settle().await;
        assert_eq!(h.ui().await.phase, AcquisitionPhase::AwaitingFix);
        let before = h.ui().await;

        h.controller.shutdown();
        gate.notify_one();
        handle.await.expect("Loop panicked");
        settle().await;

        assert_eq!(h.ui().await, before);
        assert_eq!(h.sender.fixes(), 0);
    }

    #[test]
    async fn test_shutdown_during_submit() {
        let h = Harness::new(Some("s1"));
        h.geo.push_position(Ok(pos(1.0, 1.0, None, 1000)));
        h.controller.request_location().await;

        let gate = h.store.hold();
        let pending = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.submit().await }
        });
        settle().await;
        let before = h.ui().await;
        assert!(before.is_sending);

        h.controller.shutdown();
        gate.notify_one();

        let res = pending.await.expect("Submit panicked");
        assert_eq!(res, SubmitAttempt::ShutDown);
        assert_eq!(h.ui().await, before);
        assert_eq!(h.controller.submit().await, SubmitAttempt::ShutDown);
    }
}
