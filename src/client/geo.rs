use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use crate::models::{now_rfc3339, GeoPoint};

/// Target minimum interval between accepted transmissions.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(5);
/// Horizontal accuracy considered a good fix.
pub const ACCURACY_THRESHOLD_M: f64 = 100.0;
/// Wait tiers after which progressively worse accuracy is accepted.
pub const MAX_WAIT: Duration = Duration::from_secs(10);
pub const FALLBACK_THRESHOLD: Duration = Duration::from_secs(30);
pub const EMERGENCY_THRESHOLD: Duration = Duration::from_secs(60);
/// Watchdog cadence and the silence span that triggers a forced request.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(5);
pub const SENSOR_SILENCE: Duration = Duration::from_secs(10);

/// One raw reading from the positioning device.
#[derive(Debug, Clone)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    GoodAccuracy,
    EmergencyMode,
    FallbackMode,
    WaitedTooLong,
}

impl AcceptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptReason::GoodAccuracy => "good accuracy",
            AcceptReason::EmergencyMode => "emergency mode (any accuracy under 100km)",
            AcceptReason::FallbackMode => "fallback mode (accuracy under 50km)",
            AcceptReason::WaitedTooLong => "waited too long (accuracy under 10km)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Coordinates outside valid latitude/longitude ranges.
    OutOfRange,
    /// A good-accuracy fix arrived inside the 5 s floor. Escalation-tier
    /// acceptances are not subject to the floor.
    RateLimited,
    /// No quality rule admits this accuracy at the current wait time.
    AccuracyTooPoor,
}

/// Decides which raw readings are worth transmitting.
///
/// One instance per tracking session: all timing state lives here and is
/// discarded with the session, so a restart always begins a fresh
/// acceptance window.
#[derive(Debug)]
pub struct SampleFilter {
    best_accuracy: Option<f64>,
    /// When the current accuracy-wait window began.
    window_start: Instant,
    last_transmit: Option<Instant>,
}

impl SampleFilter {
    pub fn new(now: Instant) -> Self {
        Self {
            best_accuracy: None,
            window_start: now,
            last_transmit: None,
        }
    }

    /// Evaluate one raw reading. First match wins: good accuracy, then the
    /// escalation tiers in descending wait order. The 5 s floor only
    /// applies to good-accuracy acceptances; quality pressure overrides it.
    pub fn evaluate(&mut self, fix: &RawFix, now: Instant) -> Result<AcceptReason, RejectReason> {
        if !GeoPoint::new(fix.latitude, fix.longitude).in_range() {
            return Err(RejectReason::OutOfRange);
        }

        if self.best_accuracy.map_or(true, |best| fix.accuracy < best) {
            self.best_accuracy = Some(fix.accuracy);
        }

        let waiting = now.saturating_duration_since(self.window_start);

        let reason = if fix.accuracy <= ACCURACY_THRESHOLD_M {
            AcceptReason::GoodAccuracy
        } else if waiting > EMERGENCY_THRESHOLD && fix.accuracy < 100_000.0 {
            AcceptReason::EmergencyMode
        } else if waiting > FALLBACK_THRESHOLD && fix.accuracy < 50_000.0 {
            AcceptReason::FallbackMode
        } else if waiting > MAX_WAIT && fix.accuracy < 10_000.0 {
            AcceptReason::WaitedTooLong
        } else {
            return Err(RejectReason::AccuracyTooPoor);
        };

        if reason == AcceptReason::GoodAccuracy {
            if let Some(last) = self.last_transmit {
                if now.saturating_duration_since(last) < UPDATE_INTERVAL {
                    return Err(RejectReason::RateLimited);
                }
            }
        }

        Ok(reason)
    }

    /// Record a completed transmission. Called only after the write
    /// succeeded; a failed write leaves the window open so the next reading
    /// is evaluated as if nothing was sent.
    pub fn mark_transmitted(&mut self, now: Instant) {
        self.last_transmit = Some(now);
        self.window_start = now;
    }

    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_accuracy
    }

    /// Whether the target inter-sample interval has elapsed since the last
    /// accepted transmission.
    pub fn interval_elapsed(&self, now: Instant) -> bool {
        self.last_transmit
            .map_or(true, |last| now.saturating_duration_since(last) >= UPDATE_INTERVAL)
    }
}

/// Positioning failure, mapped to the user-facing causes shown by the
/// driver UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GeoError {
    #[error("Location access denied by user. Please enable location permissions.")]
    PermissionDenied,
    #[error("Location information unavailable. Please check your GPS settings.")]
    Unavailable,
    #[error("Location request timeout. Please try again or check your GPS signal.")]
    Timeout,
}

/// Request options passed to the positioning device.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub max_age: Duration,
}

impl WatchOptions {
    pub fn high_accuracy() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(30),
            max_age: Duration::from_secs(60),
        }
    }

    /// Relaxed options for the one-shot retry after a timeout.
    pub fn low_accuracy() -> Self {
        Self {
            high_accuracy: false,
            timeout: Duration::from_secs(10),
            max_age: Duration::from_secs(300),
        }
    }
}

/// Abstraction over the device geolocation API.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Begin a continuous watch. The stream ends when the device stops
    /// reporting.
    fn watch(&self, options: WatchOptions) -> mpsc::Receiver<Result<RawFix, GeoError>>;

    /// One-shot position request.
    async fn current_position(&self, options: WatchOptions) -> Result<RawFix, GeoError>;
}

/// Where accepted samples are transmitted (the location write endpoint).
#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn save(&self, sample: &OutgoingSample) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct OutgoingSample {
    pub trip_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
    pub accuracy: f64,
}

/// Session events surfaced to the driver UI.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Update {
        latitude: f64,
        longitude: f64,
        timestamp: String,
        accuracy: f64,
        reason: AcceptReason,
    },
    Error {
        message: String,
    },
}

/// One active tracking session for a trip.
///
/// Constructed per session and consumed by [`GeoTracker::run`]; dropping
/// out of `run` (shutdown signal or the watch stream closing) releases the
/// watch and all filter state, so the next session starts clean.
pub struct GeoTracker {
    trip_id: String,
    filter: SampleFilter,
    source: Arc<dyn PositionSource>,
    sink: Arc<dyn LocationSink>,
    events: mpsc::UnboundedSender<TrackerEvent>,
    last_fix_at: Option<Instant>,
    getting_position: bool,
}

impl GeoTracker {
    pub fn new(
        trip_id: impl Into<String>,
        source: Arc<dyn PositionSource>,
        sink: Arc<dyn LocationSink>,
        events: mpsc::UnboundedSender<TrackerEvent>,
    ) -> Self {
        Self {
            trip_id: trip_id.into(),
            filter: SampleFilter::new(Instant::now()),
            source,
            sink,
            events,
            last_fix_at: None,
            getting_position: false,
        }
    }

    /// Drive the session until shutdown or the watch stream closes.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut fixes = self.source.watch(WatchOptions::high_accuracy());
        let mut watchdog = tokio::time::interval(WATCHDOG_PERIOD);
        // The first tick fires immediately; the session just started, so
        // there is nothing to chase yet.
        watchdog.tick().await;

        loop {
            tokio::select! {
                fix = fixes.recv() => match fix {
                    Some(Ok(fix)) => self.handle_fix(fix).await,
                    Some(Err(error)) => self.handle_error(error).await,
                    None => break,
                },
                _ = watchdog.tick() => self.watchdog_tick().await,
                _ = &mut shutdown => break,
            }
        }
    }

    async fn handle_fix(&mut self, fix: RawFix) {
        let now = Instant::now();
        self.last_fix_at = Some(now);

        let reason = match self.filter.evaluate(&fix, now) {
            Ok(reason) => reason,
            Err(_) => return,
        };

        let sample = OutgoingSample {
            trip_id: self.trip_id.clone(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: now_rfc3339(),
            accuracy: fix.accuracy,
        };

        // Block on the write before confirming; a lost sample is simply
        // superseded by the next one.
        match self.sink.save(&sample).await {
            Ok(()) => {
                self.filter.mark_transmitted(Instant::now());
                let _ = self.events.send(TrackerEvent::Update {
                    latitude: sample.latitude,
                    longitude: sample.longitude,
                    timestamp: sample.timestamp,
                    accuracy: sample.accuracy,
                    reason,
                });
            }
            Err(message) => {
                let _ = self.events.send(TrackerEvent::Error { message });
            }
        }
    }

    /// Forced one-shot request when the sensor has gone quiet while an
    /// update is due. The re-entrancy flag keeps at most one in-flight
    /// request.
    async fn watchdog_tick(&mut self) {
        let now = Instant::now();
        let silent = self
            .last_fix_at
            .map_or(true, |at| now.saturating_duration_since(at) > SENSOR_SILENCE);
        if !silent || !self.filter.interval_elapsed(now) || self.getting_position {
            return;
        }

        self.getting_position = true;
        let result = self.source.current_position(WatchOptions::high_accuracy()).await;
        self.getting_position = false;

        match result {
            Ok(fix) => self.handle_fix(fix).await,
            Err(error) => self.handle_error(error).await,
        }
    }

    async fn handle_error(&mut self, error: GeoError) {
        if error == GeoError::Timeout {
            self.try_fallback().await;
        } else {
            let _ = self.events.send(TrackerEvent::Error {
                message: error.to_string(),
            });
        }
    }

    /// One relaxed retry after a timeout before giving up on the reading.
    async fn try_fallback(&mut self) {
        if self.getting_position {
            return;
        }
        self.getting_position = true;
        let result = self.source.current_position(WatchOptions::low_accuracy()).await;
        self.getting_position = false;

        match result {
            Ok(fix) => self.handle_fix(fix).await,
            Err(_) => {
                let _ = self.events.send(TrackerEvent::Error {
                    message: "GPS unavailable. Please check your location settings and try again."
                        .to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    fn fix(accuracy: f64) -> RawFix {
        RawFix {
            latitude: 12.9716,
            longitude: 77.5946,
            accuracy,
        }
    }

    #[test]
    fn good_accuracy_is_accepted_immediately() {
        let start = Instant::now();
        let mut filter = SampleFilter::new(start);
        assert_eq!(filter.evaluate(&fix(50.0), start), Ok(AcceptReason::GoodAccuracy));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected_first() {
        let start = Instant::now();
        let mut filter = SampleFilter::new(start);
        let bad = RawFix {
            latitude: 95.0,
            longitude: 77.0,
            accuracy: 5.0,
        };
        assert_eq!(
            filter.evaluate(&bad, start + Duration::from_secs(120)),
            Err(RejectReason::OutOfRange)
        );
    }

    #[test]
    fn fallback_tier_accepts_5km_after_35_seconds_but_not_at_5() {
        let start = Instant::now();
        let mut filter = SampleFilter::new(start);

        assert_eq!(
            filter.evaluate(&fix(5000.0), start + Duration::from_secs(5)),
            Err(RejectReason::AccuracyTooPoor)
        );
        let reason = filter
            .evaluate(&fix(5000.0), start + Duration::from_secs(35))
            .unwrap();
        assert_eq!(reason, AcceptReason::FallbackMode);
        assert!(reason.as_str().starts_with("fallback mode"));
    }

    #[test]
    fn escalation_tiers_relax_monotonically() {
        // For each worse accuracy the minimum wait before acceptance is
        // longer; for each fixed accuracy the required wait never increases
        // over time.
        let start = Instant::now();
        let min_wait = |accuracy: f64| -> Option<u64> {
            let mut filter = SampleFilter::new(start);
            (0..=70).find(|secs| {
                filter
                    .evaluate(&fix(accuracy), start + Duration::from_secs(*secs))
                    .is_ok()
            })
        };

        let waits: Vec<Option<u64>> = [99_000.0, 40_000.0, 9_000.0, 80.0]
            .iter()
            .map(|a| min_wait(*a))
            .collect();
        assert_eq!(waits, vec![Some(61), Some(31), Some(11), Some(0)]);

        // Accuracy beyond the emergency cap is never accepted
        assert_eq!(min_wait(150_000.0), None);
    }

    #[test]
    fn five_second_floor_applies_to_good_fixes_only() {
        let start = Instant::now();
        let mut filter = SampleFilter::new(start);

        assert!(filter.evaluate(&fix(20.0), start).is_ok());
        filter.mark_transmitted(start);

        // Good fix inside the floor: rejected
        assert_eq!(
            filter.evaluate(&fix(20.0), start + Duration::from_secs(2)),
            Err(RejectReason::RateLimited)
        );
        // At the floor boundary: accepted again
        assert!(filter
            .evaluate(&fix(20.0), start + Duration::from_secs(5))
            .is_ok());

        // Escalation acceptance is not floor-limited: after the window
        // resets, a poor fix is admitted as soon as its tier opens.
        filter.mark_transmitted(start + Duration::from_secs(5));
        assert_eq!(
            filter.evaluate(&fix(5000.0), start + Duration::from_secs(7)),
            Err(RejectReason::AccuracyTooPoor)
        );
        assert_eq!(
            filter.evaluate(&fix(5000.0), start + Duration::from_secs(16)),
            Ok(AcceptReason::WaitedTooLong)
        );
    }

    #[test]
    fn mark_transmitted_restarts_the_acceptance_window() {
        let start = Instant::now();
        let mut filter = SampleFilter::new(start);

        let at = start + Duration::from_secs(35);
        assert_eq!(filter.evaluate(&fix(5000.0), at), Ok(AcceptReason::FallbackMode));
        filter.mark_transmitted(at);

        // Window restarted: the same poor accuracy must wait again
        assert_eq!(
            filter.evaluate(&fix(5000.0), at + Duration::from_secs(2)),
            Err(RejectReason::AccuracyTooPoor)
        );
    }

    #[test]
    fn best_accuracy_tracks_the_minimum_seen() {
        let start = Instant::now();
        let mut filter = SampleFilter::new(start);
        let _ = filter.evaluate(&fix(800.0), start);
        let _ = filter.evaluate(&fix(300.0), start + Duration::from_secs(1));
        let _ = filter.evaluate(&fix(600.0), start + Duration::from_secs(2));
        assert_eq!(filter.best_accuracy(), Some(300.0));
    }

    #[test]
    fn geo_errors_map_to_user_facing_messages() {
        assert!(GeoError::PermissionDenied.to_string().contains("enable location permissions"));
        assert!(GeoError::Unavailable.to_string().contains("check your GPS settings"));
        assert!(GeoError::Timeout.to_string().contains("timeout"));
    }

    struct TestSource {
        watch_rx: std::sync::Mutex<Option<mpsc::Receiver<Result<RawFix, GeoError>>>>,
        oneshot_result: Result<RawFix, GeoError>,
    }

    #[async_trait]
    impl PositionSource for TestSource {
        fn watch(&self, _options: WatchOptions) -> mpsc::Receiver<Result<RawFix, GeoError>> {
            self.watch_rx
                .lock()
                .unwrap()
                .take()
                .expect("watch started twice")
        }

        async fn current_position(&self, _options: WatchOptions) -> Result<RawFix, GeoError> {
            self.oneshot_result.clone()
        }
    }

    struct TestSink {
        saved: Mutex<Vec<OutgoingSample>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl LocationSink for TestSink {
        async fn save(&self, sample: &OutgoingSample) -> Result<(), String> {
            if let Some(message) = &self.fail_with {
                return Err(message.clone());
            }
            self.saved.lock().await.push(sample.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn accepted_fix_is_saved_and_reported() {
        let (fix_tx, fix_rx) = mpsc::channel(8);
        let source = Arc::new(TestSource {
            watch_rx: std::sync::Mutex::new(Some(fix_rx)),
            oneshot_result: Err(GeoError::Unavailable),
        });
        let sink = Arc::new(TestSink {
            saved: Mutex::new(Vec::new()),
            fail_with: None,
        });
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let tracker = GeoTracker::new("trip-1", source, sink.clone(), event_tx);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(tracker.run(shutdown_rx));

        fix_tx.send(Ok(fix(12.0))).await.unwrap();

        match event_rx.recv().await.unwrap() {
            TrackerEvent::Update { accuracy, reason, .. } => {
                assert_eq!(accuracy, 12.0);
                assert_eq!(reason, AcceptReason::GoodAccuracy);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(sink.saved.lock().await.len(), 1);

        // Closing the watch stream ends the session
        drop(fix_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_save_surfaces_error_and_continues() {
        let (fix_tx, fix_rx) = mpsc::channel(8);
        let source = Arc::new(TestSource {
            watch_rx: std::sync::Mutex::new(Some(fix_rx)),
            oneshot_result: Err(GeoError::Unavailable),
        });
        let sink = Arc::new(TestSink {
            saved: Mutex::new(Vec::new()),
            fail_with: Some("Failed to save location".to_string()),
        });
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let tracker = GeoTracker::new("trip-1", source, sink, event_tx);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(tracker.run(shutdown_rx));

        fix_tx.send(Ok(fix(12.0))).await.unwrap();

        match event_rx.recv().await.unwrap() {
            TrackerEvent::Error { message } => assert_eq!(message, "Failed to save location"),
            other => panic!("unexpected event: {:?}", other),
        }

        drop(fix_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_triggers_low_accuracy_fallback() {
        let (fix_tx, fix_rx) = mpsc::channel(8);
        let source = Arc::new(TestSource {
            watch_rx: std::sync::Mutex::new(Some(fix_rx)),
            // The fallback one-shot succeeds with a coarse fix
            oneshot_result: Ok(fix(90.0)),
        });
        let sink = Arc::new(TestSink {
            saved: Mutex::new(Vec::new()),
            fail_with: None,
        });
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let tracker = GeoTracker::new("trip-1", source, sink, event_tx);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(tracker.run(shutdown_rx));

        fix_tx.send(Err(GeoError::Timeout)).await.unwrap();

        match event_rx.recv().await.unwrap() {
            TrackerEvent::Update { accuracy, .. } => assert_eq!(accuracy, 90.0),
            other => panic!("unexpected event: {:?}", other),
        }

        drop(fix_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn non_timeout_errors_are_reported_directly() {
        let (fix_tx, fix_rx) = mpsc::channel(8);
        let source = Arc::new(TestSource {
            watch_rx: std::sync::Mutex::new(Some(fix_rx)),
            oneshot_result: Err(GeoError::Unavailable),
        });
        let sink = Arc::new(TestSink {
            saved: Mutex::new(Vec::new()),
            fail_with: None,
        });
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let tracker = GeoTracker::new("trip-1", source, sink, event_tx);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(tracker.run(shutdown_rx));

        fix_tx.send(Err(GeoError::PermissionDenied)).await.unwrap();

        match event_rx.recv().await.unwrap() {
            TrackerEvent::Error { message } => {
                assert!(message.contains("enable location permissions"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        drop(fix_tx);
        task.await.unwrap();
    }
}
