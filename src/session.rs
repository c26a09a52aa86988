use std::fmt;
use std::sync::Arc;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::error::{SourceErrorKind, TrackerError, TrackerResult};
use crate::metrics::{MetricsAccumulator, TrackingMetrics};
use crate::source::{
    Envelope, EventSink, PositionSource, SourceKind, SubscriptionHandle, TrackerEvent,
};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing tracked yet (or just reset)
    Idle,
    /// Subscribed to a source, clock running
    Running,
    /// Not tracking, metrics kept for resume
    Stopped,
}

/// User-facing condition of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrackerStatus {
    Idle,
    DemoReady,
    Acquiring,
    Active { accuracy_m: Option<f64> },
    Simulating,
    Replaying,
    Stopped { demo: bool },
    Failed(SourceErrorKind),
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerStatus::Idle => write!(f, "Not started"),
            TrackerStatus::DemoReady => write!(f, "Demo Mode Ready"),
            TrackerStatus::Acquiring => write!(f, "Acquiring GPS..."),
            // Zero or garbage accuracy means the receiver did not report one
            TrackerStatus::Active {
                accuracy_m: Some(accuracy),
            } if accuracy.is_finite() && *accuracy > 0.0 => {
                write!(f, "GPS Active (±{:.1}m)", accuracy)
            }
            TrackerStatus::Active { .. } => write!(f, "GPS Active (±N/Am)"),
            TrackerStatus::Simulating => write!(f, "Demo Mode Active"),
            TrackerStatus::Replaying => write!(f, "Replay Active"),
            TrackerStatus::Stopped { demo: true } => write!(f, "Demo Stopped"),
            TrackerStatus::Stopped { demo: false } => write!(f, "Stopped"),
            TrackerStatus::Failed(kind) => write!(f, "{}", kind),
        }
    }
}

/// Why an update was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateCause {
    Control,
    Sample,
    Tick,
    SourceError(SourceErrorKind),
}

/// What the display layer receives after every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub state: SessionState,
    pub status: TrackerStatus,
    pub cause: UpdateCause,
    pub metrics: TrackingMetrics,
}

/// One tracker: owns the metrics, the source subscription, the timer and
/// the event queue they all feed. All mutation happens on the task that
/// drains the queue.
pub struct TrackingSession {
    state: SessionState,
    status: TrackerStatus,
    accumulator: MetricsAccumulator,
    source: Option<Box<dyn PositionSource>>,
    subscription: Option<SubscriptionHandle>,
    timer: Option<JoinHandle<()>>,
    tick_interval: Duration,
    clock: Arc<dyn Clock>,
    // Bumped on every start/stop/reset; older envelopes are stale
    generation: u64,
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    last_error: Option<SourceErrorKind>,
}

impl TrackingSession {
    pub fn new(config: &TrackerConfig, source: Option<Box<dyn PositionSource>>) -> Self {
        Self::with_clock(config, source, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &TrackerConfig,
        source: Option<Box<dyn PositionSource>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let status = idle_status(source.as_deref().map(|s| s.kind()));
        Self {
            state: SessionState::Idle,
            status,
            accumulator: MetricsAccumulator::new(config.jump_threshold_m),
            source,
            subscription: None,
            timer: None,
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            clock,
            generation: 0,
            tx,
            rx,
            last_error: None,
        }
    }

    /// Idle/Stopped → Running
    pub fn start(&mut self) -> TrackerResult<MetricsUpdate> {
        if self.state == SessionState::Running {
            return Err(TrackerError::InvalidStateTransition {
                from: self.state,
                action: "start",
            });
        }

        let source = match self.source.as_mut() {
            Some(source) if source.is_available() => source,
            Some(source) => {
                return Err(TrackerError::SourceUnavailable(format!(
                    "{:?} source cannot run here",
                    source.kind()
                )))
            }
            None => {
                return Err(TrackerError::SourceUnavailable(
                    "no position source configured".to_string(),
                ))
            }
        };

        let generation = self.generation + 1;
        let sink = EventSink::new(self.tx.clone(), generation);
        let subscription = source.subscribe(sink.clone())?;
        let kind = source.kind();

        self.generation = generation;
        self.subscription = Some(subscription);
        self.timer = Some(tokio::spawn(timer_loop(sink, self.tick_interval)));
        self.accumulator.start_clock(self.clock.now_ms());
        self.state = SessionState::Running;
        self.last_error = None;
        self.status = match kind {
            SourceKind::Live => TrackerStatus::Acquiring,
            SourceKind::Simulated => TrackerStatus::Simulating,
            SourceKind::Replay => TrackerStatus::Replaying,
        };

        info!("Tracking started ({:?} source, generation {})", kind, generation);
        Ok(self.update(UpdateCause::Control))
    }

    /// Running → Stopped, metrics retained
    pub fn stop(&mut self) -> TrackerResult<MetricsUpdate> {
        if self.state != SessionState::Running {
            return Err(TrackerError::InvalidStateTransition {
                from: self.state,
                action: "stop",
            });
        }

        self.halt();
        self.status = TrackerStatus::Stopped {
            demo: self.source_kind() == Some(SourceKind::Simulated),
        };
        info!(
            "Tracking stopped after {} ms, {:.2} m",
            self.accumulator.snapshot().elapsed_ms,
            self.accumulator.snapshot().total_distance_m
        );
        Ok(self.update(UpdateCause::Control))
    }

    /// Any state → Idle with zeroed metrics
    pub fn reset(&mut self) -> MetricsUpdate {
        if self.state == SessionState::Running {
            self.halt();
        }
        // Invalidate anything still queued, whatever the state was
        self.generation += 1;
        self.accumulator.reset();
        self.state = SessionState::Idle;
        self.status = TrackerStatus::Idle;
        self.last_error = None;

        info!("Tracking reset");
        self.update(UpdateCause::Control)
    }

    /// Apply one queued event. Stale or out-of-state events yield nothing.
    pub fn handle(&mut self, envelope: Envelope) -> Option<MetricsUpdate> {
        if envelope.generation != self.generation || self.state != SessionState::Running {
            debug!(
                "Dropping stale {:?} (generation {}, current {}, {:?})",
                envelope.event, envelope.generation, self.generation, self.state
            );
            return None;
        }

        match envelope.event {
            TrackerEvent::Sample(sample) => {
                debug!(
                    "GPS update: lat {} lon {} speed {:?} accuracy {:?} at {}",
                    sample.coordinate.latitude,
                    sample.coordinate.longitude,
                    sample.reported_speed_mps,
                    sample.reported_accuracy_m,
                    sample.timestamp_ms
                );
                self.accumulator.ingest(&sample);
                // Skipped fixes say nothing about the receiver
                let accepted = sample.coordinate.is_finite();
                if accepted && self.source_kind() == Some(SourceKind::Live) {
                    self.status = TrackerStatus::Active {
                        accuracy_m: sample.reported_accuracy_m,
                    };
                }
                Some(self.update(UpdateCause::Sample))
            }
            TrackerEvent::Tick => {
                self.accumulator.tick(self.clock.now_ms());
                Some(self.update(UpdateCause::Tick))
            }
            TrackerEvent::SourceError(kind) => {
                error!("Position source failed: {}", kind);
                self.halt();
                self.last_error = Some(kind);
                self.status = TrackerStatus::Failed(kind);
                Some(self.update(UpdateCause::SourceError(kind)))
            }
        }
    }

    /// Wait for the next event that changes what the display shows
    pub async fn next_update(&mut self) -> Option<MetricsUpdate> {
        loop {
            let envelope = self.rx.recv().await?;
            if let Some(update) = self.handle(envelope) {
                return Some(update);
            }
        }
    }

    /// Like [`next_update`](Self::next_update) but only looks at events
    /// already queued
    pub fn try_next_update(&mut self) -> Option<MetricsUpdate> {
        while let Ok(envelope) = self.rx.try_recv() {
            if let Some(update) = self.handle(envelope) {
                return Some(update);
            }
        }
        None
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> TrackerStatus {
        self.status
    }

    pub fn metrics(&self) -> TrackingMetrics {
        self.accumulator.snapshot()
    }

    pub fn last_error(&self) -> Option<SourceErrorKind> {
        self.last_error
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source.as_deref().map(|s| s.kind())
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Unsubscribe, cancel the timer, freeze the clock
    fn halt(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.subscription.take() {
            debug!("Unsubscribing generation {}", handle.generation());
            match self.source.as_mut() {
                Some(source) => source.unsubscribe(handle),
                None => handle.cancel(),
            }
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.accumulator.stop_clock(self.clock.now_ms());
        self.state = SessionState::Stopped;
    }

    fn update(&self, cause: UpdateCause) -> MetricsUpdate {
        MetricsUpdate {
            state: self.state,
            status: self.status,
            cause,
            metrics: self.accumulator.snapshot(),
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.cancel();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn idle_status(kind: Option<SourceKind>) -> TrackerStatus {
    match kind {
        Some(SourceKind::Simulated) => TrackerStatus::DemoReady,
        _ => TrackerStatus::Idle,
    }
}

/// Periodic display refresh; first tick one period after start
async fn timer_loop(sink: EventSink, period: Duration) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if !sink.try_tick() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{Coordinate, PositionSample};

    /// Source with no producer task; tests inject envelopes directly
    struct QuietSource {
        kind: SourceKind,
        available: bool,
    }

    impl PositionSource for QuietSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn subscribe(&mut self, sink: EventSink) -> TrackerResult<SubscriptionHandle> {
            Ok(SubscriptionHandle::detached(sink.generation()))
        }
    }

    fn session(kind: SourceKind, clock: &ManualClock) -> TrackingSession {
        let config = TrackerConfig {
            tick_interval_ms: 3_600_000,
            ..TrackerConfig::default()
        };
        let source: Box<dyn PositionSource> = Box::new(QuietSource {
            kind,
            available: true,
        });
        TrackingSession::with_clock(&config, Some(source), Arc::new(clock.clone()))
    }

    fn sample_event(session: &TrackingSession, sample: PositionSample) -> Envelope {
        Envelope {
            generation: session.generation(),
            event: TrackerEvent::Sample(sample),
        }
    }

    #[tokio::test]
    async fn test_session_state_transitions() {
        let clock = ManualClock::new(0);
        let mut session = session(SourceKind::Live, &clock);

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.status(), TrackerStatus::Idle);

        let update = session.start().unwrap();
        assert_eq!(update.state, SessionState::Running);
        assert_eq!(update.status, TrackerStatus::Acquiring);

        let update = session.stop().unwrap();
        assert_eq!(update.state, SessionState::Stopped);
        assert_eq!(update.status.to_string(), "Stopped");

        session.start().unwrap();
        assert!(session.is_running());

        let update = session.reset();
        assert_eq!(update.state, SessionState::Idle);
        assert_eq!(update.status.to_string(), "Not started");
    }

    #[tokio::test]
    async fn test_invalid_state_transitions() {
        let clock = ManualClock::new(0);
        let mut session = session(SourceKind::Simulated, &clock);

        // Can't stop while idle
        assert!(matches!(
            session.stop(),
            Err(TrackerError::InvalidStateTransition {
                from: SessionState::Idle,
                action: "stop"
            })
        ));

        // Can't start twice
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(TrackerError::InvalidStateTransition {
                from: SessionState::Running,
                ..
            })
        ));
        assert!(session.is_running());

        // Can't stop twice
        session.stop().unwrap();
        assert!(session.stop().is_err());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_start_without_source() {
        let mut session = TrackingSession::new(&TrackerConfig::default(), None);
        assert!(matches!(
            session.start(),
            Err(TrackerError::SourceUnavailable(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_with_unavailable_source() {
        let source: Box<dyn PositionSource> = Box::new(QuietSource {
            kind: SourceKind::Live,
            available: false,
        });
        let mut session = TrackingSession::new(&TrackerConfig::default(), Some(source));
        assert!(matches!(
            session.start(),
            Err(TrackerError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_live_sample_marks_active() {
        let clock = ManualClock::new(0);
        let mut session = session(SourceKind::Live, &clock);
        session.start().unwrap();

        let sample = PositionSample::new(Coordinate::new(1.0, 1.0), 0).with_accuracy(3.0);
        let update = session.handle(sample_event(&session, sample)).unwrap();
        assert_eq!(update.cause, UpdateCause::Sample);
        assert_eq!(update.status.to_string(), "GPS Active (±3.0m)");
    }

    #[tokio::test]
    async fn test_rejected_fix_keeps_status() {
        let clock = ManualClock::new(0);
        let mut session = session(SourceKind::Live, &clock);
        session.start().unwrap();

        let bad = PositionSample::new(Coordinate::new(f64::NAN, 1.0), 0).with_accuracy(8.0);
        let update = session.handle(sample_event(&session, bad)).unwrap();
        assert_eq!(update.status, TrackerStatus::Acquiring);
        assert_eq!(update.metrics.last_position, None);

        let good = PositionSample::new(Coordinate::new(1.0, 1.0), 10).with_accuracy(8.0);
        let update = session.handle(sample_event(&session, good)).unwrap();
        assert_eq!(update.status.to_string(), "GPS Active (±8.0m)");
    }

    #[test]
    fn test_unreported_accuracy_shows_na() {
        for accuracy in [None, Some(0.0), Some(-2.0), Some(f64::NAN)] {
            let status = TrackerStatus::Active {
                accuracy_m: accuracy,
            };
            assert_eq!(status.to_string(), "GPS Active (±N/Am)");
        }
    }

    #[tokio::test]
    async fn test_simulated_status_strings() {
        let clock = ManualClock::new(0);
        let mut session = session(SourceKind::Simulated, &clock);
        assert_eq!(session.status().to_string(), "Demo Mode Ready");
        assert_eq!(session.start().unwrap().status.to_string(), "Demo Mode Active");
        assert_eq!(session.stop().unwrap().status.to_string(), "Demo Stopped");
    }

    #[tokio::test]
    async fn test_source_error_stops_session() {
        let clock = ManualClock::new(0);
        let mut session = session(SourceKind::Live, &clock);
        session.start().unwrap();

        let update = session
            .handle(Envelope {
                generation: session.generation(),
                event: TrackerEvent::SourceError(SourceErrorKind::PermissionDenied),
            })
            .unwrap();

        assert_eq!(update.state, SessionState::Stopped);
        assert_eq!(update.status.to_string(), "Location permission denied");
        assert_eq!(session.last_error(), Some(SourceErrorKind::PermissionDenied));

        // Restart is allowed and clears the error
        session.start().unwrap();
        assert_eq!(session.last_error(), None);
    }

    #[tokio::test]
    async fn test_stale_events_ignored() {
        let clock = ManualClock::new(0);
        let mut session = session(SourceKind::Live, &clock);
        session.start().unwrap();
        let stale = sample_event(
            &session,
            PositionSample::new(Coordinate::new(5.0, 5.0), 0).with_speed(10.0),
        );

        session.stop().unwrap();
        assert!(session.handle(stale.clone()).is_none());

        session.start().unwrap();
        assert!(session.handle(stale).is_none());
        assert_eq!(session.metrics().speed_sample_count, 0);
    }

    #[tokio::test]
    async fn test_ticks_drive_elapsed_time() {
        let clock = ManualClock::new(1_000);
        let mut session = session(SourceKind::Live, &clock);
        session.start().unwrap();

        clock.advance(4_200);
        let tick = Envelope {
            generation: session.generation(),
            event: TrackerEvent::Tick,
        };
        let update = session.handle(tick).unwrap();
        assert_eq!(update.cause, UpdateCause::Tick);
        assert_eq!(update.metrics.elapsed_ms, 4_200);
    }
}
