use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval_at, Duration, Instant};

use super::{EventSink, PositionSource, SourceKind, SubscriptionHandle};
use crate::config::SimulatorConfig;
use crate::error::TrackerResult;
use crate::metrics::KMH_PER_MPS;
use crate::types::{Coordinate, PositionSample};

/// Synthetic walker/jogger: random speed, fixed heading
pub struct SimulatedTrack {
    config: SimulatorConfig,
    rng: StdRng,
    position: Coordinate,
    timestamp_ms: i64,
}

impl SimulatedTrack {
    pub fn new(config: SimulatorConfig, start_ms: i64) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let position = config.start;
        Self {
            config,
            rng,
            position,
            timestamp_ms: start_ms,
        }
    }

    /// Base speed in [base, base + span) plus jitter in [-variance, variance)
    pub fn next_speed_kmh(&mut self) -> f64 {
        let base = self.config.base_speed_kmh + self.rng.gen::<f64>() * self.config.speed_span_kmh;
        let variance = (self.rng.gen::<f64>() - 0.5) * 2.0 * self.config.variance_kmh;
        (base + variance).max(0.0)
    }

    /// Advance one interval and report where we are
    pub fn next_sample(&mut self) -> PositionSample {
        let speed_kmh = self.next_speed_kmh();
        let interval_secs = self.config.interval_ms as f64 / 1000.0;
        let meters = speed_kmh / KMH_PER_MPS * interval_secs;

        self.position = self.position.offset(self.config.heading_deg, meters);
        self.timestamp_ms += self.config.interval_ms as i64;

        PositionSample::new(self.position, self.timestamp_ms)
            .with_speed(speed_kmh / KMH_PER_MPS)
            .with_accuracy(self.config.accuracy_m)
    }

    /// Never let the synthetic clock fall behind `now_ms`
    fn catch_up(&mut self, now_ms: i64) {
        self.timestamp_ms = self.timestamp_ms.max(now_ms);
    }

    pub fn position(&self) -> Coordinate {
        self.position
    }
}

/// Demo-mode source used when no GPS is available
pub struct SimulatedSource {
    track: Arc<Mutex<SimulatedTrack>>,
    interval: Duration,
}

impl SimulatedSource {
    pub fn new(config: SimulatorConfig) -> Self {
        let interval = Duration::from_millis(config.interval_ms);
        let track = SimulatedTrack::new(config, Utc::now().timestamp_millis());
        Self {
            track: Arc::new(Mutex::new(track)),
            interval,
        }
    }
}

impl PositionSource for SimulatedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Simulated
    }

    fn subscribe(&mut self, sink: EventSink) -> TrackerResult<SubscriptionHandle> {
        // Resume where the walker stopped, but on the current clock
        if let Ok(mut track) = self.track.lock() {
            track.catch_up(Utc::now().timestamp_millis());
        }

        let generation = sink.generation();
        let task = tokio::spawn(simulation_loop(sink, self.track.clone(), self.interval));
        Ok(SubscriptionHandle::spawned(generation, task))
    }
}

async fn simulation_loop(sink: EventSink, track: Arc<Mutex<SimulatedTrack>>, period: Duration) {
    let mut interval = interval_at(Instant::now() + period, period);
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;
        if sink.is_closed() {
            log::debug!("[sim] queue closed after {} samples", sample_count);
            break;
        }

        let sample = match track.lock() {
            Ok(mut track) => track.next_sample(),
            Err(_) => {
                log::error!("[sim] track state poisoned, stopping simulation");
                break;
            }
        };

        if !sink.send_sample(sample).await {
            log::debug!("[sim] queue closed after {} samples", sample_count);
            break;
        }
        sample_count += 1;
        if sample_count % 100 == 0 {
            log::debug!("[sim] {} samples", sample_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::distance;
    use approx::assert_abs_diff_eq;

    fn seeded(seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed: Some(seed),
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn test_speed_stays_in_bounds() {
        let mut track = SimulatedTrack::new(seeded(1), 0);
        for _ in 0..1_000 {
            let speed = track.next_speed_kmh();
            assert!((4.0..16.0).contains(&speed), "speed {speed} out of range");
        }
    }

    #[test]
    fn test_speed_clamped_at_zero() {
        let config = SimulatorConfig {
            base_speed_kmh: 0.0,
            speed_span_kmh: 0.0,
            variance_kmh: 5.0,
            ..seeded(9)
        };
        let mut track = SimulatedTrack::new(config, 0);
        for _ in 0..200 {
            assert!(track.next_speed_kmh() >= 0.0);
        }
    }

    #[test]
    fn test_samples_move_by_speed_times_interval() {
        let mut track = SimulatedTrack::new(seeded(7), 1_000);
        let before = track.position();
        let sample = track.next_sample();

        assert_eq!(sample.timestamp_ms, 1_500);
        let speed_mps = sample.reported_speed_mps.unwrap();
        assert_abs_diff_eq!(
            distance(before, sample.coordinate),
            speed_mps * 0.5,
            epsilon = 1e-6
        );
        assert_eq!(sample.reported_accuracy_m, Some(5.0));
    }

    #[test]
    fn test_seed_makes_track_reproducible() {
        let mut a = SimulatedTrack::new(seeded(42), 0);
        let mut b = SimulatedTrack::new(seeded(42), 0);
        for _ in 0..10 {
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn test_catch_up_never_rewinds() {
        let mut track = SimulatedTrack::new(seeded(3), 10_000);
        track.catch_up(5_000);
        assert_eq!(track.next_sample().timestamp_ms, 10_500);
        track.catch_up(20_000);
        assert_eq!(track.next_sample().timestamp_ms, 20_500);
    }
}
