use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::geo_math::distance;
use crate::types::{Coordinate, PositionSample};

pub const KMH_PER_MPS: f64 = 3.6;

/// Single-step distances at or above this are treated as GPS jumps.
/// Heuristic, tunable through `TrackerConfig::jump_threshold_m`.
pub const DEFAULT_JUMP_THRESHOLD_M: f64 = 100.0;

/// Snapshot of everything the display layer needs
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingMetrics {
    pub total_distance_m: f64,
    pub current_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub average_speed_kmh: f64,
    pub speed_sample_count: u64,
    pub speed_sample_sum: f64,
    pub last_position: Option<Coordinate>,
    pub last_timestamp_ms: Option<i64>,
    pub last_accuracy_m: Option<f64>,
    pub elapsed_ms: i64,
    pub rejected_jumps: u64,
}

/// Owns all tracking state and turns samples and ticks into metrics
#[derive(Clone, Debug)]
pub struct MetricsAccumulator {
    jump_threshold_m: f64,

    total_distance_m: f64,
    current_speed_kmh: f64,
    max_speed_kmh: f64,
    speed_sum: f64,
    speed_count: u64,

    // Position and timestamp of the last accepted sample, always together
    last_fix: Option<(Coordinate, i64)>,
    last_accuracy_m: Option<f64>,
    rejected_jumps: u64,

    elapsed_ms: i64,
    // Start time shifted back by the elapsed time already banked.
    // Some while the session clock runs.
    clock_origin_ms: Option<i64>,
}

impl MetricsAccumulator {
    pub fn new(jump_threshold_m: f64) -> Self {
        Self {
            jump_threshold_m,
            total_distance_m: 0.0,
            current_speed_kmh: 0.0,
            max_speed_kmh: 0.0,
            speed_sum: 0.0,
            speed_count: 0,
            last_fix: None,
            last_accuracy_m: None,
            rejected_jumps: 0,
            elapsed_ms: 0,
            clock_origin_ms: None,
        }
    }

    pub fn jump_threshold_m(&self) -> f64 {
        self.jump_threshold_m
    }

    /// Fold one position sample into the metrics
    pub fn ingest(&mut self, sample: &PositionSample) -> TrackingMetrics {
        if !sample.coordinate.is_finite() {
            warn!(
                "Skipping sample with non-finite coordinate ({}, {}) at {}",
                sample.coordinate.latitude, sample.coordinate.longitude, sample.timestamp_ms
            );
            return self.snapshot();
        }

        // Distance and time since the previous accepted fix
        let step = self.last_fix.map(|(previous, previous_ts)| {
            (
                distance(previous, sample.coordinate),
                sample.timestamp_ms - previous_ts,
            )
        });

        if let Some(speed_mps) = sample.usable_speed_mps() {
            self.current_speed_kmh = speed_mps * KMH_PER_MPS;
            debug!("Using sensor speed: {:.2} km/h", self.current_speed_kmh);
        } else if let Some((meters, dt_ms)) = step {
            if dt_ms > 0 {
                let dt_secs = dt_ms as f64 / 1000.0;
                self.current_speed_kmh = meters / dt_secs * KMH_PER_MPS;
                debug!(
                    "Calculated speed: {:.2} km/h from {:.2} m over {:.3} s",
                    self.current_speed_kmh, meters, dt_secs
                );
            }
        }

        if let Some((meters, _)) = step {
            if meters < self.jump_threshold_m {
                self.total_distance_m += meters;
            } else {
                self.rejected_jumps += 1;
                warn!(
                    "Distance too large, ignoring (possible GPS jump): {:.2} m",
                    meters
                );
            }
        }

        self.speed_sum += self.current_speed_kmh;
        self.speed_count += 1;
        self.max_speed_kmh = self.max_speed_kmh.max(self.current_speed_kmh);

        self.last_fix = Some((sample.coordinate, sample.timestamp_ms));
        if sample.reported_accuracy_m.is_some() {
            self.last_accuracy_m = sample.reported_accuracy_m;
        }

        self.snapshot()
    }

    /// Advance the elapsed time to `now_ms` if the clock is running
    pub fn tick(&mut self, now_ms: i64) -> i64 {
        if let Some(origin) = self.clock_origin_ms {
            self.elapsed_ms = self.elapsed_ms.max(now_ms - origin);
        }
        self.elapsed_ms
    }

    /// Start (or resume) the elapsed clock, keeping time already banked
    pub fn start_clock(&mut self, now_ms: i64) {
        if self.clock_origin_ms.is_none() {
            self.clock_origin_ms = Some(now_ms - self.elapsed_ms);
        }
    }

    /// Take a final reading and freeze the elapsed time
    pub fn stop_clock(&mut self, now_ms: i64) -> i64 {
        let elapsed = self.tick(now_ms);
        self.clock_origin_ms = None;
        elapsed
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.jump_threshold_m);
    }

    pub fn average_speed_kmh(&self) -> f64 {
        if self.speed_count == 0 {
            0.0
        } else {
            self.speed_sum / self.speed_count as f64
        }
    }

    pub fn snapshot(&self) -> TrackingMetrics {
        TrackingMetrics {
            total_distance_m: self.total_distance_m,
            current_speed_kmh: self.current_speed_kmh,
            max_speed_kmh: self.max_speed_kmh,
            average_speed_kmh: self.average_speed_kmh(),
            speed_sample_count: self.speed_count,
            speed_sample_sum: self.speed_sum,
            last_position: self.last_fix.map(|(position, _)| position),
            last_timestamp_ms: self.last_fix.map(|(_, timestamp)| timestamp),
            last_accuracy_m: self.last_accuracy_m,
            elapsed_ms: self.elapsed_ms,
            rejected_jumps: self.rejected_jumps,
        }
    }
}

impl Default for MetricsAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_JUMP_THRESHOLD_M)
    }
}
