use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::metrics::DEFAULT_JUMP_THRESHOLD_M;
use crate::types::Coordinate;

/// Top-level tracker settings. Every field has a default, so a config file
/// only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Display/elapsed-time refresh period
    pub tick_interval_ms: u64,
    /// Step distance at which a fix is treated as a GPS jump
    pub jump_threshold_m: f64,
    pub event_queue_capacity: usize,
    pub simulator: SimulatorConfig,
    pub live: LiveConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub interval_ms: u64,
    /// Lower bound of the uniformly drawn base speed
    pub base_speed_kmh: f64,
    /// Width of the base speed range
    pub speed_span_kmh: f64,
    /// Maximum +/- jitter added on top of the base speed
    pub variance_kmh: f64,
    pub start: Coordinate,
    pub heading_deg: f64,
    pub accuracy_m: f64,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub command: String,
    pub provider: String,
    /// Maximum wait for each location update
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Playback speed multiplier; 0 emits without pacing
    pub rate: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            jump_threshold_m: DEFAULT_JUMP_THRESHOLD_M,
            event_queue_capacity: 256,
            simulator: SimulatorConfig::default(),
            live: LiveConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            base_speed_kmh: 5.0,
            speed_span_kmh: 10.0,
            variance_kmh: 1.0,
            start: Coordinate::new(37.7749, -122.4194),
            heading_deg: 0.0,
            accuracy_m: 5.0,
            seed: None,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            command: "termux-location".to_string(),
            provider: "gps".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { rate: 1.0 }
    }
}

impl TrackerConfig {
    /// Read a JSON config file; missing fields keep their defaults
    pub fn load(path: &Path) -> TrackerResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: TrackerConfig = serde_json::from_str(&text).map_err(|e| {
            TrackerError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        log::debug!("Loaded config from {}: {:?}", path.display(), config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(TrackerError::Config(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.jump_threshold_m.is_finite() && self.jump_threshold_m > 0.0) {
            return Err(TrackerError::Config(format!(
                "jump_threshold_m must be positive, got {}",
                self.jump_threshold_m
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(TrackerError::Config(
                "event_queue_capacity must be positive".to_string(),
            ));
        }
        if self.simulator.interval_ms == 0 {
            return Err(TrackerError::Config(
                "simulator.interval_ms must be positive".to_string(),
            ));
        }
        if self.simulator.base_speed_kmh < 0.0
            || self.simulator.speed_span_kmh < 0.0
            || self.simulator.variance_kmh < 0.0
        {
            return Err(TrackerError::Config(
                "simulator speeds must not be negative".to_string(),
            ));
        }
        if self.live.timeout_ms == 0 {
            return Err(TrackerError::Config(
                "live.timeout_ms must be positive".to_string(),
            ));
        }
        if !(self.replay.rate.is_finite() && self.replay.rate >= 0.0) {
            return Err(TrackerError::Config(format!(
                "replay.rate must be zero or positive, got {}",
                self.replay.rate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.jump_threshold_m, 100.0);
        assert_eq!(config.simulator.interval_ms, 500);
        assert_eq!(config.live.timeout_ms, 5_000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"jump_threshold_m": 50.0, "simulator": {{"seed": 42}}}}"#
        )
        .unwrap();

        let config = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(config.jump_threshold_m, 50.0);
        assert_eq!(config.simulator.seed, Some(42));
        assert_eq!(config.simulator.interval_ms, 500);
        assert_eq!(config.tick_interval_ms, 100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = TrackerConfig::default();
        config.jump_threshold_m = 0.0;
        assert!(matches!(config.validate(), Err(TrackerError::Config(_))));

        let mut config = TrackerConfig::default();
        config.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.replay.rate = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let err = TrackerConfig::load(Path::new("/nonexistent/tracker.json")).unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }
}
