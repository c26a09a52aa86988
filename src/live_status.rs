use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::display::DisplayFrame;
use crate::session::{MetricsUpdate, SessionState};

/// Latest tracker state, overwritten in place for external dashboards.
/// Only ever holds the current values, never a history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: String,
    pub state: SessionState,
    pub status: String,
    pub distance_m: f64,
    pub speed_kmh: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub elapsed_ms: i64,
    pub elapsed: String,
    pub speed_samples: u64,
    pub rejected_jumps: u64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
}

impl LiveStatus {
    pub fn from_update(update: &MetricsUpdate) -> Self {
        let frame = DisplayFrame::from_update(update);
        let m = &update.metrics;
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            state: update.state,
            status: frame.status,
            distance_m: m.total_distance_m,
            speed_kmh: m.current_speed_kmh,
            average_speed_kmh: m.average_speed_kmh,
            max_speed_kmh: m.max_speed_kmh,
            elapsed_ms: m.elapsed_ms,
            elapsed: frame.time,
            speed_samples: m.speed_sample_count,
            rejected_jumps: m.rejected_jumps,
            latitude: m.last_position.map(|p| p.latitude),
            longitude: m.last_position.map(|p| p.longitude),
            accuracy_m: m.last_accuracy_m,
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrackingMetrics;
    use crate::session::{TrackerStatus, UpdateCause};
    use crate::types::Coordinate;

    #[test]
    fn test_save_overwrites_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live_status.json");

        let mut update = MetricsUpdate {
            state: SessionState::Running,
            status: TrackerStatus::Active {
                accuracy_m: Some(4.0),
            },
            cause: UpdateCause::Sample,
            metrics: TrackingMetrics {
                total_distance_m: 42.0,
                last_position: Some(Coordinate::new(1.0, 2.0)),
                last_timestamp_ms: Some(0),
                elapsed_ms: 65_000,
                ..TrackingMetrics::default()
            },
        };
        LiveStatus::from_update(&update).save(&path).unwrap();

        update.metrics.total_distance_m = 50.0;
        LiveStatus::from_update(&update).save(&path).unwrap();

        let saved: LiveStatus =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.distance_m, 50.0);
        assert_eq!(saved.elapsed, "01:05");
        assert_eq!(saved.status, "GPS Active (±4.0m)");
        assert_eq!(saved.latitude, Some(1.0));
    }
}
