//! Presentation rules for metrics: distance units, MM:SS time, two-decimal
//! speeds.

use crate::metrics::TrackingMetrics;
use crate::session::MetricsUpdate;

/// Distances below this are shown in meters
pub const KILOMETER_THRESHOLD_M: f64 = 1000.0;

/// Distance value and unit label, e.g. `("999.99", "meters")` or `("1.50", "km")`
pub fn format_distance(meters: f64) -> (String, &'static str) {
    if meters < KILOMETER_THRESHOLD_M {
        (format!("{:.2}", meters), "meters")
    } else {
        (format!("{:.2}", meters / 1000.0), "km")
    }
}

/// Zero-padded `MM:SS`, truncated to whole seconds
pub fn format_elapsed(elapsed_ms: i64) -> String {
    let total_seconds = elapsed_ms.max(0) / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

pub fn format_speed(kmh: f64) -> String {
    format!("{:.2}", kmh)
}

/// Rendered values of every dashboard field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    pub distance: String,
    pub distance_unit: &'static str,
    pub speed: String,
    pub time: String,
    pub average_speed: String,
    pub max_speed: String,
    pub status: String,
}

impl DisplayFrame {
    pub fn from_update(update: &MetricsUpdate) -> Self {
        let mut frame = Self::from_metrics(&update.metrics);
        frame.status = update.status.to_string();
        frame
    }

    pub fn from_metrics(metrics: &TrackingMetrics) -> Self {
        let (distance, distance_unit) = format_distance(metrics.total_distance_m);
        Self {
            distance,
            distance_unit,
            speed: format_speed(metrics.current_speed_kmh),
            time: format_elapsed(metrics.elapsed_ms),
            average_speed: format!("{} km/h", format_speed(metrics.average_speed_kmh)),
            max_speed: format!("{} km/h", format_speed(metrics.max_speed_kmh)),
            status: String::new(),
        }
    }

    /// Single terminal line
    pub fn render_line(&self) -> String {
        format!(
            "{} {} | {} km/h | {} | avg {} | max {} | {}",
            self.distance,
            self.distance_unit,
            self.speed,
            self.time,
            self.average_speed,
            self.max_speed,
            self.status
        )
    }
}
