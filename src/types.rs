use serde::{Deserialize, Serialize};

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// One location fix as delivered by a position source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    /// Source clock, milliseconds. Only differences between samples matter.
    pub timestamp_ms: i64,
    /// Speed over ground reported by the sensor (m/s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_speed_mps: Option<f64>,
    /// Horizontal accuracy radius (m)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_accuracy_m: Option<f64>,
}

impl PositionSample {
    pub fn new(coordinate: Coordinate, timestamp_ms: i64) -> Self {
        Self {
            coordinate,
            timestamp_ms,
            reported_speed_mps: None,
            reported_accuracy_m: None,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.reported_speed_mps = Some(speed_mps);
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.reported_accuracy_m = Some(accuracy_m);
        self
    }

    /// Sensor speed if it is usable (present, finite, non-negative)
    pub fn usable_speed_mps(&self) -> Option<f64> {
        self.reported_speed_mps
            .filter(|speed| speed.is_finite() && *speed >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_speed_filters_invalid_values() {
        let at = Coordinate::new(0.0, 0.0);
        assert_eq!(PositionSample::new(at, 0).usable_speed_mps(), None);
        assert_eq!(
            PositionSample::new(at, 0).with_speed(-1.0).usable_speed_mps(),
            None
        );
        assert_eq!(
            PositionSample::new(at, 0).with_speed(f64::NAN).usable_speed_mps(),
            None
        );
        assert_eq!(
            PositionSample::new(at, 0).with_speed(0.0).usable_speed_mps(),
            Some(0.0)
        );
    }

    #[test]
    fn test_sample_json_optional_fields() {
        let json = r#"{"coordinate":{"latitude":1.5,"longitude":2.5},"timestamp_ms":1000}"#;
        let sample: PositionSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.coordinate, Coordinate::new(1.5, 2.5));
        assert_eq!(sample.reported_speed_mps, None);
        assert_eq!(sample.reported_accuracy_m, None);
    }
}
