//! Great-circle math on a spherical Earth

use crate::types::Coordinate;

/// Mean Earth radius used by every distance in the crate (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two coordinates in meters.
///
/// Never panics. Out-of-range latitudes/longitudes produce a number, not an
/// error; non-finite input yields NaN.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

impl Coordinate {
    /// Destination reached after travelling `meters` along `bearing_deg`
    /// (clockwise from north) on the same sphere as [`distance`].
    pub fn offset(&self, bearing_deg: f64, meters: f64) -> Coordinate {
        let delta = meters / EARTH_RADIUS_M;
        let theta = bearing_deg.to_radians();
        let phi1 = self.latitude.to_radians();
        let lambda1 = self.longitude.to_radians();

        let sin_phi2 = phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos();
        let phi2 = sin_phi2.clamp(-1.0, 1.0).asin();
        let lambda2 = lambda1
            + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * sin_phi2);

        // Normalise longitude back into [-180, 180)
        let longitude = (lambda2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
        Coordinate::new(phi2.to_degrees(), longitude)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn coordinate() -> impl Strategy<Value = Coordinate> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| Coordinate::new(lat, lon))
    }

    proptest! {
        #[test]
        fn distance_is_non_negative(a in coordinate(), b in coordinate()) {
            prop_assert!(distance(a, b) >= 0.0);
        }

        #[test]
        fn distance_to_self_is_zero(a in coordinate()) {
            prop_assert!(distance(a, a).abs() < 1e-6);
        }

        #[test]
        fn distance_is_symmetric(a in coordinate(), b in coordinate()) {
            prop_assert!((distance(a, b) - distance(b, a)).abs() < 1e-6);
        }
    }
}
