use crate::model::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Total length of a path given oldest-first, in km rounded to 2 decimals.
///
/// No jitter filtering: stationary fixes still add their scatter.
pub fn path_length_km(points: &[GeoPoint]) -> f64 {
    let total = points
        .windows(2)
        .map(|pair| haversine_km(pair[0], pair[1]))
        .fold(0.0, |acc, leg| acc + leg);
    round2(total)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single_point() {
        // compare bits: -0.0 == 0.0 but serializes as "-0.0"
        assert_eq!(path_length_km(&[]).to_bits(), 0.0f64.to_bits());
        assert_eq!(
            path_length_km(&[GeoPoint::new(40.4168, -3.7038)]).to_bits(),
            0.0f64.to_bits()
        );
    }

    #[test]
    fn test_short_hop() {
        let a = GeoPoint::new(40.4168, -3.7038);
        let b = GeoPoint::new(40.4170, -3.7036);

        let raw = haversine_km(a, b);
        assert!(raw > 0.025 && raw < 0.032, "unexpected distance {}", raw);
        assert_eq!(path_length_km(&[a, b]), 0.03);
    }

    #[test]
    fn test_madrid_to_barcelona() {
        let madrid = GeoPoint::new(40.4168, -3.7038);
        let barcelona = GeoPoint::new(41.3874, 2.1686);
        let km = haversine_km(madrid, barcelona);
        assert!((km - 505.0).abs() < 5.0, "unexpected distance {}", km);
    }

    #[test]
    fn test_sum_over_consecutive_pairs() {
        let points = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(0.0, 0.0),
        ];
        let leg = haversine_km(points[0], points[1]);
        assert!((leg - 111.19).abs() < 0.01);
        assert_eq!(path_length_km(&points), round2(2.0 * leg));
    }

    #[test]
    fn test_stationary_jitter_accumulates() {
        let points = [
            GeoPoint::new(40.41680, -3.70380),
            GeoPoint::new(40.41690, -3.70380),
            GeoPoint::new(40.41680, -3.70380),
            GeoPoint::new(40.41690, -3.70380),
            GeoPoint::new(40.41680, -3.70380),
        ];
        // four hops of ~11 m each
        assert_eq!(path_length_km(&points), 0.04);
    }
}
