/// Assumed average speed in traffic for the ETA estimate.
pub const AVERAGE_SPEED_KMPH: f64 = 25.0;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Minutes until arrival at the assumed average speed, floored at one
/// minute so an arriving bus never shows "0 min".
pub fn eta_minutes(distance_km: f64) -> i64 {
    ((distance_km / AVERAGE_SPEED_KMPH) * 60.0).round().max(1.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        assert!(haversine_km(12.9716, 77.5946, 12.9716, 77.5946).abs() < 1e-9);
    }

    #[test]
    fn known_city_pair_distance() {
        // Bangalore to Mysore, roughly 128 km great-circle
        let d = haversine_km(12.9716, 77.5946, 12.2958, 76.6394);
        assert!((d - 128.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn eta_is_floored_at_one_minute() {
        assert_eq!(eta_minutes(0.0), 1);
        assert_eq!(eta_minutes(0.1), 1);
        // 25 km at 25 km/h is an hour
        assert_eq!(eta_minutes(25.0), 60);
    }
}
