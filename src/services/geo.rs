//! Geographic calculations

use crate::types::Coordinates;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road distance coefficient (straight line to road)
pub const ROAD_COEFFICIENT: f64 = 1.3;

/// Default average speed in km/h for travel time estimation
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Calculate Haversine distance between two points in kilometers
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Estimate road distance from straight-line distance
pub fn road_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    haversine_distance(from, to) * ROAD_COEFFICIENT
}

/// Estimate travel time in minutes at the given average speed
pub fn travel_time_minutes(from: &Coordinates, to: &Coordinates, speed_kmh: f64) -> f64 {
    let distance = road_distance(from, to);
    (distance / speed_kmh) * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_prague_brno() {
        let prague = Coordinates { lat: 50.0755, lng: 14.4378 };
        let brno = Coordinates { lat: 49.1951, lng: 16.6068 };

        let distance = haversine_distance(&prague, &brno);

        // Prague to Brno is approximately 185 km
        assert!((distance - 185.0).abs() < 5.0);
    }

    #[test]
    fn test_haversine_same_point() {
        let point = Coordinates { lat: 50.0, lng: 14.0 };
        let distance = haversine_distance(&point, &point);
        assert!((distance - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_road_distance() {
        let prague = Coordinates { lat: 50.0755, lng: 14.4378 };
        let brno = Coordinates { lat: 49.1951, lng: 16.6068 };

        let distance = road_distance(&prague, &brno);
        let straight = haversine_distance(&prague, &brno);

        // Road distance should be ~30% more than straight line
        assert!((distance / straight - ROAD_COEFFICIENT).abs() < 0.01);
    }

    #[test]
    fn test_travel_time() {
        let from = Coordinates { lat: 50.0, lng: 14.0 };
        let to = Coordinates { lat: 50.0, lng: 14.5 };

        let time = travel_time_minutes(&from, &to, AVERAGE_SPEED_KMH);

        // Should be positive and reasonable
        assert!(time > 0.0);
        assert!(time < 120.0); // Less than 2 hours for ~40km
    }

    #[test]
    fn test_travel_time_scales_with_speed() {
        let from = Coordinates { lat: 50.0, lng: 14.0 };
        let to = Coordinates { lat: 50.0, lng: 14.5 };

        let slow = travel_time_minutes(&from, &to, 20.0);
        let fast = travel_time_minutes(&from, &to, 40.0);
        assert!((slow / fast - 2.0).abs() < 0.01);
    }
}
