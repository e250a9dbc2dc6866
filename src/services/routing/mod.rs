//! Geodata provider abstraction: distance/time matrices, polyline routing,
//! geocoding.
//!
//! Uses the mapping provider HTTP API in production, haversine estimation as
//! the always-available fallback.

mod map_api;

pub use map_api::{MapApiClient, MapApiConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::services::geo;
use crate::types::{Coordinates, VehicleKind};

/// Geodata provider failure modes.
/// `Unavailable` and `QuotaExceeded` are degraded-mode signals, not fatal.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("mapping provider unavailable: {0}")]
    Unavailable(String),
    #[error("mapping provider rate limit exceeded")]
    QuotaExceeded,
    #[error("location not found: {0}")]
    NotFound(String),
}

/// Distance and time matrices between locations
#[derive(Debug, Clone)]
pub struct TravelMatrices {
    /// Distance in meters [i][j] from location i to location j
    pub distances: Vec<Vec<u64>>,
    /// Free-flow duration in seconds [i][j]
    pub durations: Vec<Vec<u64>>,
    /// Duration in traffic in seconds [i][j]
    pub traffic_durations: Vec<Vec<u64>>,
    /// Number of locations
    pub size: usize,
}

impl TravelMatrices {
    pub fn empty() -> Self {
        Self {
            distances: vec![],
            durations: vec![],
            traffic_durations: vec![],
            size: 0,
        }
    }

    pub fn distance(&self, from: usize, to: usize) -> u64 {
        self.distances[from][to]
    }

    pub fn duration(&self, from: usize, to: usize) -> u64 {
        self.durations[from][to]
    }

    pub fn traffic_duration(&self, from: usize, to: usize) -> u64 {
        self.traffic_durations[from][to]
    }

    /// Traffic factor for a leg: in-traffic time over free-flow time.
    pub fn traffic_factor(&self, from: usize, to: usize) -> f64 {
        let free = self.durations[from][to];
        if free == 0 {
            return 1.0;
        }
        self.traffic_durations[from][to] as f64 / free as f64
    }
}

/// A single road segment of a routed polyline
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoadSegment {
    /// Congestion level 0..10
    pub level: u8,
    pub speed_kmh: f64,
    pub length_m: u64,
}

/// Routed path between two points
/// Polyline coordinates are in [lng, lat] order (GeoJSON standard)
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutePlan {
    pub polyline: Vec<[f64; 2]>,
    pub distance_m: u64,
    pub free_time_s: u64,
    pub traffic_time_s: u64,
    pub segments: Vec<RoadSegment>,
}

/// Geodata provider trait (mapping provider, haversine fallback)
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Resolve a free-text address to coordinates.
    async fn geocode(&self, query: &str) -> Result<Coordinates, RoutingError>;

    /// Route through origin, waypoints, destination.
    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        depart_at: DateTime<Utc>,
        kind: VehicleKind,
    ) -> Result<RoutePlan, RoutingError>;

    /// Distance/time matrices. May be asymmetric.
    /// First location is typically the depot (starting point).
    async fn matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
        depart_at: DateTime<Utc>,
        kind: VehicleKind,
    ) -> Result<TravelMatrices, RoutingError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Haversine fallback provider.
/// Straight-line distance × road coefficient, divided by an average speed.
pub struct HaversineRouting {
    road_coefficient: f64,
    average_speed_kmh: f64,
}

impl Default for HaversineRouting {
    fn default() -> Self {
        Self {
            road_coefficient: geo::ROAD_COEFFICIENT,
            average_speed_kmh: geo::AVERAGE_SPEED_KMH,
        }
    }
}

impl HaversineRouting {
    pub fn new(average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient: geo::ROAD_COEFFICIENT,
            average_speed_kmh,
        }
    }

    fn leg(&self, from: &Coordinates, to: &Coordinates) -> (u64, u64) {
        let straight_km = geo::haversine_distance(from, to);
        let road_m = (straight_km * self.road_coefficient * 1000.0) as u64;
        let travel_s =
            ((straight_km * self.road_coefficient) / self.average_speed_kmh * 3600.0) as u64;
        (road_m, travel_s)
    }
}

#[async_trait]
impl RoutingProvider for HaversineRouting {
    async fn geocode(&self, query: &str) -> Result<Coordinates, RoutingError> {
        // No gazetteer offline
        Err(RoutingError::NotFound(query.to_string()))
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        _depart_at: DateTime<Utc>,
        _kind: VehicleKind,
    ) -> Result<RoutePlan, RoutingError> {
        let mut points = vec![origin];
        points.extend_from_slice(waypoints);
        points.push(destination);

        let mut distance_m = 0u64;
        let mut time_s = 0u64;
        let mut segments = Vec::with_capacity(points.len() - 1);
        for pair in points.windows(2) {
            let (d, t) = self.leg(&pair[0], &pair[1]);
            distance_m += d;
            time_s += t;
            segments.push(RoadSegment {
                level: 0,
                speed_kmh: self.average_speed_kmh,
                length_m: d,
            });
        }

        Ok(RoutePlan {
            polyline: points.iter().map(|c| [c.lng, c.lat]).collect(),
            distance_m,
            free_time_s: time_s,
            traffic_time_s: time_s,
            segments,
        })
    }

    async fn matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
        _depart_at: DateTime<Utc>,
        _kind: VehicleKind,
    ) -> Result<TravelMatrices, RoutingError> {
        let rows = origins.len();
        let cols = destinations.len();
        if rows == 0 || cols == 0 {
            return Ok(TravelMatrices::empty());
        }

        let mut distances = vec![vec![0u64; cols]; rows];
        let mut durations = vec![vec![0u64; cols]; rows];

        for (i, from) in origins.iter().enumerate() {
            for (j, to) in destinations.iter().enumerate() {
                if from == to {
                    continue;
                }
                let (d, t) = self.leg(from, to);
                distances[i][j] = d;
                durations[i][j] = t;
            }
        }

        Ok(TravelMatrices {
            traffic_durations: durations.clone(),
            distances,
            durations,
            size: rows.max(cols),
        })
    }

    fn name(&self) -> &str {
        "haversine"
    }
}

/// Create a routing provider with automatic fallback.
///
/// Tries the configured mapping provider first; degrades to haversine when
/// the base URL is absent or the provider fails a health probe.
pub async fn routing_with_fallback(
    config: Option<MapApiConfig>,
    average_speed_kmh: f64,
) -> std::sync::Arc<dyn RoutingProvider> {
    use tracing::{info, warn};

    if let Some(cfg) = config {
        let client = MapApiClient::new(cfg.clone());
        match client.health_check().await {
            Ok(()) => {
                info!("Mapping provider available at {}", cfg.base_url);
                return std::sync::Arc::new(client);
            }
            Err(e) => {
                warn!(
                    "Mapping provider not available at {}: {}. Falling back to haversine routing.",
                    cfg.base_url, e
                );
            }
        }
    }

    info!("Using haversine routing (mapping provider not configured or unavailable)");
    std::sync::Arc::new(HaversineRouting::new(average_speed_kmh))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prague() -> Coordinates {
        Coordinates { lat: 50.0755, lng: 14.4378 }
    }

    fn brno() -> Coordinates {
        Coordinates { lat: 49.1951, lng: 16.6068 }
    }

    fn ostrava() -> Coordinates {
        Coordinates { lat: 49.8209, lng: 18.2625 }
    }

    #[tokio::test]
    async fn test_haversine_matrix_empty() {
        let provider = HaversineRouting::default();
        let matrices = provider
            .matrix(&[], &[], Utc::now(), VehicleKind::Van)
            .await
            .unwrap();
        assert_eq!(matrices.size, 0);
        assert!(matrices.distances.is_empty());
    }

    #[tokio::test]
    async fn test_haversine_matrix_two_locations() {
        let provider = HaversineRouting::default();
        let locations = [prague(), brno()];
        let matrices = provider
            .matrix(&locations, &locations, Utc::now(), VehicleKind::Van)
            .await
            .unwrap();

        assert_eq!(matrices.size, 2);
        assert_eq!(matrices.distance(0, 0), 0);
        assert_eq!(matrices.distance(1, 1), 0);

        // Prague to Brno is ~185 km straight line, ~240 km road
        let distance_km = matrices.distance(0, 1) as f64 / 1000.0;
        assert!(
            distance_km > 200.0 && distance_km < 280.0,
            "Expected ~240 km, got {} km",
            distance_km
        );

        // Haversine fallback is symmetric
        assert_eq!(matrices.distance(0, 1), matrices.distance(1, 0));
        assert_eq!(matrices.duration(0, 1), matrices.duration(1, 0));
    }

    #[tokio::test]
    async fn test_haversine_travel_time_reasonable() {
        let provider = HaversineRouting::default();
        let locations = [prague(), brno()];
        let matrices = provider
            .matrix(&locations, &locations, Utc::now(), VehicleKind::Van)
            .await
            .unwrap();

        // ~240 km at 40 km/h = ~6 hours
        let duration_hours = matrices.duration(0, 1) as f64 / 3600.0;
        assert!(
            duration_hours > 5.0 && duration_hours < 8.0,
            "Expected ~6 hours, got {} hours",
            duration_hours
        );
    }

    #[tokio::test]
    async fn test_haversine_matrix_diagonal_zero() {
        let provider = HaversineRouting::default();
        let locations = [prague(), brno(), ostrava()];
        let matrices = provider
            .matrix(&locations, &locations, Utc::now(), VehicleKind::Van)
            .await
            .unwrap();

        for i in 0..3 {
            assert_eq!(matrices.distance(i, i), 0);
            assert_eq!(matrices.duration(i, i), 0);
        }
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    assert!(matrices.distance(i, j) > 0);
                    assert!(matrices.duration(i, j) > 0);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_haversine_traffic_factor_is_one() {
        let provider = HaversineRouting::default();
        let locations = [prague(), brno()];
        let matrices = provider
            .matrix(&locations, &locations, Utc::now(), VehicleKind::Van)
            .await
            .unwrap();
        assert!((matrices.traffic_factor(0, 1) - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_haversine_route_polyline() {
        let provider = HaversineRouting::default();
        let plan = provider
            .route(prague(), brno(), &[ostrava()], Utc::now(), VehicleKind::Car)
            .await
            .unwrap();

        assert_eq!(plan.polyline.len(), 3);
        assert_eq!(plan.segments.len(), 2);
        assert!(plan.distance_m > 0);
        assert_eq!(plan.free_time_s, plan.traffic_time_s);
        // GeoJSON [lng, lat] order
        assert!((plan.polyline[0][0] - 14.4378).abs() < 0.0001);
        assert!((plan.polyline[0][1] - 50.0755).abs() < 0.0001);
    }

    #[tokio::test]
    async fn test_haversine_geocode_not_found() {
        let provider = HaversineRouting::default();
        let err = provider.geocode("Some Street 1, Prague").await.unwrap_err();
        assert!(matches!(err, RoutingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fallback_without_config() {
        let provider = routing_with_fallback(None, 40.0).await;
        assert_eq!(provider.name(), "haversine");
    }

    #[tokio::test]
    async fn test_fallback_with_unreachable_provider() {
        let provider = routing_with_fallback(
            Some(MapApiConfig::new("http://localhost:1", None)),
            40.0,
        )
        .await;
        assert_eq!(provider.name(), "haversine");
    }
}
