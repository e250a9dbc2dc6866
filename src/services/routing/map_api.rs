//! Mapping provider HTTP client.
//!
//! Wire contract: origins/destinations are `lon,lat` pairs joined with `|`,
//! mode is `driving` or `truck`, matrix cells come back as
//! `rows[i].elements[j]` with `distance.value` / `duration.value` /
//! `duration_in_traffic.value` / `status`, and unreachable cells carry the
//! sentinel value 999999. All calls are paced by a requests-per-second
//! limiter shared across tasks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::services::rate_limiter::RequestPacer;
use crate::types::{Coordinates, VehicleKind};
use super::{RoadSegment, RoutePlan, RoutingError, RoutingProvider, TravelMatrices};

/// Sentinel the provider uses for unreachable matrix cells.
const UNREACHABLE_SENTINEL: u64 = 999_999;

/// Large-but-safe stand-in so unreachable legs never win an arc comparison.
const UNREACHABLE_COST: u64 = u64::MAX / 2;

/// Mapping provider client configuration
#[derive(Debug, Clone)]
pub struct MapApiConfig {
    /// Base URL of the provider (e.g. "https://maps.example.com/api/v2")
    pub base_url: String,
    /// API key, sent as the `key` query parameter when present
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Outbound rate limit
    pub requests_per_second: u32,
}

impl MapApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            timeout_seconds: 30,
            requests_per_second: 10,
        }
    }
}

/// Mapping provider client
pub struct MapApiClient {
    client: Client,
    config: MapApiConfig,
    pacer: Arc<RequestPacer>,
}

impl MapApiClient {
    pub fn new(config: MapApiConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        let pacer = Arc::new(RequestPacer::new(config.requests_per_second));

        Self { client, config, pacer }
    }

    /// Check the provider's status endpoint.
    pub async fn health_check(&self) -> Result<(), RoutingError> {
        let url = format!("{}/status", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RoutingError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RoutingError::Unavailable(format!(
                "status endpoint returned {}",
                response.status()
            )))
        }
    }

    fn key_param(&self) -> Option<(&'static str, String)> {
        self.config.api_key.as_ref().map(|k| ("key", k.clone()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, RoutingError> {
        self.pacer.acquire().await;

        let mut request = self.client.get(url);
        for (name, value) in params {
            request = request.query(&[(name, value)]);
        }
        if let Some((name, value)) = self.key_param() {
            request = request.query(&[(name, value)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RoutingError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(RoutingError::QuotaExceeded),
            status if status.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(RoutingError::Unavailable(format!("{}: {}", status, body)))
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(RoutingError::Unavailable(format!("{}: {}", status, body)))
            }
            _ => response
                .json::<T>()
                .await
                .map_err(|e| RoutingError::Unavailable(format!("bad response body: {}", e))),
        }
    }
}

/// Format coordinates as the provider expects: `lon,lat` pairs joined with `|`.
fn format_locations(locations: &[Coordinates]) -> String {
    locations
        .iter()
        .map(|c| format!("{:.6},{:.6}", c.lng, c.lat))
        .collect::<Vec<_>>()
        .join("|")
}

/// Translate one matrix cell, mapping sentinel/error cells to a cost that
/// never wins an arc comparison.
fn cell_value(value: Option<u64>, ok: bool, what: &str, i: usize, j: usize) -> u64 {
    match value {
        Some(v) if ok && v != UNREACHABLE_SENTINEL => v,
        _ => {
            warn!("No {} for matrix cell {} -> {}", what, i, j);
            UNREACHABLE_COST
        }
    }
}

#[async_trait]
impl RoutingProvider for MapApiClient {
    async fn geocode(&self, query: &str) -> Result<Coordinates, RoutingError> {
        let url = format!("{}/geocode", self.config.base_url);
        let response: GeocodeResponse = self
            .get_json(&url, &[("q", urlencoding::encode(query).into_owned())])
            .await?;

        response
            .results
            .into_iter()
            .next()
            .map(|r| Coordinates { lat: r.lat, lng: r.lon })
            .ok_or_else(|| RoutingError::NotFound(query.to_string()))
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        waypoints: &[Coordinates],
        depart_at: DateTime<Utc>,
        kind: VehicleKind,
    ) -> Result<RoutePlan, RoutingError> {
        let url = format!("{}/route", self.config.base_url);
        let mut params = vec![
            ("origin", format_locations(&[origin])),
            ("destination", format_locations(&[destination])),
            ("mode", kind.routing_mode().to_string()),
            ("departure_time", depart_at.timestamp().to_string()),
        ];
        if !waypoints.is_empty() {
            params.push(("waypoints", format_locations(waypoints)));
        }

        debug!("Requesting route from mapping provider ({} waypoints)", waypoints.len());
        let response: RouteResponse = self.get_json(&url, &params).await?;

        let polyline = decode_polyline(&response.polyline, 6)
            .map_err(|e| RoutingError::Unavailable(format!("bad polyline: {}", e)))?;

        Ok(RoutePlan {
            polyline,
            distance_m: response.distance_m,
            free_time_s: response.duration_s,
            traffic_time_s: response.duration_in_traffic_s.unwrap_or(response.duration_s),
            segments: response
                .segments
                .into_iter()
                .map(|s| RoadSegment {
                    level: s.level.min(10),
                    speed_kmh: s.speed_kmh,
                    length_m: s.length_m,
                })
                .collect(),
        })
    }

    async fn matrix(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
        depart_at: DateTime<Utc>,
        kind: VehicleKind,
    ) -> Result<TravelMatrices, RoutingError> {
        let rows = origins.len();
        let cols = destinations.len();
        if rows == 0 || cols == 0 {
            return Ok(TravelMatrices::empty());
        }

        let url = format!("{}/matrix", self.config.base_url);
        let params = [
            ("origins", format_locations(origins)),
            ("destinations", format_locations(destinations)),
            ("mode", kind.routing_mode().to_string()),
            ("departure_time", depart_at.timestamp().to_string()),
        ];

        debug!("Requesting {}x{} matrix from mapping provider", rows, cols);
        let response: MatrixResponse = self.get_json(&url, &params).await?;

        if response.rows.len() != rows {
            return Err(RoutingError::Unavailable(format!(
                "matrix shape mismatch: expected {} rows, got {}",
                rows,
                response.rows.len()
            )));
        }

        let mut distances = vec![vec![0u64; cols]; rows];
        let mut durations = vec![vec![0u64; cols]; rows];
        let mut traffic_durations = vec![vec![0u64; cols]; rows];

        for (i, row) in response.rows.iter().enumerate() {
            for (j, cell) in row.elements.iter().enumerate().take(cols) {
                let ok = cell.status.as_deref().unwrap_or("OK") == "OK";
                distances[i][j] =
                    cell_value(cell.distance.as_ref().map(|v| v.value), ok, "distance", i, j);
                durations[i][j] =
                    cell_value(cell.duration.as_ref().map(|v| v.value), ok, "duration", i, j);
                traffic_durations[i][j] = cell
                    .duration_in_traffic
                    .as_ref()
                    .map(|v| cell_value(Some(v.value), ok, "traffic duration", i, j))
                    .unwrap_or(durations[i][j]);
            }
        }

        Ok(TravelMatrices {
            distances,
            durations,
            traffic_durations,
            size: rows.max(cols),
        })
    }

    fn name(&self) -> &str {
        "map-api"
    }
}

// Provider wire types

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixCell>,
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    distance: Option<ValueField>,
    duration: Option<ValueField>,
    duration_in_traffic: Option<ValueField>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    /// Encoded polyline shape
    polyline: String,
    distance_m: u64,
    duration_s: u64,
    duration_in_traffic_s: Option<u64>,
    #[serde(default)]
    segments: Vec<WireSegment>,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    level: u8,
    speed_kmh: f64,
    length_m: u64,
}

/// Decode an encoded polyline at the given precision
/// (6 decimal places for this provider, vs 5 for Google)
fn decode_polyline(encoded: &str, precision: u32) -> anyhow::Result<Vec<[f64; 2]>> {
    let factor = 10_f64.powi(precision as i32);
    let mut coordinates = Vec::new();
    let mut lat = 0i64;
    let mut lng = 0i64;

    let bytes = encoded.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // Decode latitude
        let mut shift = 0;
        let mut result = 0i64;
        loop {
            if i >= bytes.len() {
                anyhow::bail!("Invalid polyline encoding");
            }
            let byte = bytes[i] as i64 - 63;
            i += 1;
            result |= (byte & 0x1f) << shift;
            shift += 5;
            if byte < 0x20 {
                break;
            }
        }
        let dlat = if result & 1 != 0 { !(result >> 1) } else { result >> 1 };
        lat += dlat;

        // Decode longitude
        shift = 0;
        result = 0;
        loop {
            if i >= bytes.len() {
                anyhow::bail!("Invalid polyline encoding");
            }
            let byte = bytes[i] as i64 - 63;
            i += 1;
            result |= (byte & 0x1f) << shift;
            shift += 5;
            if byte < 0x20 {
                break;
            }
        }
        let dlng = if result & 1 != 0 { !(result >> 1) } else { result >> 1 };
        lng += dlng;

        // GeoJSON uses [lng, lat] order
        coordinates.push([lng as f64 / factor, lat as f64 / factor]);
    }

    Ok(coordinates)
}
