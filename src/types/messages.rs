#![allow(dead_code)]
//! Boundary message types
//!
//! Request/response envelopes and DTOs for whichever transport fronts the
//! worker, plus the WebSocket push envelope. Transports themselves live
//! outside this crate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Coordinates, EventKind, EventSeverity, RouteStatus};

/// Generic request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> Request<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Generic success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(request_id: Uuid, payload: T) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

/// Request to plan routes for a set of orders
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRoutesRequest {
    pub order_ids: Vec<Uuid>,
    pub vehicle_ids: Vec<Uuid>,
    pub driver_ids: Vec<Uuid>,
    pub depot: Coordinates,
    pub planned_date: Option<NaiveDate>,
    pub time_limit_s: Option<u32>,
    #[serde(default)]
    pub enable_adaptive: bool,
}

/// Result of route planning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRoutesResponse {
    pub routes_created: usize,
    pub route_ids: Vec<Uuid>,
    pub total_distance_km: f64,
    pub total_duration_minutes: i32,
    pub objective_value: f64,
    pub solver_stats: SolverStats,
}

/// Solver run statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverStats {
    pub solve_time_ms: u64,
    pub vehicles_used: usize,
    pub orders_assigned: usize,
    pub orders_unassigned: usize,
    /// True when the haversine fallback replaced the mapping provider.
    pub degraded: bool,
    /// True when the time budget expired before search converged.
    pub timed_out: bool,
}

/// Route status transition pushed by drivers or dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatusUpdate {
    pub status: RouteStatus,
    pub current_stop_index: Option<u32>,
    pub current_location: Option<Coordinates>,
}

/// Manual reoptimization request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReoptimizeRequest {
    pub reason: String,
}

/// Per-stop ETA prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopEta {
    pub sequence: u32,
    pub order_id: Option<Uuid>,
    pub planned_arrival: DateTime<Utc>,
    pub predicted_arrival: DateTime<Utc>,
    pub confidence: f64,
    pub delay_minutes: i64,
}

/// ETA response for a route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaResponse {
    pub route_id: Uuid,
    pub stops: Vec<StopEta>,
}

/// Customer time-window change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindowUpdate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub customer_verified: bool,
}

/// Event listing filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub kind: Option<EventKind>,
    pub severity: Option<EventSeverity>,
    pub route_id: Option<Uuid>,
    #[serde(default)]
    pub active_only: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// WebSocket push envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl WsEnvelope {
    pub fn new(message_type: &str, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::new("heartbeat", serde_json::Value::Null)
    }

    pub fn pong() -> Self {
        Self::new("pong", serde_json::Value::Null)
    }
}
