//! Route and stop types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

/// Route status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Planned,
    Active,
    Completed,
    Cancelled,
    Disrupted,
    Reoptimizing,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disrupted => "disrupted",
            Self::Reoptimizing => "reoptimizing",
        }
    }

    /// Routes the adaptive optimizer watches.
    pub fn is_monitorable(&self) -> bool {
        matches!(self, Self::Planned | Self::Active)
    }
}

/// Stop kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Depot,
    Delivery,
    Break,
}

/// Stop status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Pending,
    Approaching,
    Arrived,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approaching => "approaching",
            Self::Arrived => "arrived",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Stops that a re-solve may still reorder.
    pub fn is_reorderable(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Route entity (one vehicle/driver tour for a day)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub driver_id: Uuid,

    pub planned_date: NaiveDate,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,

    pub total_distance_km: f64,
    pub total_duration_minutes: i32,
    /// Window slack accumulated across the plan; feeds the waiting term of
    /// the objective when a re-solve is gated against the current plan.
    pub total_waiting_minutes: i32,
    pub total_weight_kg: f64,
    pub total_volume_m3: f64,
    pub stop_count: u32,

    pub status: RouteStatus,

    /// Index of the stop the vehicle is currently at or heading to.
    /// Monotonically non-decreasing over the route's lifetime.
    pub current_stop_index: u32,

    pub reoptimization_count: u32,
    pub last_reoptimized_at: Option<DateTime<Utc>>,
    pub optimization_score: i32,

    /// Optimistic concurrency tag; commits carry the version they read.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stop on a route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub id: Uuid,
    pub route_id: Uuid,
    /// None for depot and break stops.
    pub order_id: Option<Uuid>,
    pub kind: StopKind,

    /// Position in the route, strictly increasing from 0 with no gaps.
    pub sequence: u32,
    pub coordinates: Coordinates,

    pub planned_arrival: DateTime<Utc>,
    pub planned_departure: DateTime<Utc>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub actual_departure: Option<DateTime<Utc>>,

    pub status: StopStatus,

    pub distance_from_previous_km: f64,
    pub travel_minutes_from_previous: i32,
}

/// Difference between a route's stop list before and after a re-solve,
/// attached to reoptimization events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDiff {
    pub added_order_ids: Vec<Uuid>,
    pub removed_order_ids: Vec<Uuid>,
    pub reordered_order_ids: Vec<Uuid>,
}

impl RouteDiff {
    /// Compare two stop lists by the orders they carry and their positions.
    pub fn between(before: &[RouteStop], after: &[RouteStop]) -> Self {
        let before_orders: Vec<Uuid> = before.iter().filter_map(|s| s.order_id).collect();
        let after_orders: Vec<Uuid> = after.iter().filter_map(|s| s.order_id).collect();

        let added = after_orders
            .iter()
            .filter(|id| !before_orders.contains(id))
            .copied()
            .collect();
        let removed = before_orders
            .iter()
            .filter(|id| !after_orders.contains(id))
            .copied()
            .collect();

        // Orders present in both lists but at a different relative position.
        let common_before: Vec<Uuid> = before_orders
            .iter()
            .filter(|id| after_orders.contains(id))
            .copied()
            .collect();
        let common_after: Vec<Uuid> = after_orders
            .iter()
            .filter(|id| before_orders.contains(id))
            .copied()
            .collect();
        let reordered = common_before
            .iter()
            .zip(common_after.iter())
            .filter(|(b, a)| b != a)
            .map(|(b, _)| *b)
            .collect();

        Self {
            added_order_ids: added,
            removed_order_ids: removed,
            reordered_order_ids: reordered,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_order_ids.is_empty()
            && self.removed_order_ids.is_empty()
            && self.reordered_order_ids.is_empty()
    }
}

/// Verify the stop sequence invariant: 0..n-1, strictly increasing, no gaps.
pub fn sequence_is_contiguous(stops: &[RouteStop]) -> bool {
    stops
        .iter()
        .enumerate()
        .all(|(idx, stop)| stop.sequence == idx as u32)
}

/// Reconstruct total waiting from a stop list: the gap between reaching a
/// stop (previous departure plus travel) and its planned arrival.
pub fn route_waiting_minutes(stops: &[RouteStop]) -> i32 {
    stops
        .windows(2)
        .map(|pair| {
            let reached = pair[0].planned_departure
                + chrono::Duration::minutes(pair[1].travel_minutes_from_previous as i64);
            (pair[1].planned_arrival - reached).num_minutes().max(0) as i32
        })
        .sum()
}
