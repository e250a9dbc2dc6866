//! Solver output types.
//!
//! A solution is a set of planned vehicle tours plus totals and the weighted
//! objective value. Times stay as minute offsets from midnight of the planned
//! date; the planning layer converts them to wall-clock timestamps when it
//! persists stops.

use uuid::Uuid;

use crate::types::{Coordinates, StopKind};
use super::ConstraintKind;

/// One stop of a planned tour (depot legs included)
#[derive(Debug, Clone)]
pub struct PlannedStop {
    pub order_id: Option<Uuid>,
    pub kind: StopKind,
    pub sequence: u32,
    pub coordinates: Coordinates,
    pub arrival_min: i32,
    pub departure_min: i32,
    pub waiting_minutes: i32,
    pub distance_from_previous_m: u64,
    pub travel_minutes_from_previous: i32,
}

/// One planned vehicle tour, depot to depot
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub vehicle_id: Uuid,
    pub driver_id: Uuid,
    pub stops: Vec<PlannedStop>,
    pub total_distance_m: u64,
    pub total_minutes: i32,
    pub total_weight_kg: f64,
    pub total_volume_m3: f64,
    pub waiting_minutes: i32,
    pub start_min: i32,
    pub end_min: i32,
}

impl PlannedRoute {
    /// Delivery stops only (depot legs excluded).
    pub fn delivery_count(&self) -> usize {
        self.stops.iter().filter(|s| s.kind == StopKind::Delivery).count()
    }
}

/// Why an order could not be placed
#[derive(Debug, Clone)]
pub struct OrderInfeasibility {
    pub order_id: Uuid,
    pub constraint: ConstraintKind,
    pub message: String,
}

/// Complete solver output
#[derive(Debug, Clone)]
pub struct RouteSolution {
    pub routes: Vec<PlannedRoute>,
    pub total_distance_km: f64,
    pub total_duration_minutes: i32,
    pub total_waiting_minutes: i32,
    pub objective_value: f64,
    /// 0-100, degraded by unassigned orders and heavy waiting
    pub optimization_score: i32,
    /// Orders left out (only possible when the caller allows partial plans)
    pub unassigned: Vec<OrderInfeasibility>,
    /// Haversine fallback was used instead of the mapping provider
    pub degraded: bool,
    /// The time budget expired before the search converged
    pub timed_out: bool,
    pub solve_time_ms: u64,
}

impl RouteSolution {
    pub fn vehicles_used(&self) -> usize {
        self.routes.len()
    }

    pub fn orders_assigned(&self) -> usize {
        self.routes.iter().map(|r| r.delivery_count()).sum()
    }

    /// Simple quality score: start from 100, lose points for unassigned
    /// orders and for waiting-heavy plans.
    pub fn calculate_score(assigned: usize, unassigned: usize, waiting_minutes: i32) -> i32 {
        let total = assigned + unassigned;
        if total == 0 {
            return 100;
        }
        let base = (assigned * 100 / total) as i32;
        let waiting_penalty = (waiting_minutes / 30).min(20);
        (base - waiting_penalty).max(0)
    }
}
