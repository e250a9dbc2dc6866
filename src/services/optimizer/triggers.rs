//! Trigger evaluation and strategy selection.
//!
//! Pure functions over a route snapshot: given the route, its resources, the
//! unassigned urgent orders, and a traffic view, decide which triggers fire
//! at `now` and which re-solve strategy they call for.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::services::geo;
use crate::services::simulator::TrafficView;
use crate::store::RouteRecord;
use crate::types::{Driver, Order, StopStatus, Vehicle};

/// Orders within this distance of a route may be folded into it.
const URGENT_ORDER_RADIUS_KM: f64 = 5.0;

/// Trigger families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Delay,
    Traffic,
    VehicleBreakdown,
    DriverUnavailable,
    NewUrgentOrder,
    CustomerReschedule,
    Manual,
}

/// One fired trigger
#[derive(Debug, Clone, Serialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// 0.0..=1.0
    pub severity: f64,
    pub description: String,
    pub estimated_delay_minutes: f64,
    /// Calls for action before the next monitor cycle
    pub immediate: bool,
    /// Orders the trigger wants folded into the route
    pub order_ids: Vec<Uuid>,
}

impl Trigger {
    pub fn manual(reason: &str) -> Self {
        Self {
            kind: TriggerKind::Manual,
            severity: 0.5,
            description: reason.to_string(),
            estimated_delay_minutes: 0.0,
            immediate: false,
            order_ids: vec![],
        }
    }
}

/// Re-solve strategy, in increasing order of disruption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Local,
    Global,
    Emergency,
}

/// Evaluation thresholds (from configuration)
#[derive(Debug, Clone)]
pub struct TriggerThresholds {
    pub delay_threshold_min: f64,
    pub traffic_threshold: f64,
}

/// Everything trigger evaluation looks at for one route
pub struct TriggerContext<'a> {
    pub record: &'a RouteRecord,
    pub vehicle: &'a Vehicle,
    pub driver: &'a Driver,
    /// Orders referenced by the route's stops
    pub route_orders: &'a [Order],
    /// Unassigned high-priority orders for the same day
    pub urgent_orders: &'a [Order],
    pub traffic: &'a dyn TrafficView,
}

/// Evaluate all trigger conditions for one route.
pub fn evaluate_triggers(
    ctx: &TriggerContext<'_>,
    thresholds: &TriggerThresholds,
    now: DateTime<Utc>,
) -> Vec<Trigger> {
    let mut triggers = Vec::new();

    if let Some(trigger) = check_delay(ctx, thresholds, now) {
        triggers.push(trigger);
    }
    if let Some(trigger) = check_traffic(ctx, thresholds) {
        triggers.push(trigger);
    }
    if let Some(trigger) = check_vehicle(ctx) {
        triggers.push(trigger);
    }
    if let Some(trigger) = check_driver(ctx) {
        triggers.push(trigger);
    }
    if let Some(trigger) = check_urgent_orders(ctx) {
        triggers.push(trigger);
    }
    if let Some(trigger) = check_reschedules(ctx) {
        triggers.push(trigger);
    }

    triggers
}

/// Pick the strategy for a non-empty trigger set.
pub fn select_strategy(triggers: &[Trigger]) -> Strategy {
    let emergency = triggers.iter().any(|t| {
        matches!(t.kind, TriggerKind::VehicleBreakdown | TriggerKind::DriverUnavailable)
    });
    if emergency {
        return Strategy::Emergency;
    }

    let max_severity = triggers.iter().map(|t| t.severity).fold(0.0, f64::max);
    if max_severity > 0.8 || triggers.len() >= 3 {
        return Strategy::Global;
    }
    Strategy::Local
}

pub fn max_severity(triggers: &[Trigger]) -> f64 {
    triggers.iter().map(|t| t.severity).fold(0.0, f64::max)
}

/// Delay: the vehicle has not reached the stop it is heading to well past
/// its planned arrival.
fn check_delay(
    ctx: &TriggerContext<'_>,
    thresholds: &TriggerThresholds,
    now: DateTime<Utc>,
) -> Option<Trigger> {
    let route = &ctx.record.route;
    // The stop currently being driven to: first not-yet-completed stop at or
    // past the current index.
    let target = ctx
        .record
        .stops
        .iter()
        .filter(|s| s.sequence >= route.current_stop_index)
        .find(|s| {
            !matches!(s.status, StopStatus::Completed | StopStatus::Skipped | StopStatus::Failed)
        })?;

    let delay_minutes = (now - target.planned_arrival).num_seconds() as f64 / 60.0;
    if delay_minutes <= thresholds.delay_threshold_min {
        return None;
    }

    Some(Trigger {
        kind: TriggerKind::Delay,
        severity: (delay_minutes / (thresholds.delay_threshold_min * 3.0)).min(1.0),
        description: format!(
            "Route {} delayed by {:.1} minutes at stop {}",
            route.id, delay_minutes, target.sequence
        ),
        estimated_delay_minutes: delay_minutes,
        immediate: delay_minutes > thresholds.delay_threshold_min * 2.0,
        order_ids: vec![],
    })
}

/// Traffic: any remaining leg runs through congestion above the threshold.
fn check_traffic(ctx: &TriggerContext<'_>, thresholds: &TriggerThresholds) -> Option<Trigger> {
    let route = &ctx.record.route;
    let remaining = ctx
        .record
        .stops
        .iter()
        .filter(|s| s.sequence >= route.current_stop_index && s.status == StopStatus::Pending);

    let worst_factor = remaining
        .map(|s| ctx.traffic.factor_at(&s.coordinates))
        .fold(1.0, f64::max);
    if worst_factor <= thresholds.traffic_threshold {
        return None;
    }

    Some(Trigger {
        kind: TriggerKind::Traffic,
        severity: (worst_factor - 1.0).min(1.0),
        description: format!(
            "Heavy traffic on route {} (factor {:.2})",
            route.id, worst_factor
        ),
        estimated_delay_minutes: (worst_factor - 1.0) * 30.0,
        immediate: false,
        order_ids: vec![],
    })
}

fn check_vehicle(ctx: &TriggerContext<'_>) -> Option<Trigger> {
    if ctx.vehicle.status.is_operable() {
        return None;
    }
    Some(Trigger {
        kind: TriggerKind::VehicleBreakdown,
        severity: 1.0,
        description: format!(
            "Vehicle {} unavailable: {}",
            ctx.vehicle.license_plate,
            ctx.vehicle.status.as_str()
        ),
        estimated_delay_minutes: 0.0,
        immediate: true,
        order_ids: vec![],
    })
}

fn check_driver(ctx: &TriggerContext<'_>) -> Option<Trigger> {
    if ctx.driver.is_available() {
        return None;
    }
    Some(Trigger {
        kind: TriggerKind::DriverUnavailable,
        severity: 0.9,
        description: format!(
            "Driver {} unavailable: {}",
            ctx.driver.full_name,
            ctx.driver.status.as_str()
        ),
        estimated_delay_minutes: 0.0,
        immediate: true,
        order_ids: vec![],
    })
}

/// New urgent orders close to the route's path.
fn check_urgent_orders(ctx: &TriggerContext<'_>) -> Option<Trigger> {
    let nearby: Vec<Uuid> = ctx
        .urgent_orders
        .iter()
        .filter(|order| {
            ctx.record.stops.iter().any(|stop| {
                geo::haversine_distance(&order.coordinates, &stop.coordinates)
                    < URGENT_ORDER_RADIUS_KM
            })
        })
        .map(|order| order.id)
        .collect();

    if nearby.is_empty() {
        return None;
    }
    Some(Trigger {
        kind: TriggerKind::NewUrgentOrder,
        severity: 0.8,
        description: format!(
            "{} urgent orders near route {}",
            nearby.len(),
            ctx.record.route.id
        ),
        estimated_delay_minutes: 0.0,
        immediate: false,
        order_ids: nearby,
    })
}

/// Rescheduled windows: a pending stop whose planned arrival no longer fits
/// the order's current window.
fn check_reschedules(ctx: &TriggerContext<'_>) -> Option<Trigger> {
    let impacted: Vec<Uuid> = ctx
        .record
        .stops
        .iter()
        .filter(|s| s.status == StopStatus::Pending)
        .filter_map(|stop| {
            let order_id = stop.order_id?;
            let order = ctx.route_orders.iter().find(|o| o.id == order_id)?;
            let fits = order.time_window.contains(stop.planned_arrival);
            (!fits).then_some(order_id)
        })
        .collect();

    if impacted.is_empty() {
        return None;
    }
    Some(Trigger {
        kind: TriggerKind::CustomerReschedule,
        severity: 0.5,
        description: format!(
            "{} stops on route {} fall outside their rescheduled windows",
            impacted.len(),
            ctx.record.route.id
        ),
        estimated_delay_minutes: 0.0,
        immediate: false,
        order_ids: impacted,
    })
}
