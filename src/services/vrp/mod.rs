//! VRPTW solver.
//!
//! Static solves build every vehicle tour from scratch under capacity,
//! time-window, stop-count, and working-time constraints, minimizing the
//! weighted objective `α·travel + β·waiting + γ·adaptations`. The segment
//! re-solve reorders only the pending tail of a running route and is what
//! the adaptive optimizer calls for local strategies.

mod problem;
mod search;
mod solution;

pub use problem::{VrpOrder, VrpProblem, VrpVehicle};
pub use search::{Matrices, SearchBudget};
pub use solution::{OrderInfeasibility, PlannedRoute, PlannedStop, RouteSolution};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::services::geo;
use crate::types::{Driver, Order, RouteStop, StopKind, StopStatus, Vehicle};

/// Constraint families used in infeasibility diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    TimeWindow,
    Capacity,
    StopLimit,
    WorkingTime,
    Unreachable,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeWindow => "time_window",
            Self::Capacity => "capacity",
            Self::StopLimit => "stop_limit",
            Self::WorkingTime => "working_time",
            Self::Unreachable => "unreachable",
        }
    }
}

/// Solver failure modes
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("time window violation: {message}")]
    TimeWindowViolation { order_id: Option<Uuid>, message: String },
    #[error("total demand {total_demand_kg} kg exceeds total capacity {total_capacity_kg} kg")]
    CapacityViolation { total_demand_kg: f64, total_capacity_kg: f64 },
    #[error("no feasible solution for {} orders", diagnostics.len())]
    NoFeasibleSolution { diagnostics: Vec<OrderInfeasibility> },
    #[error("time budget expired before a feasible solution was found")]
    OptimizationTimeout,
    #[error("solve was cancelled")]
    Cancelled,
}

/// Objective weights (α travel, β waiting, γ adaptations), normalized to
/// sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveWeights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self { alpha: 0.6, beta: 0.3, gamma: 0.1 }
    }
}

impl ObjectiveWeights {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        let total = alpha + beta + gamma;
        if total <= 0.0 {
            return Self::default();
        }
        Self {
            alpha: alpha / total,
            beta: beta / total,
            gamma: gamma / total,
        }
    }

    /// Adaptation penalty term, normalized against an assumed ceiling of 10
    /// re-solves.
    pub fn adaptation_term(&self, adaptations: u32) -> f64 {
        self.gamma * (adaptations as f64 / 10.0)
    }
}

/// Solver configuration
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub time_limit: Duration,
    pub weights: ObjectiveWeights,
    /// Normalization base for the objective
    pub base_cost: f64,
    pub max_waiting_minutes: i32,
    /// Accept plans that leave orders unassigned (emergency mode)
    pub allow_partial: bool,
    /// Speed used when rescheduling a segment without fresh matrices
    pub fallback_speed_kmh: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
            weights: ObjectiveWeights::default(),
            base_cost: 1000.0,
            max_waiting_minutes: 30,
            allow_partial: false,
            fallback_speed_kmh: geo::AVERAGE_SPEED_KMH,
        }
    }
}

impl SolverConfig {
    /// Quick configuration for interactive and segment re-solves.
    pub fn fast() -> Self {
        Self { time_limit: Duration::from_secs(5), ..Default::default() }
    }

    /// Emergency configuration: short budget, partial plans allowed.
    pub fn emergency() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
            allow_partial: true,
            ..Default::default()
        }
    }
}

/// Reordered pending tail of a route, with the distance saved
#[derive(Debug, Clone)]
pub struct SegmentImprovement {
    pub stops: Vec<RouteStop>,
    pub improvement_km: f64,
}

/// VRPTW solver
pub struct VrptwSolver {
    config: SolverConfig,
}

impl Default for VrptwSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl VrptwSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve a static VRPTW instance.
    ///
    /// `adaptations` feeds the objective's γ term (0 for a fresh morning
    /// plan, the per-route counter during re-solves). Identical inputs yield
    /// identical outputs.
    pub fn solve(
        &self,
        problem: &VrpProblem,
        matrices: &Matrices,
        adaptations: u32,
        budget: Option<SearchBudget>,
    ) -> Result<RouteSolution, SolveError> {
        let started = Instant::now();
        let budget = budget
            .unwrap_or_else(|| SearchBudget::with_deadline(started + self.config.time_limit));

        info!(
            "Solving VRPTW: {} orders, {} vehicles",
            problem.orders.len(),
            problem.vehicles.len()
        );

        let (mut chains, unassigned) = search::construct(problem, matrices);

        if budget.cancelled() {
            return Err(SolveError::Cancelled);
        }

        let any_feasible = chains.iter().any(|c| !c.is_empty());
        if budget.exhausted() && !any_feasible {
            return Err(SolveError::OptimizationTimeout);
        }

        if !unassigned.is_empty() && !self.config.allow_partial {
            let diagnostics = self.diagnose(problem, matrices, &chains, &unassigned);
            return Err(SolveError::NoFeasibleSolution { diagnostics });
        }

        let timed_out = search::improve(
            problem,
            matrices,
            &mut chains,
            &self.config.weights,
            self.config.base_cost,
            &budget,
        );
        if budget.cancelled() {
            return Err(SolveError::Cancelled);
        }

        let mut solution = self.extract(problem, matrices, &chains, adaptations);
        solution.unassigned = self.diagnose(problem, matrices, &chains, &unassigned);
        solution.optimization_score = RouteSolution::calculate_score(
            solution.orders_assigned(),
            solution.unassigned.len(),
            solution.total_waiting_minutes,
        );
        solution.timed_out = timed_out;
        solution.solve_time_ms = started.elapsed().as_millis() as u64;

        info!(
            "VRPTW solved: {} routes, {:.1} km, objective {:.4}, score {}",
            solution.routes.len(),
            solution.total_distance_km,
            solution.objective_value,
            solution.optimization_score
        );

        Ok(solution)
    }

    fn diagnose(
        &self,
        problem: &VrpProblem,
        matrices: &Matrices,
        chains: &[Vec<usize>],
        unassigned: &[usize],
    ) -> Vec<OrderInfeasibility> {
        unassigned
            .iter()
            .map(|&order_idx| {
                let constraint = search::diagnose_unassigned(problem, matrices, chains, order_idx);
                let order = &problem.orders[order_idx];
                OrderInfeasibility {
                    order_id: order.id,
                    constraint,
                    message: format!(
                        "order {} cannot be scheduled: {} constraint",
                        order.id,
                        constraint.as_str()
                    ),
                }
            })
            .collect()
    }

    fn extract(
        &self,
        problem: &VrpProblem,
        matrices: &Matrices,
        chains: &[Vec<usize>],
        adaptations: u32,
    ) -> RouteSolution {
        let mut routes = Vec::new();
        let mut total_distance_m = 0u64;
        let mut total_minutes = 0i32;
        let mut total_waiting = 0i32;
        let mut chain_costs = 0.0f64;

        for (vehicle, chain) in problem.vehicles.iter().zip(chains.iter()) {
            if chain.is_empty() {
                continue;
            }
            let schedule = search::simulate_chain(problem, matrices, vehicle, chain)
                .expect("extracted chain is feasible");

            let mut stops = Vec::with_capacity(chain.len() + 2);
            stops.push(PlannedStop {
                order_id: None,
                kind: StopKind::Depot,
                sequence: 0,
                coordinates: problem.depot,
                arrival_min: schedule.depot_departure_min,
                departure_min: schedule.depot_departure_min,
                waiting_minutes: 0,
                distance_from_previous_m: 0,
                travel_minutes_from_previous: 0,
            });

            let mut previous = 0usize;
            let mut weight = 0.0;
            let mut volume = 0.0;
            for (position, &node) in chain.iter().enumerate() {
                let order = &problem.orders[node - 1];
                let arrival = schedule.arrivals[position];
                let travel = matrices.minutes[previous][node];
                stops.push(PlannedStop {
                    order_id: Some(order.id),
                    kind: StopKind::Delivery,
                    sequence: stops.len() as u32,
                    coordinates: order.coordinates,
                    arrival_min: arrival,
                    departure_min: schedule.departures[position],
                    waiting_minutes: {
                        let reached =
                            stops.last().expect("depot stop pushed").departure_min + travel;
                        (arrival - reached).max(0)
                    },
                    distance_from_previous_m: matrices.distance_m[previous][node],
                    travel_minutes_from_previous: travel,
                });
                weight += order.weight_kg;
                volume += order.volume_m3;
                previous = node;

                // Scheduled driver break at this node's location
                if let Some(chain_break) =
                    schedule.breaks.iter().find(|b| b.after_position == position)
                {
                    stops.push(PlannedStop {
                        order_id: None,
                        kind: StopKind::Break,
                        sequence: stops.len() as u32,
                        coordinates: order.coordinates,
                        arrival_min: chain_break.start_min,
                        departure_min: chain_break.start_min + chain_break.duration_min,
                        waiting_minutes: 0,
                        distance_from_previous_m: 0,
                        travel_minutes_from_previous: 0,
                    });
                }
            }

            stops.push(PlannedStop {
                order_id: None,
                kind: StopKind::Depot,
                sequence: stops.len() as u32,
                coordinates: problem.depot,
                arrival_min: schedule.depot_return_min,
                departure_min: schedule.depot_return_min,
                waiting_minutes: 0,
                distance_from_previous_m: matrices.distance_m[previous][0],
                travel_minutes_from_previous: matrices.minutes[previous][0],
            });

            chain_costs += search::chain_cost(
                vehicle,
                &schedule,
                &self.config.weights,
                self.config.base_cost,
            );
            total_distance_m += schedule.distance_m;
            total_minutes += schedule.route_minutes();
            total_waiting += schedule.waiting_minutes;

            routes.push(PlannedRoute {
                vehicle_id: vehicle.vehicle_id,
                driver_id: vehicle.driver_id,
                stops,
                total_distance_m: schedule.distance_m,
                total_minutes: schedule.route_minutes(),
                total_weight_kg: weight,
                total_volume_m3: volume,
                waiting_minutes: schedule.waiting_minutes,
                start_min: schedule.depot_departure_min,
                end_min: schedule.depot_return_min,
            });
        }

        let objective_value = chain_costs + self.config.weights.adaptation_term(adaptations);

        RouteSolution {
            routes,
            total_distance_km: total_distance_m as f64 / 1000.0,
            total_duration_minutes: total_minutes,
            total_waiting_minutes: total_waiting,
            objective_value,
            optimization_score: 100,
            unassigned: vec![],
            degraded: false,
            timed_out: false,
            solve_time_ms: 0,
        }
    }

    /// Reorder the pending tail of a running route with 2-opt.
    ///
    /// Guarantees: stops at or below the current index keep their positions,
    /// nothing is scheduled before `now`, and the result honors the original
    /// time windows. Returns `None` when no feasible improvement exists.
    pub fn reoptimize_segment(
        &self,
        stops: &[RouteStop],
        orders: &[Order],
        _vehicle: &Vehicle,
        _driver: &Driver,
        now: DateTime<Utc>,
    ) -> Option<SegmentImprovement> {
        let pending: Vec<usize> = stops
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == StopKind::Delivery && s.status.is_reorderable())
            .map(|(idx, _)| idx)
            .collect();
        if pending.len() < 3 {
            debug!("Segment re-solve skipped: only {} pending stops", pending.len());
            return None;
        }

        let order_index: HashMap<Uuid, &Order> = orders.iter().map(|o| (o.id, o)).collect();

        let baseline_km = segment_distance_km(stops, &pending, &pending_order(&pending));
        let mut best_order = pending_order(&pending);
        let mut best_km = baseline_km;

        // 2-opt over the pending subsequence only; each surviving candidate
        // is rescheduled (breaks included) before it may replace the incumbent
        let mut improved = true;
        let mut iterations = 0;
        while improved && iterations < 100 {
            improved = false;
            iterations += 1;
            for i in 0..best_order.len() - 1 {
                for j in i + 1..best_order.len() {
                    let mut candidate = best_order.clone();
                    candidate[i..=j].reverse();
                    let candidate_km = segment_distance_km(stops, &pending, &candidate);
                    if candidate_km < best_km - 0.01 {
                        let mut trial = permuted_stops(stops, &pending, &candidate);
                        if self.schedule_tail(&mut trial, &order_index, now) {
                            best_order = candidate;
                            best_km = candidate_km;
                            improved = true;
                        }
                    }
                }
            }
        }

        if best_km >= baseline_km - 0.01 {
            return None;
        }

        let mut new_stops = permuted_stops(stops, &pending, &best_order);
        if !self.schedule_tail(&mut new_stops, &order_index, now) {
            return None;
        }
        Some(SegmentImprovement {
            stops: new_stops,
            improvement_km: baseline_km - best_km,
        })
    }

    /// Recompute the schedule of everything from the first pending stop on,
    /// in the order the slice already has: deliveries get travel, waiting
    /// slack, and window checks; pending break stops keep their duration and
    /// ride along at the preceding departure; the closing depot leg is
    /// re-timed last. The tail never starts before `now` or before the
    /// departure from the last already-worked stop.
    ///
    /// Returns false when a time window cannot be met.
    fn schedule_tail(
        &self,
        stops: &mut [RouteStop],
        orders: &HashMap<Uuid, &Order>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(first) = stops.iter().position(|s| s.status.is_reorderable()) else {
            return true;
        };

        let anchor = stops[..first]
            .iter()
            .rev()
            .find(|s| !s.status.is_reorderable());
        let mut cursor = anchor
            .map(|s| s.actual_departure.unwrap_or(s.planned_departure))
            .unwrap_or(now)
            .max(now);
        let mut previous = anchor.map(|s| s.coordinates).unwrap_or(stops[0].coordinates);

        for idx in first..stops.len() {
            if !stops[idx].status.is_reorderable() {
                continue;
            }
            match stops[idx].kind {
                StopKind::Delivery => {
                    let Some(order_id) = stops[idx].order_id else {
                        return false;
                    };
                    let Some(order) = orders.get(&order_id) else {
                        return false;
                    };

                    let coordinates = stops[idx].coordinates;
                    let distance_km = geo::road_distance(&previous, &coordinates);
                    let travel_min = geo::travel_time_minutes(
                        &previous,
                        &coordinates,
                        self.config.fallback_speed_kmh,
                    );
                    let mut arrival =
                        cursor + chrono::Duration::seconds((travel_min * 60.0) as i64);
                    if arrival < order.time_window.start {
                        let wait = (order.time_window.start - arrival).num_minutes();
                        if wait > self.config.max_waiting_minutes as i64 {
                            return false;
                        }
                        arrival = order.time_window.start;
                    }
                    if arrival > order.time_window.end {
                        return false;
                    }

                    let stop = &mut stops[idx];
                    stop.planned_arrival = arrival;
                    stop.planned_departure =
                        arrival + chrono::Duration::minutes(order.service_minutes as i64);
                    stop.distance_from_previous_km = distance_km;
                    stop.travel_minutes_from_previous = travel_min.ceil() as i32;
                    cursor = stop.planned_departure;
                    previous = coordinates;
                }
                StopKind::Break => {
                    let duration = (stops[idx].planned_departure - stops[idx].planned_arrival)
                        .max(chrono::Duration::zero());
                    let stop = &mut stops[idx];
                    stop.planned_arrival = cursor;
                    stop.planned_departure = cursor + duration;
                    stop.distance_from_previous_km = 0.0;
                    stop.travel_minutes_from_previous = 0;
                    cursor = stop.planned_departure;
                }
                StopKind::Depot => {
                    let coordinates = stops[idx].coordinates;
                    let distance_km = geo::road_distance(&previous, &coordinates);
                    let travel_min = geo::travel_time_minutes(
                        &previous,
                        &coordinates,
                        self.config.fallback_speed_kmh,
                    );
                    let stop = &mut stops[idx];
                    stop.planned_arrival =
                        cursor + chrono::Duration::seconds((travel_min * 60.0) as i64);
                    stop.planned_departure = stop.planned_arrival;
                    stop.distance_from_previous_km = distance_km;
                    stop.travel_minutes_from_previous = travel_min.ceil() as i32;
                    cursor = stop.planned_departure;
                    previous = coordinates;
                }
            }
        }
        true
    }
}

/// Clone the stop list with the pending delivery stops permuted into the
/// candidate order. Slot sequence ids stay where they are, so the sequence
/// invariant survives untouched.
fn permuted_stops(stops: &[RouteStop], pending: &[usize], order: &[usize]) -> Vec<RouteStop> {
    let mut result = stops.to_vec();
    let originals: Vec<RouteStop> = pending.iter().map(|&idx| stops[idx].clone()).collect();
    for (slot, &source) in order.iter().enumerate() {
        let target_idx = pending[slot];
        let mut moved = originals[source].clone();
        moved.sequence = stops[target_idx].sequence;
        result[target_idx] = moved;
    }
    result
}

fn pending_order(pending: &[usize]) -> Vec<usize> {
    (0..pending.len()).collect()
}

/// Total haversine length of the pending segment in a candidate order,
/// anchored at the stop preceding the first pending one.
fn segment_distance_km(stops: &[RouteStop], pending: &[usize], order: &[usize]) -> f64 {
    let first_pending = pending[0];
    let anchor = stops[..first_pending]
        .iter()
        .rev()
        .find(|s| !s.status.is_reorderable())
        .map(|s| s.coordinates)
        .unwrap_or(stops[0].coordinates);

    let mut total = 0.0;
    let mut previous = anchor;
    for &slot in order {
        let stop = &stops[pending[slot]];
        total += geo::haversine_distance(&previous, &stop.coordinates);
        previous = stop.coordinates;
    }

    // Closing leg back to the depot, when the route ends with one
    if let Some(depot) = stops[pending[pending.len() - 1] + 1..]
        .iter()
        .find(|s| s.kind == StopKind::Depot)
    {
        total += geo::haversine_distance(&previous, &depot.coordinates);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Coordinates, DriverStatus, ExperienceLevel, OrderPriority, OrderStatus, TimeWindow,
        VehicleKind, VehicleStatus,
    };
    use chrono::{NaiveDate, TimeZone};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 16).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, h, m, 0).unwrap()
    }

    fn moscow_depot() -> Coordinates {
        Coordinates { lat: 55.7558, lng: 37.6176 }
    }

    fn make_order(lat: f64, lng: f64, weight: f64) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_name: "Customer".to_string(),
            coordinates: Coordinates { lat, lng },
            delivery_date: date(),
            time_window: TimeWindow::new(at(9, 0), at(17, 0)),
            weight_kg: weight,
            volume_m3: 0.1,
            service_minutes: 15,
            priority: OrderPriority::Medium,
            status: OrderStatus::Pending,
            route_id: None,
            stop_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn make_vehicle(max_weight: f64) -> Vehicle {
        Vehicle {
            id: Uuid::new_v4(),
            license_plate: "B 042".to_string(),
            kind: VehicleKind::Van,
            max_weight_kg: max_weight,
            max_volume_m3: 10.0,
            depot: moscow_depot(),
            cost_per_km: 1.0,
            cost_per_hour: 10.0,
            has_gps: true,
            has_temp_control: false,
            has_lift_gate: false,
            max_working_minutes: 480,
            break_every_minutes: None,
            break_duration_minutes: None,
            status: VehicleStatus::Available,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn make_driver(max_stops: u32) -> Driver {
        Driver {
            id: Uuid::new_v4(),
            full_name: "Driver".to_string(),
            experience: ExperienceLevel::Experienced,
            max_stops_per_route: max_stops,
            shift_start: chrono::NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            shift_end: chrono::NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            can_handle_fragile: false,
            can_handle_high_value: false,
            status: DriverStatus::Available,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn build_problem(
        orders: &[Order],
        vehicles: &[Vehicle],
        drivers: &[Driver],
    ) -> (VrpProblem, Matrices) {
        let problem = VrpProblem::build(
            orders,
            vehicles,
            drivers,
            moscow_depot(),
            date(),
            8 * 60,
            20 * 60,
            30,
        )
        .unwrap();
        let locations = problem.locations();
        let n = locations.len();
        let mut distance_m = vec![vec![0u64; n]; n];
        let mut minutes = vec![vec![0i32; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let km = geo::road_distance(&locations[i], &locations[j]);
                    distance_m[i][j] = (km * 1000.0) as u64;
                    minutes[i][j] = ((km / 40.0) * 60.0).ceil() as i32;
                }
            }
        }
        (problem, Matrices { distance_m, minutes })
    }

    #[test]
    fn test_objective_weights_normalize() {
        let weights = ObjectiveWeights::new(6.0, 3.0, 1.0);
        assert!((weights.alpha - 0.6).abs() < 1e-9);
        assert!((weights.beta - 0.3).abs() < 1e-9);
        assert!((weights.gamma - 0.1).abs() < 1e-9);
        assert!((weights.alpha + weights.beta + weights.gamma - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_adaptation_term_grows_with_resolves() {
        let weights = ObjectiveWeights::default();
        assert_eq!(weights.adaptation_term(0), 0.0);
        assert!(weights.adaptation_term(5) > weights.adaptation_term(1));
    }

    #[test]
    fn test_single_order_single_vehicle_three_stops() {
        // B1: depot -> order -> depot
        let orders = vec![make_order(55.76, 37.62, 10.0)];
        let (problem, matrices) = build_problem(&orders, &[make_vehicle(100.0)], &[make_driver(10)]);

        let solution = VrptwSolver::default()
            .solve(&problem, &matrices, 0, None)
            .unwrap();

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].stops.len(), 3);
        assert_eq!(solution.routes[0].stops[0].kind, StopKind::Depot);
        assert_eq!(solution.routes[0].stops[1].kind, StopKind::Delivery);
        assert_eq!(solution.routes[0].stops[2].kind, StopKind::Depot);
        assert!(solution.objective_value > 0.0);
    }

    #[test]
    fn test_basic_plan_three_orders() {
        // End-to-end scenario 1
        let orders = vec![
            make_order(55.76, 37.62, 10.0),
            make_order(55.74, 37.60, 10.0),
            make_order(55.77, 37.63, 10.0),
        ];
        let (problem, matrices) = build_problem(&orders, &[make_vehicle(100.0)], &[make_driver(10)]);

        let solution = VrptwSolver::default()
            .solve(&problem, &matrices, 0, None)
            .unwrap();

        assert_eq!(solution.routes.len(), 1);
        let route = &solution.routes[0];
        assert_eq!(route.delivery_count(), 3);
        assert_eq!(route.stops.len(), 5); // depot + 3 + depot
        assert!((route.total_weight_kg - 30.0).abs() < 1e-9);
        assert!(solution.total_duration_minutes < 240);
        assert!(solution.objective_value > 0.0);
        assert!(solution.unassigned.is_empty());

        // Sequences are contiguous from zero
        for (idx, stop) in route.stops.iter().enumerate() {
            assert_eq!(stop.sequence, idx as u32);
        }
    }

    #[test]
    fn test_determinism_identical_inputs() {
        // R1: two solves over the same input produce the same sequences
        let orders = vec![
            make_order(55.76, 37.62, 10.0),
            make_order(55.74, 37.60, 10.0),
            make_order(55.77, 37.63, 10.0),
            make_order(55.73, 37.65, 10.0),
        ];
        let (problem, matrices) = build_problem(&orders, &[make_vehicle(100.0)], &[make_driver(10)]);

        let solver = VrptwSolver::default();
        let a = solver.solve(&problem, &matrices, 0, None).unwrap();
        let b = solver.solve(&problem, &matrices, 0, None).unwrap();

        let seq = |s: &RouteSolution| -> Vec<Vec<Option<Uuid>>> {
            s.routes
                .iter()
                .map(|r| r.stops.iter().map(|st| st.order_id).collect())
                .collect()
        };
        assert_eq!(seq(&a), seq(&b));
        assert_eq!(a.objective_value, b.objective_value);
    }

    #[test]
    fn test_capacity_split_across_two_vehicles() {
        // End-to-end scenario 2: four orders x 40 kg, two vehicles x 100 kg
        let orders = vec![
            make_order(55.76, 37.62, 40.0),
            make_order(55.74, 37.60, 40.0),
            make_order(55.77, 37.63, 40.0),
            make_order(55.73, 37.65, 40.0),
        ];
        let vehicles = vec![make_vehicle(100.0), make_vehicle(100.0)];
        let drivers = vec![make_driver(10), make_driver(10)];
        let (problem, matrices) = build_problem(&orders, &vehicles, &drivers);

        let solution = VrptwSolver::default()
            .solve(&problem, &matrices, 0, None)
            .unwrap();

        assert_eq!(solution.routes.len(), 2);
        for route in &solution.routes {
            assert_eq!(route.delivery_count(), 2);
            assert!(route.total_weight_kg <= 100.0);
        }
        assert_eq!(solution.orders_assigned(), 4);
    }

    #[test]
    fn test_window_infeasibility_diagnostics() {
        // End-to-end scenario 3: opposite corners of a ~60 km square with
        // identical half-hour windows, one vehicle
        let mut far_a = make_order(55.4, 37.2, 10.0);
        far_a.time_window = TimeWindow::new(at(9, 0), at(9, 30));
        let mut far_b = make_order(55.9, 38.0, 10.0);
        far_b.time_window = TimeWindow::new(at(9, 0), at(9, 30));

        let (problem, matrices) =
            build_problem(&[far_a, far_b], &[make_vehicle(100.0)], &[make_driver(10)]);

        let err = VrptwSolver::default()
            .solve(&problem, &matrices, 0, None)
            .unwrap_err();
        match err {
            SolveError::NoFeasibleSolution { diagnostics } => {
                assert!(!diagnostics.is_empty());
                assert!(diagnostics
                    .iter()
                    .all(|d| d.constraint == ConstraintKind::TimeWindow));
                assert!(diagnostics[0].message.contains("time_window"));
            }
            other => panic!("expected NoFeasibleSolution, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_mode_returns_unassigned_instead_of_error() {
        let mut far_a = make_order(55.4, 37.2, 10.0);
        far_a.time_window = TimeWindow::new(at(9, 0), at(9, 30));
        let mut far_b = make_order(55.9, 38.0, 10.0);
        far_b.time_window = TimeWindow::new(at(9, 0), at(9, 30));

        let (problem, matrices) =
            build_problem(&[far_a, far_b], &[make_vehicle(100.0)], &[make_driver(10)]);

        let solution = VrptwSolver::new(SolverConfig::emergency())
            .solve(&problem, &matrices, 0, None)
            .unwrap();
        assert_eq!(solution.orders_assigned(), 1);
        assert_eq!(solution.unassigned.len(), 1);
        assert!(solution.optimization_score < 100);
    }

    #[test]
    fn test_stop_limit_respected() {
        let orders: Vec<Order> = (0..4)
            .map(|i| make_order(55.75 + i as f64 * 0.01, 37.62, 5.0))
            .collect();
        // Driver may serve at most 2 stops; a second pair must go unserved
        let (problem, matrices) =
            build_problem(&orders, &[make_vehicle(100.0)], &[make_driver(2)]);

        let err = VrptwSolver::default()
            .solve(&problem, &matrices, 0, None)
            .unwrap_err();
        match err {
            SolveError::NoFeasibleSolution { diagnostics } => {
                assert_eq!(diagnostics.len(), 2);
                assert!(diagnostics
                    .iter()
                    .all(|d| d.constraint == ConstraintKind::StopLimit));
            }
            other => panic!("expected NoFeasibleSolution, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_budget_returns_cancelled() {
        let orders = vec![make_order(55.76, 37.62, 10.0)];
        let (problem, matrices) = build_problem(&orders, &[make_vehicle(100.0)], &[make_driver(10)]);

        let budget = SearchBudget::with_deadline(Instant::now() + Duration::from_secs(30));
        budget.cancel.cancel();

        let err = VrptwSolver::default()
            .solve(&problem, &matrices, 0, Some(budget))
            .unwrap_err();
        assert!(matches!(err, SolveError::Cancelled));
    }

    #[test]
    fn test_break_policy_materializes_break_stops() {
        let orders = vec![
            make_order(55.76, 37.62, 10.0),
            make_order(55.74, 37.60, 10.0),
            make_order(55.77, 37.63, 10.0),
        ];
        let mut vehicle = make_vehicle(100.0);
        vehicle.break_every_minutes = Some(30);
        vehicle.break_duration_minutes = Some(20);
        let (problem, matrices) = build_problem(&orders, &[vehicle], &[make_driver(10)]);

        let solution = VrptwSolver::default()
            .solve(&problem, &matrices, 0, None)
            .unwrap();

        let route = &solution.routes[0];
        let breaks: Vec<&PlannedStop> =
            route.stops.iter().filter(|s| s.kind == StopKind::Break).collect();
        assert!(!breaks.is_empty(), "break policy must schedule at least one break");

        for chain_break in &breaks {
            // Twenty minutes long, no travel of its own, taken right after
            // the preceding stop's departure
            assert_eq!(chain_break.departure_min - chain_break.arrival_min, 20);
            assert_eq!(chain_break.distance_from_previous_m, 0);
            assert!(chain_break.order_id.is_none());
            let previous = &route.stops[chain_break.sequence as usize - 1];
            assert_eq!(chain_break.arrival_min, previous.departure_min);
        }

        // Sequences stay contiguous with the breaks woven in
        for (idx, stop) in route.stops.iter().enumerate() {
            assert_eq!(stop.sequence, idx as u32);
        }
        assert_eq!(route.stops.last().unwrap().kind, StopKind::Depot);
        assert_eq!(route.delivery_count(), 3);
    }

    #[test]
    fn test_no_breaks_without_policy() {
        let orders = vec![make_order(55.76, 37.62, 10.0), make_order(55.74, 37.60, 10.0)];
        let (problem, matrices) = build_problem(&orders, &[make_vehicle(100.0)], &[make_driver(10)]);

        let solution = VrptwSolver::default()
            .solve(&problem, &matrices, 0, None)
            .unwrap();
        assert!(solution.routes[0]
            .stops
            .iter()
            .all(|s| s.kind != StopKind::Break));
    }

    // ------------------------------------------------------------------
    // Segment re-solve
    // ------------------------------------------------------------------

    fn running_route_stops(
        route_id: Uuid,
        orders: &[Order],
        completed: usize,
    ) -> Vec<RouteStop> {
        let mut stops = Vec::new();
        stops.push(RouteStop {
            id: Uuid::new_v4(),
            route_id,
            order_id: None,
            kind: StopKind::Depot,
            sequence: 0,
            coordinates: moscow_depot(),
            planned_arrival: at(8, 0),
            planned_departure: at(8, 0),
            actual_arrival: Some(at(8, 0)),
            actual_departure: Some(at(8, 0)),
            status: StopStatus::Completed,
            distance_from_previous_km: 0.0,
            travel_minutes_from_previous: 0,
        });
        for (i, order) in orders.iter().enumerate() {
            let sequence = (i + 1) as u32;
            let done = i < completed;
            stops.push(RouteStop {
                id: Uuid::new_v4(),
                route_id,
                order_id: Some(order.id),
                kind: StopKind::Delivery,
                sequence,
                coordinates: order.coordinates,
                planned_arrival: at(9, (10 * i) as u32),
                planned_departure: at(9, (10 * i + 5) as u32),
                actual_arrival: done.then(|| at(9, (10 * i) as u32)),
                actual_departure: done.then(|| at(9, (10 * i + 5) as u32)),
                status: if done { StopStatus::Completed } else { StopStatus::Pending },
                distance_from_previous_km: 2.0,
                travel_minutes_from_previous: 6,
            });
        }
        stops.push(RouteStop {
            id: Uuid::new_v4(),
            route_id,
            order_id: None,
            kind: StopKind::Depot,
            sequence: (orders.len() + 1) as u32,
            coordinates: moscow_depot(),
            planned_arrival: at(12, 0),
            planned_departure: at(12, 0),
            actual_arrival: None,
            actual_departure: None,
            status: StopStatus::Pending,
            distance_from_previous_km: 2.0,
            travel_minutes_from_previous: 6,
        });
        stops
    }

    #[test]
    fn test_segment_resolve_skips_short_tails() {
        let orders = vec![make_order(55.76, 37.62, 10.0), make_order(55.77, 37.63, 10.0)];
        let stops = running_route_stops(Uuid::new_v4(), &orders, 0);

        let improvement = VrptwSolver::default().reoptimize_segment(
            &stops,
            &orders,
            &make_vehicle(100.0),
            &make_driver(10),
            at(9, 0),
        );
        assert!(improvement.is_none());
    }

    #[test]
    fn test_segment_resolve_improves_tangled_tail() {
        // Pending tail visits near, far, middle; reordering saves distance
        let orders = vec![
            make_order(55.76, 37.62, 10.0),
            make_order(55.85, 37.75, 10.0),
            make_order(55.78, 37.66, 10.0),
        ];
        let stops = running_route_stops(Uuid::new_v4(), &orders, 0);

        let improvement = VrptwSolver::default()
            .reoptimize_segment(
                &stops,
                &orders,
                &make_vehicle(100.0),
                &make_driver(10),
                at(8, 30),
            )
            .expect("tangled tail must improve");

        assert!(improvement.improvement_km > 0.0);
        // Depot endpoints untouched
        assert_eq!(improvement.stops.first().unwrap().kind, StopKind::Depot);
        assert_eq!(improvement.stops.last().unwrap().kind, StopKind::Depot);
        // Same order set, sequences still contiguous slot-wise
        let mut before: Vec<Uuid> = stops.iter().filter_map(|s| s.order_id).collect();
        let mut after: Vec<Uuid> =
            improvement.stops.iter().filter_map(|s| s.order_id).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
        for (idx, stop) in improvement.stops.iter().enumerate() {
            assert_eq!(stop.sequence, idx as u32);
        }
    }

    #[test]
    fn test_segment_resolve_preserves_completed_prefix() {
        let orders = vec![
            make_order(55.76, 37.62, 10.0),
            make_order(55.85, 37.75, 10.0),
            make_order(55.78, 37.66, 10.0),
            make_order(55.80, 37.70, 10.0),
        ];
        let stops = running_route_stops(Uuid::new_v4(), &orders, 1);
        let completed_id = stops[1].order_id;

        if let Some(improvement) = VrptwSolver::default().reoptimize_segment(
            &stops,
            &orders,
            &make_vehicle(100.0),
            &make_driver(10),
            at(9, 30),
        ) {
            // The completed stop stays at position 1 with its own order
            assert_eq!(improvement.stops[1].order_id, completed_id);
            assert_eq!(improvement.stops[1].status, StopStatus::Completed);
            // Nothing in the new tail is scheduled before `now`
            for stop in improvement.stops.iter().filter(|s| s.status == StopStatus::Pending) {
                assert!(stop.planned_arrival >= at(9, 30));
            }
        }
    }

    #[test]
    fn test_segment_resolve_never_schedules_before_now() {
        let orders = vec![
            make_order(55.76, 37.62, 10.0),
            make_order(55.85, 37.75, 10.0),
            make_order(55.78, 37.66, 10.0),
        ];
        let stops = running_route_stops(Uuid::new_v4(), &orders, 0);
        let now = at(10, 45);

        if let Some(improvement) = VrptwSolver::default().reoptimize_segment(
            &stops,
            &orders,
            &make_vehicle(100.0),
            &make_driver(10),
            now,
        ) {
            for stop in improvement
                .stops
                .iter()
                .filter(|s| s.kind == StopKind::Delivery && s.status == StopStatus::Pending)
            {
                assert!(stop.planned_arrival >= now);
            }
        }
    }

    #[test]
    fn test_segment_resolve_keeps_pending_break() {
        // Tail layout: far delivery, a 45 min break, near and middle
        // deliveries. The 2-opt reorders the deliveries; the break must stay
        // at its slot with its full duration, re-timed to the new schedule.
        let route_id = Uuid::new_v4();
        let far = make_order(55.85, 37.75, 10.0);
        let near = make_order(55.77, 37.63, 10.0);
        let mid = make_order(55.80, 37.68, 10.0);
        let done = make_order(55.76, 37.62, 10.0);
        let orders = vec![far.clone(), near.clone(), mid.clone(), done.clone()];

        let delivery = |sequence: u32, order: &Order, done: bool| RouteStop {
            id: Uuid::new_v4(),
            route_id,
            order_id: Some(order.id),
            kind: StopKind::Delivery,
            sequence,
            coordinates: order.coordinates,
            planned_arrival: at(9, (sequence * 5) % 60),
            planned_departure: at(9, (sequence * 5 + 4) % 60),
            actual_arrival: done.then(|| at(9, (sequence * 5) % 60)),
            actual_departure: done.then(|| at(9, (sequence * 5 + 4) % 60)),
            status: if done { StopStatus::Completed } else { StopStatus::Pending },
            distance_from_previous_km: 2.0,
            travel_minutes_from_previous: 6,
        };
        let depot = |sequence: u32, done: bool| RouteStop {
            id: Uuid::new_v4(),
            route_id,
            order_id: None,
            kind: StopKind::Depot,
            sequence,
            coordinates: moscow_depot(),
            planned_arrival: at(8, 0),
            planned_departure: at(8, 0),
            actual_arrival: done.then(|| at(8, 0)),
            actual_departure: done.then(|| at(8, 0)),
            status: if done { StopStatus::Completed } else { StopStatus::Pending },
            distance_from_previous_km: 2.0,
            travel_minutes_from_previous: 6,
        };

        let mut break_stop = depot(3, false);
        break_stop.kind = StopKind::Break;
        break_stop.coordinates = far.coordinates;
        break_stop.planned_arrival = at(10, 30);
        break_stop.planned_departure = at(11, 15); // 45 minutes
        break_stop.distance_from_previous_km = 0.0;
        break_stop.travel_minutes_from_previous = 0;

        let stops = vec![
            depot(0, true),
            delivery(1, &done, true),
            delivery(2, &far, false),
            break_stop,
            delivery(4, &near, false),
            delivery(5, &mid, false),
            depot(6, false),
        ];

        let improvement = VrptwSolver::default()
            .reoptimize_segment(&stops, &orders, &make_vehicle(100.0), &make_driver(10), at(9, 30))
            .expect("tangled tail around the break must improve");

        let rebuilt = &improvement.stops[3];
        assert_eq!(rebuilt.kind, StopKind::Break);
        assert_eq!(rebuilt.sequence, 3);
        assert_eq!(
            (rebuilt.planned_departure - rebuilt.planned_arrival).num_minutes(),
            45
        );
        // The break rides along at the preceding departure, with no travel
        assert_eq!(rebuilt.planned_arrival, improvement.stops[2].planned_departure);
        assert_eq!(rebuilt.distance_from_previous_km, 0.0);

        // The delivery after the break starts no earlier than the break end
        assert!(improvement.stops[4].planned_arrival >= rebuilt.planned_departure);

        // Deliveries were actually reordered, break slot aside
        let tail_before: Vec<_> = [2usize, 4, 5].iter().map(|&i| stops[i].order_id).collect();
        let tail_after: Vec<_> =
            [2usize, 4, 5].iter().map(|&i| improvement.stops[i].order_id).collect();
        assert_ne!(tail_before, tail_after);
        for (idx, stop) in improvement.stops.iter().enumerate() {
            assert_eq!(stop.sequence, idx as u32);
        }
    }
}
