//! VRPTW search: construction and local improvement.
//!
//! Construction is nearest-feasible insertion from the depot (path-cheapest-
//! arc flavor); improvement runs 2-opt and Or-opt sweeps until the time
//! budget elapses or a full sweep finds nothing better. The search is fully
//! deterministic: nodes are scanned in ascending order and ties fall to the
//! lexicographically smaller chain.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::services::routing::TravelMatrices;
use super::problem::{VrpProblem, VrpVehicle};
use super::{ConstraintKind, ObjectiveWeights};

/// Integer matrices over problem nodes (0 = depot). Distances in meters,
/// times in whole minutes. Asymmetric throughout; symmetric inputs are just
/// a special case.
#[derive(Debug, Clone)]
pub struct Matrices {
    pub distance_m: Vec<Vec<u64>>,
    pub minutes: Vec<Vec<i32>>,
}

impl Matrices {
    /// Convert provider matrices. `use_traffic` selects in-traffic durations
    /// when the provider supplied them.
    pub fn from_travel(travel: &TravelMatrices, use_traffic: bool) -> Self {
        let durations = if use_traffic {
            &travel.traffic_durations
        } else {
            &travel.durations
        };
        Self {
            distance_m: travel.distances.clone(),
            minutes: durations
                .iter()
                .map(|row| row.iter().map(|s| s.div_ceil(60) as i32).collect())
                .collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.distance_m.len()
    }
}

/// Deadline plus cooperative cancellation for a single solve.
#[derive(Debug, Clone)]
pub struct SearchBudget {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl SearchBudget {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline, cancel: CancellationToken::new() }
    }

    pub fn exhausted(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A driver break placed inside a chain
#[derive(Debug, Clone)]
pub struct ChainBreak {
    /// Chain position the break follows (break is taken at that node's
    /// location, after service)
    pub after_position: usize,
    pub start_min: i32,
    pub duration_min: i32,
}

/// Timing of one simulated vehicle chain
#[derive(Debug, Clone)]
pub struct ChainSchedule {
    /// Arrival minute at each chain node
    pub arrivals: Vec<i32>,
    /// Departure minute from each chain node
    pub departures: Vec<i32>,
    /// Breaks inserted by the vehicle's break policy
    pub breaks: Vec<ChainBreak>,
    pub depot_departure_min: i32,
    pub depot_return_min: i32,
    pub waiting_minutes: i32,
    pub distance_m: u64,
}

impl ChainSchedule {
    pub fn route_minutes(&self) -> i32 {
        self.depot_return_min - self.depot_departure_min
    }
}

/// Walk a chain of order nodes and compute its schedule, or the constraint
/// it violates. `nodes` holds matrix indices (1-based order nodes).
///
/// When the vehicle carries a break policy, a break is taken at a node's
/// location once the accumulated on-duty time (travel, waiting, service)
/// reaches `break_every_minutes`; the break shifts everything after it and
/// counts toward the working-time ceiling.
pub fn simulate_chain(
    problem: &VrpProblem,
    matrices: &Matrices,
    vehicle: &VrpVehicle,
    nodes: &[usize],
) -> Result<ChainSchedule, ConstraintKind> {
    let depot_departure = vehicle.shift_start_min.max(problem.depot_open_min);
    let break_every = vehicle.break_every_minutes.filter(|m| *m > 0);
    let break_duration = vehicle.break_duration_minutes.unwrap_or(30).max(0);

    let mut arrivals = Vec::with_capacity(nodes.len());
    let mut departures = Vec::with_capacity(nodes.len());
    let mut breaks = Vec::new();
    let mut cursor = depot_departure;
    let mut previous = 0usize;
    let mut waiting = 0i32;
    let mut distance = 0u64;
    let mut since_break = 0i32;

    for (position, &node) in nodes.iter().enumerate() {
        let order = &problem.orders[node - 1];
        let mut arrival = cursor + matrices.minutes[previous][node];

        if arrival < order.tw_start_min {
            let wait = order.tw_start_min - arrival;
            if wait > problem.max_waiting_minutes {
                return Err(ConstraintKind::TimeWindow);
            }
            waiting += wait;
            arrival = order.tw_start_min;
        }
        if arrival > order.tw_end_min {
            return Err(ConstraintKind::TimeWindow);
        }

        distance += matrices.distance_m[previous][node];
        arrivals.push(arrival);
        let departure = arrival + order.service_minutes;
        departures.push(departure);
        since_break += departure - cursor;
        cursor = departure;
        previous = node;

        if let Some(every) = break_every {
            if since_break >= every {
                breaks.push(ChainBreak {
                    after_position: position,
                    start_min: cursor,
                    duration_min: break_duration,
                });
                cursor += break_duration;
                since_break = 0;
            }
        }
    }

    let depot_return = cursor + matrices.minutes[previous][0];
    distance += matrices.distance_m[previous][0];

    let schedule = ChainSchedule {
        arrivals,
        departures,
        breaks,
        depot_departure_min: depot_departure,
        depot_return_min: depot_return,
        waiting_minutes: waiting,
        distance_m: distance,
    };

    if schedule.route_minutes() > vehicle.max_working_minutes {
        return Err(ConstraintKind::WorkingTime);
    }
    if depot_return > vehicle.shift_end_min.min(problem.depot_close_min) {
        return Err(ConstraintKind::WorkingTime);
    }

    Ok(schedule)
}

fn chain_demand(problem: &VrpProblem, nodes: &[usize]) -> (f64, f64) {
    nodes.iter().fold((0.0, 0.0), |(w, v), &node| {
        let order = &problem.orders[node - 1];
        (w + order.weight_kg, v + order.volume_m3)
    })
}

/// Full feasibility check for a candidate chain on a vehicle.
pub fn chain_feasible(
    problem: &VrpProblem,
    matrices: &Matrices,
    vehicle: &VrpVehicle,
    nodes: &[usize],
) -> Result<ChainSchedule, ConstraintKind> {
    if nodes.len() as u32 > vehicle.max_stops {
        return Err(ConstraintKind::StopLimit);
    }
    let (weight, volume) = chain_demand(problem, nodes);
    if weight > vehicle.max_weight_kg || volume > vehicle.max_volume_m3 {
        return Err(ConstraintKind::Capacity);
    }
    simulate_chain(problem, matrices, vehicle, nodes)
}

/// Objective contribution of one chain (the adaptation term is added at the
/// solution level).
pub fn chain_cost(
    vehicle: &VrpVehicle,
    schedule: &ChainSchedule,
    weights: &ObjectiveWeights,
    base_cost: f64,
) -> f64 {
    let travel_cost = schedule.distance_m as f64 / 1000.0 * vehicle.cost_per_km;
    weights.alpha * (travel_cost / base_cost)
        + weights.beta * (schedule.waiting_minutes as f64 / (base_cost * 0.1))
}

/// Nearest-feasible insertion from the depot, one vehicle chain at a time.
/// Returns the chains and the order indices that could not be placed.
pub fn construct(
    problem: &VrpProblem,
    matrices: &Matrices,
) -> (Vec<Vec<usize>>, Vec<usize>) {
    let n = problem.orders.len();
    let mut assigned = vec![false; n];
    let mut chains = Vec::with_capacity(problem.vehicles.len());

    for vehicle in &problem.vehicles {
        let mut chain: Vec<usize> = Vec::new();
        loop {
            let last = *chain.last().unwrap_or(&0);
            let mut best: Option<(u64, usize)> = None;

            for order_idx in 0..n {
                if assigned[order_idx] {
                    continue;
                }
                let node = order_idx + 1;
                let arc = matrices.distance_m[last][node];
                if let Some((best_arc, _)) = best {
                    if arc >= best_arc {
                        continue;
                    }
                }
                let mut candidate = chain.clone();
                candidate.push(node);
                if chain_feasible(problem, matrices, vehicle, &candidate).is_ok() {
                    best = Some((arc, order_idx));
                }
            }

            match best {
                Some((_, order_idx)) => {
                    chain.push(order_idx + 1);
                    assigned[order_idx] = true;
                }
                None => break,
            }
        }
        chains.push(chain);
    }

    let unassigned = (0..n).filter(|&i| !assigned[i]).collect();
    (chains, unassigned)
}

/// Diagnose the constraint blocking an unplaced order: try it against every
/// vehicle, alone and inserted into the final chains, and report the most
/// specific obstacle seen.
pub fn diagnose_unassigned(
    problem: &VrpProblem,
    matrices: &Matrices,
    chains: &[Vec<usize>],
    order_idx: usize,
) -> ConstraintKind {
    let node = order_idx + 1;
    let mut seen: Vec<ConstraintKind> = Vec::new();

    for (vehicle, chain) in problem.vehicles.iter().zip(chains.iter()) {
        if let Some(kind) = problem.lone_order_constraint(order_idx, vehicle) {
            seen.push(kind);
        }
        if let Err(kind) = chain_feasible(problem, matrices, vehicle, &[node]) {
            seen.push(kind);
        }
        for position in 0..=chain.len() {
            let mut candidate = chain.clone();
            candidate.insert(position, node);
            if let Err(kind) = chain_feasible(problem, matrices, vehicle, &candidate) {
                seen.push(kind);
            }
        }
    }

    // Most specific obstacle wins
    for kind in [
        ConstraintKind::TimeWindow,
        ConstraintKind::WorkingTime,
        ConstraintKind::StopLimit,
        ConstraintKind::Capacity,
    ] {
        if seen.contains(&kind) {
            return kind;
        }
    }
    ConstraintKind::Unreachable
}

/// Accept `candidate` over `incumbent`? Lower cost wins; within epsilon the
/// lexicographically smaller chain wins, keeping output canonical.
fn better_chain(
    candidate_cost: f64,
    candidate: &[usize],
    incumbent_cost: f64,
    incumbent: &[usize],
) -> bool {
    const EPS: f64 = 1e-9;
    if candidate_cost < incumbent_cost - EPS {
        return true;
    }
    if (candidate_cost - incumbent_cost).abs() <= EPS {
        return candidate < incumbent;
    }
    false
}

/// Improve chains in place with 2-opt and Or-opt sweeps. Returns true when
/// the budget expired before convergence.
pub fn improve(
    problem: &VrpProblem,
    matrices: &Matrices,
    chains: &mut [Vec<usize>],
    weights: &ObjectiveWeights,
    base_cost: f64,
    budget: &SearchBudget,
) -> bool {
    loop {
        if budget.exhausted() {
            return true;
        }

        let mut improved = false;
        for (vehicle, chain) in problem.vehicles.iter().zip(chains.iter_mut()) {
            if chain.len() < 2 {
                continue;
            }
            improved |= sweep_two_opt(problem, matrices, vehicle, chain, weights, base_cost, budget);
            improved |= sweep_or_opt(problem, matrices, vehicle, chain, weights, base_cost, budget);
        }

        if !improved {
            return false;
        }
    }
}

fn current_cost(
    problem: &VrpProblem,
    matrices: &Matrices,
    vehicle: &VrpVehicle,
    chain: &[usize],
    weights: &ObjectiveWeights,
    base_cost: f64,
) -> f64 {
    let schedule = simulate_chain(problem, matrices, vehicle, chain)
        .expect("incumbent chain is feasible");
    chain_cost(vehicle, &schedule, weights, base_cost)
}

/// One first-improvement 2-opt sweep: reverse every segment [i..=j].
#[allow(clippy::too_many_arguments)]
fn sweep_two_opt(
    problem: &VrpProblem,
    matrices: &Matrices,
    vehicle: &VrpVehicle,
    chain: &mut Vec<usize>,
    weights: &ObjectiveWeights,
    base_cost: f64,
    budget: &SearchBudget,
) -> bool {
    let mut improved = false;
    let mut cost = current_cost(problem, matrices, vehicle, chain, weights, base_cost);

    let n = chain.len();
    for i in 0..n - 1 {
        if budget.exhausted() {
            return improved;
        }
        for j in i + 1..n {
            let mut candidate = chain.clone();
            candidate[i..=j].reverse();
            if let Ok(schedule) = chain_feasible(problem, matrices, vehicle, &candidate) {
                let candidate_cost = chain_cost(vehicle, &schedule, weights, base_cost);
                if better_chain(candidate_cost, &candidate, cost, chain) {
                    *chain = candidate;
                    cost = candidate_cost;
                    improved = true;
                }
            }
        }
    }
    improved
}

/// One first-improvement Or-opt sweep: relocate segments of length 1..=3.
#[allow(clippy::too_many_arguments)]
fn sweep_or_opt(
    problem: &VrpProblem,
    matrices: &Matrices,
    vehicle: &VrpVehicle,
    chain: &mut Vec<usize>,
    weights: &ObjectiveWeights,
    base_cost: f64,
    budget: &SearchBudget,
) -> bool {
    let mut improved = false;
    let mut cost = current_cost(problem, matrices, vehicle, chain, weights, base_cost);

    for segment_len in 1..=3usize {
        let n = chain.len();
        if n <= segment_len {
            continue;
        }
        for from in 0..=n - segment_len {
            if budget.exhausted() {
                return improved;
            }
            for to in 0..=n - segment_len {
                if to == from {
                    continue;
                }
                let mut candidate = chain.clone();
                let segment: Vec<usize> = candidate.drain(from..from + segment_len).collect();
                candidate.splice(to..to, segment);
                if candidate == *chain {
                    continue;
                }
                if let Ok(schedule) = chain_feasible(problem, matrices, vehicle, &candidate) {
                    let candidate_cost = chain_cost(vehicle, &schedule, weights, base_cost);
                    if better_chain(candidate_cost, &candidate, cost, chain) {
                        *chain = candidate;
                        cost = candidate_cost;
                        improved = true;
                    }
                }
            }
        }
    }
    improved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, OrderPriority};
    use chrono::NaiveDate;
    use std::time::Duration;
    use uuid::Uuid;

    fn far_future_budget() -> SearchBudget {
        SearchBudget::with_deadline(Instant::now() + Duration::from_secs(60))
    }

    fn make_problem(windows: Vec<(i32, i32)>, vehicle_count: usize) -> VrpProblem {
        let orders = windows
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| super::super::problem::VrpOrder {
                id: Uuid::new_v4(),
                coordinates: Coordinates { lat: 55.7 + i as f64 * 0.01, lng: 37.6 },
                tw_start_min: start,
                tw_end_min: end,
                weight_kg: 10.0,
                volume_m3: 0.1,
                service_minutes: 15,
                priority: OrderPriority::Medium,
            })
            .collect();
        let vehicles = (0..vehicle_count)
            .map(|_| VrpVehicle {
                vehicle_id: Uuid::new_v4(),
                driver_id: Uuid::new_v4(),
                kind: crate::types::VehicleKind::Van,
                max_weight_kg: 100.0,
                max_volume_m3: 10.0,
                max_stops: 10,
                max_working_minutes: 600,
                break_every_minutes: None,
                break_duration_minutes: None,
                cost_per_km: 1.0,
                shift_start_min: 8 * 60,
                shift_end_min: 20 * 60,
            })
            .collect();
        VrpProblem {
            depot: Coordinates { lat: 55.75, lng: 37.61 },
            planned_date: NaiveDate::from_ymd_opt(2026, 3, 16).unwrap(),
            orders,
            vehicles,
            depot_open_min: 8 * 60,
            depot_close_min: 20 * 60,
            max_waiting_minutes: 30,
        }
    }

    /// Uniform matrix: every distinct pair is `minutes` apart / `meters` long.
    fn uniform_matrices(size: usize, meters: u64, minutes: i32) -> Matrices {
        let mut distance_m = vec![vec![0u64; size]; size];
        let mut mins = vec![vec![0i32; size]; size];
        for i in 0..size {
            for j in 0..size {
                if i != j {
                    distance_m[i][j] = meters;
                    mins[i][j] = minutes;
                }
            }
        }
        Matrices { distance_m, minutes: mins }
    }

    #[test]
    fn test_from_travel_picks_traffic_durations() {
        let travel = TravelMatrices {
            distances: vec![vec![0, 1000], vec![1000, 0]],
            durations: vec![vec![0, 120], vec![120, 0]],
            traffic_durations: vec![vec![0, 300], vec![300, 0]],
            size: 2,
        };
        let free = Matrices::from_travel(&travel, false);
        let jam = Matrices::from_travel(&travel, true);
        assert_eq!(free.minutes[0][1], 2);
        assert_eq!(jam.minutes[0][1], 5);
    }

    #[test]
    fn test_simulate_chain_respects_windows() {
        // One order, window 09:00-10:00, 30 min travel, shift from 08:00
        let problem = make_problem(vec![(9 * 60, 10 * 60)], 1);
        let matrices = uniform_matrices(2, 10_000, 30);

        let schedule =
            simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1]).unwrap();
        // Depart 08:00, arrive 08:30, wait 30 to window open
        assert_eq!(schedule.arrivals[0], 9 * 60);
        assert_eq!(schedule.waiting_minutes, 30);
        assert_eq!(schedule.departures[0], 9 * 60 + 15);
        assert_eq!(schedule.depot_return_min, 9 * 60 + 45);
    }

    #[test]
    fn test_simulate_chain_excess_wait_is_window_violation() {
        // Window opens at 10:00 but travel only takes 30 min from 08:00:
        // 90 min of waiting exceeds the 30 min slack cap
        let problem = make_problem(vec![(10 * 60, 11 * 60)], 1);
        let matrices = uniform_matrices(2, 10_000, 30);
        let err = simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1]).unwrap_err();
        assert_eq!(err, ConstraintKind::TimeWindow);
    }

    #[test]
    fn test_simulate_chain_late_arrival_is_window_violation() {
        // Window closes 08:45 but travel takes 60 min
        let problem = make_problem(vec![(8 * 60, 8 * 60 + 45)], 1);
        let matrices = uniform_matrices(2, 40_000, 60);
        let err = simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1]).unwrap_err();
        assert_eq!(err, ConstraintKind::TimeWindow);
    }

    #[test]
    fn test_simulate_chain_working_time_ceiling() {
        let mut problem = make_problem(vec![(8 * 60, 19 * 60)], 1);
        problem.vehicles[0].max_working_minutes = 100;
        // 60 min out + 15 service + 60 back = 135 > 100
        let matrices = uniform_matrices(2, 40_000, 60);
        let err = simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1]).unwrap_err();
        assert_eq!(err, ConstraintKind::WorkingTime);
    }

    #[test]
    fn test_simulate_chain_without_policy_takes_no_breaks() {
        let problem = make_problem(vec![(8 * 60, 18 * 60), (8 * 60, 18 * 60)], 1);
        let matrices = uniform_matrices(3, 10_000, 30);
        let schedule =
            simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1, 2]).unwrap();
        assert!(schedule.breaks.is_empty());
    }

    #[test]
    fn test_simulate_chain_inserts_break_and_shifts_tail() {
        // 30 min travel + 15 min service = 45 on-duty minutes per stop;
        // a break is due every 40 minutes, so one lands after each node
        let mut problem = make_problem(vec![(8 * 60, 18 * 60), (8 * 60, 18 * 60)], 1);
        problem.vehicles[0].break_every_minutes = Some(40);
        problem.vehicles[0].break_duration_minutes = Some(20);
        let matrices = uniform_matrices(3, 10_000, 30);

        let schedule =
            simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1, 2]).unwrap();

        assert_eq!(schedule.breaks.len(), 2);
        let first = &schedule.breaks[0];
        assert_eq!(first.after_position, 0);
        assert_eq!(first.start_min, schedule.departures[0]);
        assert_eq!(first.duration_min, 20);

        // Node 2 is reached only after the break: 08:45 service end + 20
        // break + 30 travel = 09:35
        assert_eq!(schedule.arrivals[1], schedule.departures[0] + 20 + 30);
        // Both breaks extend the tour end
        assert_eq!(
            schedule.depot_return_min,
            schedule.departures[1] + 20 + 30
        );
    }

    #[test]
    fn test_break_can_make_window_infeasible() {
        // Without the break node 2 is reached at 09:15, inside its window;
        // the mandated 30 min break pushes arrival to 09:45, past the close
        let mut problem = make_problem(
            vec![(8 * 60, 18 * 60), (8 * 60, 9 * 60 + 30)],
            1,
        );
        let matrices = uniform_matrices(3, 10_000, 30);
        assert!(simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1, 2]).is_ok());

        problem.vehicles[0].break_every_minutes = Some(40);
        problem.vehicles[0].break_duration_minutes = Some(30);
        assert_eq!(
            simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1, 2]).unwrap_err(),
            ConstraintKind::TimeWindow
        );
    }

    #[test]
    fn test_break_counts_toward_working_time() {
        let mut problem = make_problem(vec![(8 * 60, 18 * 60), (8 * 60, 18 * 60)], 1);
        let matrices = uniform_matrices(3, 10_000, 30);
        // 3 x 30 travel + 2 x 15 service = 120 min without breaks
        problem.vehicles[0].max_working_minutes = 130;
        assert!(simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1, 2]).is_ok());

        // Two 20 min breaks push the tour to 160 min, over the ceiling
        problem.vehicles[0].break_every_minutes = Some(40);
        problem.vehicles[0].break_duration_minutes = Some(20);
        assert_eq!(
            simulate_chain(&problem, &matrices, &problem.vehicles[0], &[1, 2]).unwrap_err(),
            ConstraintKind::WorkingTime
        );
    }

    #[test]
    fn test_chain_feasible_checks_capacity_and_stops() {
        let mut problem = make_problem(vec![(8 * 60, 18 * 60), (8 * 60, 18 * 60)], 1);
        let matrices = uniform_matrices(3, 1_000, 5);

        problem.vehicles[0].max_weight_kg = 15.0; // two 10 kg orders exceed it
        assert_eq!(
            chain_feasible(&problem, &matrices, &problem.vehicles[0], &[1, 2]).unwrap_err(),
            ConstraintKind::Capacity
        );

        problem.vehicles[0].max_weight_kg = 100.0;
        problem.vehicles[0].max_stops = 1;
        assert_eq!(
            chain_feasible(&problem, &matrices, &problem.vehicles[0], &[1, 2]).unwrap_err(),
            ConstraintKind::StopLimit
        );
    }

    #[test]
    fn test_construct_assigns_all_when_feasible() {
        let problem = make_problem(
            vec![(8 * 60, 18 * 60), (8 * 60, 18 * 60), (8 * 60, 18 * 60)],
            1,
        );
        let matrices = uniform_matrices(4, 2_000, 8);

        let (chains, unassigned) = construct(&problem, &matrices);
        assert!(unassigned.is_empty());
        assert_eq!(chains[0].len(), 3);
    }

    #[test]
    fn test_construct_nearest_first() {
        let problem = make_problem(vec![(8 * 60, 18 * 60), (8 * 60, 18 * 60)], 1);
        // Node 2 is closer to the depot than node 1
        let mut matrices = uniform_matrices(3, 20_000, 10);
        matrices.distance_m[0][2] = 5_000;
        matrices.distance_m[2][0] = 5_000;

        let (chains, _) = construct(&problem, &matrices);
        assert_eq!(chains[0], vec![2, 1]);
    }

    #[test]
    fn test_construct_splits_conflicting_windows_across_vehicles() {
        // Overlapping tight windows 40 travel-minutes apart; one vehicle
        // cannot serve both, two can
        let problem = make_problem(
            vec![(9 * 60, 9 * 60 + 30), (9 * 60 + 5, 9 * 60 + 35)],
            2,
        );
        let matrices = uniform_matrices(3, 25_000, 40);

        let (chains, unassigned) = construct(&problem, &matrices);
        assert!(unassigned.is_empty());
        assert_eq!(chains[0].len(), 1);
        assert_eq!(chains[1].len(), 1);
    }

    #[test]
    fn test_construct_reports_unassigned_with_one_vehicle() {
        let problem = make_problem(
            vec![(9 * 60, 9 * 60 + 30), (9 * 60, 9 * 60 + 30)],
            1,
        );
        // 60 km apart: serving both inside the same half-hour is impossible
        let matrices = uniform_matrices(3, 60_000, 90);

        let (chains, unassigned) = construct(&problem, &matrices);
        assert_eq!(unassigned.len(), 1);
        assert_eq!(
            diagnose_unassigned(&problem, &matrices, &chains, unassigned[0]),
            ConstraintKind::TimeWindow
        );
    }

    #[test]
    fn test_improve_two_opt_untangles_route() {
        let problem = make_problem(
            vec![(8 * 60, 20 * 60), (8 * 60, 20 * 60), (8 * 60, 20 * 60)],
            1,
        );
        // Line: depot(0) - 1 - 2 - 3, distances proportional to index gap
        let size = 4;
        let mut distance_m = vec![vec![0u64; size]; size];
        let mut minutes = vec![vec![0i32; size]; size];
        for i in 0..size {
            for j in 0..size {
                if i != j {
                    let gap = (i as i64 - j as i64).unsigned_abs();
                    distance_m[i][j] = gap * 5_000;
                    minutes[i][j] = gap as i32 * 5;
                }
            }
        }
        let matrices = Matrices { distance_m, minutes };

        let mut chains = vec![vec![2, 1, 3]]; // tangled: 0-2-1-3-0 = 10+5+10+15 km
        let weights = ObjectiveWeights::default();
        let timed_out = improve(
            &problem,
            &matrices,
            &mut chains,
            &weights,
            1000.0,
            &far_future_budget(),
        );

        assert!(!timed_out);
        assert_eq!(chains[0], vec![1, 2, 3]); // untangled: 5+5+5+15 km
    }

    #[test]
    fn test_improve_respects_cancellation() {
        let problem = make_problem(vec![(8 * 60, 20 * 60), (8 * 60, 20 * 60)], 1);
        let matrices = uniform_matrices(3, 2_000, 5);
        let budget = far_future_budget();
        budget.cancel.cancel();

        let mut chains = vec![vec![2, 1]];
        let timed_out = improve(
            &problem,
            &matrices,
            &mut chains,
            &ObjectiveWeights::default(),
            1000.0,
            &budget,
        );
        assert!(timed_out);
        assert_eq!(chains[0], vec![2, 1]); // untouched
    }

    #[test]
    fn test_improve_is_deterministic() {
        let problem = make_problem(
            vec![
                (8 * 60, 20 * 60),
                (8 * 60, 20 * 60),
                (8 * 60, 20 * 60),
                (8 * 60, 20 * 60),
            ],
            1,
        );
        let mut matrices = uniform_matrices(5, 10_000, 10);
        // Perturb asymmetrically so there is a nontrivial optimum
        matrices.distance_m[1][3] = 2_000;
        matrices.distance_m[3][4] = 2_500;

        let run = || {
            let mut chains = vec![vec![4, 2, 3, 1]];
            improve(
                &problem,
                &matrices,
                &mut chains,
                &ObjectiveWeights::default(),
                1000.0,
                &far_future_budget(),
            );
            chains
        };
        assert_eq!(run(), run());
    }
}
