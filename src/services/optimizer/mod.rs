//! Adaptive optimizer.
//!
//! Watches active routes, evaluates disruption triggers each cycle (and on
//! every disruption event from the bus), picks a local/global/emergency
//! strategy, and commits re-solves through the store's atomic commit. All
//! failures become events; nothing propagates to the caller. Successive
//! re-solves of one route are spaced by a cooldown, and an in-flight solve is
//! cancelled when a higher-severity trigger arrives for the same route.

mod triggers;

pub use triggers::{
    evaluate_triggers, max_severity, select_strategy, Strategy, Trigger, TriggerContext,
    TriggerKind, TriggerThresholds,
};

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::services::bus::{EventBus, EventFilter};
use crate::services::cancellation::{SolveGuard, SolveRegistry};
use crate::services::matrix_cache::MatrixCache;
use crate::services::planning::materialize_route;
use crate::services::routing::RoutingProvider;
use crate::services::simulator::TrafficView;
use crate::services::vrp::{
    Matrices, SearchBudget, SolverConfig, VrpProblem, VrptwSolver,
};
use crate::store::{ReoptimizationCommit, RouteRecord, RouteStore};
use crate::types::{
    route_waiting_minutes, Driver, Event, EventKind, EventSeverity, Order, RouteDiff,
    RouteStatus, StopKind, StopStatus, Vehicle,
};

/// Optimizer tunables
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub monitor_interval: Duration,
    pub cooldown_minutes: i64,
    pub delay_threshold_min: f64,
    pub traffic_threshold: f64,
    /// Minimum fractional objective improvement a global re-solve must show
    pub global_improvement_margin: f64,
    /// How many nearby routes a global re-solve may pull in
    pub nearby_route_limit: usize,
    /// Alternative vehicles/drivers an emergency may claim
    pub emergency_resource_limit: usize,
    pub emergency_time_limit: Duration,
    /// A route stuck in `reoptimizing` longer than this is forced back
    pub stuck_reoptimizing_minutes: i64,
    pub depot_open_min: i32,
    pub depot_close_min: i32,
    pub max_waiting_minutes: i32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(60),
            cooldown_minutes: 30,
            delay_threshold_min: 15.0,
            traffic_threshold: 1.5,
            global_improvement_margin: 0.01,
            nearby_route_limit: 2,
            emergency_resource_limit: 3,
            emergency_time_limit: Duration::from_secs(30),
            stuck_reoptimizing_minutes: 10,
            depot_open_min: crate::defaults::DEPOT_OPEN_MINUTES,
            depot_close_min: crate::defaults::DEPOT_CLOSE_MINUTES,
            max_waiting_minutes: crate::defaults::MAX_WAITING_MINUTES,
        }
    }
}

/// Counters exposed for observability. `cooldown_skipped` is a metric only,
/// never an event.
#[derive(Default)]
pub struct OptimizerMetrics {
    pub cycles: AtomicU64,
    pub cooldown_skipped: AtomicU64,
    pub local_commits: AtomicU64,
    pub global_commits: AtomicU64,
    pub global_rejected: AtomicU64,
    pub emergency_runs: AtomicU64,
    pub failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub cooldown_skipped: u64,
    pub local_commits: u64,
    pub global_commits: u64,
    pub global_rejected: u64,
    pub emergency_runs: u64,
    pub failures: u64,
}

impl OptimizerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            cooldown_skipped: self.cooldown_skipped.load(Ordering::Relaxed),
            local_commits: self.local_commits.load(Ordering::Relaxed),
            global_commits: self.global_commits.load(Ordering::Relaxed),
            global_rejected: self.global_rejected.load(Ordering::Relaxed),
            emergency_runs: self.emergency_runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

enum Outcome {
    Committed,
    Rejected,
    NoChange,
}

/// The adaptive optimizer
pub struct AdaptiveOptimizer {
    store: Arc<dyn RouteStore>,
    bus: EventBus,
    solver: Arc<VrptwSolver>,
    provider: Arc<dyn RoutingProvider>,
    cache: Arc<MatrixCache>,
    traffic: Arc<dyn TrafficView>,
    registry: SolveRegistry,
    cooldowns: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    config: OptimizerConfig,
    pub metrics: OptimizerMetrics,
}

impl AdaptiveOptimizer {
    pub fn new(
        store: Arc<dyn RouteStore>,
        bus: EventBus,
        solver: Arc<VrptwSolver>,
        provider: Arc<dyn RoutingProvider>,
        cache: Arc<MatrixCache>,
        traffic: Arc<dyn TrafficView>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            solver,
            provider,
            cache,
            traffic,
            registry: SolveRegistry::default(),
            cooldowns: Mutex::new(HashMap::new()),
            config,
            metrics: OptimizerMetrics::default(),
        }
    }

    /// Monitor loop: a cycle per interval tick, plus one whenever a
    /// disruption event lands on the bus. Cancellable.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Adaptive monitoring started (interval {:?}, cooldown {} min)",
            self.config.monitor_interval, self.config.cooldown_minutes
        );
        let subscription = self.bus.subscribe(EventFilter::for_kinds([
            EventKind::TrafficDelay,
            EventKind::VehicleBreakdown,
            EventKind::DriverUnavailable,
            EventKind::NewUrgentOrder,
            EventKind::CustomerReschedule,
            EventKind::Weather,
            EventKind::RoadClosure,
        ]));
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.cycle(Utc::now()).await,
                event = subscription.recv() => {
                    if event.is_active() {
                        debug!("Disruption event {} wakes the monitor", event.kind.as_str());
                        self.cycle(Utc::now()).await;
                    }
                }
            }
        }
        info!("Adaptive monitoring stopped");
    }

    /// One monitoring pass over all active routes.
    pub async fn cycle(&self, now: DateTime<Utc>) {
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        let records = match self.store.active_routes().await {
            Ok(records) => records,
            Err(e) => {
                error!("Monitor cycle could not list active routes: {}", e);
                return;
            }
        };

        for record in records {
            if record.route.status == RouteStatus::Reoptimizing {
                self.recover_if_stuck(&record, now).await;
                continue;
            }
            if !record.route.status.is_monitorable() {
                continue;
            }
            if self.in_cooldown(&record, now) {
                self.metrics.cooldown_skipped.fetch_add(1, Ordering::Relaxed);
                trace!("Route {} inside cooldown, skipped", record.route.id);
                continue;
            }

            let Ok(vehicle) = self.store.vehicle(record.route.vehicle_id).await else {
                warn!("Route {} references a missing vehicle", record.route.id);
                continue;
            };
            let Ok(driver) = self.store.driver(record.route.driver_id).await else {
                warn!("Route {} references a missing driver", record.route.id);
                continue;
            };
            let route_orders = self.route_orders(&record).await;
            let urgent = self
                .store
                .unassigned_urgent_orders(record.route.planned_date)
                .await
                .unwrap_or_default();

            let fired = {
                let ctx = TriggerContext {
                    record: &record,
                    vehicle: &vehicle,
                    driver: &driver,
                    route_orders: &route_orders,
                    urgent_orders: &urgent,
                    traffic: self.traffic.as_ref(),
                };
                evaluate_triggers(
                    &ctx,
                    &TriggerThresholds {
                        delay_threshold_min: self.config.delay_threshold_min,
                        traffic_threshold: self.config.traffic_threshold,
                    },
                    now,
                )
            };
            if fired.is_empty() {
                continue;
            }

            self.handle_triggers(&record, &vehicle, &driver, &route_orders, fired, now)
                .await;
        }
    }

    /// Manual trigger from the external surface. Bypasses the cooldown.
    pub async fn reoptimize_manual(
        &self,
        route_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), crate::error::DispatchError> {
        let record = self.store.route(route_id).await?;
        let vehicle = self.store.vehicle(record.route.vehicle_id).await?;
        let driver = self.store.driver(record.route.driver_id).await?;
        let route_orders = self.route_orders(&record).await;

        self.handle_triggers(
            &record,
            &vehicle,
            &driver,
            &route_orders,
            vec![Trigger::manual(reason)],
            now,
        )
        .await;
        Ok(())
    }

    async fn handle_triggers(
        &self,
        record: &RouteRecord,
        vehicle: &Vehicle,
        driver: &Driver,
        route_orders: &[Order],
        fired: Vec<Trigger>,
        now: DateTime<Utc>,
    ) {
        let route_id = record.route.id;
        let severity = max_severity(&fired);
        let strategy = select_strategy(&fired);
        info!(
            "Route {}: {} triggers, strategy {:?}, severity {:.2}",
            route_id,
            fired.len(),
            strategy,
            severity
        );

        self.publish_event(self.triggered_event(record, &fired, strategy)).await;

        // A running lower-severity solve for this route gets cancelled here;
        // an equal-or-higher one means we back off until the next cycle.
        let Some(guard) = self.registry.begin(route_id, severity) else {
            debug!("Route {} already re-solving at equal or higher severity", route_id);
            return;
        };

        let outcome = match strategy {
            Strategy::Local => self.run_local(record, route_orders, vehicle, driver, &fired, now).await,
            Strategy::Global => self.run_global(record, &fired, now, &guard).await,
            Strategy::Emergency => self.run_emergency(record, &fired, &guard).await,
        };

        match outcome {
            Ok(Outcome::Committed) | Ok(Outcome::Rejected) => {
                self.touch_cooldown(route_id, now);
            }
            Ok(Outcome::NoChange) => {}
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Re-solve of route {} failed: {}", route_id, e);
                let event = Event::new(
                    EventKind::ReoptimizationFailed,
                    EventSeverity::High,
                    format!("Reoptimization of route {} failed", route_id),
                )
                .with_route(route_id)
                .with_description(e.to_string());
                self.publish_event(event).await;
            }
        }
    }

    // -- strategies ---------------------------------------------------------

    async fn run_local(
        &self,
        record: &RouteRecord,
        route_orders: &[Order],
        vehicle: &Vehicle,
        driver: &Driver,
        fired: &[Trigger],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Outcome> {
        let Some(improvement) =
            self.solver
                .reoptimize_segment(&record.stops, route_orders, vehicle, driver, now)
        else {
            debug!("Route {}: no local improvement found", record.route.id);
            return Ok(Outcome::NoChange);
        };

        let total_distance_km: f64 = improvement
            .stops
            .iter()
            .map(|s| s.distance_from_previous_km)
            .sum();
        let total_duration_minutes = route_span_minutes(&improvement.stops);
        let diff = RouteDiff::between(&record.stops, &improvement.stops);

        let event = Event::new(
            EventKind::ReoptimizationCompleted,
            EventSeverity::Medium,
            format!(
                "Route {} locally reoptimized ({:.1} km saved)",
                record.route.id, improvement.improvement_km
            ),
        )
        .with_route(record.route.id)
        .with_payload(serde_json::json!({
            "strategy": "local",
            "improvementKm": improvement.improvement_km,
            "diff": diff,
            "triggers": fired,
        }));

        let total_waiting_minutes = route_waiting_minutes(&improvement.stops);
        let committed = self
            .store
            .commit_reoptimization(ReoptimizationCommit {
                route_id: record.route.id,
                expected_version: record.route.version,
                stops: improvement.stops,
                total_distance_km,
                total_duration_minutes,
                total_waiting_minutes,
                optimization_score: record.route.optimization_score,
                status: record.route.status,
                event: event.clone(),
            })
            .await?;

        self.bus.publish(event);
        self.metrics.local_commits.fetch_add(1, Ordering::Relaxed);
        info!(
            "Route {} committed local re-solve #{}",
            record.route.id, committed.route.reoptimization_count
        );
        Ok(Outcome::Committed)
    }

    async fn run_global(
        &self,
        record: &RouteRecord,
        fired: &[Trigger],
        now: DateTime<Utc>,
        guard: &SolveGuard,
    ) -> anyhow::Result<Outcome> {
        let route_id = record.route.id;

        // The affected route plus up to N nearby active routes for the day
        let mut involved = vec![record.clone()];
        let all_active = self.store.active_routes().await?;
        involved.extend(
            all_active
                .into_iter()
                .filter(|r| {
                    r.route.id != route_id
                        && r.route.planned_date == record.route.planned_date
                        && r.route.status.is_monitorable()
                })
                .take(self.config.nearby_route_limit),
        );

        // Union of remaining orders plus trigger-derived ones
        let mut order_ids = BTreeSet::new();
        for rec in &involved {
            let prefix_len = prefix_len(rec);
            for stop in rec.stops.iter().skip(prefix_len) {
                if stop.status == StopStatus::Pending {
                    if let Some(order_id) = stop.order_id {
                        order_ids.insert(order_id);
                    }
                }
            }
        }
        for trigger in fired {
            order_ids.extend(trigger.order_ids.iter().copied());
        }
        if order_ids.is_empty() {
            return Ok(Outcome::NoChange);
        }

        let mut orders = Vec::with_capacity(order_ids.len());
        for id in &order_ids {
            match self.store.order(*id).await {
                Ok(order) => orders.push(order),
                Err(e) => warn!("Global re-solve skips order {}: {}", id, e),
            }
        }

        let mut vehicles = Vec::with_capacity(involved.len());
        let mut drivers = Vec::with_capacity(involved.len());
        for rec in &involved {
            vehicles.push(self.store.vehicle(rec.route.vehicle_id).await?);
            drivers.push(self.store.driver(rec.route.driver_id).await?);
        }

        let depot = record.stops[0].coordinates;
        let problem = VrpProblem::build(
            &orders,
            &vehicles,
            &drivers,
            depot,
            record.route.planned_date,
            self.config.depot_open_min,
            self.config.depot_close_min,
            self.config.max_waiting_minutes,
        )?;
        let matrices = self.matrices_for(&problem, &vehicles[0]).await?;

        let adaptations = involved
            .iter()
            .map(|r| r.route.reoptimization_count)
            .max()
            .unwrap_or(0)
            + 1;
        let budget = SearchBudget {
            deadline: std::time::Instant::now() + self.solver.config().time_limit,
            cancel: guard.token.clone(),
        };
        let solution = self.solver.solve(&problem, &matrices, adaptations, Some(budget))?;

        // Commit gate: the new aggregate objective must beat the old one by
        // the configured margin. The old side is rebuilt the same way the
        // solver scores a solution: α·travel + β·waiting per route, plus the
        // γ adaptation term, reading the waiting total persisted with each
        // plan.
        let weights = self.solver.config().weights;
        let base = self.solver.config().base_cost;
        let old_objective: f64 = involved
            .iter()
            .zip(vehicles.iter())
            .map(|(r, v)| {
                let travel_cost = r.route.total_distance_km * v.cost_per_km;
                weights.alpha * (travel_cost / base)
                    + weights.beta * (r.route.total_waiting_minutes as f64 / (base * 0.1))
            })
            .sum::<f64>()
            + weights.adaptation_term(adaptations - 1);

        if solution.objective_value > old_objective * (1.0 - self.config.global_improvement_margin)
        {
            self.metrics.global_rejected.fetch_add(1, Ordering::Relaxed);
            let event = Event::new(
                EventKind::ReoptimizationRejected,
                EventSeverity::Low,
                format!("Global re-solve of route {} rejected", route_id),
            )
            .with_route(route_id)
            .with_payload(serde_json::json!({
                "strategy": "global",
                "oldObjective": old_objective,
                "newObjective": solution.objective_value,
                "margin": self.config.global_improvement_margin,
            }));
            self.publish_event(event).await;
            return Ok(Outcome::Rejected);
        }

        // Per-route atomic commits; each route gets its vehicle's new tour
        let midnight = problem.midnight();
        for rec in &involved {
            let prefix_len = prefix_len(rec);
            let mut stops = rec.stops[..prefix_len].to_vec();

            match solution
                .routes
                .iter()
                .find(|r| r.vehicle_id == rec.route.vehicle_id)
            {
                Some(planned) => {
                    for planned_stop in planned.stops.iter().skip(1) {
                        stops.push(crate::types::RouteStop {
                            id: Uuid::new_v4(),
                            route_id: rec.route.id,
                            order_id: planned_stop.order_id,
                            kind: planned_stop.kind,
                            sequence: stops.len() as u32,
                            coordinates: planned_stop.coordinates,
                            planned_arrival: midnight
                                + chrono::Duration::minutes(planned_stop.arrival_min as i64),
                            planned_departure: midnight
                                + chrono::Duration::minutes(planned_stop.departure_min as i64),
                            actual_arrival: None,
                            actual_departure: None,
                            status: StopStatus::Pending,
                            distance_from_previous_km: planned_stop.distance_from_previous_m
                                as f64
                                / 1000.0,
                            travel_minutes_from_previous: planned_stop.travel_minutes_from_previous,
                        });
                    }
                }
                None => {
                    // All of this route's pending work moved elsewhere; close
                    // the tour with its depot stop.
                    if let Some(depot_stop) =
                        rec.stops.iter().rev().find(|s| s.kind == StopKind::Depot)
                    {
                        let mut closing = depot_stop.clone();
                        closing.sequence = stops.len() as u32;
                        closing.status = StopStatus::Pending;
                        stops.push(closing);
                    }
                }
            }

            // The re-planned tail is timed from the depot; shift it forward
            // so nothing lands before `now` or before already-worked stops.
            let anchor = stops[..prefix_len]
                .iter()
                .rev()
                .map(|s| s.actual_departure.unwrap_or(s.planned_departure))
                .next()
                .map_or(now, |departure| departure.max(now));
            if let Some(first_tail) = stops.get(prefix_len) {
                let shift = anchor - first_tail.planned_arrival;
                if shift > chrono::Duration::zero() {
                    for stop in stops.iter_mut().skip(prefix_len) {
                        stop.planned_arrival += shift;
                        stop.planned_departure += shift;
                    }
                }
            }

            let total_distance_km: f64 = stops.iter().map(|s| s.distance_from_previous_km).sum();
            let total_duration_minutes = route_span_minutes(&stops);
            let diff = RouteDiff::between(&rec.stops, &stops);
            let event = Event::new(
                EventKind::ReoptimizationCompleted,
                EventSeverity::Medium,
                format!("Route {} globally reoptimized", rec.route.id),
            )
            .with_route(rec.route.id)
            .with_payload(serde_json::json!({
                "strategy": "global",
                "diff": diff,
                "triggers": fired,
                "objective": solution.objective_value,
            }));

            let total_waiting_minutes = route_waiting_minutes(&stops);
            self.store
                .commit_reoptimization(ReoptimizationCommit {
                    route_id: rec.route.id,
                    expected_version: rec.route.version,
                    stops,
                    total_distance_km,
                    total_duration_minutes,
                    total_waiting_minutes,
                    optimization_score: solution.optimization_score,
                    status: rec.route.status,
                    event: event.clone(),
                })
                .await?;
            self.bus.publish(event);
        }

        self.metrics.global_commits.fetch_add(1, Ordering::Relaxed);
        Ok(Outcome::Committed)
    }

    async fn run_emergency(
        &self,
        record: &RouteRecord,
        fired: &[Trigger],
        guard: &SolveGuard,
    ) -> anyhow::Result<Outcome> {
        let route_id = record.route.id;
        self.metrics.emergency_runs.fetch_add(1, Ordering::Relaxed);

        let detached = self.store.mark_route_disrupted(route_id).await?;
        info!(
            "Route {} disrupted, {} orders detached",
            route_id,
            detached.len()
        );
        if detached.is_empty() {
            return Ok(Outcome::NoChange);
        }

        let mut vehicles = self
            .store
            .available_vehicles(Some(record.route.vehicle_id))
            .await?;
        let mut drivers = self
            .store
            .available_drivers(Some(record.route.driver_id))
            .await?;
        vehicles.truncate(self.config.emergency_resource_limit);
        drivers.truncate(self.config.emergency_resource_limit);
        let pairs = vehicles.len().min(drivers.len());

        if pairs == 0 {
            self.publish_event(self.manual_intervention_event(record, &detached, "no available vehicles or drivers"))
                .await;
            return Ok(Outcome::NoChange);
        }
        vehicles.truncate(pairs);
        drivers.truncate(pairs);

        let depot = record.stops[0].coordinates;
        let problem = VrpProblem::build(
            &detached,
            &vehicles,
            &drivers,
            depot,
            record.route.planned_date,
            self.config.depot_open_min,
            self.config.depot_close_min,
            self.config.max_waiting_minutes,
        )?;
        let matrices = self.matrices_for(&problem, &vehicles[0]).await?;

        let emergency_solver = VrptwSolver::new(SolverConfig {
            time_limit: self.config.emergency_time_limit,
            weights: self.solver.config().weights,
            base_cost: self.solver.config().base_cost,
            max_waiting_minutes: self.config.max_waiting_minutes,
            allow_partial: true,
            fallback_speed_kmh: self.solver.config().fallback_speed_kmh,
        });
        let budget = SearchBudget {
            deadline: std::time::Instant::now() + self.config.emergency_time_limit,
            cancel: guard.token.clone(),
        };

        let solution = match emergency_solver.solve(&problem, &matrices, 0, Some(budget)) {
            Ok(solution) => solution,
            Err(e) => {
                warn!("Emergency solve for route {} failed: {}", route_id, e);
                self.publish_event(self.manual_intervention_event(record, &detached, &e.to_string()))
                    .await;
                return Ok(Outcome::NoChange);
            }
        };

        // Whole-route replacements only: each solution tour becomes a new route
        let mut created = Vec::with_capacity(solution.routes.len());
        for planned in &solution.routes {
            let new_record = materialize_route(planned, &problem, solution.optimization_score);
            created.push(new_record.route.id);
            self.store.insert_route(new_record).await?;
        }

        if !solution.unassigned.is_empty() {
            let uncovered: Vec<Order> = detached
                .iter()
                .filter(|o| solution.unassigned.iter().any(|u| u.order_id == o.id))
                .cloned()
                .collect();
            self.publish_event(self.manual_intervention_event(
                record,
                &uncovered,
                "emergency re-solve left orders uncovered",
            ))
            .await;
        }

        let event = Event::new(
            EventKind::ReoptimizationCompleted,
            EventSeverity::High,
            format!(
                "Emergency re-solve of route {} created {} replacement routes",
                route_id,
                created.len()
            ),
        )
        .with_route(route_id)
        .with_payload(serde_json::json!({
            "strategy": "emergency",
            "createdRouteIds": created,
            "uncoveredOrders": solution.unassigned.len(),
            "triggers": fired,
        }));
        self.publish_event(event).await;
        Ok(Outcome::Committed)
    }

    // -- helpers ------------------------------------------------------------

    async fn matrices_for(
        &self,
        problem: &VrpProblem,
        vehicle: &Vehicle,
    ) -> anyhow::Result<Matrices> {
        let locations = problem.locations();
        let depart_at = Utc::now();
        let degraded = self.provider.name() == "haversine";
        let travel = self
            .cache
            .get_or_fetch(self.provider.as_ref(), &locations, depart_at, vehicle.kind)
            .await?;
        Ok(Matrices::from_travel(&travel, !degraded))
    }

    async fn route_orders(&self, record: &RouteRecord) -> Vec<Order> {
        let mut orders = Vec::new();
        for stop in &record.stops {
            if let Some(order_id) = stop.order_id {
                match self.store.order(order_id).await {
                    Ok(order) => orders.push(order),
                    Err(e) => warn!("Stop references missing order {}: {}", order_id, e),
                }
            }
        }
        orders
    }

    fn triggered_event(
        &self,
        record: &RouteRecord,
        fired: &[Trigger],
        strategy: Strategy,
    ) -> Event {
        let severity = if max_severity(fired) >= 0.9 {
            EventSeverity::Critical
        } else if max_severity(fired) > 0.6 {
            EventSeverity::High
        } else {
            EventSeverity::Medium
        };
        let mut event = Event::new(
            EventKind::ReoptimizationTriggered,
            severity,
            format!("Route {} reoptimization triggered", record.route.id),
        )
        .with_route(record.route.id)
        .with_payload(serde_json::json!({
            "triggers": fired,
            "strategy": format!("{:?}", strategy).to_lowercase(),
        }));
        event.estimated_delay_minutes = fired
            .iter()
            .map(|t| t.estimated_delay_minutes as i32)
            .max()
            .unwrap_or(0);
        event.triggers_reoptimization = true;
        event
    }

    fn manual_intervention_event(
        &self,
        record: &RouteRecord,
        orders: &[Order],
        reason: &str,
    ) -> Event {
        Event::new(
            EventKind::ManualIntervention,
            EventSeverity::Critical,
            format!("Route {} needs manual reassignment", record.route.id),
        )
        .with_route(record.route.id)
        .with_description(reason.to_string())
        .with_payload(serde_json::json!({
            "orderIds": orders.iter().map(|o| o.id).collect::<Vec<_>>(),
        }))
    }

    async fn publish_event(&self, event: Event) {
        if let Err(e) = self.store.insert_event(event.clone()).await {
            warn!("Failed to persist {} event: {}", event.kind.as_str(), e);
        }
        self.bus.publish(event);
    }

    fn in_cooldown(&self, record: &RouteRecord, now: DateTime<Utc>) -> bool {
        let map_entry = self.cooldowns.lock().get(&record.route.id).copied();
        let last = match (map_entry, record.route.last_reoptimized_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
        match last {
            Some(last) => now < last + chrono::Duration::minutes(self.config.cooldown_minutes),
            None => false,
        }
    }

    fn touch_cooldown(&self, route_id: Uuid, now: DateTime<Utc>) {
        self.cooldowns.lock().insert(route_id, now);
    }

    /// Force a route stuck in `reoptimizing` back to active and escalate.
    async fn recover_if_stuck(&self, record: &RouteRecord, now: DateTime<Utc>) {
        let stuck_for = now - record.route.updated_at;
        if stuck_for < chrono::Duration::minutes(self.config.stuck_reoptimizing_minutes) {
            return;
        }
        warn!(
            "Route {} stuck in reoptimizing for {} min, forcing back to active",
            record.route.id,
            stuck_for.num_minutes()
        );
        if let Err(e) = self
            .store
            .update_route_status(record.route.id, RouteStatus::Active, None)
            .await
        {
            error!("Failed to recover stuck route {}: {}", record.route.id, e);
            return;
        }

        let mut event = Event::new(
            EventKind::ManualIntervention,
            EventSeverity::High,
            format!(
                "Route {} was stuck in reoptimizing and has been force-recovered",
                record.route.id
            ),
        )
        .with_route(record.route.id);
        event.escalate();
        self.publish_event(event).await;
    }
}

/// The leading run of already-worked stops is fixed; everything after is fair
/// game for a re-solve. A route that has not started keeps only its leading
/// depot stop.
fn prefix_len(record: &RouteRecord) -> usize {
    let run = record
        .stops
        .iter()
        .take_while(|s| s.status != StopStatus::Pending)
        .count();
    run.max(1).min(record.stops.len())
}

fn route_span_minutes(stops: &[crate::types::RouteStop]) -> i32 {
    match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => {
            (last.planned_arrival - first.planned_departure).num_minutes() as i32
        }
        _ => 0,
    }
}
