#![allow(dead_code)]
//! Plan-time orchestration.
//!
//! Pulls entities from the store, builds matrices through the cache, runs
//! the static solver, and persists the resulting routes. Also serves the
//! route ETA and time-window-change paths of the external surface.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::services::bus::EventBus;
use crate::services::eta::{EtaPredictor, EtaRequest};
use crate::services::matrix_cache::MatrixCache;
use crate::services::routing::RoutingProvider;
use crate::services::simulator::TrafficView;
use crate::services::vrp::{Matrices, PlannedRoute, VrpProblem, VrptwSolver};
use crate::store::{RouteRecord, RouteStore};
use crate::types::{
    Event, EventKind, EventSeverity, EtaResponse, OptimizeRoutesRequest, OptimizeRoutesResponse,
    Order, Route, RouteStatus, RouteStop, SolverStats, StopEta, StopKind, StopStatus,
    TimeWindow, TimeWindowUpdate, RouteStatusUpdate,
};

/// Depot working hours and waiting slack used when assembling problems
#[derive(Debug, Clone)]
pub struct PlanningConfig {
    pub depot_open_min: i32,
    pub depot_close_min: i32,
    pub max_waiting_minutes: i32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            depot_open_min: crate::defaults::DEPOT_OPEN_MINUTES,
            depot_close_min: crate::defaults::DEPOT_CLOSE_MINUTES,
            max_waiting_minutes: crate::defaults::MAX_WAITING_MINUTES,
        }
    }
}

/// Plan-time service
pub struct RoutePlanner {
    store: Arc<dyn RouteStore>,
    bus: EventBus,
    solver: Arc<VrptwSolver>,
    provider: Arc<dyn RoutingProvider>,
    cache: Arc<MatrixCache>,
    eta: Arc<dyn EtaPredictor>,
    traffic: Arc<dyn TrafficView>,
    config: PlanningConfig,
}

impl RoutePlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RouteStore>,
        bus: EventBus,
        solver: Arc<VrptwSolver>,
        provider: Arc<dyn RoutingProvider>,
        cache: Arc<MatrixCache>,
        eta: Arc<dyn EtaPredictor>,
        traffic: Arc<dyn TrafficView>,
        config: PlanningConfig,
    ) -> Self {
        Self { store, bus, solver, provider, cache, eta, traffic, config }
    }

    /// Plan routes for a batch of orders and persist the result.
    pub async fn optimize_routes(
        &self,
        request: &OptimizeRoutesRequest,
    ) -> Result<OptimizeRoutesResponse, DispatchError> {
        let orders = self.store.orders_by_ids(&request.order_ids).await?;
        let mut vehicles = Vec::with_capacity(request.vehicle_ids.len());
        for id in &request.vehicle_ids {
            vehicles.push(self.store.vehicle(*id).await?);
        }
        let mut drivers = Vec::with_capacity(request.driver_ids.len());
        for id in &request.driver_ids {
            drivers.push(self.store.driver(*id).await?);
        }
        if vehicles.len() != drivers.len() {
            return Err(DispatchError::InvalidInput(format!(
                "{} vehicles cannot be paired with {} drivers",
                vehicles.len(),
                drivers.len()
            )));
        }

        let planned_date = request
            .planned_date
            .unwrap_or_else(|| Utc::now().date_naive());

        let problem = VrpProblem::build(
            &orders,
            &vehicles,
            &drivers,
            request.depot,
            planned_date,
            self.config.depot_open_min,
            self.config.depot_close_min,
            self.config.max_waiting_minutes,
        )?;

        let kind = vehicles[0].kind;
        let locations = problem.locations();
        let depart_at = problem.midnight() + Duration::minutes(self.config.depot_open_min as i64);
        let degraded = self.provider.name() == "haversine";
        let travel = self
            .cache
            .get_or_fetch(self.provider.as_ref(), &locations, depart_at, kind)
            .await
            .map_err(DispatchError::from)?;
        let matrices = Matrices::from_travel(&travel, !degraded);

        let budget = request.time_limit_s.map(|s| {
            crate::services::vrp::SearchBudget::with_deadline(
                std::time::Instant::now() + std::time::Duration::from_secs(s as u64),
            )
        });
        let mut solution = self.solver.solve(&problem, &matrices, 0, budget)?;
        solution.degraded = degraded;

        let mut route_ids = Vec::with_capacity(solution.routes.len());
        for planned in &solution.routes {
            let record = materialize_route(planned, &problem, solution.optimization_score);
            route_ids.push(record.route.id);
            self.store.insert_route(record).await?;
        }

        info!(
            "Planned {} routes for {} orders ({:.1} km, objective {:.4}{})",
            route_ids.len(),
            solution.orders_assigned(),
            solution.total_distance_km,
            solution.objective_value,
            if degraded { ", degraded routing" } else { "" }
        );

        Ok(OptimizeRoutesResponse {
            routes_created: route_ids.len(),
            route_ids,
            total_distance_km: solution.total_distance_km,
            total_duration_minutes: solution.total_duration_minutes,
            objective_value: solution.objective_value,
            solver_stats: SolverStats {
                solve_time_ms: solution.solve_time_ms,
                vehicles_used: solution.vehicles_used(),
                orders_assigned: solution.orders_assigned(),
                orders_unassigned: solution.unassigned.len(),
                degraded,
                timed_out: solution.timed_out,
            },
        })
    }

    /// ETA predictions for a route's remaining stops.
    pub async fn route_eta(
        &self,
        route_id: Uuid,
        stop_sequence: Option<u32>,
    ) -> Result<EtaResponse, DispatchError> {
        let record = self.store.route(route_id).await?;
        let vehicle = self.store.vehicle(record.route.vehicle_id).await?;
        let driver = self.store.driver(record.route.driver_id).await?;

        let mut stops = Vec::new();
        for (idx, stop) in record.stops.iter().enumerate() {
            if stop.kind != StopKind::Delivery || stop.status != StopStatus::Pending {
                continue;
            }
            if let Some(sequence) = stop_sequence {
                if stop.sequence != sequence {
                    continue;
                }
            }

            let depart_at = idx
                .checked_sub(1)
                .map(|prev| {
                    let previous = &record.stops[prev];
                    previous.actual_departure.unwrap_or(previous.planned_departure)
                })
                .unwrap_or(record.route.planned_start);

            let prediction = self.eta.predict(&EtaRequest {
                distance_km: stop.distance_from_previous_km,
                traffic_factor: self.traffic.factor_at(&stop.coordinates),
                depart_at,
                driver_experience: driver.experience.factor(),
                vehicle_kind: vehicle.kind,
                complexity: 1.0,
                weather_factor: 1.0,
            });

            stops.push(StopEta {
                sequence: stop.sequence,
                order_id: stop.order_id,
                planned_arrival: stop.planned_arrival,
                predicted_arrival: prediction.eta,
                confidence: prediction.confidence,
                delay_minutes: (prediction.eta - stop.planned_arrival).num_minutes(),
            });
        }

        Ok(EtaResponse { route_id, stops })
    }

    /// Apply a customer's window change and announce it on the bus.
    pub async fn update_time_window(
        &self,
        order_id: Uuid,
        update: &TimeWindowUpdate,
    ) -> Result<Order, DispatchError> {
        let window = TimeWindow::new(update.start, update.end);
        if !window.is_valid() {
            return Err(DispatchError::InvalidInput(format!(
                "time window start {} is not before end {}",
                update.start, update.end
            )));
        }

        let order = self.store.update_order_window(order_id, window).await?;

        let mut event = Event::new(
            EventKind::CustomerReschedule,
            EventSeverity::Medium,
            format!("Order {} rescheduled", order_id),
        )
        .with_payload(serde_json::json!({
            "orderId": order_id,
            "start": update.start,
            "end": update.end,
            "customerVerified": update.customer_verified,
        }));
        event.order_id = Some(order_id);
        event.route_id = order.route_id;
        event.triggers_reoptimization = order.route_id.is_some();

        self.store.insert_event(event.clone()).await?;
        self.bus.publish(event);
        Ok(order)
    }

    /// Route status transition from drivers or dispatch.
    pub async fn update_route_status(
        &self,
        route_id: Uuid,
        update: &RouteStatusUpdate,
    ) -> Result<Route, DispatchError> {
        let previous = self.store.route(route_id).await?.route.status;
        let route = self
            .store
            .update_route_status(route_id, update.status, update.current_stop_index)
            .await?;

        if update.status == RouteStatus::Active && previous != RouteStatus::Active {
            let event = Event::new(
                EventKind::RouteStarted,
                EventSeverity::Low,
                format!("Route {} started", route_id),
            )
            .with_route(route_id);
            if let Err(e) = self.store.insert_event(event.clone()).await {
                warn!("Failed to persist route_started event: {}", e);
            }
            self.bus.publish(event);
        }
        Ok(route)
    }
}

/// Turn one planned tour into persistable route + stops.
pub fn materialize_route(
    planned: &PlannedRoute,
    problem: &VrpProblem,
    optimization_score: i32,
) -> RouteRecord {
    let route_id = Uuid::new_v4();
    let midnight = problem.midnight();
    let now = Utc::now();

    let stops: Vec<RouteStop> = planned
        .stops
        .iter()
        .map(|stop| RouteStop {
            id: Uuid::new_v4(),
            route_id,
            order_id: stop.order_id,
            kind: stop.kind,
            sequence: stop.sequence,
            coordinates: stop.coordinates,
            planned_arrival: midnight + Duration::minutes(stop.arrival_min as i64),
            planned_departure: midnight + Duration::minutes(stop.departure_min as i64),
            actual_arrival: None,
            actual_departure: None,
            status: StopStatus::Pending,
            distance_from_previous_km: stop.distance_from_previous_m as f64 / 1000.0,
            travel_minutes_from_previous: stop.travel_minutes_from_previous,
        })
        .collect();

    RouteRecord {
        route: Route {
            id: route_id,
            vehicle_id: planned.vehicle_id,
            driver_id: planned.driver_id,
            planned_date: problem.planned_date,
            planned_start: midnight + Duration::minutes(planned.start_min as i64),
            planned_end: midnight + Duration::minutes(planned.end_min as i64),
            total_distance_km: planned.total_distance_m as f64 / 1000.0,
            total_duration_minutes: planned.total_minutes,
            total_waiting_minutes: planned.waiting_minutes,
            total_weight_kg: planned.total_weight_kg,
            total_volume_m3: planned.total_volume_m3,
            stop_count: stops.len() as u32,
            status: RouteStatus::Planned,
            current_stop_index: 0,
            reoptimization_count: 0,
            last_reoptimized_at: None,
            optimization_score,
            version: 0,
            created_at: now,
            updated_at: now,
        },
        stops,
    }
}
