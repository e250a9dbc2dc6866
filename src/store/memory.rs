//! In-memory route store.
//!
//! One `RwLock` over the whole state keeps multi-entity mutations atomic,
//! which is exactly the transactional contract the optimizer relies on.
//! Suitable for a single worker process and for tests; a relational
//! implementation satisfies the same trait out of process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{
    sequence_is_contiguous, Driver, Event, EventQuery, Order, OrderStatus, Route, RouteStatus,
    RouteStop, StopStatus, TimeWindow, Vehicle,
};
use super::{ReoptimizationCommit, RouteChange, RouteRecord, RouteStore, StoreError};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    vehicles: HashMap<Uuid, Vehicle>,
    drivers: HashMap<Uuid, Driver>,
    routes: HashMap<Uuid, RouteRecord>,
    events: Vec<Event>,
}

/// In-memory implementation of the route store
pub struct MemoryStore {
    state: RwLock<State>,
    changes: broadcast::Sender<RouteChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            changes,
        }
    }

    fn notify(&self, change: RouteChange) {
        // No receivers is fine
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn order(&self, id: Uuid) -> Result<Order, StoreError> {
        self.state
            .read()
            .orders
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "order", id })
    }

    async fn orders_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read();
        ids.iter()
            .map(|id| {
                state
                    .orders
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::NotFound { kind: "order", id: *id })
            })
            .collect()
    }

    async fn upsert_order(&self, order: Order) -> Result<(), StoreError> {
        self.state.write().orders.insert(order.id, order);
        Ok(())
    }

    async fn update_order_window(&self, id: Uuid, window: TimeWindow) -> Result<Order, StoreError> {
        let mut state = self.state.write();
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "order", id })?;
        order.time_window = window;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn unassigned_urgent_orders(&self, date: NaiveDate) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.delivery_date == date && o.is_urgent_candidate())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn vehicle(&self, id: Uuid) -> Result<Vehicle, StoreError> {
        self.state
            .read()
            .vehicles
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "vehicle", id })
    }

    async fn upsert_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError> {
        self.state.write().vehicles.insert(vehicle.id, vehicle);
        Ok(())
    }

    async fn available_vehicles(&self, exclude: Option<Uuid>) -> Result<Vec<Vehicle>, StoreError> {
        let state = self.state.read();
        let mut vehicles: Vec<Vehicle> = state
            .vehicles
            .values()
            .filter(|v| {
                v.status == crate::types::VehicleStatus::Available && Some(v.id) != exclude
            })
            .cloned()
            .collect();
        vehicles.sort_by_key(|v| v.id);
        Ok(vehicles)
    }

    async fn driver(&self, id: Uuid) -> Result<Driver, StoreError> {
        self.state
            .read()
            .drivers
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "driver", id })
    }

    async fn upsert_driver(&self, driver: Driver) -> Result<(), StoreError> {
        self.state.write().drivers.insert(driver.id, driver);
        Ok(())
    }

    async fn available_drivers(&self, exclude: Option<Uuid>) -> Result<Vec<Driver>, StoreError> {
        let state = self.state.read();
        let mut drivers: Vec<Driver> = state
            .drivers
            .values()
            .filter(|d| {
                d.status == crate::types::DriverStatus::Available && Some(d.id) != exclude
            })
            .cloned()
            .collect();
        drivers.sort_by_key(|d| d.id);
        Ok(drivers)
    }

    async fn route(&self, id: Uuid) -> Result<RouteRecord, StoreError> {
        self.state
            .read()
            .routes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "route", id })
    }

    async fn active_routes(&self) -> Result<Vec<RouteRecord>, StoreError> {
        let state = self.state.read();
        let mut routes: Vec<RouteRecord> = state
            .routes
            .values()
            .filter(|r| {
                r.route.status.is_monitorable() || r.route.status == RouteStatus::Reoptimizing
            })
            .cloned()
            .collect();
        routes.sort_by_key(|r| r.route.id);
        Ok(routes)
    }

    async fn insert_route(&self, record: RouteRecord) -> Result<(), StoreError> {
        if !sequence_is_contiguous(&record.stops) {
            return Err(StoreError::InvalidMutation(format!(
                "route {} stop sequence has gaps",
                record.route.id
            )));
        }

        let route_id = record.route.id;
        {
            let mut state = self.state.write();
            // Link orders to their stops in the same transaction
            for stop in &record.stops {
                if let Some(order_id) = stop.order_id {
                    if let Some(order) = state.orders.get_mut(&order_id) {
                        order.status = OrderStatus::Assigned;
                        order.route_id = Some(route_id);
                        order.stop_id = Some(stop.id);
                        order.updated_at = Utc::now();
                    }
                }
            }
            if let Some(vehicle) = state.vehicles.get_mut(&record.route.vehicle_id) {
                vehicle.status = crate::types::VehicleStatus::InUse;
            }
            if let Some(driver) = state.drivers.get_mut(&record.route.driver_id) {
                driver.status = crate::types::DriverStatus::OnRoute;
            }
            state.routes.insert(route_id, record);
        }
        self.notify(RouteChange::Created(route_id));
        Ok(())
    }

    async fn update_route_status(
        &self,
        id: Uuid,
        status: RouteStatus,
        current_stop_index: Option<u32>,
    ) -> Result<Route, StoreError> {
        let route = {
            let mut state = self.state.write();
            let record = state
                .routes
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "route", id })?;

            if let Some(index) = current_stop_index {
                // The current index never moves backward
                if index < record.route.current_stop_index {
                    return Err(StoreError::InvalidMutation(format!(
                        "current_stop_index cannot move backward ({} -> {})",
                        record.route.current_stop_index, index
                    )));
                }
                record.route.current_stop_index = index;
            }
            record.route.status = status;
            record.route.version += 1;
            record.route.updated_at = Utc::now();
            record.route.clone()
        };
        self.notify(RouteChange::Updated(id));
        Ok(route)
    }

    async fn commit_reoptimization(
        &self,
        commit: ReoptimizationCommit,
    ) -> Result<RouteRecord, StoreError> {
        let record = {
            let mut state = self.state.write();
            let record = state
                .routes
                .get_mut(&commit.route_id)
                .ok_or(StoreError::NotFound { kind: "route", id: commit.route_id })?;

            if record.route.version != commit.expected_version {
                return Err(StoreError::Conflict {
                    route_id: commit.route_id,
                    expected: commit.expected_version,
                    found: record.route.version,
                });
            }
            if !sequence_is_contiguous(&commit.stops) {
                return Err(StoreError::InvalidMutation(format!(
                    "route {} commit has a gapped stop sequence",
                    commit.route_id
                )));
            }
            // Stops below the current index must be untouched
            let fixed = record.route.current_stop_index as usize;
            let unchanged_prefix = record
                .stops
                .iter()
                .take(fixed)
                .zip(commit.stops.iter())
                .all(|(old, new)| old.order_id == new.order_id);
            if !unchanged_prefix {
                return Err(StoreError::InvalidMutation(format!(
                    "route {} commit reorders stops below index {}",
                    commit.route_id, fixed
                )));
            }

            // Relink open orders that moved onto this route's stops
            for stop in &commit.stops {
                if let Some(order_id) = stop.order_id {
                    if let Some(order) = state.orders.get_mut(&order_id) {
                        let closed = matches!(
                            order.status,
                            OrderStatus::Delivered | OrderStatus::Failed | OrderStatus::Cancelled
                        );
                        if !closed {
                            order.status = OrderStatus::Assigned;
                            order.route_id = Some(commit.route_id);
                            order.stop_id = Some(stop.id);
                            order.updated_at = Utc::now();
                        }
                    }
                }
            }

            let record = state
                .routes
                .get_mut(&commit.route_id)
                .expect("checked above");
            record.stops = commit.stops.clone();
            record.route.total_distance_km = commit.total_distance_km;
            record.route.total_duration_minutes = commit.total_duration_minutes;
            record.route.total_waiting_minutes = commit.total_waiting_minutes;
            record.route.optimization_score = commit.optimization_score;
            record.route.status = commit.status;
            record.route.stop_count = commit.stops.len() as u32;
            record.route.reoptimization_count += 1;
            record.route.last_reoptimized_at = Some(commit.event.timestamp);
            record.route.version += 1;
            record.route.updated_at = Utc::now();

            state.events.push(commit.event.clone());
            state.routes.get(&commit.route_id).cloned().expect("route present")
        };

        self.notify(RouteChange::Updated(commit.route_id));
        Ok(record)
    }

    async fn mark_route_disrupted(&self, route_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let detached = {
            let mut state = self.state.write();
            let record = state
                .routes
                .get_mut(&route_id)
                .ok_or(StoreError::NotFound { kind: "route", id: route_id })?;

            record.route.status = RouteStatus::Disrupted;
            record.route.version += 1;
            record.route.updated_at = Utc::now();

            let mut order_ids = Vec::new();
            for stop in record.stops.iter_mut() {
                if stop.status == StopStatus::Pending {
                    if let Some(order_id) = stop.order_id {
                        order_ids.push(order_id);
                    }
                    stop.status = StopStatus::Skipped;
                }
            }

            let mut detached = Vec::with_capacity(order_ids.len());
            for order_id in order_ids {
                if let Some(order) = state.orders.get_mut(&order_id) {
                    order.status = OrderStatus::Pending;
                    order.route_id = None;
                    order.stop_id = None;
                    order.updated_at = Utc::now();
                    detached.push(order.clone());
                }
            }
            detached
        };

        self.notify(RouteChange::Updated(route_id));
        Ok(detached)
    }

    async fn insert_event(&self, event: Event) -> Result<(), StoreError> {
        self.state.write().events.push(event);
        Ok(())
    }

    async fn events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let state = self.state.read();
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|e| query.kind.map_or(true, |k| e.kind == k))
            .filter(|e| query.severity.map_or(true, |s| e.severity == s))
            .filter(|e| query.route_id.map_or(true, |id| e.route_id == Some(id)))
            .filter(|e| !query.active_only || e.is_active())
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(100);
        Ok(events.into_iter().skip(offset).take(limit).collect())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<RouteChange> {
        self.changes.subscribe()
    }
}
