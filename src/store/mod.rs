//! Route store collaborator interface.
//!
//! Transactional CRUD over orders, vehicles, drivers, routes, stops, and
//! events, plus a change-notification stream the adaptive optimizer consumes.
//! A re-solve commit swaps a route's stop list atomically: readers observe
//! the old or the new route in full, never a partial rewrite.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{
    Driver, Event, EventQuery, Order, Route, RouteStatus, RouteStop, TimeWindow, Vehicle,
};

/// Store failure modes
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("conflicting update for route {route_id}: expected version {expected}, found {found}")]
    Conflict { route_id: Uuid, expected: u64, found: u64 },
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
}

/// A route with its owned stops
#[derive(Debug, Clone)]
pub struct RouteRecord {
    pub route: Route,
    pub stops: Vec<RouteStop>,
}

/// Change notification emitted after every route mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    Created(Uuid),
    Updated(Uuid),
    Removed(Uuid),
}

/// Atomic payload of a re-solve commit
#[derive(Debug, Clone)]
pub struct ReoptimizationCommit {
    pub route_id: Uuid,
    /// Version the committer read; a mismatch aborts with `Conflict`
    pub expected_version: u64,
    pub stops: Vec<RouteStop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: i32,
    pub total_waiting_minutes: i32,
    pub optimization_score: i32,
    pub status: RouteStatus,
    /// Event persisted in the same transaction
    pub event: Event,
}

#[async_trait]
pub trait RouteStore: Send + Sync {
    // Orders
    async fn order(&self, id: Uuid) -> Result<Order, StoreError>;
    async fn orders_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Order>, StoreError>;
    async fn upsert_order(&self, order: Order) -> Result<(), StoreError>;
    /// Update a customer's window; returns the refreshed order.
    async fn update_order_window(&self, id: Uuid, window: TimeWindow) -> Result<Order, StoreError>;
    /// Pending high/urgent-priority orders without a stop, for the given day.
    async fn unassigned_urgent_orders(&self, date: NaiveDate) -> Result<Vec<Order>, StoreError>;

    // Vehicles and drivers
    async fn vehicle(&self, id: Uuid) -> Result<Vehicle, StoreError>;
    async fn upsert_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError>;
    async fn available_vehicles(&self, exclude: Option<Uuid>) -> Result<Vec<Vehicle>, StoreError>;
    async fn driver(&self, id: Uuid) -> Result<Driver, StoreError>;
    async fn upsert_driver(&self, driver: Driver) -> Result<(), StoreError>;
    async fn available_drivers(&self, exclude: Option<Uuid>) -> Result<Vec<Driver>, StoreError>;

    // Routes
    async fn route(&self, id: Uuid) -> Result<RouteRecord, StoreError>;
    /// Routes the optimizer watches (`planned` or `active`), plus any stuck
    /// in `reoptimizing`.
    async fn active_routes(&self) -> Result<Vec<RouteRecord>, StoreError>;
    /// Insert a freshly planned route and link its orders in one step.
    async fn insert_route(&self, record: RouteRecord) -> Result<(), StoreError>;
    async fn update_route_status(
        &self,
        id: Uuid,
        status: RouteStatus,
        current_stop_index: Option<u32>,
    ) -> Result<Route, StoreError>;
    /// Atomic swap of (route fields, stops) plus an event insert.
    async fn commit_reoptimization(
        &self,
        commit: ReoptimizationCommit,
    ) -> Result<RouteRecord, StoreError>;
    /// Emergency detach: mark the route disrupted, skip its pending stops,
    /// unlink and return the affected orders.
    async fn mark_route_disrupted(&self, route_id: Uuid) -> Result<Vec<Order>, StoreError>;

    // Events
    async fn insert_event(&self, event: Event) -> Result<(), StoreError>;
    async fn events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError>;

    // Change notifications
    fn subscribe_changes(&self) -> broadcast::Receiver<RouteChange>;
}
