#![allow(dead_code)]
//! Boundary error kinds.
//!
//! One enum per the error contract: transports map `code()` into their
//! envelope and `http_status()` onto the wire. Internal errors convert into
//! these kinds at the service boundary.

use thiserror::Error;
use uuid::Uuid;

use crate::services::routing::RoutingError;
use crate::services::vrp::SolveError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no feasible solution: {0}")]
    NoFeasibleSolution(String),
    #[error("optimization timed out")]
    OptimizationTimeout,
    #[error("time window violation: {0}")]
    TimeWindowViolation(String),
    #[error("capacity violation: {0}")]
    CapacityViolation(String),
    #[error("{kind} {id} not found")]
    ResourceNotFound { kind: &'static str, id: Uuid },
    #[error("mapping provider unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("mapping provider quota exceeded")]
    QuotaExceeded,
    #[error("conflicting update: {0}")]
    ConflictingUpdate(String),
}

impl DispatchError {
    /// Stable error code for response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NoFeasibleSolution(_) => "NO_FEASIBLE_SOLUTION",
            Self::OptimizationTimeout => "OPTIMIZATION_TIMEOUT",
            Self::TimeWindowViolation(_) => "TIME_WINDOW_VIOLATION",
            Self::CapacityViolation(_) => "CAPACITY_VIOLATION",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::ConflictingUpdate(_) => "CONFLICTING_UPDATE",
        }
    }

    /// HTTP status the transport should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::ResourceNotFound { .. } => 404,
            Self::ConflictingUpdate(_) => 409,
            Self::ServiceUnavailable(_) => 503,
            _ => 500,
        }
    }
}

impl From<SolveError> for DispatchError {
    fn from(err: SolveError) -> Self {
        match err {
            SolveError::InvalidInput(message) => Self::InvalidInput(message),
            SolveError::TimeWindowViolation { message, .. } => Self::TimeWindowViolation(message),
            SolveError::CapacityViolation { total_demand_kg, total_capacity_kg } => {
                Self::CapacityViolation(format!(
                    "total demand {} kg exceeds total capacity {} kg",
                    total_demand_kg, total_capacity_kg
                ))
            }
            SolveError::NoFeasibleSolution { diagnostics } => {
                let summary = diagnostics
                    .iter()
                    .map(|d| d.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                Self::NoFeasibleSolution(summary)
            }
            SolveError::OptimizationTimeout => Self::OptimizationTimeout,
            SolveError::Cancelled => Self::OptimizationTimeout,
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::ResourceNotFound { kind, id },
            StoreError::Conflict { route_id, expected, found } => Self::ConflictingUpdate(
                format!("route {} version {} is stale (now {})", route_id, expected, found),
            ),
            StoreError::InvalidMutation(message) => Self::InvalidInput(message),
        }
    }
}

impl From<RoutingError> for DispatchError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::Unavailable(message) => Self::ServiceUnavailable(message),
            RoutingError::QuotaExceeded => Self::QuotaExceeded,
            RoutingError::NotFound(query) => Self::InvalidInput(format!("not found: {}", query)),
        }
    }
}
