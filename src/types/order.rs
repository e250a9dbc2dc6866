//! Order types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Coordinates, TimeWindow};

/// Order priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl OrderPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Assigned,
    InTransit,
    Delivered,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Order entity
/// A single customer delivery. An order sits on at most one active stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
    pub coordinates: Coordinates,
    pub delivery_date: NaiveDate,
    pub time_window: TimeWindow,

    /// Demand, used by the capacity dimension.
    pub weight_kg: f64,
    pub volume_m3: f64,
    pub service_minutes: i32,

    pub priority: OrderPriority,
    pub status: OrderStatus,

    /// Backreferences, set when the order is placed on a stop.
    pub route_id: Option<Uuid>,
    pub stop_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether this order qualifies for the urgent-order trigger.
    pub fn is_urgent_candidate(&self) -> bool {
        self.status == OrderStatus::Pending
            && self.stop_id.is_none()
            && self.priority >= OrderPriority::High
    }
}
