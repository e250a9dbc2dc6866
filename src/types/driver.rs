//! Driver types

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Driver experience level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Novice,
    Intermediate,
    Experienced,
    Expert,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novice => "novice",
            Self::Intermediate => "intermediate",
            Self::Experienced => "experienced",
            Self::Expert => "expert",
        }
    }

    /// Experience on the 0-5 scale consumed by the ETA predictor.
    pub fn factor(&self) -> f64 {
        match self {
            Self::Novice => 1.0,
            Self::Intermediate => 2.5,
            Self::Experienced => 4.0,
            Self::Expert => 5.0,
        }
    }
}

/// Driver status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    OnRoute,
    OnBreak,
    OffDuty,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::OnRoute => "on_route",
            Self::OnBreak => "on_break",
            Self::OffDuty => "off_duty",
        }
    }
}

/// Driver entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: Uuid,
    pub full_name: String,
    pub experience: ExperienceLevel,

    pub max_stops_per_route: u32,
    pub shift_start: NaiveTime,
    pub shift_end: NaiveTime,

    pub can_handle_fragile: bool,
    pub can_handle_high_value: bool,

    pub status: DriverStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    /// Available for work: either free or already driving a route.
    pub fn is_available(&self) -> bool {
        matches!(self.status, DriverStatus::Available | DriverStatus::OnRoute)
    }
}
