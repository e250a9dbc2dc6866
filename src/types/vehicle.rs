//! Vehicle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

/// Vehicle kind, used for routing profiles and ETA base speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    Motorcycle,
    Car,
    Van,
    Truck,
}

impl VehicleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Motorcycle => "motorcycle",
            Self::Car => "car",
            Self::Van => "van",
            Self::Truck => "truck",
        }
    }

    /// Base urban speed in km/h for ETA estimation.
    pub fn base_speed_kmh(&self) -> f64 {
        match self {
            Self::Motorcycle => 35.0,
            Self::Car => 30.0,
            Self::Van => 25.0,
            Self::Truck => 20.0,
        }
    }

    /// Routing mode accepted by the mapping provider.
    pub fn routing_mode(&self) -> &'static str {
        match self {
            Self::Truck => "truck",
            _ => "driving",
        }
    }
}

/// Vehicle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    InUse,
    Maintenance,
    OutOfService,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InUse => "in_use",
            Self::Maintenance => "maintenance",
            Self::OutOfService => "out_of_service",
        }
    }

    /// A vehicle is operable while it is available or already on a route.
    pub fn is_operable(&self) -> bool {
        matches!(self, Self::Available | Self::InUse)
    }
}

/// Vehicle entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Uuid,
    pub license_plate: String,
    pub kind: VehicleKind,

    pub max_weight_kg: f64,
    pub max_volume_m3: f64,

    /// Home depot; routes start and end here.
    pub depot: Coordinates,

    pub cost_per_km: f64,
    pub cost_per_hour: f64,

    pub has_gps: bool,
    pub has_temp_control: bool,
    pub has_lift_gate: bool,

    pub max_working_minutes: i32,
    pub break_every_minutes: Option<i32>,
    pub break_duration_minutes: Option<i32>,

    pub status: VehicleStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
