//! Real-time event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

/// Event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TrafficDelay,
    VehicleBreakdown,
    DriverUnavailable,
    NewUrgentOrder,
    CustomerReschedule,
    Weather,
    RoadClosure,
    RouteStarted,
    StopCompleted,
    DeliveryFailed,
    ReoptimizationTriggered,
    ReoptimizationCompleted,
    ReoptimizationFailed,
    ReoptimizationRejected,
    ManualIntervention,
    GpsDeviation,
    TimeWindowViolation,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrafficDelay => "traffic_delay",
            Self::VehicleBreakdown => "vehicle_breakdown",
            Self::DriverUnavailable => "driver_unavailable",
            Self::NewUrgentOrder => "new_urgent_order",
            Self::CustomerReschedule => "customer_reschedule",
            Self::Weather => "weather",
            Self::RoadClosure => "road_closure",
            Self::RouteStarted => "route_started",
            Self::StopCompleted => "stop_completed",
            Self::DeliveryFailed => "delivery_failed",
            Self::ReoptimizationTriggered => "reoptimization_triggered",
            Self::ReoptimizationCompleted => "reoptimization_completed",
            Self::ReoptimizationFailed => "reoptimization_failed",
            Self::ReoptimizationRejected => "reoptimization_rejected",
            Self::ManualIntervention => "manual_intervention",
            Self::GpsDeviation => "gps_deviation",
            Self::TimeWindowViolation => "time_window_violation",
        }
    }

    /// Kinds that can wake the adaptive optimizer between monitor ticks.
    pub fn is_disruption(&self) -> bool {
        matches!(
            self,
            Self::TrafficDelay
                | Self::VehicleBreakdown
                | Self::DriverUnavailable
                | Self::NewUrgentOrder
                | Self::CustomerReschedule
                | Self::Weather
                | Self::RoadClosure
        )
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    fn escalated(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Active,
    Resolved,
    Ignored,
    Escalated,
}

/// Event entity
///
/// Events reference other entities by id only; they never own them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub severity: EventSeverity,
    pub status: EventStatus,

    pub title: String,
    pub description: String,

    pub route_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub stop_id: Option<Uuid>,

    pub coordinates: Option<Coordinates>,

    pub timestamp: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,

    pub estimated_delay_minutes: i32,
    pub triggers_reoptimization: bool,

    /// Kind-specific context, opaque to the bus.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, severity: EventSeverity, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            status: EventStatus::Active,
            title: title.into(),
            description: String::new(),
            route_id: None,
            vehicle_id: None,
            driver_id: None,
            order_id: None,
            stop_id: None,
            coordinates: None,
            timestamp: Utc::now(),
            resolved_at: None,
            estimated_delay_minutes: 0,
            triggers_reoptimization: false,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_route(mut self, route_id: Uuid) -> Self {
        self.route_id = Some(route_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }

    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.status = EventStatus::Resolved;
        self.resolved_at = Some(at);
    }

    /// Escalate: bump severity one level and mark the event escalated.
    pub fn escalate(&mut self) {
        self.severity = self.severity.escalated();
        self.status = EventStatus::Escalated;
    }

    /// Traffic-delay event as reported by the traffic feed; marks itself a
    /// reoptimization trigger when the delay meets the configured threshold.
    pub fn traffic_delay(
        route_id: Uuid,
        delay_minutes: i32,
        threshold_minutes: i32,
        location: Option<Coordinates>,
    ) -> Self {
        let severity = if delay_minutes > 30 {
            EventSeverity::High
        } else {
            EventSeverity::Medium
        };
        let mut event = Self::new(
            EventKind::TrafficDelay,
            severity,
            format!("Traffic delay detected: {} minutes", delay_minutes),
        )
        .with_route(route_id)
        .with_description(format!(
            "Route experiencing a {} minute delay due to traffic conditions",
            delay_minutes
        ));
        event.coordinates = location;
        event.estimated_delay_minutes = delay_minutes;
        event.triggers_reoptimization = delay_minutes >= threshold_minutes;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Critical > EventSeverity::High);
        assert!(EventSeverity::High > EventSeverity::Medium);
        assert!(EventSeverity::Medium > EventSeverity::Low);
    }

    #[test]
    fn test_escalation_ladder() {
        let mut event = Event::new(EventKind::TrafficDelay, EventSeverity::Low, "t");
        event.escalate();
        assert_eq!(event.severity, EventSeverity::Medium);
        assert_eq!(event.status, EventStatus::Escalated);
        event.escalate();
        assert_eq!(event.severity, EventSeverity::High);
        event.escalate();
        assert_eq!(event.severity, EventSeverity::Critical);
        event.escalate();
        assert_eq!(event.severity, EventSeverity::Critical);
    }

    #[test]
    fn test_resolve_sets_timestamp() {
        let mut event = Event::new(EventKind::Weather, EventSeverity::Medium, "rain");
        assert!(event.is_active());
        let at = Utc::now();
        event.resolve(at);
        assert!(!event.is_active());
        assert_eq!(event.resolved_at, Some(at));
    }

    #[test]
    fn test_traffic_delay_factory_threshold() {
        let route_id = Uuid::new_v4();
        let below = Event::traffic_delay(route_id, 10, 15, None);
        assert!(!below.triggers_reoptimization);
        assert_eq!(below.severity, EventSeverity::Medium);

        let above = Event::traffic_delay(route_id, 45, 15, None);
        assert!(above.triggers_reoptimization);
        assert_eq!(above.severity, EventSeverity::High);
        assert_eq!(above.route_id, Some(route_id));
    }

    #[test]
    fn test_disruption_kinds() {
        assert!(EventKind::VehicleBreakdown.is_disruption());
        assert!(EventKind::CustomerReschedule.is_disruption());
        assert!(!EventKind::ReoptimizationCompleted.is_disruption());
        assert!(!EventKind::StopCompleted.is_disruption());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::NewUrgentOrder).unwrap();
        assert_eq!(json, "\"new_urgent_order\"");
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventKind::NewUrgentOrder);
    }
}
