//! Real-time condition simulator.
//!
//! Synthesizes traffic/weather/breakdown/order disruptions on a seeded RNG,
//! publishes them on the event bus, and keeps a live condition map that the
//! adaptive optimizer reads through `TrafficView`. Every generated event has
//! a lifetime; when it elapses the simulator publishes a resolution event and
//! restores the affected condition (vehicle back to available, traffic back
//! to normal).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::services::bus::EventBus;
use crate::services::geo;
use crate::types::{Coordinates, Event, EventKind, EventSeverity};

/// Read-side view of traffic conditions, consumed by the optimizer.
pub trait TrafficView: Send + Sync {
    /// Effective traffic factor at a location: 1.0 = free flow, 2.0 = half
    /// speed.
    fn factor_at(&self, location: &Coordinates) -> f64;
}

/// No live traffic feed: everything flows freely.
pub struct NoTraffic;

impl TrafficView for NoTraffic {
    fn factor_at(&self, _location: &Coordinates) -> f64 {
        1.0
    }
}

/// Traffic level of one congestion area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLevel {
    Light,
    Normal,
    Heavy,
    Jam,
}

/// Weather regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherKind {
    Clear,
    Rain,
    Snow,
    Fog,
    Storm,
}

/// A localized congestion area
#[derive(Debug, Clone, Serialize)]
pub struct TrafficCondition {
    pub location: Coordinates,
    pub level: TrafficLevel,
    /// Speed multiplier, < 1.0 means slower
    pub speed_multiplier: f64,
    pub radius_km: f64,
}

/// Area-wide weather state
#[derive(Debug, Clone, Serialize)]
pub struct WeatherCondition {
    pub kind: WeatherKind,
    pub intensity: f64,
    pub visibility_km: f64,
    pub speed_impact: f64,
}

impl WeatherCondition {
    fn clear() -> Self {
        Self {
            kind: WeatherKind::Clear,
            intensity: 0.0,
            visibility_km: 50.0,
            speed_impact: 1.0,
        }
    }
}

/// Snapshot of the whole condition state
#[derive(Debug, Clone, Serialize)]
pub struct ConditionsSnapshot {
    pub traffic: Vec<TrafficCondition>,
    pub weather: WeatherCondition,
    pub broken_vehicles: Vec<Uuid>,
    pub active_events: usize,
}

/// Simulation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParams {
    pub traffic_event_probability: f64,
    pub weather_change_probability: f64,
    pub vehicle_breakdown_probability: f64,
    pub new_order_probability: f64,
    pub order_reschedule_probability: f64,
    pub road_closure_probability: f64,
    pub update_interval_s: u64,
    /// Simulation speed multiplier: 2.0 ticks twice as fast
    pub speed: f64,
    pub center: Coordinates,
    pub radius_km: f64,
    /// Real vehicle ids breakdowns may hit; empty means synthetic ids
    #[serde(default)]
    pub vehicle_pool: Vec<Uuid>,
    pub seed: u64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            traffic_event_probability: 0.3,
            weather_change_probability: 0.1,
            vehicle_breakdown_probability: 0.05,
            new_order_probability: 0.2,
            order_reschedule_probability: 0.05,
            road_closure_probability: 0.02,
            update_interval_s: 30,
            speed: 1.0,
            center: Coordinates { lat: 55.7558, lng: 37.6176 },
            radius_km: 50.0,
            vehicle_pool: Vec::new(),
            seed: 42,
        }
    }
}

/// Partial update applied at the next tick
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParamsPatch {
    pub traffic_event_probability: Option<f64>,
    pub weather_change_probability: Option<f64>,
    pub vehicle_breakdown_probability: Option<f64>,
    pub new_order_probability: Option<f64>,
    pub order_reschedule_probability: Option<f64>,
    pub road_closure_probability: Option<f64>,
    pub update_interval_s: Option<u64>,
    pub speed: Option<f64>,
    pub radius_km: Option<f64>,
}

impl SimulationParamsPatch {
    fn apply(&self, params: &mut SimulationParams) {
        if let Some(v) = self.traffic_event_probability {
            params.traffic_event_probability = v;
        }
        if let Some(v) = self.weather_change_probability {
            params.weather_change_probability = v;
        }
        if let Some(v) = self.vehicle_breakdown_probability {
            params.vehicle_breakdown_probability = v;
        }
        if let Some(v) = self.new_order_probability {
            params.new_order_probability = v;
        }
        if let Some(v) = self.order_reschedule_probability {
            params.order_reschedule_probability = v;
        }
        if let Some(v) = self.road_closure_probability {
            params.road_closure_probability = v;
        }
        if let Some(v) = self.update_interval_s {
            params.update_interval_s = v;
        }
        if let Some(v) = self.speed {
            params.speed = v;
        }
        if let Some(v) = self.radius_km {
            params.radius_km = v;
        }
    }
}

/// A live disruption with its countdown and the state it must restore
struct ActiveDisruption {
    kind: EventKind,
    remaining_s: i64,
    vehicle_id: Option<Uuid>,
    traffic_key: Option<String>,
    resets_weather: bool,
}

struct SimulatorState {
    params: RwLock<SimulationParams>,
    pending_patch: Mutex<Option<SimulationParamsPatch>>,
    rng: Mutex<StdRng>,
    traffic: RwLock<HashMap<String, TrafficCondition>>,
    weather: RwLock<WeatherCondition>,
    broken_vehicles: RwLock<HashMap<Uuid, EventKind>>,
    active: Mutex<HashMap<Uuid, ActiveDisruption>>,
}

/// Condition simulator, the synthetic peer of real event ingestion.
#[derive(Clone)]
pub struct ConditionSimulator {
    state: Arc<SimulatorState>,
    bus: EventBus,
    running: Arc<Mutex<Option<CancellationToken>>>,
}

impl ConditionSimulator {
    pub fn new(bus: EventBus, params: SimulationParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        Self {
            state: Arc::new(SimulatorState {
                params: RwLock::new(params),
                pending_patch: Mutex::new(None),
                rng: Mutex::new(rng),
                traffic: RwLock::new(HashMap::new()),
                weather: RwLock::new(WeatherCondition::clear()),
                broken_vehicles: RwLock::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
            }),
            bus,
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the tick loop. No-op when already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Simulation already running, start is a no-op");
            return;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());

        let simulator = self.clone();
        tokio::spawn(async move {
            info!("Condition simulation started");
            loop {
                let interval = {
                    let params = simulator.state.params.read();
                    std::time::Duration::from_secs_f64(
                        params.update_interval_s as f64 / params.speed.max(0.01),
                    )
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => simulator.tick(),
                }
            }
            info!("Condition simulation loop exited");
        });
    }

    /// Stop the loop, resolve everything still active, restore conditions.
    /// Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
        }
        self.resolve_all();
        info!("Condition simulation stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stash a parameter patch; it takes effect at the next tick.
    pub fn update_params(&self, patch: SimulationParamsPatch) {
        *self.state.pending_patch.lock() = Some(patch);
    }

    pub fn conditions(&self) -> ConditionsSnapshot {
        ConditionsSnapshot {
            traffic: self.state.traffic.read().values().cloned().collect(),
            weather: self.state.weather.read().clone(),
            broken_vehicles: self.state.broken_vehicles.read().keys().copied().collect(),
            active_events: self.state.active.lock().len(),
        }
    }

    /// Generate and publish one event of the given kind immediately.
    pub fn force_event(&self, kind: EventKind) -> Event {
        let event = self.generate(kind);
        self.register_and_publish(&event);
        event
    }

    /// One simulation step: apply pending params, roll for new events,
    /// advance countdowns, resolve what expired.
    fn tick(&self) {
        if let Some(patch) = self.state.pending_patch.lock().take() {
            patch.apply(&mut self.state.params.write());
        }

        let (probabilities, elapsed_s) = {
            let params = self.state.params.read();
            (
                [
                    (EventKind::TrafficDelay, params.traffic_event_probability),
                    (EventKind::Weather, params.weather_change_probability),
                    (EventKind::VehicleBreakdown, params.vehicle_breakdown_probability),
                    (EventKind::NewUrgentOrder, params.new_order_probability),
                    (EventKind::CustomerReschedule, params.order_reschedule_probability),
                    (EventKind::RoadClosure, params.road_closure_probability),
                ],
                params.update_interval_s as i64,
            )
        };

        for (kind, probability) in probabilities {
            let fires = self.state.rng.lock().gen_bool(probability.clamp(0.0, 1.0));
            if fires {
                let event = self.generate(kind);
                self.register_and_publish(&event);
            }
        }

        self.advance_countdowns(elapsed_s);
    }

    fn advance_countdowns(&self, elapsed_s: i64) {
        let expired: Vec<Uuid> = {
            let mut active = self.state.active.lock();
            for disruption in active.values_mut() {
                disruption.remaining_s -= elapsed_s;
            }
            active
                .iter()
                .filter(|(_, d)| d.remaining_s <= 0)
                .map(|(id, _)| *id)
                .collect()
        };

        for event_id in expired {
            self.resolve(event_id);
        }
    }

    fn resolve(&self, event_id: Uuid) {
        let Some(disruption) = self.state.active.lock().remove(&event_id) else {
            return;
        };
        self.restore(&disruption);

        let mut resolution = Event::new(
            disruption.kind,
            EventSeverity::Low,
            format!("{} resolved", disruption.kind.as_str()),
        )
        .with_payload(serde_json::json!({ "resolves": event_id }));
        resolution.vehicle_id = disruption.vehicle_id;
        resolution.resolve(Utc::now());
        self.bus.publish(resolution);
    }

    fn resolve_all(&self) {
        let ids: Vec<Uuid> = self.state.active.lock().keys().copied().collect();
        for id in ids {
            self.resolve(id);
        }
    }

    fn restore(&self, disruption: &ActiveDisruption) {
        if let Some(vehicle_id) = disruption.vehicle_id {
            self.state.broken_vehicles.write().remove(&vehicle_id);
        }
        if let Some(key) = &disruption.traffic_key {
            self.state.traffic.write().remove(key);
        }
        if disruption.resets_weather {
            *self.state.weather.write() = WeatherCondition::clear();
        }
    }

    fn register_and_publish(&self, event: &Event) {
        let duration_minutes = event
            .payload
            .get("durationMinutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(30);
        let traffic_key = event
            .payload
            .get("trafficKey")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        self.state.active.lock().insert(
            event.id,
            ActiveDisruption {
                kind: event.kind,
                remaining_s: duration_minutes * 60,
                vehicle_id: event.vehicle_id,
                traffic_key,
                resets_weather: event.kind == EventKind::Weather,
            },
        );
        self.bus.publish(event.clone());
    }

    // -- generators ---------------------------------------------------------

    fn generate(&self, kind: EventKind) -> Event {
        match kind {
            EventKind::Weather => self.generate_weather(),
            EventKind::VehicleBreakdown => self.generate_breakdown(),
            EventKind::NewUrgentOrder => self.generate_urgent_order(),
            EventKind::CustomerReschedule => self.generate_reschedule(),
            EventKind::RoadClosure => self.generate_road_closure(),
            // Anything else behaves as a traffic disruption
            _ => self.generate_traffic(),
        }
    }

    fn random_location(&self) -> Coordinates {
        let (center, radius_km) = {
            let params = self.state.params.read();
            (params.center, params.radius_km)
        };
        let mut rng = self.state.rng.lock();
        let angle = rng.gen_range(0.0..std::f64::consts::TAU);
        let distance = rng.gen_range(0.0..radius_km);
        Coordinates {
            lat: center.lat + (distance * angle.cos()) / 111.0,
            lng: center.lng + (distance * angle.sin()) / (111.0 * center.lat.to_radians().cos()),
        }
    }

    fn generate_traffic(&self) -> Event {
        let location = self.random_location();
        let (level, speed_multiplier, radius_km, duration) = {
            let mut rng = self.state.rng.lock();
            let level = match rng.gen_range(0..4) {
                0 => TrafficLevel::Light,
                1 => TrafficLevel::Normal,
                2 => TrafficLevel::Heavy,
                _ => TrafficLevel::Jam,
            };
            let speed_multiplier = match level {
                TrafficLevel::Light => rng.gen_range(1.1..1.3),
                TrafficLevel::Normal => rng.gen_range(0.9..1.1),
                TrafficLevel::Heavy => rng.gen_range(0.6..0.8),
                TrafficLevel::Jam => rng.gen_range(0.2..0.4),
            };
            (
                level,
                speed_multiplier,
                rng.gen_range(2.0..15.0),
                rng.gen_range(15..120i64),
            )
        };

        let key = format!("{:.4},{:.4}", location.lat, location.lng);
        self.state.traffic.write().insert(
            key.clone(),
            TrafficCondition { location, level, speed_multiplier, radius_km },
        );

        let severity = match level {
            TrafficLevel::Heavy | TrafficLevel::Jam => EventSeverity::Medium,
            _ => EventSeverity::Low,
        };
        let delay = ((1.0 / speed_multiplier - 1.0) * 30.0).max(0.0) as i32;

        let mut event = Event::new(
            EventKind::TrafficDelay,
            severity,
            format!("Traffic changed to {:?}", level),
        )
        .with_payload(serde_json::json!({
            "level": level,
            "speedMultiplier": speed_multiplier,
            "radiusKm": radius_km,
            "durationMinutes": duration,
            "trafficKey": key,
        }));
        event.coordinates = Some(location);
        event.estimated_delay_minutes = delay;
        event.triggers_reoptimization = matches!(level, TrafficLevel::Heavy | TrafficLevel::Jam);
        event
    }

    fn generate_weather(&self) -> Event {
        let current = self.state.weather.read().kind;
        let (kind, intensity, duration) = {
            let mut rng = self.state.rng.lock();
            let choices: Vec<WeatherKind> = [
                WeatherKind::Clear,
                WeatherKind::Rain,
                WeatherKind::Snow,
                WeatherKind::Fog,
                WeatherKind::Storm,
            ]
            .into_iter()
            .filter(|k| *k != current)
            .collect();
            let kind = choices[rng.gen_range(0..choices.len())];
            (kind, rng.gen_range(0.1..0.9), rng.gen_range(30..240i64))
        };

        let (visibility, speed) = match kind {
            WeatherKind::Clear => (50.0, 1.0),
            WeatherKind::Rain => (20.0, 0.8),
            WeatherKind::Snow => (10.0, 0.6),
            WeatherKind::Fog => (5.0, 0.7),
            WeatherKind::Storm => (3.0, 0.5),
        };
        let condition = WeatherCondition {
            kind,
            intensity,
            visibility_km: visibility * (1.0 - intensity * 0.5),
            speed_impact: speed * (1.0 - intensity * 0.3),
        };
        *self.state.weather.write() = condition.clone();

        let severity = match kind {
            WeatherKind::Snow | WeatherKind::Storm => EventSeverity::High,
            _ => EventSeverity::Medium,
        };
        let mut event = Event::new(
            EventKind::Weather,
            severity,
            format!("Weather changed to {:?} (intensity {:.1})", kind, intensity),
        )
        .with_payload(serde_json::json!({
            "kind": kind,
            "intensity": intensity,
            "visibilityKm": condition.visibility_km,
            "speedImpact": condition.speed_impact,
            "durationMinutes": duration,
        }));
        event.triggers_reoptimization = severity >= EventSeverity::High;
        event
    }

    fn generate_breakdown(&self) -> Event {
        let location = self.random_location();
        let (vehicle_id, breakdown, repair_minutes) = {
            let params = self.state.params.read();
            let mut rng = self.state.rng.lock();
            let vehicle_id = if params.vehicle_pool.is_empty() {
                Uuid::new_v4()
            } else {
                params.vehicle_pool[rng.gen_range(0..params.vehicle_pool.len())]
            };
            let (breakdown, repair) = match rng.gen_range(0..5) {
                0 => ("engine_failure", rng.gen_range(120..300i64)),
                1 => ("tire_puncture", rng.gen_range(30..60)),
                2 => ("fuel_shortage", rng.gen_range(20..40)),
                3 => ("electrical_problem", rng.gen_range(60..180)),
                _ => ("transmission_issue", rng.gen_range(180..360)),
            };
            (vehicle_id, breakdown, repair)
        };

        self.state
            .broken_vehicles
            .write()
            .insert(vehicle_id, EventKind::VehicleBreakdown);

        let mut event = Event::new(
            EventKind::VehicleBreakdown,
            EventSeverity::High,
            format!("Vehicle breakdown: {}", breakdown),
        )
        .with_payload(serde_json::json!({
            "breakdownType": breakdown,
            "estimatedRepairMinutes": repair_minutes,
            "durationMinutes": repair_minutes,
        }));
        event.vehicle_id = Some(vehicle_id);
        event.coordinates = Some(location);
        event.estimated_delay_minutes = repair_minutes as i32;
        event.triggers_reoptimization = true;
        event
    }

    fn generate_urgent_order(&self) -> Event {
        let location = self.random_location();
        let weight = self.state.rng.lock().gen_range(1.0..40.0);

        let mut event = Event::new(
            EventKind::NewUrgentOrder,
            EventSeverity::Medium,
            "New urgent order placed",
        )
        .with_payload(serde_json::json!({
            "weightKg": weight,
            "durationMinutes": 60,
        }));
        event.coordinates = Some(location);
        event.triggers_reoptimization = true;
        event
    }

    fn generate_reschedule(&self) -> Event {
        let shift_minutes = self.state.rng.lock().gen_range(-120..240i64);
        Event::new(
            EventKind::CustomerReschedule,
            EventSeverity::Low,
            "Customer moved their delivery window",
        )
        .with_payload(serde_json::json!({
            "windowShiftMinutes": shift_minutes,
            "durationMinutes": 30,
        }))
    }

    fn generate_road_closure(&self) -> Event {
        let location = self.random_location();
        let (radius_km, duration) = {
            let mut rng = self.state.rng.lock();
            (rng.gen_range(0.5..5.0), rng.gen_range(30..180i64))
        };

        let key = format!("closure:{:.4},{:.4}", location.lat, location.lng);
        self.state.traffic.write().insert(
            key.clone(),
            TrafficCondition {
                location,
                level: TrafficLevel::Jam,
                speed_multiplier: 0.2,
                radius_km,
            },
        );

        let mut event = Event::new(
            EventKind::RoadClosure,
            EventSeverity::High,
            "Road closed",
        )
        .with_payload(serde_json::json!({
            "radiusKm": radius_km,
            "durationMinutes": duration,
            "trafficKey": key,
        }));
        event.coordinates = Some(location);
        event.estimated_delay_minutes = 20;
        event.triggers_reoptimization = true;
        event
    }
}

impl TrafficView for ConditionSimulator {
    fn factor_at(&self, location: &Coordinates) -> f64 {
        let traffic = self.state.traffic.read();
        let mut factor: f64 = 1.0;
        for condition in traffic.values() {
            let distance = geo::haversine_distance(location, &condition.location);
            if distance <= condition.radius_km {
                factor = factor.max(1.0 / condition.speed_multiplier.max(0.05));
            }
        }
        factor
    }
}
