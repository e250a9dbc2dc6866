//! VRPTW problem builder
//!
//! Converts domain entities into the solver's internal problem form and
//! rejects invalid input before any search starts.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::types::{Coordinates, Driver, Order, OrderPriority, Vehicle, VehicleKind};
use super::{ConstraintKind, SolveError};

/// An order node in the problem. Times are minutes from midnight (UTC) of the
/// planned date.
#[derive(Debug, Clone)]
pub struct VrpOrder {
    pub id: Uuid,
    pub coordinates: Coordinates,
    pub tw_start_min: i32,
    pub tw_end_min: i32,
    pub weight_kg: f64,
    pub volume_m3: f64,
    pub service_minutes: i32,
    pub priority: OrderPriority,
}

/// A vehicle/driver pairing available to the solver
#[derive(Debug, Clone)]
pub struct VrpVehicle {
    pub vehicle_id: Uuid,
    pub driver_id: Uuid,
    pub kind: VehicleKind,
    pub max_weight_kg: f64,
    pub max_volume_m3: f64,
    pub max_stops: u32,
    /// Working-time ceiling: the tighter of the vehicle limit and the
    /// driver's shift length.
    pub max_working_minutes: i32,
    /// A break of `break_duration_minutes` is scheduled once this much
    /// on-duty time accumulates without one.
    pub break_every_minutes: Option<i32>,
    pub break_duration_minutes: Option<i32>,
    pub cost_per_km: f64,
    pub shift_start_min: i32,
    pub shift_end_min: i32,
}

/// VRPTW problem definition
#[derive(Debug, Clone)]
pub struct VrpProblem {
    pub depot: Coordinates,
    pub planned_date: NaiveDate,
    /// Order i maps to matrix node i+1; node 0 is the depot.
    pub orders: Vec<VrpOrder>,
    pub vehicles: Vec<VrpVehicle>,
    pub depot_open_min: i32,
    pub depot_close_min: i32,
    /// Slack allowed when arriving before a window opens.
    pub max_waiting_minutes: i32,
}

impl VrpProblem {
    /// Assemble and validate a problem. Vehicles and drivers are paired by
    /// position, so callers pass equally long, matching lists.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        orders: &[Order],
        vehicles: &[Vehicle],
        drivers: &[Driver],
        depot: Coordinates,
        planned_date: NaiveDate,
        depot_open_min: i32,
        depot_close_min: i32,
        max_waiting_minutes: i32,
    ) -> Result<Self, SolveError> {
        if orders.is_empty() {
            return Err(SolveError::InvalidInput("no orders provided".to_string()));
        }
        if vehicles.is_empty() {
            return Err(SolveError::InvalidInput("no vehicles provided".to_string()));
        }
        if drivers.is_empty() {
            return Err(SolveError::InvalidInput("no drivers provided".to_string()));
        }

        let midnight = planned_date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc();

        let mut vrp_orders = Vec::with_capacity(orders.len());
        for order in orders {
            if !order.coordinates.lat.is_finite() || !order.coordinates.lng.is_finite() {
                return Err(SolveError::InvalidInput(format!(
                    "order {} missing location coordinates",
                    order.id
                )));
            }
            if !order.time_window.is_valid() {
                return Err(SolveError::TimeWindowViolation {
                    order_id: Some(order.id),
                    message: format!(
                        "order {} has an invalid time window ({} >= {})",
                        order.id, order.time_window.start, order.time_window.end
                    ),
                });
            }

            let tw_start_min = (order.time_window.start - midnight).num_minutes() as i32;
            let tw_end_min = (order.time_window.end - midnight).num_minutes() as i32;

            // A window strictly outside depot hours can never be served.
            if tw_end_min < depot_open_min || tw_start_min > depot_close_min {
                return Err(SolveError::TimeWindowViolation {
                    order_id: Some(order.id),
                    message: format!(
                        "order {} window [{}, {}] lies outside depot hours [{}, {}]",
                        order.id, tw_start_min, tw_end_min, depot_open_min, depot_close_min
                    ),
                });
            }

            vrp_orders.push(VrpOrder {
                id: order.id,
                coordinates: order.coordinates,
                tw_start_min,
                tw_end_min,
                weight_kg: order.weight_kg,
                volume_m3: order.volume_m3,
                service_minutes: order.service_minutes,
                priority: order.priority,
            });
        }

        // Aggregate capacity check before any search
        let total_demand: f64 = orders.iter().map(|o| o.weight_kg).sum();
        let total_capacity: f64 = vehicles.iter().map(|v| v.max_weight_kg).sum();
        if total_demand > total_capacity {
            return Err(SolveError::CapacityViolation {
                total_demand_kg: total_demand,
                total_capacity_kg: total_capacity,
            });
        }

        let vrp_vehicles = vehicles
            .iter()
            .zip(drivers.iter())
            .map(|(vehicle, driver)| {
                let shift_start_min = minutes_of_day(driver.shift_start);
                let shift_end_min = minutes_of_day(driver.shift_end);
                let shift_len = (shift_end_min - shift_start_min).max(0);
                VrpVehicle {
                    vehicle_id: vehicle.id,
                    driver_id: driver.id,
                    kind: vehicle.kind,
                    max_weight_kg: vehicle.max_weight_kg,
                    max_volume_m3: vehicle.max_volume_m3,
                    max_stops: driver.max_stops_per_route,
                    max_working_minutes: vehicle.max_working_minutes.min(shift_len),
                    break_every_minutes: vehicle.break_every_minutes,
                    break_duration_minutes: vehicle.break_duration_minutes,
                    cost_per_km: vehicle.cost_per_km,
                    shift_start_min,
                    shift_end_min,
                }
            })
            .collect();

        Ok(Self {
            depot,
            planned_date,
            orders: vrp_orders,
            vehicles: vrp_vehicles,
            depot_open_min,
            depot_close_min,
            max_waiting_minutes,
        })
    }

    /// Depot plus all delivery points, in matrix node order.
    pub fn locations(&self) -> Vec<Coordinates> {
        let mut locations = Vec::with_capacity(self.orders.len() + 1);
        locations.push(self.depot);
        locations.extend(self.orders.iter().map(|o| o.coordinates));
        locations
    }

    /// Midnight of the planned date, the zero point of all minute offsets.
    pub fn midnight(&self) -> chrono::DateTime<Utc> {
        self.planned_date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc()
    }

    /// Diagnose why a single order cannot stand alone on the given vehicle.
    /// Used to build per-order infeasibility reports.
    pub fn lone_order_constraint(
        &self,
        order_idx: usize,
        vehicle: &VrpVehicle,
    ) -> Option<ConstraintKind> {
        let order = &self.orders[order_idx];
        if order.weight_kg > vehicle.max_weight_kg || order.volume_m3 > vehicle.max_volume_m3 {
            return Some(ConstraintKind::Capacity);
        }
        if vehicle.max_stops == 0 {
            return Some(ConstraintKind::StopLimit);
        }
        None
    }
}

fn minutes_of_day(t: chrono::NaiveTime) -> i32 {
    use chrono::Timelike;
    (t.num_seconds_from_midnight() / 60) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DriverStatus, ExperienceLevel, OrderStatus, TimeWindow, VehicleStatus,
    };
    use chrono::{NaiveTime, TimeZone};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 16).unwrap()
    }

    fn at(h: u32, m: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, h, m, 0).unwrap()
    }

    fn make_order(weight: f64, start_h: u32, end_h: u32) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_name: "Customer".to_string(),
            coordinates: Coordinates { lat: 55.76, lng: 37.62 },
            delivery_date: date(),
            time_window: TimeWindow::new(at(start_h, 0), at(end_h, 0)),
            weight_kg: weight,
            volume_m3: 0.1,
            service_minutes: 15,
            priority: OrderPriority::Medium,
            status: OrderStatus::Pending,
            route_id: None,
            stop_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn make_vehicle(max_weight: f64) -> Vehicle {
        Vehicle {
            id: Uuid::new_v4(),
            license_plate: "A 001".to_string(),
            kind: VehicleKind::Van,
            max_weight_kg: max_weight,
            max_volume_m3: 10.0,
            depot: Coordinates { lat: 55.7558, lng: 37.6176 },
            cost_per_km: 1.0,
            cost_per_hour: 10.0,
            has_gps: true,
            has_temp_control: false,
            has_lift_gate: false,
            max_working_minutes: 480,
            break_every_minutes: None,
            break_duration_minutes: None,
            status: VehicleStatus::Available,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn make_driver() -> Driver {
        Driver {
            id: Uuid::new_v4(),
            full_name: "Driver".to_string(),
            experience: ExperienceLevel::Experienced,
            max_stops_per_route: 10,
            shift_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            shift_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            can_handle_fragile: false,
            can_handle_high_value: false,
            status: DriverStatus::Available,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn build(
        orders: &[Order],
        vehicles: &[Vehicle],
        drivers: &[Driver],
    ) -> Result<VrpProblem, SolveError> {
        VrpProblem::build(
            orders,
            vehicles,
            drivers,
            Coordinates { lat: 55.7558, lng: 37.6176 },
            date(),
            8 * 60,
            20 * 60,
            30,
        )
    }

    #[test]
    fn test_empty_orders_rejected() {
        let err = build(&[], &[make_vehicle(100.0)], &[make_driver()]).unwrap_err();
        assert!(matches!(err, SolveError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_vehicles_rejected() {
        let err = build(&[make_order(10.0, 9, 17)], &[], &[make_driver()]).unwrap_err();
        assert!(matches!(err, SolveError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_drivers_rejected() {
        let err = build(&[make_order(10.0, 9, 17)], &[make_vehicle(100.0)], &[]).unwrap_err();
        assert!(matches!(err, SolveError::InvalidInput(_)));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let mut order = make_order(10.0, 9, 17);
        order.time_window = TimeWindow::new(at(17, 0), at(9, 0));
        let err = build(&[order], &[make_vehicle(100.0)], &[make_driver()]).unwrap_err();
        assert!(matches!(err, SolveError::TimeWindowViolation { .. }));
    }

    #[test]
    fn test_window_before_depot_opening_rejected() {
        // Depot opens at 08:00; window [05:00, 07:00] can never be served
        let order = make_order(10.0, 5, 7);
        let err = build(&[order], &[make_vehicle(100.0)], &[make_driver()]).unwrap_err();
        assert!(matches!(err, SolveError::TimeWindowViolation { .. }));
    }

    #[test]
    fn test_aggregate_overweight_rejected() {
        let orders = vec![make_order(60.0, 9, 17), make_order(50.0, 9, 17)];
        let err = build(&orders, &[make_vehicle(100.0)], &[make_driver()]).unwrap_err();
        match err {
            SolveError::CapacityViolation { total_demand_kg, total_capacity_kg } => {
                assert_eq!(total_demand_kg, 110.0);
                assert_eq!(total_capacity_kg, 100.0);
            }
            other => panic!("expected CapacityViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_demand_exactly_at_capacity_accepted() {
        let orders = vec![make_order(60.0, 9, 17), make_order(40.0, 9, 17)];
        assert!(build(&orders, &[make_vehicle(100.0)], &[make_driver()]).is_ok());
    }

    #[test]
    fn test_valid_problem_shape() {
        let orders = vec![make_order(10.0, 9, 17), make_order(20.0, 10, 16)];
        let problem = build(&orders, &[make_vehicle(100.0)], &[make_driver()]).unwrap();

        assert_eq!(problem.orders.len(), 2);
        assert_eq!(problem.vehicles.len(), 1);
        assert_eq!(problem.locations().len(), 3);
        assert_eq!(problem.orders[0].tw_start_min, 9 * 60);
        assert_eq!(problem.orders[1].tw_end_min, 16 * 60);

        // Working time is the tighter of vehicle limit and shift length
        assert_eq!(problem.vehicles[0].max_working_minutes, 480);
    }

    #[test]
    fn test_break_policy_carried_from_vehicle() {
        let mut vehicle = make_vehicle(100.0);
        vehicle.break_every_minutes = Some(240);
        vehicle.break_duration_minutes = Some(45);

        let problem = build(&[make_order(10.0, 9, 17)], &[vehicle], &[make_driver()]).unwrap();
        assert_eq!(problem.vehicles[0].break_every_minutes, Some(240));
        assert_eq!(problem.vehicles[0].break_duration_minutes, Some(45));
    }

    #[test]
    fn test_shift_tighter_than_vehicle_limit() {
        let mut vehicle = make_vehicle(100.0);
        vehicle.max_working_minutes = 10 * 60;
        let mut driver = make_driver();
        driver.shift_start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        driver.shift_end = NaiveTime::from_hms_opt(13, 0, 0).unwrap();

        let problem = build(&[make_order(10.0, 9, 12)], &[vehicle], &[driver]).unwrap();
        assert_eq!(problem.vehicles[0].max_working_minutes, 4 * 60);
    }

    #[test]
    fn test_lone_order_capacity_diagnosis() {
        let orders = vec![make_order(10.0, 9, 17)];
        let problem = build(&orders, &[make_vehicle(100.0)], &[make_driver()]).unwrap();

        let mut tiny = problem.vehicles[0].clone();
        tiny.max_weight_kg = 5.0;
        assert_eq!(
            problem.lone_order_constraint(0, &tiny),
            Some(ConstraintKind::Capacity)
        );
        assert_eq!(problem.lone_order_constraint(0, &problem.vehicles[0]), None);
    }
}
