use chrono::NaiveTime;

/// Depot gates: routes start and end inside these hours.
pub const DEPOT_OPEN_MINUTES: i32 = 8 * 60;
pub const DEPOT_CLOSE_MINUTES: i32 = 20 * 60;

/// Slack allowed when a vehicle arrives before a window opens.
pub const MAX_WAITING_MINUTES: i32 = 30;

pub const DEFAULT_SERVICE_DURATION_MINUTES: i32 = 15;

pub fn default_shift_start() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).expect("valid static default shift start")
}

pub fn default_shift_end() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).expect("valid static default shift end")
}
