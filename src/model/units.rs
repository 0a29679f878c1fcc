//! Time discretization and electrical unit conversions.
//!
//! Everything runs on a fixed three-phase 230 V grid. Simulated time is an
//! integer number of seconds since midnight; timeslots are 15 minutes wide.

/// Width of one planning timeslot in seconds.
pub const TIMESLOT_SECONDS: i64 = 900;

/// Number of timeslots in a simulated day.
pub const TIMESLOTS_PER_DAY: usize = 96;

/// Seconds in a simulated day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Line-to-neutral voltage of each phase.
pub const VOLTAGE_PER_PHASE: f64 = 230.0;

/// Share of grid current that ends up stored in the battery.
pub const DEFAULT_CHARGING_EFFICIENCY: f64 = 0.85;

/// Remaining capacity (Ah) below which a fill is considered complete.
pub const FILL_EPSILON: f64 = 1e-8;

/// Timeslot index containing `seconds`. Negative times map to slot 0.
pub fn timeslot_from_seconds(seconds: i64) -> usize {
    (seconds.max(0) / TIMESLOT_SECONDS) as usize
}

/// Start of timeslot `k` in seconds.
pub fn seconds_from_timeslot(k: usize) -> i64 {
    k as i64 * TIMESLOT_SECONDS
}

/// Current per phase (A) drawn by `kw` kilowatts spread over `phases` phases.
pub fn current_from_power(kw: f64, phases: f64) -> f64 {
    1000.0 * kw / (phases * VOLTAGE_PER_PHASE)
}

/// Power (kW) of `current` amperes on each of `phases` phases.
pub fn power_from_current(current: f64, phases: f64) -> f64 {
    phases * VOLTAGE_PER_PHASE * current / 1000.0
}

/// Charge in ampere-hours moved by `current` amperes over `seconds`.
pub fn ampere_hours(seconds: f64, current: f64) -> f64 {
    current * seconds / 3600.0
}

/// Formats seconds since midnight as `HH:MM:SS`.
pub fn format_time_of_day(seconds: i64) -> String {
    let s = seconds.rem_euclid(SECONDS_PER_DAY);
    format!("{:02}:{:02}:{:02}", s / 3600, (s / 60) % 60, s % 60)
}
