//! Error types for scenario construction, state bookkeeping and scheduling.
//!
//! Fuse violations are not errors: they are plain [`Violation`] values fed
//! into the repair loop. Everything here is a hard failure that is surfaced
//! to the caller.

use thiserror::Error;

use crate::model::car::CarId;
use crate::model::fuse_tree::NodeId;
use crate::model::station::StationId;
use crate::realtime::validation::Violation;

/// Invalid car construction or mutation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CarError {
    #[error("car {car}: {phases} used phases x {per_phase} A per phase does not equal {total} A")]
    PhaseRatio {
        car: CarId,
        phases: f64,
        per_phase: f64,
        total: f64,
    },

    #[error("car {car}: capacity {capacity} Ah exceeds maximum {max} Ah")]
    CapacityAboveMax { car: CarId, capacity: f64, max: f64 },

    #[error("car {car}: capacity {capacity} Ah is negative")]
    NegativeCapacity { car: CarId, capacity: f64 },

    #[error("car {car}: minimum loading state {value} Ah outside [0, {max}] Ah")]
    MinLoadingState { car: CarId, value: f64, max: f64 },

    #[error("car {car}: availability window {first}..={last} is empty or beyond {horizon} timeslots")]
    Availability {
        car: CarId,
        first: usize,
        last: usize,
        horizon: usize,
    },

    #[error("car {car}: plan has {got} timeslots, expected {expected}")]
    PlanLength {
        car: CarId,
        got: usize,
        expected: usize,
    },

    #[error("car {car}: does not use any phase")]
    NoPhases { car: CarId },
}

/// Failures of the nonlinear battery simulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatteryError {
    #[error("initial state of charge {0} outside [0, 1]")]
    InitialSoc(f64),

    #[error("simulation already advanced to second {step}, cannot restart at {start}")]
    AlreadySimulated { step: i64, start: i64 },

    #[error("simulation at second {step} cannot resume at {start} without a hole")]
    Hole { step: i64, start: i64 },

    #[error("invalid capacity interval [{start}, {end}) queried at {now}")]
    Interval { now: i64, start: i64, end: i64 },

    #[error("car {0} has no nonlinear battery parameters")]
    MissingBatteryData(CarId),
}

/// Invalid fuse tree configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    #[error("node {node}: phase {phase} is disconnected but limited to {limit} A")]
    DisconnectedPhase { node: String, phase: u8, limit: f64 },

    #[error("station {0} appears more than once in the fuse tree")]
    DuplicateStation(StationId),

    #[error("fuse tree has {got} stations, expected {expected}")]
    StationCount { got: usize, expected: usize },

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("unknown station {0}")]
    UnknownStation(StationId),
}

/// Inconsistent assignment bookkeeping in the session state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssignmentError {
    #[error("car {0} is already assigned")]
    CarAlreadyAssigned(CarId),

    #[error("station {0} is already occupied")]
    StationOccupied(StationId),

    #[error("station {0} is not occupied")]
    StationNotOccupied(StationId),

    #[error("station {0} is not free")]
    StationNotFree(StationId),

    #[error("car {0} is not assigned")]
    CarNotAssigned(CarId),

    #[error("car {car} is not available at {time} s (arrival {arrival} s, departure {departure} s)")]
    CarNotAvailable {
        car: CarId,
        time: i64,
        arrival: i64,
        departure: i64,
    },

    #[error("car {0} already has a power assignment")]
    PowerAlreadyAssigned(CarId),

    #[error("car {0} is not in the unassigned set")]
    NotUnassigned(CarId),

    #[error("car {0} is already in the unassigned set")]
    AlreadyUnassigned(CarId),

    #[error("unknown car {0}")]
    UnknownCar(CarId),

    #[error("car {0} appears more than once in the population")]
    DuplicateCar(CarId),

    #[error("unknown station {0}")]
    UnknownStation(StationId),

    #[error("snapshot: {0}")]
    Snapshot(String),
}

/// Whole-state validation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("fuse violation: {0}")]
    Fuse(Violation),

    #[error("car {0} has more than one assignment")]
    DuplicateCar(CarId),

    #[error("station {0} has more than one assignment")]
    DuplicateStation(StationId),

    #[error("car {car}: {current} A on phase {phase} exceeds station {station} limit {limit} A")]
    StationFuse {
        car: CarId,
        station: StationId,
        phase: u8,
        current: f64,
        limit: f64,
    },

    #[error("car {car}: {current} A on phase {phase} exceeds car maximum {max} A")]
    CarMax {
        car: CarId,
        phase: u8,
        current: f64,
        max: f64,
    },

    #[error("car {car}: {current} A on phase {phase} below car minimum {min} A")]
    CarMin {
        car: CarId,
        phase: u8,
        current: f64,
        min: f64,
    },

    #[error("car {car}: phase currents do not follow the car's phase usage")]
    PhaseRatio { car: CarId },
}

/// Malformed day-ahead plan.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DayaheadError {
    #[error("station {station}: negative current {value} A at timeslot {k}")]
    NegativeCurrent { station: StationId, k: usize, value: f64 },

    #[error("car {0} is reserved twice")]
    DuplicateReservation(CarId),

    #[error("day-ahead plan: {0}")]
    Parse(String),
}

/// Failures raised while reacting to an event.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("rescheduled every car below {node} at timeslot {timeslot} but the violation persists")]
    RepairExhausted { timeslot: usize, node: String },

    #[error("no violation recorded for timeslot {0}")]
    MissingViolation(usize),

    #[error("strategy {strategy} does not support {event} events")]
    UnsupportedEvent {
        strategy: &'static str,
        event: &'static str,
    },

    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Battery(#[from] BatteryError),

    #[error(transparent)]
    Car(#[from] CarError),
}

/// Failures while building a scenario from its configuration.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Car(#[from] CarError),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Dayahead(#[from] DayaheadError),

    #[error(transparent)]
    Prices(#[from] crate::model::prices::EmptyPrices),
}
