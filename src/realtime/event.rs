//! Events delivered to a strategy by the simulation driver.

use std::fmt;

use crate::model::car::CarId;
use crate::model::prices::EnergyPriceHistory;
use crate::model::units::format_time_of_day;

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    CarArrival(CarId),
    CarDeparture(CarId),
    /// The car's battery is full.
    CarFinished(CarId),
    EnergyPriceChange(EnergyPriceHistory),
    /// Explicit request to re-plan every assigned car.
    Reoptimize,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::CarArrival(_) => "arrival",
            EventKind::CarDeparture(_) => "departure",
            EventKind::CarFinished(_) => "finished",
            EventKind::EnergyPriceChange(_) => "price-change",
            EventKind::Reoptimize => "reoptimize",
        }
    }

    /// Delivery order among events due at the same second.
    pub fn order(&self) -> u8 {
        match self {
            EventKind::CarDeparture(_) => 0,
            EventKind::CarFinished(_) => 1,
            EventKind::CarArrival(_) => 2,
            EventKind::EnergyPriceChange(_) => 3,
            EventKind::Reoptimize => 4,
        }
    }
}

/// An event at a simulated time (seconds since midnight).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time_seconds: i64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(time_seconds: i64, kind: EventKind) -> Self {
        Self { time_seconds, kind }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind.name(), format_time_of_day(self.time_seconds))?;
        match &self.kind {
            EventKind::CarArrival(car) | EventKind::CarDeparture(car) | EventKind::CarFinished(car) => {
                write!(f, " (car n{car})")
            }
            _ => Ok(()),
        }
    }
}
