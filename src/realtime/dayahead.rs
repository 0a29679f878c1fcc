//! Externally produced day-ahead plan: which car charges where, and the
//! current curve each station is meant to follow.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DayaheadError;
use crate::model::car::CarId;
use crate::model::station::StationId;
use crate::model::units::seconds_from_timeslot;

use super::state::State;

/// Seconds a planned car may be late before its station is released.
pub const DEFAULT_ALLOWED_LATENESS_SECONDS: i64 = 900;

/// Planned binding of a car to a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub car: CarId,
    pub station: StationId,
    /// Timeslot the car was planned to arrive in.
    pub first_available_timeslot: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayaheadSchedule {
    timeslots: usize,
    reservations: Vec<Reservation>,
    /// Phase-1 current per timeslot. Missing entries are zero.
    station_plans: BTreeMap<StationId, Vec<f64>>,
}

impl DayaheadSchedule {
    /// Builds a plan over `timeslots` timeslots.
    ///
    /// Slightly negative currents (down to -1e-6 A) are solver noise and
    /// corrected to zero.
    ///
    /// # Errors
    ///
    /// Fails on a clearly negative current or a car reserved twice.
    pub fn new(
        timeslots: usize,
        reservations: Vec<Reservation>,
        mut station_plans: BTreeMap<StationId, Vec<f64>>,
    ) -> Result<Self, DayaheadError> {
        let mut seen = BTreeSet::new();
        for r in &reservations {
            if !seen.insert(r.car) {
                return Err(DayaheadError::DuplicateReservation(r.car));
            }
        }
        for (&station, plan) in station_plans.iter_mut() {
            for (k, value) in plan.iter_mut().enumerate() {
                if *value < -1e-6 {
                    return Err(DayaheadError::NegativeCurrent {
                        station,
                        k,
                        value: *value,
                    });
                }
                if *value < 0.0 {
                    debug!(station, k, value = *value, "correcting plan value to 0");
                    *value = 0.0;
                }
            }
        }
        Ok(Self {
            timeslots,
            reservations,
            station_plans,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, DayaheadError> {
        let raw: Self = serde_json::from_str(json).map_err(|e| DayaheadError::Parse(e.to_string()))?;
        Self::new(raw.timeslots, raw.reservations, raw.station_plans)
    }

    pub fn to_json(&self) -> Result<String, DayaheadError> {
        serde_json::to_string_pretty(self).map_err(|e| DayaheadError::Parse(e.to_string()))
    }

    pub fn timeslots(&self) -> usize {
        self.timeslots
    }

    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    pub fn contains(&self, car: CarId) -> bool {
        self.reservation(car).is_some()
    }

    pub fn reservation(&self, car: CarId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.car == car)
    }

    pub fn station_for(&self, car: CarId) -> Option<StationId> {
        self.reservation(car).map(|r| r.station)
    }

    /// Full-length phase-1 curve for `station`, zero where nothing is planned.
    pub fn station_plan(&self, station: StationId) -> Vec<f64> {
        let mut plan = vec![0.0; self.timeslots];
        if let Some(planned) = self.station_plans.get(&station) {
            for (slot, &value) in plan.iter_mut().zip(planned) {
                *slot = value;
            }
        }
        plan
    }

    /// Number of distinct stations still held for planned cars at the
    /// current time.
    ///
    /// A station stays reserved while its car has arrived or is at most
    /// `allowed_lateness_seconds` late.
    pub fn reserved_spots(&self, state: &State, allowed_lateness_seconds: i64) -> usize {
        let now = state.current_seconds();
        self.reservations
            .iter()
            .filter(|r| {
                let lateness = now - seconds_from_timeslot(r.first_available_timeslot);
                lateness <= allowed_lateness_seconds || state.is_car_assigned(r.car)
            })
            .map(|r| r.station)
            .collect::<BTreeSet<_>>()
            .len()
    }
}
