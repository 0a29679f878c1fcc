//! Departure time estimators.

use crate::model::car::Car;
use crate::model::units::{seconds_from_timeslot, timeslot_from_seconds};

use super::state::State;

/// Median departure observed in historic sessions (17:03).
pub const DEFAULT_MEDIAN_DEPARTURE_SECONDS: i64 = 61_380;

/// Estimates when a parked car will leave.
pub trait DepartureForecast {
    fn expected_departure_seconds(&self, state: &State, car: &Car) -> i64;

    fn expected_departure_timeslot(&self, state: &State, car: &Car) -> usize {
        timeslot_from_seconds(self.expected_departure_seconds(state, car))
    }
}

/// Predicts the same fixed time of day for every car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MedianTimestamp(pub i64);

impl Default for MedianTimestamp {
    fn default() -> Self {
        Self(DEFAULT_MEDIAN_DEPARTURE_SECONDS)
    }
}

impl DepartureForecast for MedianTimestamp {
    fn expected_departure_seconds(&self, _state: &State, _car: &Car) -> i64 {
        self.0
    }
}

/// Knows the actual departure. Cars without one are assumed to stay until
/// the end of the horizon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Oracle;

impl DepartureForecast for Oracle {
    fn expected_departure_seconds(&self, state: &State, car: &Car) -> i64 {
        if car.departure_seconds > 0 {
            car.departure_seconds
        } else {
            seconds_from_timeslot(state.horizon()) - 1
        }
    }

    fn expected_departure_timeslot(&self, state: &State, car: &Car) -> usize {
        timeslot_from_seconds(self.expected_departure_seconds(state, car)) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::car::CarBuilder;
    use crate::model::fuse_tree::FuseTree;
    use crate::model::prices::EnergyPriceHistory;

    fn state_with(car: Car) -> Option<State> {
        let tree = FuseTree::simple(100.0, 1, 32.0).ok()?;
        State::new(0, tree, vec![car], EnergyPriceHistory::flat(0.3, 96)).ok()
    }

    #[test]
    fn median_ignores_car() {
        let car = CarBuilder::new(0).build().expect("valid car");
        let state = state_with(car.clone()).expect("valid state");
        let f = MedianTimestamp::default();
        assert_eq!(f.expected_departure_seconds(&state, &car), 61_380);
        assert_eq!(f.expected_departure_timeslot(&state, &car), 68);
    }

    #[test]
    fn oracle_uses_actual_departure() {
        let car = CarBuilder::new(0).timestamps(3600, 40_000).build().expect("valid car");
        let state = state_with(car.clone()).expect("valid state");
        assert_eq!(Oracle.expected_departure_seconds(&state, &car), 40_000);
        assert_eq!(Oracle.expected_departure_timeslot(&state, &car), 45);
    }

    #[test]
    fn oracle_falls_back_to_horizon_end() {
        let car = CarBuilder::new(0).timestamps(0, 0).build().expect("valid car");
        let state = state_with(car.clone()).expect("valid state");
        assert_eq!(Oracle.expected_departure_seconds(&state, &car), 86_399);
    }
}
