//! Strategy contract and event dispatch.
//!
//! Strategies implement one handler per event kind. [`react`] wraps them
//! with the bookkeeping every strategy relies on, so handlers never observe
//! a departed car's binding and unassignable arrivals always land in the
//! unassigned set.

use tracing::{debug, info};

use crate::error::ScheduleError;
use crate::model::car::CarId;

use super::event::{Event, EventKind};
use super::state::State;

/// A real-time charging strategy.
pub trait Strategy {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    fn react_car_arrival(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError>;

    /// Called after the car's bindings have been removed.
    fn react_car_departure(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError>;

    /// Called after the car's power assignment has been removed.
    fn react_car_finished(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError>;

    /// Called after the new prices have been stored in `state`.
    fn react_energy_price_change(&mut self, state: &mut State) -> Result<(), ScheduleError>;

    fn react_reoptimize(&mut self, _state: &mut State) -> Result<(), ScheduleError> {
        Err(ScheduleError::UnsupportedEvent {
            strategy: self.name(),
            event: "reoptimize",
        })
    }
}

/// Delivers `event` to `strategy`, performing the shared bookkeeping.
///
/// # Errors
///
/// Propagates handler failures and assignment inconsistencies.
pub fn react<S: Strategy + ?Sized>(strategy: &mut S, state: &mut State, event: Event) -> Result<(), ScheduleError> {
    match &event.kind {
        EventKind::EnergyPriceChange(_) => info!(strategy = strategy.name(), "reacting to {event}"),
        _ => debug!(strategy = strategy.name(), k = state.current_timeslot(), "reacting to {event}"),
    }

    match event.kind {
        EventKind::CarArrival(car) => {
            strategy.react_car_arrival(state, car)?;
            if !state.is_car_assigned(car) {
                info!(car, "no station for car, marking unassigned");
                state.add_unassigned_car(car)?;
            }
        }
        EventKind::CarFinished(car) => {
            state.remove_power_assignment(car);
            strategy.react_car_finished(state, car)?;
        }
        EventKind::CarDeparture(car) => {
            state.remove_power_assignment(car);
            if state.is_car_assigned(car) {
                state.remove_car_assignment(car)?;
            } else if state.is_car_unassigned(car) {
                state.remove_unassigned_car(car)?;
            }
            strategy.react_car_departure(state, car)?;
        }
        EventKind::EnergyPriceChange(prices) => {
            state.set_prices(prices);
            strategy.react_energy_price_change(state)?;
        }
        EventKind::Reoptimize => strategy.react_reoptimize(state)?,
    }
    Ok(())
}

/// A strategy for tests: counts calls and assigns nothing.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Recording {
    pub calls: Vec<&'static str>,
    pub saw_binding_on_departure: bool,
}

#[cfg(test)]
impl Strategy for Recording {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn react_car_arrival(&mut self, _state: &mut State, _car: CarId) -> Result<(), ScheduleError> {
        self.calls.push("arrival");
        Ok(())
    }

    fn react_car_departure(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError> {
        self.calls.push("departure");
        self.saw_binding_on_departure = state.is_car_assigned(car) || state.is_car_power_assigned(car);
        Ok(())
    }

    fn react_car_finished(&mut self, _state: &mut State, _car: CarId) -> Result<(), ScheduleError> {
        self.calls.push("finished");
        Ok(())
    }

    fn react_energy_price_change(&mut self, _state: &mut State) -> Result<(), ScheduleError> {
        self.calls.push("price");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::car::CarBuilder;
    use crate::model::fuse_tree::FuseTree;
    use crate::model::phase::PhaseCurrents;
    use crate::model::prices::EnergyPriceHistory;

    fn state() -> State {
        let tree = FuseTree::simple(100.0, 1, 32.0).expect("valid tree");
        let cars = (0..2).filter_map(|id| CarBuilder::new(id).build().ok()).collect();
        State::new(0, tree, cars, EnergyPriceHistory::flat(0.3, 96)).expect("valid state")
    }

    #[test]
    fn unassigned_arrival_is_recorded() {
        let mut s = state();
        let mut strategy = Recording::default();
        assert!(react(&mut strategy, &mut s, Event::new(0, EventKind::CarArrival(1))).is_ok());
        assert!(s.is_car_unassigned(1));
        assert_eq!(strategy.calls, ["arrival"]);
    }

    #[test]
    fn departure_clears_bindings_before_handler() {
        let mut s = state();
        assert!(s.add_car_assignment(0, 0).is_ok());
        assert!(s.add_power_assignment(0, 0, PhaseCurrents::uniform(16.0)).is_ok());
        let mut strategy = Recording::default();
        assert!(react(&mut strategy, &mut s, Event::new(10, EventKind::CarDeparture(0))).is_ok());
        assert!(!strategy.saw_binding_on_departure);
        assert!(s.is_any_station_free());
    }

    #[test]
    fn departure_of_unassigned_car() {
        let mut s = state();
        assert!(s.add_unassigned_car(1).is_ok());
        let mut strategy = Recording::default();
        assert!(react(&mut strategy, &mut s, Event::new(10, EventKind::CarDeparture(1))).is_ok());
        assert!(s.unassigned_cars().is_empty());
    }

    #[test]
    fn finished_drops_power_assignment() {
        let mut s = state();
        assert!(s.add_car_assignment(0, 0).is_ok());
        assert!(s.add_power_assignment(0, 0, PhaseCurrents::uniform(16.0)).is_ok());
        let mut strategy = Recording::default();
        assert!(react(&mut strategy, &mut s, Event::new(10, EventKind::CarFinished(0))).is_ok());
        assert!(!s.is_car_power_assigned(0));
        assert!(s.is_car_assigned(0));
    }

    #[test]
    fn price_change_is_stored_first() {
        let mut s = state();
        let mut strategy = Recording::default();
        let prices = EnergyPriceHistory::flat(0.5, 96);
        assert!(react(&mut strategy, &mut s, Event::new(0, EventKind::EnergyPriceChange(prices))).is_ok());
        assert_eq!(s.prices().price(0), 0.5);
    }

    #[test]
    fn reoptimize_is_unsupported_by_default() {
        let mut s = state();
        let mut strategy = Recording::default();
        let result = react(&mut strategy, &mut s, Event::new(0, EventKind::Reoptimize));
        assert!(matches!(
            result,
            Err(ScheduleError::UnsupportedEvent { event: "reoptimize", .. })
        ));
    }
}
