//! Baseline strategy: every arriving car charges at full power on the first
//! free station, unless that breaks a fuse.

use tracing::{info, warn};

use crate::error::ScheduleError;
use crate::model::car::CarId;
use crate::model::phase::{Phase, PhaseCurrents};

use super::state::State;
use super::strategy::Strategy;
use super::validation::validate;

#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyGreedy;

impl StrategyGreedy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for StrategyGreedy {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn react_car_arrival(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError> {
        let Some(station_id) = state.first_free_station() else {
            info!(car, "no free charging station");
            return Ok(());
        };
        state.add_car_assignment(car, station_id)?;

        let (entry, station) = state.car_and_station_mut(car)?;
        let current = entry.max_current_per_phase.min(station.limit(Phase::One));
        let mut currents = PhaseCurrents::zero();
        for phase in Phase::ALL {
            if station.is_phase_connected(phase) {
                currents[phase] = current * entry.phase_usage(phase);
            }
        }
        let first = entry.first_available_timeslot;
        let last = entry.last_available_timeslot.min(entry.horizon().saturating_sub(1));
        let phase_one = currents[Phase::One];
        for value in entry.plan_mut().iter_mut().take(last + 1).skip(first) {
            *value = phase_one;
        }
        state.add_power_assignment(car, station_id, currents)?;

        if let Err(violation) = validate(state) {
            warn!(car, "full power overloads the grid ({violation}), not charging");
            if let Some(p) = state.remove_power_assignment(car) {
                state.add_power_assignment(car, p.station, PhaseCurrents::zero())?;
            }
            if let Some(entry) = state.car_mut(car) {
                entry.clear_plan();
            }
        }
        Ok(())
    }

    fn react_car_departure(&mut self, _state: &mut State, _car: CarId) -> Result<(), ScheduleError> {
        Ok(())
    }

    fn react_car_finished(&mut self, _state: &mut State, _car: CarId) -> Result<(), ScheduleError> {
        Ok(())
    }

    fn react_energy_price_change(&mut self, _state: &mut State) -> Result<(), ScheduleError> {
        Ok(())
    }
}
