//! Replays a day-ahead plan without any real-time correction.

use tracing::{info, warn};

use crate::error::ScheduleError;
use crate::model::car::CarId;
use crate::model::phase::Phase;

use super::dayahead::DayaheadSchedule;
use super::state::State;
use super::strategy::Strategy;

/// Overshoot above the car maximum still attributed to solver noise.
const MAX_CURRENT_SLACK: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct StrategyFromDayahead {
    schedule: DayaheadSchedule,
}

impl StrategyFromDayahead {
    pub fn new(schedule: DayaheadSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &DayaheadSchedule {
        &self.schedule
    }
}

impl Strategy for StrategyFromDayahead {
    fn name(&self) -> &'static str {
        "from-dayahead"
    }

    fn react_car_arrival(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError> {
        let Some(station_id) = self.schedule.station_for(car) else {
            info!(car, "car has no day-ahead reservation");
            return Ok(());
        };
        if state.free_station(station_id).is_none() {
            info!(car, station = station_id, "reserved station is not free");
            return Ok(());
        }
        state.add_car_assignment(car, station_id)?;

        let (entry, station) = state.car_and_station_mut(car)?;
        let min = entry.min_current_per_phase;
        let max = station.limit(Phase::One).min(entry.max_current_per_phase);
        let mut plan = self.schedule.station_plan(station_id);
        for (k, value) in plan.iter_mut().enumerate() {
            if *value > 0.0 && *value < min {
                warn!(car, k, current = *value, min, "raising planned current to car minimum");
                *value = min;
            } else if *value > max && *value < max + MAX_CURRENT_SLACK {
                warn!(car, k, current = *value, max, "lowering planned current to maximum");
                *value = max;
            }
        }
        entry.set_plan(plan)?;
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

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::car::CarBuilder;
    use crate::model::fuse_tree::FuseTree;
    use crate::model::prices::EnergyPriceHistory;
    use crate::realtime::dayahead::Reservation;
    use crate::realtime::event::{Event, EventKind};
    use crate::realtime::strategy::react;

    fn strategy() -> StrategyFromDayahead {
        let reservations = vec![Reservation {
            car: 0,
            station: 1,
            first_available_timeslot: 0,
        }];
        let mut plan = vec![0.0; 96];
        plan[0] = 3.0;
        plan[1] = 32.000_000_5;
        plan[2] = 20.0;
        let schedule = DayaheadSchedule::new(96, reservations, BTreeMap::from([(1, plan)])).expect("valid schedule");
        StrategyFromDayahead::new(schedule)
    }

    fn state() -> State {
        let tree = FuseTree::simple(100.0, 2, 32.0).expect("valid tree");
        let cars = (0..2)
            .filter_map(|id| CarBuilder::new(id).currents(18.0, 96.0).build().ok())
            .collect();
        State::new(0, tree, cars, EnergyPriceHistory::flat(0.3, 96)).expect("valid state")
    }

    #[test]
    fn applies_reserved_plan_with_corrections() {
        let mut st = state();
        let mut s = strategy();
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(0))).is_ok());
        assert_eq!(st.car_assignment(0).map(|a| a.station), Some(1));
        let car = st.car(0).expect("car present");
        assert_eq!(&car.plan()[..4], &[6.0, 32.0, 20.0, 0.0]);
    }

    #[test]
    fn unreserved_car_is_not_admitted() {
        let mut st = state();
        let mut s = strategy();
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(1))).is_ok());
        assert!(st.is_car_unassigned(1));
    }
}
