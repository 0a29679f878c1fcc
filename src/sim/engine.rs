//! Simulation driver: delivers events to a strategy and charges the parked
//! cars second by second.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ScenarioConfig;
use crate::error::ScheduleError;
use crate::model::car::CarId;
use crate::model::phase::{Phase, PhaseCurrents};
use crate::model::units::{DEFAULT_CHARGING_EFFICIENCY, TIMESLOT_SECONDS, VOLTAGE_PER_PHASE, seconds_from_timeslot};
use crate::realtime::event::{Event, EventKind};
use crate::realtime::state::State;
use crate::realtime::strategy::{Strategy, react};
use crate::realtime::validation::validate_at_timeslot;

use super::clock::Clock;

/// Driver parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSettings {
    pub charging_efficiency: f64,
    pub price_change_interval_seconds: i64,
    /// 0 disables reoptimize events.
    pub reoptimize_interval_seconds: i64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            charging_efficiency: DEFAULT_CHARGING_EFFICIENCY,
            price_change_interval_seconds: TIMESLOT_SECONDS,
            reoptimize_interval_seconds: 0,
        }
    }
}

impl SimulationSettings {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            charging_efficiency: config.strategy.charging_efficiency,
            price_change_interval_seconds: config.simulation.price_change_interval_seconds,
            reoptimize_interval_seconds: config.simulation.reoptimize_interval_seconds,
        }
    }
}

/// What happened during one timeslot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeslotRecord {
    pub timeslot: usize,
    /// Mean current drawn at the root, per grid phase (A).
    pub root_current: PhaseCurrents,
    /// Charge the plans scheduled for this timeslot (Ah, before losses).
    pub planned_ah: f64,
    /// Charge stored in the batteries (Ah).
    pub charged_ah: f64,
    /// Energy drawn from the grid (kWh).
    pub energy_kwh: f64,
    pub energy_cost: f64,
    pub assigned_cars: usize,
    pub unassigned_cars: usize,
    /// False if any check during the timeslot found an overloaded node.
    pub fuse_tree_valid: bool,
}

/// Running totals of the timeslot in progress.
#[derive(Debug, Default)]
struct SlotAccumulator {
    seconds: i64,
    grid_ampere_seconds: PhaseCurrents,
    charged_ah: f64,
    energy_kwh: f64,
    energy_cost: f64,
    valid: bool,
}

/// Event-driven simulation of one charging day.
///
/// Generic over `S: Strategy` for static dispatch.
pub struct Simulation<S: Strategy> {
    state: State,
    strategy: S,
    settings: SimulationSettings,
    queue: BTreeMap<(i64, u8, u64), Event>,
    next_sequence: u64,
    finished: BTreeSet<CarId>,
    slot: SlotAccumulator,
    records: Vec<TimeslotRecord>,
}

impl<S: Strategy> Simulation<S> {
    /// Creates a simulation and schedules arrivals, departures, price
    /// changes and reoptimize requests for the whole horizon.
    pub fn new(state: State, strategy: S, settings: SimulationSettings) -> Self {
        let mut sim = Self {
            state,
            strategy,
            settings,
            queue: BTreeMap::new(),
            next_sequence: 0,
            finished: BTreeSet::new(),
            slot: SlotAccumulator {
                valid: true,
                ..SlotAccumulator::default()
            },
            records: Vec::new(),
        };
        sim.schedule_initial_events();
        sim
    }

    fn end_seconds(&self) -> i64 {
        seconds_from_timeslot(self.state.horizon())
    }

    fn schedule_initial_events(&mut self) {
        let start = self.state.current_seconds();
        let end = self.end_seconds();

        let stays: Vec<(CarId, i64, i64)> = self
            .state
            .cars()
            .iter()
            .map(|c| (c.id, c.arrival_seconds, c.departure_seconds))
            .collect();
        for (car, arrival, departure) in stays {
            if departure > 0 && departure < start {
                continue;
            }
            self.push(Event::new(arrival.max(start), EventKind::CarArrival(car)));
            if departure > 0 && departure < end {
                self.push(Event::new(departure, EventKind::CarDeparture(car)));
            }
        }

        let mut t = start;
        while t < end {
            self.push(Event::new(t, EventKind::EnergyPriceChange(self.state.prices().clone())));
            t += self.settings.price_change_interval_seconds.max(1);
        }

        let interval = self.settings.reoptimize_interval_seconds;
        if interval > 0 {
            let mut t = start + interval;
            while t < end {
                self.push(Event::new(t, EventKind::Reoptimize));
                t += interval;
            }
        }
    }

    /// Queues `event`. Events due at the same second are delivered by kind,
    /// then in the order they were queued.
    pub fn push(&mut self, event: Event) {
        let key = (event.time_seconds, event.kind.order(), self.next_sequence);
        self.next_sequence += 1;
        self.queue.insert(key, event);
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn records(&self) -> &[TimeslotRecord] {
        &self.records
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Runs to the end of the horizon and returns one record per timeslot.
    ///
    /// # Errors
    ///
    /// Stops at the first event the strategy cannot handle.
    pub fn run(&mut self) -> Result<Vec<TimeslotRecord>, ScheduleError> {
        let start = self.state.current_seconds();
        let end = self.end_seconds();
        info!(
            strategy = self.strategy.name(),
            cars = self.state.cars().len(),
            stations = self.state.station_count(),
            start,
            end,
            "simulation started"
        );
        let mut clock = Clock::new(start, end);
        while let Some(t) = clock.tick() {
            self.step(t)?;
        }
        info!(records = self.records.len(), "simulation finished");
        Ok(self.records.clone())
    }

    /// Simulates second `t`: events first, then one second of charging.
    pub fn step(&mut self, t: i64) -> Result<(), ScheduleError> {
        self.state.set_time_seconds(t);
        let k = self.state.current_timeslot();

        let mut delivered = false;
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > t {
                break;
            }
            let event = entry.remove();
            react(&mut self.strategy, &mut self.state, event)?;
            delivered = true;
        }
        if delivered || self.slot.seconds == 0 {
            self.slot.valid &= validate_at_timeslot(&self.state, k).is_ok();
        }

        self.charge_one_second(t, k)?;

        if Clock::is_timeslot_end(t) || t + 1 == self.end_seconds() {
            self.close_timeslot(k);
        }
        Ok(())
    }

    fn charge_one_second(&mut self, t: i64, k: usize) -> Result<(), ScheduleError> {
        let efficiency = self.settings.charging_efficiency;
        let price = self.state.prices().price(k);
        for assignment in self.state.car_assignments().to_vec() {
            let planned_grid = {
                let (car, _) = self.state.car_and_station(assignment.car)?;
                assignment.current_per_grid_phase(car, self.state.tree(), k)
            };
            let (car, station) = self.state.car_and_station_mut(assignment.car)?;
            if car.is_fully_charged() {
                continue;
            }
            let planned = car.plan().get(k).copied().unwrap_or(0.0).max(0.0);
            let per_phase = planned
                .min(station.limit(Phase::One))
                .min(car.max_current_per_phase);
            let max_allowed = per_phase * car.sum_used_phases;
            if max_allowed <= 0.0 {
                continue;
            }

            let stored = car.add_charged_capacity(1, max_allowed, efficiency);
            let drawn = stored / efficiency * 3600.0;
            let planned_total = planned * car.sum_used_phases;
            if planned_total > 0.0 {
                self.slot.grid_ampere_seconds += planned_grid * (drawn / planned_total);
            }
            let kwh = drawn * VOLTAGE_PER_PHASE / 3_600_000.0;
            self.slot.charged_ah += stored;
            self.slot.energy_kwh += kwh;
            self.slot.energy_cost += kwh * price;

            if car.is_fully_charged() && self.finished.insert(car.id) {
                let id = car.id;
                debug!(car = id, t, "battery full");
                self.push(Event::new(t + 1, EventKind::CarFinished(id)));
            }
        }
        self.slot.seconds += 1;
        Ok(())
    }

    fn close_timeslot(&mut self, k: usize) {
        let slot = std::mem::replace(
            &mut self.slot,
            SlotAccumulator {
                valid: true,
                ..SlotAccumulator::default()
            },
        );
        let planned_ah = self
            .state
            .car_assignments()
            .iter()
            .filter_map(|a| self.state.car(a.car))
            .map(|car| car.sum_used_phases * car.plan().get(k).copied().unwrap_or(0.0) * 0.25)
            .sum();
        let seconds = slot.seconds.max(1) as f64;
        let record = TimeslotRecord {
            timeslot: k,
            root_current: slot.grid_ampere_seconds * (1.0 / seconds),
            planned_ah,
            charged_ah: slot.charged_ah,
            energy_kwh: slot.energy_kwh,
            energy_cost: slot.energy_cost,
            assigned_cars: self.state.car_assignments().len(),
            unassigned_cars: self.state.unassigned_cars().len(),
            fuse_tree_valid: slot.valid,
        };
        debug!(
            k,
            charged_ah = record.charged_ah,
            root = %record.root_current,
            valid = record.fuse_tree_valid,
            "timeslot closed"
        );
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::car::CarBuilder;
    use crate::model::fuse_tree::FuseTree;
    use crate::model::prices::EnergyPriceHistory;
    use crate::realtime::algorithmic::StrategyAlgorithmic;
    use crate::realtime::greedy::StrategyGreedy;

    fn state(root: f64, horizon: usize) -> State {
        let tree = FuseTree::simple(root, 2, 32.0).expect("valid tree");
        let cars = (0..2)
            .filter_map(|id| {
                CarBuilder::new(id)
                    .horizon(horizon)
                    .availability(1, horizon - 2)
                    .max_capacity(20.4)
                    .min_loading_state(0.0)
                    .build()
                    .ok()
            })
            .collect();
        State::new(0, tree, cars, EnergyPriceHistory::flat(0.3, horizon)).expect("valid state")
    }

    #[test]
    fn one_record_per_timeslot() {
        let mut sim = Simulation::new(state(100.0, 8), StrategyGreedy::new(), SimulationSettings::default());
        let records = sim.run().expect("run should succeed");
        assert_eq!(records.len(), 8);
        assert_eq!(records[0].assigned_cars, 0);
        assert_eq!(records[1].assigned_cars, 2);
        // Departed before the last slot.
        assert_eq!(records[7].assigned_cars, 0);
    }

    #[test]
    fn greedy_fills_batteries_and_emits_finished() {
        let mut sim = Simulation::new(state(100.0, 8), StrategyGreedy::new(), SimulationSettings::default());
        assert!(sim.run().is_ok());
        for car in sim.state().cars() {
            assert!(car.is_fully_charged(), "car {} not full", car.id);
        }
        assert_eq!(sim.finished.len(), 2);
        let charged: f64 = sim.records().iter().map(|r| r.charged_ah).sum();
        assert!((charged - 40.8).abs() < 1e-6);
        assert!(sim.records()[1].root_current[Phase::One] > 60.0);
    }

    #[test]
    fn algorithmic_run_stays_within_fuses() {
        let mut sim = Simulation::new(
            state(40.0, 12),
            StrategyAlgorithmic::new(),
            SimulationSettings::default(),
        );
        let records = sim.run().expect("run should succeed");
        assert!(records.iter().all(|r| r.fuse_tree_valid));
        assert!(records.iter().all(|r| r.root_current.max() <= 40.0 + 1e-6));
        let cost: f64 = records.iter().map(|r| r.energy_cost).sum();
        assert!(cost > 0.0);
    }

    #[test]
    fn same_second_events_follow_kind_order() {
        let mut sim = Simulation::new(state(100.0, 4), StrategyGreedy::new(), SimulationSettings::default());
        sim.queue.clear();
        sim.push(Event::new(5, EventKind::Reoptimize));
        sim.push(Event::new(5, EventKind::CarArrival(0)));
        sim.push(Event::new(5, EventKind::CarDeparture(1)));
        let kinds: Vec<&'static str> = sim.queue.values().map(|e| e.kind.name()).collect();
        assert_eq!(kinds, ["departure", "arrival", "reoptimize"]);
    }
}
