//! Plan fill engine.
//!
//! Fills a car's per-phase current plan slot by slot, in a caller-provided
//! order, until a desired amount of charge (Ah) is planned. Under the linear
//! model charge is proportional to current. Under the nonlinear model every
//! slot is sized from a forward battery simulation up to the slot start and
//! a backward simulation from the target end-of-slot SoC, which lands the
//! planned charge on the desired amount instead of overshooting it.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, trace, warn};

use crate::error::{BatteryError, ScheduleError};
use crate::model::battery::BatterySim;
use crate::model::car::{Car, CarId};
use crate::model::phase::Phase;
use crate::model::station::ChargingStation;
use crate::model::units::{DEFAULT_CHARGING_EFFICIENCY, FILL_EPSILON, TIMESLOT_SECONDS, seconds_from_timeslot};

use super::sorter::{SortingCriteria, sorted_timeslots};
use super::state::State;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CapacityKey {
    car: CarId,
    soc_bits: u64,
    now: i64,
    start: i64,
    end: i64,
    plan_bits: Vec<u64>,
}

impl CapacityKey {
    fn new(car: &Car, now: i64, start: i64, end: i64) -> Self {
        Self {
            car: car.id,
            soc_bits: car.soc().to_bits(),
            now,
            start,
            end,
            plan_bits: car.plan().iter().map(|v| v.to_bits()).collect(),
        }
    }
}

/// Fills car plans under the linear or nonlinear charging model.
#[derive(Debug, Clone)]
pub struct ChargeScheduler {
    efficiency: f64,
    nonlinear: bool,
    cache_enabled: bool,
    cache: HashMap<CapacityKey, f64>,
    cache_hits: usize,
}

impl Default for ChargeScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CHARGING_EFFICIENCY)
    }
}

impl ChargeScheduler {
    pub fn new(efficiency: f64) -> Self {
        Self {
            efficiency,
            nonlinear: false,
            cache_enabled: false,
            cache: HashMap::new(),
            cache_hits: 0,
        }
    }

    pub fn with_nonlinear(mut self, nonlinear: bool) -> Self {
        self.nonlinear = nonlinear;
        self
    }

    /// Memoizes nonlinear planned capacities keyed on SoC, times and plan.
    pub fn with_capacity_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn efficiency(&self) -> f64 {
        self.efficiency
    }

    pub fn is_nonlinear(&self) -> bool {
        self.nonlinear
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    /// Largest total current (A) the car can draw at `station`.
    pub fn max_static_current(car: &Car, station: &ChargingStation) -> f64 {
        car.sum_used_phases * station.limit(Phase::One).min(car.max_current_per_phase)
    }

    /// Charge (Ah) planned from `now` until the end of the car's horizon.
    ///
    /// # Errors
    ///
    /// Nonlinear mode fails if the car has no battery parameters.
    pub fn planned_capacity(&mut self, station: &ChargingStation, car: &Car, now: i64) -> Result<f64, BatteryError> {
        let end = seconds_from_timeslot(car.horizon()).max(now);
        self.planned_capacity_in(station, car, now, now, end)
    }

    /// Charge (Ah) planned in `[start, end)`, simulating from `now`.
    pub fn planned_capacity_in(
        &mut self,
        station: &ChargingStation,
        car: &Car,
        now: i64,
        start: i64,
        end: i64,
    ) -> Result<f64, BatteryError> {
        if self.nonlinear {
            self.planned_capacity_nonlinear(station, car, now, start, end)
        } else {
            Ok(self.planned_capacity_linear(car, now, start, end))
        }
    }

    /// Linear charge (Ah) planned in `[start, end)`. Only the part of the
    /// current timeslot after `now` counts.
    pub fn planned_capacity_linear(&self, car: &Car, now: i64, start: i64, end: i64) -> f64 {
        self.planned_until(car, now, end) - self.planned_until(car, now, start)
    }

    fn planned_until(&self, car: &Car, now: i64, end: i64) -> f64 {
        let slot = TIMESLOT_SECONDS as f64;
        let mut total = 0.0;
        for (k, &planned) in car.plan().iter().enumerate() {
            // Unset slot.
            if planned < 0.0 {
                continue;
            }
            let slot_start = seconds_from_timeslot(k);
            let slot_end = slot_start + TIMESLOT_SECONDS;
            let elapsed = now - slot_start;
            if (0..=TIMESLOT_SECONDS).contains(&elapsed) {
                total += (TIMESLOT_SECONDS - elapsed) as f64 / slot * planned;
            } else if slot_start >= now {
                total += planned;
            }
            if end <= slot_end {
                total -= (slot_end - end) as f64 / slot * planned;
                break;
            }
        }
        self.efficiency * car.sum_used_phases * total / 4.0
    }

    /// Nonlinear charge (Ah) planned in `[start, end)`: the difference of
    /// two contiguous battery simulations from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`BatteryError::Interval`] unless `now <= start <= end`.
    pub fn planned_capacity_nonlinear(
        &mut self,
        station: &ChargingStation,
        car: &Car,
        now: i64,
        start: i64,
        end: i64,
    ) -> Result<f64, BatteryError> {
        if start < now || end < now || end < start {
            return Err(BatteryError::Interval { now, start, end });
        }
        let key = self.cache_enabled.then(|| CapacityKey::new(car, now, start, end));
        if let Some(cached) = key.as_ref().and_then(|k| self.cache.get(k)) {
            self.cache_hits += 1;
            return Ok(*cached);
        }

        let max_static = Self::max_static_current(car, station);
        let mut sim = car.battery_sim(self.efficiency)?;
        sim.simulate(now, start, car.plan(), car.sum_used_phases, max_static, None)?;
        let until_start = sim.charged_ah();
        sim.simulate(start, end, car.plan(), car.sum_used_phases, max_static, None)?;
        let result = sim.charged_ah() - until_start;

        if let Some(key) = key {
            self.cache.insert(key, result);
        }
        Ok(result)
    }

    /// Per-phase current that charges `desired` Ah over `[start, end)` on
    /// top of `original` A already planned.
    pub fn current_to_fill_slot_linear(&self, desired: f64, sum_used_phases: f64, start: i64, end: i64, original: f64) -> f64 {
        let fraction = (end - start) as f64 / TIMESLOT_SECONDS as f64;
        desired * 4.0 / self.efficiency / fraction / sum_used_phases + original
    }

    /// Adds `desired` Ah to the car's plan, visiting `slots` in order.
    ///
    /// Returns the charge (Ah) that could not be placed, or a negative
    /// amount if the last slot overshot.
    ///
    /// # Errors
    ///
    /// In nonlinear mode, fails if the car has no battery parameters or the
    /// slots are not in increasing time order.
    pub fn fill_plan(
        &mut self,
        car: &mut Car,
        station: &ChargingStation,
        mut desired: f64,
        slots: &[usize],
        now: i64,
    ) -> Result<f64, BatteryError> {
        let max_per_phase_static = station.limit(Phase::One).min(car.max_current_per_phase);
        let max_static = car.sum_used_phases * max_per_phase_static;
        let horizon_end = seconds_from_timeslot(car.horizon());
        let sum_used = car.sum_used_phases;

        let data = if self.nonlinear {
            Some(
                car.battery
                    .battery_data()
                    .cloned()
                    .ok_or(BatteryError::MissingBatteryData(car.id))?,
            )
        } else {
            None
        };
        let mut sim = match &data {
            Some(data) => Some(BatterySim::new(data, car.battery.max_capacity, car.soc(), self.efficiency)?),
            None => None,
        };

        debug!(car = car.id, now, desired, "filling plan");
        let mut last_start = now;

        for &k in slots {
            if k >= car.horizon() {
                continue;
            }
            let mut break_after = false;
            let slot_start = now.max(seconds_from_timeslot(k));
            let slot_end = seconds_from_timeslot(k + 1);
            let stay_end = slot_end.max(car.departure_seconds).min(horizon_end.max(slot_end));

            let original_current = car.plan()[k].max(0.0);
            let original_slot_capacity = self.planned_capacity_in(station, car, now, slot_start, slot_end)?;
            let original_capacity = self.planned_capacity_in(station, car, now, slot_start, stay_end)?;

            let mut max_per_phase = max_per_phase_static;
            if let Some(sim) = sim.as_mut() {
                sim.simulate(last_start, slot_start, car.plan(), sum_used, max_static, Some(k))?;
                last_start = slot_start;
                max_per_phase = sim.next_current() / sum_used;

                let target_soc = (sim.soc() + desired / sim.capacity()).clamp(0.0, 1.0);
                let mut backwards = BatterySim::new(sim.data(), sim.capacity(), target_soc, self.efficiency)?;
                let mut so_far = 0.0;
                let mut exact_per_phase = max_per_phase;
                for step in (1..=TIMESLOT_SECONDS).rev() {
                    backwards.step_backward(max_static);
                    if backwards.soc() < 0.0 {
                        break;
                    }
                    let rest = backwards.next_current() * step as f64 / 3600.0 * self.efficiency;
                    trace!(step, next = backwards.next_current(), so_far, rest, "backward step");
                    if rest + so_far > desired + original_slot_capacity {
                        let linear = (desired - so_far) * 4.0 / self.efficiency / (step as f64 / TIMESLOT_SECONDS as f64);
                        exact_per_phase = linear / sum_used;
                        debug!(car = car.id, k, step, current = exact_per_phase, "exact current from backward simulation");
                        break_after = true;
                        break;
                    }
                    so_far = -backwards.charged_ah();
                }
                max_per_phase = max_per_phase.min(exact_per_phase);
            }

            if desired > FILL_EPSILON && car.plan()[k] != max_per_phase {
                let mut current = if self.nonlinear {
                    max_per_phase
                } else {
                    max_per_phase.min(self.current_to_fill_slot_linear(desired, sum_used, slot_start, slot_end, original_current))
                };
                if current < car.min_current_per_phase {
                    warn!(
                        car = car.id,
                        k,
                        current,
                        min = car.min_current_per_phase,
                        "raising planned current to car minimum"
                    );
                    current = car.min_current_per_phase;
                }
                car.plan_mut()[k] = current;

                let new_capacity = self.planned_capacity_in(station, car, now, slot_start, stay_end)?;
                let change = new_capacity - original_capacity;
                if change == 0.0 && self.nonlinear {
                    break_after = true;
                }
                desired -= change;
                debug!(
                    car = car.id,
                    k,
                    current,
                    previous = original_current,
                    change,
                    remaining = desired,
                    "filled slot"
                );
                if break_after {
                    break;
                }
            } else if desired <= FILL_EPSILON {
                break;
            }
        }
        Ok(desired)
    }

    fn fill_towards(
        &mut self,
        state: &mut State,
        car: CarId,
        slots: &[usize],
        target: impl Fn(&Car) -> f64,
    ) -> Result<(), ScheduleError> {
        let now = state.current_seconds();
        let (car, station) = state.car_and_station_mut(car)?;
        let desired = target(car) - self.planned_capacity(station, car, now)?;
        if desired > 0.0 {
            self.fill_plan(car, station, desired, slots, now)?;
        }
        Ok(())
    }

    /// Fills `[min_k, max_k)` earliest first up to the minimum loading state.
    ///
    /// # Errors
    ///
    /// Fails if the car is not assigned or the nonlinear simulation fails.
    pub fn fill_to_min_soc(&mut self, state: &mut State, car: CarId, min_k: usize, max_k: usize) -> Result<(), ScheduleError> {
        let slots = sorted_timeslots(state, min_k, max_k, SortingCriteria::Index, &BTreeSet::new());
        self.fill_towards(state, car, &slots, Car::missing_capacity_to_min_soc)
    }

    /// Fills `[min_k, max_k)` in `criteria` order up to a full battery.
    pub fn fill_by_cost(
        &mut self,
        state: &mut State,
        car: CarId,
        min_k: usize,
        max_k: usize,
        criteria: SortingCriteria,
    ) -> Result<(), ScheduleError> {
        let slots = sorted_timeslots(state, min_k, max_k, criteria, &BTreeSet::new());
        self.fill_towards(state, car, &slots, Car::missing_capacity)
    }

    /// Fills `[min_k, max_k)` earliest first up to a full battery.
    pub fn fill_to_full(&mut self, state: &mut State, car: CarId, min_k: usize, max_k: usize) -> Result<(), ScheduleError> {
        let slots = sorted_timeslots(state, min_k, max_k, SortingCriteria::Index, &BTreeSet::new());
        self.fill_towards(state, car, &slots, Car::missing_capacity)
    }
}
