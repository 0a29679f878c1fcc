//! Priority scheduler.
//!
//! On every event the strategy (re)fills the plans of the assigned cars and
//! then repairs the fuse tree: each overloaded timeslot, earliest first, is
//! blocked and the least urgent car drawing on the overloaded phase has its
//! plan reduced there. The removed charge is planned again in the remaining
//! unblocked timeslots.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::error::{AssignmentError, BatteryError, ScheduleError};
use crate::model::car::{Car, CarId};
use crate::model::phase::Phase;
use crate::model::station::ChargingStation;
use crate::model::units::{DEFAULT_CHARGING_EFFICIENCY, FILL_EPSILON, TIMESLOT_SECONDS, seconds_from_timeslot, timeslot_from_seconds};

use super::dayahead::{DEFAULT_ALLOWED_LATENESS_SECONDS, DayaheadSchedule};
use super::fill::ChargeScheduler;
use super::forecast::{DepartureForecast, MedianTimestamp, Oracle};
use super::sorter::{SortingCriteria, sorted_timeslots};
use super::state::{CarAssignment, State};
use super::strategy::Strategy;
use super::validation::{Violation, validate_at_timeslot, validate_node_at_timeslot};

/// Offset separating cars above their minimum SoC from those below it.
const ABOVE_MIN_SOC_OFFSET: f64 = 10_000.0;

/// What the operator optimizes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    FairShare,
    PeakShaving,
    EnergyCosts,
    LoadImbalance,
}

/// Weights of the four objectives. Only the heaviest one matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Objectives {
    pub fair_share: f64,
    pub peak_shaving: f64,
    pub energy_costs: f64,
    pub load_imbalance: f64,
}

impl Default for Objectives {
    fn default() -> Self {
        Self {
            fair_share: 0.0,
            peak_shaving: 0.0,
            energy_costs: 1.0,
            load_imbalance: 0.0,
        }
    }
}

impl Objectives {
    /// Heaviest objective. Ties go to the one listed first; `None` if every
    /// weight is -1 or below.
    pub fn highest(&self) -> Option<Objective> {
        let candidates = [
            (Objective::FairShare, self.fair_share),
            (Objective::PeakShaving, self.peak_shaving),
            (Objective::EnergyCosts, self.energy_costs),
            (Objective::LoadImbalance, self.load_imbalance),
        ];
        let mut best = None;
        let mut best_weight = -1.0;
        for (objective, weight) in candidates {
            if weight > best_weight {
                best_weight = weight;
                best = Some(objective);
            }
        }
        best
    }

    /// Timeslot order used when filling beyond the minimum SoC.
    pub fn sorting_criteria(&self) -> SortingCriteria {
        match self.highest() {
            Some(Objective::PeakShaving) => SortingCriteria::PeakDemand,
            Some(Objective::EnergyCosts) => SortingCriteria::Price,
            Some(Objective::FairShare | Objective::LoadImbalance) | None => SortingCriteria::Index,
        }
    }
}

/// The main real-time strategy.
pub struct StrategyAlgorithmic {
    objectives: Objectives,
    scheduler: ChargeScheduler,
    forecast: Box<dyn DepartureForecast>,
    schedule: Option<DayaheadSchedule>,
    nonlinear: bool,
    reschedule_with_zero: bool,
    refill_after_expected_departure: bool,
}

impl Default for StrategyAlgorithmic {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyAlgorithmic {
    pub fn new() -> Self {
        Self {
            objectives: Objectives::default(),
            scheduler: ChargeScheduler::new(DEFAULT_CHARGING_EFFICIENCY),
            forecast: Box::new(MedianTimestamp::default()),
            schedule: None,
            nonlinear: false,
            reschedule_with_zero: true,
            refill_after_expected_departure: true,
        }
    }

    /// Strategy with every knob taken from `config`.
    pub fn from_config(config: &StrategyConfig) -> Self {
        let forecast: Box<dyn DepartureForecast> = match config.departure_forecast.as_str() {
            "oracle" => Box::new(Oracle),
            _ => Box::new(MedianTimestamp(config.median_departure_seconds)),
        };
        let scheduler = ChargeScheduler::new(config.charging_efficiency).with_capacity_cache(config.capacity_cache);
        Self::new()
            .with_forecast(forecast)
            .with_objectives(Objectives {
                fair_share: config.weight_fair_share,
                peak_shaving: config.weight_peak_shaving,
                energy_costs: config.weight_energy_costs,
                load_imbalance: config.weight_load_imbalance,
            })
            .with_scheduler(scheduler)
            .with_nonlinear_charging(config.nonlinear_charging)
            .with_reschedule_with_zero(config.reschedule_with_zero)
            .with_refill_after_expected_departure(config.refill_after_expected_departure)
    }

    pub fn with_forecast(mut self, forecast: Box<dyn DepartureForecast>) -> Self {
        self.forecast = forecast;
        self
    }

    pub fn with_schedule(mut self, schedule: DayaheadSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_objectives(mut self, objectives: Objectives) -> Self {
        self.objectives = objectives;
        if self.nonlinear {
            self.force_fair_share();
        }
        self
    }

    /// Plans with the nonlinear battery model. Timeslots are then always
    /// filled in time order.
    pub fn with_nonlinear_charging(mut self, nonlinear: bool) -> Self {
        self.nonlinear = nonlinear;
        self.scheduler = self.scheduler.with_nonlinear(nonlinear);
        if nonlinear {
            self.force_fair_share();
        }
        self
    }

    /// `true` empties the overloaded slot of a rescheduled car; `false`
    /// only removes the overload.
    pub fn with_reschedule_with_zero(mut self, zero: bool) -> Self {
        self.reschedule_with_zero = zero;
        self
    }

    pub fn with_refill_after_expected_departure(mut self, refill: bool) -> Self {
        self.refill_after_expected_departure = refill;
        self
    }

    pub fn with_scheduler(mut self, scheduler: ChargeScheduler) -> Self {
        self.scheduler = scheduler.with_nonlinear(self.nonlinear);
        self
    }

    fn force_fair_share(&mut self) {
        self.objectives.peak_shaving = -100.0;
        self.objectives.energy_costs = -100.0;
        self.objectives.load_imbalance = -100.0;
    }

    pub fn objectives(&self) -> &Objectives {
        &self.objectives
    }

    pub fn scheduler(&self) -> &ChargeScheduler {
        &self.scheduler
    }

    pub fn schedule(&self) -> Option<&DayaheadSchedule> {
        self.schedule.as_ref()
    }

    pub fn is_nonlinear(&self) -> bool {
        self.nonlinear
    }

    /// Urgency of charging `car`: higher means more urgent.
    ///
    /// Cars below their minimum SoC always rank above cars beyond it. Within
    /// each group the missing charge is divided by how much the car could
    /// charge until its expected departure.
    pub fn charging_priority(&self, car: &Car, station: &ChargingStation, now: i64, departure: i64) -> f64 {
        let max_current = car.sum_used_phases * car.max_current_per_phase.min(station.limit(Phase::One));
        let urgency = (departure - now).abs() as f64;
        let missing_to_min = car.missing_capacity_to_min_soc();
        if missing_to_min > 0.0 {
            missing_to_min / (urgency * max_current + 1e-8)
        } else {
            car.missing_capacity() / (urgency * max_current + 1e-8) - ABOVE_MIN_SOC_OFFSET
        }
    }

    /// `assignments` ordered least urgent first. Ties keep their order.
    pub fn sorted_by_priority(&self, state: &State, assignments: Vec<CarAssignment>) -> Vec<CarAssignment> {
        let now = state.current_seconds();
        let mut keyed: Vec<(f64, CarAssignment)> = assignments
            .into_iter()
            .map(|a| {
                let priority = match state.car_and_station(a.car) {
                    Ok((car, station)) => self.charging_priority(car, station, now, a.expected_departure_seconds),
                    Err(_) => f64::INFINITY,
                };
                (priority, a)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        keyed.into_iter().map(|(_, a)| a).collect()
    }

    /// Fuse violations from the current timeslot to the end of the horizon.
    pub fn initial_violations(&self, state: &State) -> BTreeMap<usize, Violation> {
        (state.current_timeslot()..state.horizon())
            .filter_map(|k| validate_at_timeslot(state, k).err().map(|v| (k, v)))
            .collect()
    }

    /// Repairs every violation, earliest timeslot first. Repaired timeslots
    /// are blocked from being refilled.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::RepairExhausted`] if every car beneath an
    /// overloaded node was rescheduled and the overload remains.
    pub fn resolve_violations(
        &mut self,
        state: &mut State,
        mut violations: BTreeMap<usize, Violation>,
    ) -> Result<(), ScheduleError> {
        let mut blocked = BTreeSet::new();
        while let Some(&k) = violations.keys().next() {
            blocked.insert(k);
            debug!(k, "blocking timeslot");
            self.handle_violation(state, k, &blocked, &mut violations)?;
        }
        if !blocked.is_empty() {
            debug!(?blocked, "blocked timeslots after repair");
        }
        Ok(())
    }

    /// Repairs the violation recorded at timeslot `k` and rescans the
    /// horizon for violations the repair introduced.
    pub fn handle_violation(
        &mut self,
        state: &mut State,
        k: usize,
        blocked: &BTreeSet<usize>,
        violations: &mut BTreeMap<usize, Violation>,
    ) -> Result<(), ScheduleError> {
        let mut violation = violations.get(&k).cloned().ok_or(ScheduleError::MissingViolation(k))?;
        let node = violation.node();
        let mut candidates = self.sorted_by_priority(state, state.car_assignments_under(node));

        loop {
            if candidates.is_empty() {
                return Err(ScheduleError::RepairExhausted {
                    timeslot: k,
                    node: violation.label().to_string(),
                });
            }
            debug!(k, "handling {violation}");
            let phase = violation.phase_with_highest_delta();
            let mut rescheduled = 0;
            let mut fixed = false;
            for (i, assignment) in candidates.iter().enumerate() {
                let planned = {
                    let (car, station) = state.car_and_station(assignment.car)?;
                    let consumption = if violation.is_station() {
                        assignment.current_per_station_phase(car, station, k)
                    } else {
                        assignment.current_per_grid_phase(car, state.tree(), k)
                    };
                    consumption[phase]
                };
                if planned > 0.0 {
                    self.reschedule_car(state, assignment.car, blocked, k, &violation)?;
                    match validate_node_at_timeslot(state, node, k) {
                        Ok(()) => fixed = true,
                        Err(updated) if updated.node() != node => {
                            debug!(k, "repair moved the overload to {}", updated.label());
                            fixed = true;
                        }
                        Err(updated) => violation = updated,
                    }
                    rescheduled = i;
                    break;
                }
            }
            candidates.remove(rescheduled);
            if fixed {
                break;
            }
        }

        violations.remove(&k);
        for check in state.current_timeslot()..state.horizon() {
            if check != k && blocked.contains(&check) {
                continue;
            }
            match validate_at_timeslot(state, check) {
                Ok(()) => {
                    violations.remove(&check);
                }
                Err(v) => {
                    violations.insert(check, v);
                }
            }
        }
        Ok(())
    }

    /// Takes charge out of timeslot `k` of `car` and plans it again in the
    /// unblocked timeslots.
    pub fn reschedule_car(
        &mut self,
        state: &mut State,
        car: CarId,
        blocked: &BTreeSet<usize>,
        k: usize,
        violation: &Violation,
    ) -> Result<(), ScheduleError> {
        let now = state.current_seconds();
        let current_k = state.current_timeslot();
        let criteria = match state.car(car) {
            Some(c) if c.missing_capacity_to_min_soc() > 0.0 => SortingCriteria::Index,
            _ => self.objectives.sorting_criteria(),
        };
        let slots = sorted_timeslots(state, current_k, state.horizon(), criteria, blocked);

        let (car, station) = state.car_and_station_mut(car)?;
        if k >= car.horizon() {
            return Ok(());
        }
        let with_plan = self.scheduler.planned_capacity(station, car, now)?;
        let original = car.plan()[k];

        if self.reschedule_with_zero {
            car.plan_mut()[k] = 0.0;
        } else {
            let phase = violation.phase_with_highest_delta();
            let reduce_by = violation.delta(phase).max(0.0).min(original);
            let mut reduced = original - reduce_by;
            if reduced < car.min_current_per_phase {
                reduced = 0.0;
            }
            car.plan_mut()[k] = reduced;
        }

        if self.nonlinear {
            let last = car.last_available_timeslot.min(car.horizon().saturating_sub(1));
            for slot in current_k..=last {
                if slot != k && !blocked.contains(&slot) {
                    car.plan_mut()[slot] = 0.0;
                }
            }
        }

        let without_plan = self.scheduler.planned_capacity(station, car, now)?;
        let desired = with_plan - without_plan;
        debug!(
            car = car.id,
            k,
            original,
            current = car.plan()[k],
            with_plan,
            without_plan,
            "rescheduling car"
        );
        let unplaced = self.scheduler.fill_plan(car, station, desired, &slots, now)?;
        if unplaced > FILL_EPSILON {
            warn!(car = car.id, k, unplaced, "rescheduled charge does not fit in the horizon");
        }
        Ok(())
    }

    /// Caps the current slot at what the battery accepts at its present SoC.
    fn clamp_to_battery(&self, state: &mut State, car: CarId) -> Result<(), ScheduleError> {
        let current_k = state.current_timeslot();
        let (car, station) = state.car_and_station_mut(car)?;
        let max_static = ChargeScheduler::max_static_current(car, station);
        let possible = car
            .battery
            .battery_data()
            .ok_or(BatteryError::MissingBatteryData(car.id))?
            .current_for_soc(car.soc(), max_static);
        let sum_used = car.sum_used_phases;
        if let Some(planned) = car.plan_mut().get_mut(current_k) {
            if possible < *planned * sum_used {
                *planned = possible / sum_used;
            }
        }
        Ok(())
    }

    fn repair(&mut self, state: &mut State) -> Result<(), ScheduleError> {
        let violations = self.initial_violations(state);
        self.resolve_violations(state, violations)
    }
}

impl Strategy for StrategyAlgorithmic {
    fn name(&self) -> &'static str {
        if self.schedule.is_some() {
            "algorithmic-dayahead"
        } else {
            "algorithmic"
        }
    }

    fn react_car_arrival(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError> {
        if !state.is_car_assigned(car) && !state.is_any_station_free() {
            info!(car, "no free charging station");
            return Ok(());
        }
        let now = state.current_seconds();
        let current_k = state.current_timeslot();
        let horizon = state.horizon();
        let criteria = self.objectives.sorting_criteria();

        let reservation = match &self.schedule {
            Some(schedule) => match schedule.reservation(car) {
                Some(r) => Some((r.clone(), schedule.station_plan(r.station))),
                None => {
                    let reserved = schedule.reserved_spots(state, DEFAULT_ALLOWED_LATENESS_SECONDS);
                    if reserved >= state.station_count() {
                        info!(car, reserved, "car is not in the day-ahead plan and every station is reserved");
                        return Ok(());
                    }
                    None
                }
            },
            None => None,
        };

        let station = match state.car_assignment(car) {
            Some(a) => a.station,
            None => {
                let Some(free) = state.first_free_station() else {
                    return Ok(());
                };
                state.add_car_assignment(car, free)?.station
            }
        };
        info!(car, station, t = now, "car arrived");

        match reservation {
            Some((reservation, plan)) => {
                let entry = state.car_mut(car).ok_or(AssignmentError::UnknownCar(car))?;
                let departure = entry.departure_seconds;
                let last = entry.last_available_timeslot;
                entry.set_plan(plan)?;
                if now > seconds_from_timeslot(entry.first_available_timeslot) {
                    debug!(car, late = now - seconds_from_timeslot(entry.first_available_timeslot), "planned car is late");
                    for value in entry.plan_mut().iter_mut().take(current_k) {
                        *value = 0.0;
                    }
                }
                if let Some(a) = state.car_assignment_mut(car) {
                    a.expected_departure_seconds = departure;
                }
                debug!(car, planned_station = reservation.station, "applying day-ahead plan");
                self.scheduler.fill_by_cost(state, car, current_k, last, criteria)?;
            }
            None => {
                let (mut departure, mut departure_k) = {
                    let entry = state.car(car).ok_or(AssignmentError::UnknownCar(car))?;
                    let departure = self.forecast.expected_departure_seconds(state, entry);
                    (departure, timeslot_from_seconds(departure))
                };
                if current_k >= departure_k || departure_k + 1 > horizon {
                    departure = seconds_from_timeslot(horizon) - 1;
                    departure_k = horizon.saturating_sub(1);
                }
                if let Some(entry) = state.car_mut(car) {
                    entry.clear_plan();
                }
                if let Some(a) = state.car_assignment_mut(car) {
                    a.expected_departure_seconds = departure;
                }
                self.scheduler.fill_to_min_soc(state, car, current_k, horizon)?;
                self.scheduler.fill_by_cost(state, car, current_k, departure_k, criteria)?;
            }
        }

        if let Some(entry) = state.car_mut(car) {
            let min = entry.min_current_per_phase;
            for (k, value) in entry.plan_mut().iter_mut().enumerate() {
                if *value > 0.0 && *value < min {
                    debug!(car, k, current = *value, min, "raising plan to car minimum");
                    *value = min;
                }
            }
        }

        self.repair(state)
    }

    fn react_car_departure(&mut self, state: &mut State, car: CarId) -> Result<(), ScheduleError> {
        info!(car, t = state.current_seconds(), "car departed");
        let current_k = state.current_timeslot();
        let horizon = state.horizon();
        let criteria = self.objectives.sorting_criteria();
        for a in state.car_assignments().to_vec() {
            let departure_k = a.expected_departure_timeslot();
            let max_k = if departure_k >= current_k { departure_k } else { horizon };
            self.scheduler.fill_to_min_soc(state, a.car, current_k, max_k)?;
            self.scheduler.fill_by_cost(state, a.car, current_k, max_k, criteria)?;
        }
        self.repair(state)
    }

    fn react_car_finished(&mut self, _state: &mut State, car: CarId) -> Result<(), ScheduleError> {
        debug!(car, "car finished charging");
        Ok(())
    }

    fn react_energy_price_change(&mut self, state: &mut State) -> Result<(), ScheduleError> {
        let now = state.current_seconds();
        let current_k = state.current_timeslot();
        let horizon = state.horizon();
        for a in state.car_assignments().to_vec() {
            let lingering = state
                .car(a.car)
                .is_some_and(|c| current_k >= a.expected_departure_timeslot() && !c.is_fully_charged());
            if lingering && now % TIMESLOT_SECONDS == 0 && self.refill_after_expected_departure {
                info!(car = a.car, "car still present after expected departure, filling to full");
                self.scheduler.fill_to_full(state, a.car, current_k, horizon)?;
            }
            if self.nonlinear {
                self.clamp_to_battery(state, a.car)?;
            }
        }
        self.repair(state)
    }

    fn react_reoptimize(&mut self, state: &mut State) -> Result<(), ScheduleError> {
        let current_k = state.current_timeslot();
        let horizon = state.horizon();
        let criteria = self.objectives.sorting_criteria();
        info!(cars = state.car_assignments().len(), nonlinear = self.nonlinear, "reoptimizing");
        for a in state.car_assignments().to_vec() {
            if state.car(a.car).is_some_and(|c| !c.is_fully_charged()) {
                self.scheduler.fill_to_min_soc(state, a.car, current_k, horizon)?;
                self.scheduler.fill_by_cost(state, a.car, current_k, horizon, criteria)?;
            }
            if self.nonlinear {
                self.clamp_to_battery(state, a.car)?;
            }
        }
        self.repair(state)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::battery::BatteryData;
    use crate::model::car::CarBuilder;
    use crate::model::fuse_tree::{Fuse, FuseTree};
    use crate::model::prices::EnergyPriceHistory;
    use crate::realtime::dayahead::Reservation;
    use crate::realtime::event::{Event, EventKind};
    use crate::realtime::strategy::react;
    use crate::realtime::validation::is_fuse_tree_valid;

    fn prices() -> EnergyPriceHistory {
        let mut p = vec![0.3; 96];
        p[0] = 0.1;
        p[1] = 0.2;
        EnergyPriceHistory::new(p, None).expect("valid prices")
    }

    fn state(root: f64, cars: Vec<Car>) -> State {
        let tree = Fuse::new(0, root)
            .add_child(ChargingStation::new(0, 32.0))
            .add_child(ChargingStation::new(1, 32.0));
        let tree = FuseTree::new(tree).expect("valid tree");
        State::new(0, tree, cars, prices()).expect("valid state")
    }

    fn car(id: CarId, max: f64, current: f64) -> Car {
        CarBuilder::new(id)
            .max_capacity(max)
            .current_capacity(current)
            .min_loading_state(0.0)
            .build()
            .expect("valid car")
    }

    fn plan_of(state: &State, id: CarId) -> Vec<f64> {
        state.car(id).map(|c| c.plan().to_vec()).unwrap_or_default()
    }

    #[test]
    fn default_objective_is_cost() {
        let o = Objectives::default();
        assert_eq!(o.highest(), Some(Objective::EnergyCosts));
        assert_eq!(o.sorting_criteria(), SortingCriteria::Price);
    }

    #[test]
    fn objective_ties_go_to_fair_share() {
        let o = Objectives {
            fair_share: 1.0,
            peak_shaving: 1.0,
            energy_costs: 1.0,
            load_imbalance: 1.0,
        };
        assert_eq!(o.highest(), Some(Objective::FairShare));
        let o = Objectives {
            peak_shaving: 2.0,
            ..Objectives::default()
        };
        assert_eq!(o.sorting_criteria(), SortingCriteria::PeakDemand);
        let o = Objectives {
            load_imbalance: 3.0,
            ..Objectives::default()
        };
        assert_eq!(o.sorting_criteria(), SortingCriteria::Index);
    }

    #[test]
    fn nonlinear_forces_index_order() {
        let s = StrategyAlgorithmic::new().with_nonlinear_charging(true);
        assert_eq!(s.objectives().energy_costs, -100.0);
        assert_eq!(s.objectives().sorting_criteria(), SortingCriteria::Index);
        assert!(s.scheduler().is_nonlinear());
    }

    #[test]
    fn from_config_applies_weights_and_flags() {
        let config = StrategyConfig {
            weight_peak_shaving: 5.0,
            reschedule_with_zero: false,
            ..StrategyConfig::default()
        };
        let s = StrategyAlgorithmic::from_config(&config);
        assert_eq!(s.objectives().sorting_criteria(), SortingCriteria::PeakDemand);
        assert!(!s.reschedule_with_zero);
        let nonlinear = StrategyAlgorithmic::from_config(&StrategyConfig {
            nonlinear_charging: true,
            ..StrategyConfig::default()
        });
        assert!(nonlinear.scheduler().is_nonlinear());
        assert_eq!(nonlinear.objectives().sorting_criteria(), SortingCriteria::Index);
    }

    #[test]
    fn priority_ranks_cars_below_min_first() {
        let s = StrategyAlgorithmic::new();
        let station = ChargingStation::new(0, 32.0);
        let below = CarBuilder::new(0).max_capacity(40.0).current_capacity(5.0).build().expect("valid car");
        let above = CarBuilder::new(1).max_capacity(40.0).current_capacity(30.0).build().expect("valid car");
        let p_below = s.charging_priority(&below, &station, 0, 3600);
        let p_above = s.charging_priority(&above, &station, 0, 3600);
        assert!(p_below > 0.0);
        assert!(p_above < -9000.0);
        // Closer departure is more urgent.
        assert!(s.charging_priority(&below, &station, 0, 1800) > p_below);
    }

    #[test]
    fn arrival_plans_cheapest_slot() {
        let mut st = state(100.0, vec![car(0, 20.4, 0.0)]);
        let mut s = StrategyAlgorithmic::new();
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(0))).is_ok());
        let plan = plan_of(&st, 0);
        assert!((plan[0] - 32.0).abs() < 1e-9);
        assert!(plan[1..].iter().all(|&v| v == 0.0));
        assert_eq!(
            st.car_assignment(0).map(|a| a.expected_departure_seconds),
            Some(61_380)
        );
    }

    #[test]
    fn late_forecast_uses_end_of_horizon() {
        let mut st = state(100.0, vec![car(0, 20.4, 0.0)]);
        st.set_time_seconds(70_000);
        let mut s = StrategyAlgorithmic::new();
        assert!(react(&mut s, &mut st, Event::new(70_000, EventKind::CarArrival(0))).is_ok());
        assert_eq!(
            st.car_assignment(0).map(|a| a.expected_departure_seconds),
            Some(86_399)
        );
    }

    #[test]
    fn overlapping_arrivals_are_repaired() {
        let mut st = state(50.0, vec![car(0, 40.8, 20.4), car(1, 40.8, 0.0)]);
        let mut s = StrategyAlgorithmic::new().with_reschedule_with_zero(false);
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(0))).is_ok());
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(1))).is_ok());
        for k in 0..96 {
            assert!(validate_at_timeslot(&st, k).is_ok(), "violation at k={k}");
        }
        let a = plan_of(&st, 0);
        assert!((a[0] - 18.0).abs() < 1e-9);
        assert!((a[1] - 14.0).abs() < 1e-9);
    }

    #[test]
    fn departure_lets_remaining_cars_refill() {
        let mut st = state(50.0, vec![car(0, 40.8, 20.4), car(1, 40.8, 0.0)]);
        let mut s = StrategyAlgorithmic::new();
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(0))).is_ok());
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(1))).is_ok());
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarDeparture(1))).is_ok());
        assert!(is_fuse_tree_valid(&st));
        assert_eq!(st.car_assignments().len(), 1);
        for k in 0..96 {
            assert!(validate_at_timeslot(&st, k).is_ok());
        }
    }

    #[test]
    fn departure_refill_stops_at_expected_departure() {
        let short_stay = CarBuilder::new(0)
            .max_capacity(200.0)
            .current_capacity(0.0)
            .min_loading_state(150.0)
            .build()
            .expect("valid car");
        let mut st = state(100.0, vec![short_stay, car(1, 40.8, 0.0)]);
        let mut s = StrategyAlgorithmic::new();
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(0))).is_ok());
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(1))).is_ok());
        if let Some(a) = st.car_assignment_mut(0) {
            a.expected_departure_seconds = 1800;
        }
        if let Some(c) = st.car_mut(0) {
            c.clear_plan();
        }

        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarDeparture(1))).is_ok());
        let plan = plan_of(&st, 0);
        assert!((plan[0] - 32.0).abs() < 1e-9);
        assert!((plan[1] - 32.0).abs() < 1e-9);
        assert!(plan[2..].iter().all(|&v| v == 0.0), "planned after expected departure: {plan:?}");
    }

    #[test]
    fn repair_exhausted_when_nothing_helps() {
        let mut st = state(10.0, vec![car(0, 40.8, 0.0)]);
        assert!(st.add_car_assignment(0, 0).is_ok());
        let mut overloaded = st.clone();
        if let Some(c) = overloaded.car_mut(0) {
            c.plan_mut()[3] = 32.0;
        }
        let violation = validate_at_timeslot(&overloaded, 3).expect_err("expected violation");
        // Recorded against a timeslot no car draws on.
        let violations = BTreeMap::from([(2, violation)]);
        let mut s = StrategyAlgorithmic::new();
        assert!(matches!(
            s.resolve_violations(&mut st, violations),
            Err(ScheduleError::RepairExhausted { timeslot: 2, .. })
        ));
    }

    #[test]
    fn unplanned_car_refused_when_all_reserved() {
        let reservations = vec![
            Reservation {
                car: 0,
                station: 0,
                first_available_timeslot: 0,
            },
            Reservation {
                car: 1,
                station: 1,
                first_available_timeslot: 0,
            },
        ];
        let plans = BTreeMap::from([(0, vec![32.0; 96]), (1, vec![32.0; 96])]);
        let schedule = DayaheadSchedule::new(96, reservations, plans).expect("valid schedule");
        let mut st = state(100.0, vec![car(0, 40.8, 0.0), car(1, 40.8, 0.0), car(2, 40.8, 0.0)]);
        let mut s = StrategyAlgorithmic::new().with_schedule(schedule);
        assert_eq!(s.name(), "algorithmic-dayahead");
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(2))).is_ok());
        assert!(st.is_car_unassigned(2));
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::CarArrival(0))).is_ok());
        assert!(st.is_car_assigned(0));
        assert_eq!(
            st.car_assignment(0).map(|a| a.expected_departure_seconds),
            st.car(0).map(|c| c.departure_seconds)
        );
    }

    #[test]
    fn price_change_refills_lingering_car() {
        let mut st = state(100.0, vec![car(0, 40.8, 0.0)]);
        assert!(st.add_car_assignment(0, 0).is_ok());
        if let Some(a) = st.car_assignment_mut(0) {
            a.expected_departure_seconds = 900;
        }
        st.set_time_seconds(1800);
        let mut s = StrategyAlgorithmic::new();
        let event = Event::new(1800, EventKind::EnergyPriceChange(prices()));
        assert!(react(&mut s, &mut st, event).is_ok());
        let plan = plan_of(&st, 0);
        assert!((plan[2] - 32.0).abs() < 1e-9);
        assert!((plan[3] - 32.0).abs() < 1e-9);
        assert_eq!(plan[4], 0.0);
    }

    #[test]
    fn nonlinear_clamp_limits_current_slot() {
        let full_ish = CarBuilder::new(0)
            .max_capacity(65.6)
            .current_capacity(65.0)
            .nonlinear(BatteryData::sample())
            .build()
            .expect("valid car");
        let mut st = state(100.0, vec![full_ish]);
        assert!(st.add_car_assignment(0, 0).is_ok());
        if let Some(c) = st.car_mut(0) {
            c.plan_mut()[0] = 32.0;
        }
        let s = StrategyAlgorithmic::new().with_nonlinear_charging(true);
        assert!(s.clamp_to_battery(&mut st, 0).is_ok());
        assert!(plan_of(&st, 0)[0] < 32.0);
    }

    #[test]
    fn reoptimize_fills_assigned_cars() {
        let mut st = state(100.0, vec![car(0, 20.4, 0.0)]);
        assert!(st.add_car_assignment(0, 0).is_ok());
        let mut s = StrategyAlgorithmic::new();
        assert!(react(&mut s, &mut st, Event::new(0, EventKind::Reoptimize)).is_ok());
        assert!((plan_of(&st, 0)[0] - 32.0).abs() < 1e-9);
    }
}
