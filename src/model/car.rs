//! Electric vehicles, their batteries and their charging plans.
//!
//! A [`Car`] is built once per scenario through [`CarBuilder`], usually from
//! a [`CarModel`] preset. Its plan holds one current per phase for every
//! timeslot of the horizon and is rewritten in place by the scheduler while
//! the car is parked.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BatteryError, CarError};

use super::battery::{BatteryData, BatterySim};
use super::phase::{Phase, PhaseCurrents};
use super::units::{
    TIMESLOTS_PER_DAY, ampere_hours, current_from_power, seconds_from_timeslot,
    timeslot_from_seconds,
};

/// Identifier of a car.
pub type CarId = u32;

/// Drive train type, used for station admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarType {
    /// Battery electric vehicle.
    Bev,
    /// Plug-in hybrid.
    Phev,
}

/// Battery state of a car.
///
/// `current_capacity` is the charge at arrival; `charged_capacity`
/// accumulates while the car is plugged in.
#[derive(Debug, Clone, PartialEq)]
pub struct CarBattery {
    /// Maximum capacity (Ah).
    pub max_capacity: f64,
    current_capacity: f64,
    charged_capacity: f64,
    nonlinear: Option<BatteryData>,
}

impl CarBattery {
    pub fn new(max_capacity: f64, current_capacity: f64, nonlinear: Option<BatteryData>) -> Self {
        Self {
            max_capacity,
            current_capacity,
            charged_capacity: 0.0,
            nonlinear,
        }
    }

    pub fn current_capacity(&self) -> f64 {
        self.current_capacity
    }

    pub fn charged_capacity(&self) -> f64 {
        self.charged_capacity
    }

    pub fn soc(&self) -> f64 {
        (self.current_capacity + self.charged_capacity) / self.max_capacity
    }

    pub fn is_fully_charged(&self) -> bool {
        self.current_capacity + self.charged_capacity >= self.max_capacity
    }

    /// Nonlinear cell parameters, if the battery charges nonlinearly.
    pub fn battery_data(&self) -> Option<&BatteryData> {
        self.nonlinear.as_ref()
    }

    /// Charges for `seconds` under the limit `max_allowed` (A, all phases
    /// combined) and returns the stored charge (Ah).
    ///
    /// Linear batteries draw exactly `max_allowed`; nonlinear ones draw what
    /// the cell accepts at the current SoC. Never charges past full.
    pub fn add_charged_capacity(&mut self, seconds: i64, max_allowed: f64, efficiency: f64) -> f64 {
        let current = match &self.nonlinear {
            None => max_allowed,
            Some(data) => data.current_for_soc(self.soc(), max_allowed),
        };
        let before = self.charged_capacity;
        self.charged_capacity += efficiency * ampere_hours(seconds as f64, current);
        if self.is_fully_charged() {
            self.charged_capacity = self.max_capacity - self.current_capacity;
        }
        self.charged_capacity - before
    }
}

/// Preset vehicle models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarModel {
    TeslaModelS,
    NissanLeaf2016,
    BmwI3,
    MercedesGlc350e,
    RenaultZoeR240,
    RenaultZoeZe40,
}

/// Static parameters of a [`CarModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub car_type: CarType,
    /// Maximum capacity (Ah).
    pub max_capacity: f64,
    /// Minimum total current (A).
    pub min_current: f64,
    /// Maximum total current (A).
    pub max_current: f64,
    pub phases: [bool; 3],
    pub suspendable: bool,
    pub variable_power: bool,
    pub immediate_start: bool,
}

impl CarModel {
    pub const ALL: [CarModel; 6] = [
        CarModel::TeslaModelS,
        CarModel::NissanLeaf2016,
        CarModel::BmwI3,
        CarModel::MercedesGlc350e,
        CarModel::RenaultZoeR240,
        CarModel::RenaultZoeZe40,
    ];

    /// Looks up a model by its snake_case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == name)
    }

    pub fn key(self) -> &'static str {
        match self {
            CarModel::TeslaModelS => "tesla_model_s",
            CarModel::NissanLeaf2016 => "nissan_leaf_2016",
            CarModel::BmwI3 => "bmw_i3",
            CarModel::MercedesGlc350e => "mercedes_glc_350e",
            CarModel::RenaultZoeR240 => "renault_zoe_r240",
            CarModel::RenaultZoeZe40 => "renault_zoe_ze40",
        }
    }

    /// Capacities given in kWh and currents given in kW are converted at
    /// 230 V on a single phase.
    pub fn spec(self) -> ModelSpec {
        let a = |kw: f64| current_from_power(kw, 1.0);
        match self {
            CarModel::TeslaModelS => ModelSpec {
                name: "Tesla Model S85",
                car_type: CarType::Bev,
                max_capacity: a(85.0),
                min_current: a(3.0),
                max_current: a(22.1),
                phases: [true, true, true],
                suspendable: false,
                variable_power: false,
                immediate_start: true,
            },
            CarModel::NissanLeaf2016 => ModelSpec {
                name: "Nissan Leaf 2016",
                car_type: CarType::Bev,
                max_capacity: a(30.0),
                min_current: a(1.4),
                max_current: a(6.6),
                phases: [true, false, false],
                suspendable: false,
                variable_power: false,
                immediate_start: true,
            },
            CarModel::BmwI3 => ModelSpec {
                name: "BMW i3 2017",
                car_type: CarType::Bev,
                max_capacity: 94.0,
                min_current: a(1.4),
                max_current: a(11.0),
                phases: [true, true, false],
                suspendable: true,
                variable_power: true,
                immediate_start: false,
            },
            CarModel::MercedesGlc350e => ModelSpec {
                name: "Mercedes GLC 350e",
                car_type: CarType::Phev,
                max_capacity: a(8.7),
                min_current: a(1.0),
                max_current: a(3.7),
                phases: [true, false, false],
                suspendable: false,
                variable_power: false,
                immediate_start: true,
            },
            CarModel::RenaultZoeR240 => ModelSpec {
                name: "Renault Zoe R240",
                car_type: CarType::Bev,
                max_capacity: 95.5,
                min_current: a(1.0),
                max_current: a(11.0),
                phases: [true, true, true],
                suspendable: true,
                variable_power: true,
                immediate_start: false,
            },
            CarModel::RenaultZoeZe40 => ModelSpec {
                name: "Renault Zoe ZE40",
                car_type: CarType::Bev,
                max_capacity: 65.6,
                min_current: 0.0,
                max_current: 96.0,
                phases: [true, true, true],
                suspendable: true,
                variable_power: true,
                immediate_start: false,
            },
        }
    }
}

/// Monotonic source of car ids, owned by whoever constructs cars.
#[derive(Debug, Clone, Default)]
pub struct CarIdAllocator {
    next: CarId,
}

impl CarIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator whose first id is `first`.
    pub fn starting_at(first: CarId) -> Self {
        Self { next: first }
    }

    pub fn allocate(&mut self) -> CarId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// An electric vehicle with its availability window and charging plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Car {
    pub id: CarId,
    pub name: String,
    pub model_name: String,
    pub car_type: CarType,
    /// Minimum total current (A) once charging.
    pub min_current: f64,
    pub min_current_per_phase: f64,
    /// Maximum total current (A).
    pub max_current: f64,
    pub max_current_per_phase: f64,
    /// Share of each car phase actually drawn (0..1).
    pub phase_usage: PhaseCurrents,
    pub sum_used_phases: f64,
    pub battery: CarBattery,
    /// Minimum state-of-charge target (Ah).
    pub min_loading_state: f64,
    pub first_available_timeslot: usize,
    pub last_available_timeslot: usize,
    /// Arrival in seconds since midnight.
    pub arrival_seconds: i64,
    /// Departure in seconds since midnight; 0 when unknown.
    pub departure_seconds: i64,
    pub suspendable: bool,
    pub immediate_start: bool,
    pub variable_power: bool,
    plan: Vec<f64>,
}

impl Car {
    /// Number of timeslots in the planning horizon.
    pub fn horizon(&self) -> usize {
        self.plan.len()
    }

    /// Planned current per phase for every timeslot.
    pub fn plan(&self) -> &[f64] {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut [f64] {
        &mut self.plan
    }

    /// Replaces the whole plan.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::PlanLength`] if `plan` does not cover the horizon.
    pub fn set_plan(&mut self, plan: Vec<f64>) -> Result<(), CarError> {
        if plan.len() != self.plan.len() {
            return Err(CarError::PlanLength {
                car: self.id,
                got: plan.len(),
                expected: self.plan.len(),
            });
        }
        self.plan = plan;
        Ok(())
    }

    /// Zeroes every timeslot of the plan.
    pub fn clear_plan(&mut self) {
        self.plan.iter_mut().for_each(|v| *v = 0.0);
    }

    /// How much of car phase `phase` the car draws.
    pub fn phase_usage(&self, phase: Phase) -> f64 {
        self.phase_usage[phase]
    }

    /// Number of phases the car draws on at all.
    pub fn used_phase_count(&self) -> usize {
        Phase::ALL
            .iter()
            .filter(|&&p| self.phase_usage[p] > 0.0)
            .count()
    }

    pub fn soc(&self) -> f64 {
        self.battery.soc()
    }

    pub fn is_fully_charged(&self) -> bool {
        self.battery.is_fully_charged()
    }

    /// Charge (Ah) missing to a full battery.
    pub fn missing_capacity(&self) -> f64 {
        self.battery.max_capacity
            - (self.battery.current_capacity() + self.battery.charged_capacity())
    }

    /// Charge (Ah) missing to the minimum loading state. Negative once above it.
    pub fn missing_capacity_to_min_soc(&self) -> f64 {
        self.min_loading_state - (self.battery.current_capacity() + self.battery.charged_capacity())
    }

    /// Whether the car is parked at `seconds`. A departure of 0 means unknown.
    pub fn is_available_at(&self, seconds: i64) -> bool {
        seconds >= self.arrival_seconds && (self.departure_seconds == 0 || seconds <= self.departure_seconds)
    }

    /// Charges for `seconds` with at most `max_allowed` amperes over all phases.
    pub fn add_charged_capacity(&mut self, seconds: i64, max_allowed: f64, efficiency: f64) -> f64 {
        self.battery.add_charged_capacity(seconds, max_allowed, efficiency)
    }

    /// Overrides the arrival charge.
    ///
    /// # Errors
    ///
    /// Fails if the new total exceeds the maximum capacity or is negative.
    pub fn set_current_capacity(&mut self, capacity: f64) -> Result<(), CarError> {
        if capacity + self.battery.charged_capacity() > self.battery.max_capacity {
            return Err(CarError::CapacityAboveMax {
                car: self.id,
                capacity,
                max: self.battery.max_capacity,
            });
        }
        if capacity < 0.0 {
            return Err(CarError::NegativeCapacity {
                car: self.id,
                capacity,
            });
        }
        self.battery.current_capacity = capacity;
        Ok(())
    }

    /// Nonlinear battery simulation starting at the car's present SoC, sized
    /// to the car's capacity.
    ///
    /// # Errors
    ///
    /// Fails if the car has no nonlinear parameters or its SoC is outside `[0, 1]`.
    pub fn battery_sim(&self, efficiency: f64) -> Result<BatterySim<'_>, BatteryError> {
        let data = self
            .battery
            .battery_data()
            .ok_or(BatteryError::MissingBatteryData(self.id))?;
        BatterySim::new(data, self.battery.max_capacity, self.soc(), efficiency)
    }
}

/// Builder for [`Car`], validating the combination of parameters.
///
/// # Examples
///
/// ```
/// use ev_charge_sim::model::car::{CarBuilder, CarModel};
///
/// let car = CarBuilder::from_model(7, CarModel::RenaultZoeZe40)
///     .current_capacity(10.0)
///     .availability(0, 95)
///     .build();
/// assert!(car.is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CarBuilder {
    id: CarId,
    name: Option<String>,
    model_name: String,
    car_type: CarType,
    max_capacity: f64,
    current_capacity: f64,
    min_current: f64,
    max_current: f64,
    phase_usage: PhaseCurrents,
    min_loading_state: Option<f64>,
    first_available: usize,
    last_available: usize,
    arrival_seconds: Option<i64>,
    departure_seconds: Option<i64>,
    horizon: usize,
    suspendable: bool,
    immediate_start: bool,
    variable_power: bool,
    nonlinear: Option<BatteryData>,
}

impl CarBuilder {
    /// Starts from a generic three-phase 32 A car.
    pub fn new(id: CarId) -> Self {
        Self {
            id,
            name: None,
            model_name: "custom".to_string(),
            car_type: CarType::Bev,
            max_capacity: 100.0,
            current_capacity: 0.0,
            min_current: 0.0,
            max_current: 96.0,
            phase_usage: PhaseCurrents::uniform(1.0),
            min_loading_state: None,
            first_available: 0,
            last_available: TIMESLOTS_PER_DAY - 1,
            arrival_seconds: None,
            departure_seconds: None,
            horizon: TIMESLOTS_PER_DAY,
            suspendable: true,
            immediate_start: false,
            variable_power: true,
            nonlinear: None,
        }
    }

    pub fn from_model(id: CarId, model: CarModel) -> Self {
        let spec = model.spec();
        let phase = |b: bool| if b { 1.0 } else { 0.0 };
        Self {
            model_name: spec.name.to_string(),
            car_type: spec.car_type,
            max_capacity: spec.max_capacity,
            min_current: spec.min_current,
            max_current: spec.max_current,
            phase_usage: PhaseCurrents::new(
                phase(spec.phases[0]),
                phase(spec.phases[1]),
                phase(spec.phases[2]),
            ),
            suspendable: spec.suspendable,
            immediate_start: spec.immediate_start,
            variable_power: spec.variable_power,
            ..Self::new(id)
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn car_type(mut self, car_type: CarType) -> Self {
        self.car_type = car_type;
        self
    }

    pub fn max_capacity(mut self, ah: f64) -> Self {
        self.max_capacity = ah;
        self
    }

    pub fn current_capacity(mut self, ah: f64) -> Self {
        self.current_capacity = ah;
        self
    }

    /// Total current range (A) over all used phases.
    pub fn currents(mut self, min: f64, max: f64) -> Self {
        self.min_current = min;
        self.max_current = max;
        self
    }

    pub fn phases(mut self, p1: f64, p2: f64, p3: f64) -> Self {
        self.phase_usage = PhaseCurrents::new(p1, p2, p3);
        self
    }

    pub fn min_loading_state(mut self, ah: f64) -> Self {
        self.min_loading_state = Some(ah);
        self
    }

    /// Inclusive range of timeslots the car is parked in.
    pub fn availability(mut self, first: usize, last: usize) -> Self {
        self.first_available = first;
        self.last_available = last;
        self
    }

    /// Exact arrival and departure in seconds since midnight.
    pub fn timestamps(mut self, arrival: i64, departure: i64) -> Self {
        self.arrival_seconds = Some(arrival);
        self.departure_seconds = Some(departure);
        self
    }

    pub fn horizon(mut self, timeslots: usize) -> Self {
        self.horizon = timeslots;
        self
    }

    pub fn flags(mut self, suspendable: bool, immediate_start: bool, variable_power: bool) -> Self {
        self.suspendable = suspendable;
        self.immediate_start = immediate_start;
        self.variable_power = variable_power;
        self
    }

    /// Flexible car: suspendable, variable power, no immediate start.
    pub fn ideal(self) -> Self {
        self.flags(true, false, true)
    }

    /// Charges nonlinearly following `data`.
    pub fn nonlinear(mut self, data: BatteryData) -> Self {
        self.nonlinear = Some(data);
        self
    }

    /// Validates the parameters and builds the car with an all-zero plan.
    ///
    /// # Errors
    ///
    /// Returns a [`CarError`] if capacities, minimum loading state,
    /// availability window or phase ratios are inconsistent.
    pub fn build(self) -> Result<Car, CarError> {
        let id = self.id;
        if self.suspendable && self.immediate_start {
            warn!(car = id, "car is both suspendable and requires immediate start");
        }

        let min_loading_state = self.min_loading_state.unwrap_or(self.max_capacity / 2.0);
        if self.current_capacity > self.max_capacity {
            return Err(CarError::CapacityAboveMax {
                car: id,
                capacity: self.current_capacity,
                max: self.max_capacity,
            });
        }
        if !(0.0..=self.max_capacity).contains(&min_loading_state) {
            return Err(CarError::MinLoadingState {
                car: id,
                value: min_loading_state,
                max: self.max_capacity,
            });
        }
        if self.current_capacity < 0.0 {
            return Err(CarError::NegativeCapacity {
                car: id,
                capacity: self.current_capacity,
            });
        }
        if self.first_available > self.last_available || self.last_available >= self.horizon {
            return Err(CarError::Availability {
                car: id,
                first: self.first_available,
                last: self.last_available,
                horizon: self.horizon,
            });
        }

        let phase_count = self.phase_usage.0.iter().map(|p| p.ceil()).sum::<f64>();
        if phase_count <= 0.0 {
            return Err(CarError::NoPhases { car: id });
        }
        let sum_used_phases = self.phase_usage.sum();
        let min_per_phase = self.min_current / phase_count;
        let max_per_phase = self.max_current / phase_count;
        for (per_phase, total) in [
            (min_per_phase, self.min_current),
            (max_per_phase, self.max_current),
        ] {
            if (sum_used_phases * per_phase - total).abs() > 1e-9 {
                return Err(CarError::PhaseRatio {
                    car: id,
                    phases: sum_used_phases,
                    per_phase,
                    total,
                });
            }
        }

        let arrival_seconds = self
            .arrival_seconds
            .unwrap_or_else(|| seconds_from_timeslot(self.first_available));
        let departure_seconds = self
            .departure_seconds
            .unwrap_or_else(|| seconds_from_timeslot(self.last_available + 1) - 1);

        Ok(Car {
            id,
            name: self.name.unwrap_or_else(|| format!("n{id}")),
            model_name: self.model_name,
            car_type: self.car_type,
            min_current: self.min_current,
            min_current_per_phase: min_per_phase,
            max_current: self.max_current,
            max_current_per_phase: max_per_phase,
            phase_usage: self.phase_usage,
            sum_used_phases,
            battery: CarBattery::new(self.max_capacity, self.current_capacity, self.nonlinear),
            min_loading_state,
            first_available_timeslot: self.first_available,
            last_available_timeslot: self.last_available,
            arrival_seconds,
            departure_seconds,
            suspendable: self.suspendable,
            immediate_start: self.immediate_start,
            variable_power: self.variable_power,
            plan: vec![0.0; self.horizon],
        })
    }
}

/// Timeslot of `seconds`, clamped to the last slot of a `horizon`-slot day.
pub fn clamp_timeslot(seconds: i64, horizon: usize) -> usize {
    timeslot_from_seconds(seconds).min(horizon.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoe() -> Car {
        CarBuilder::from_model(1, CarModel::RenaultZoeZe40).build().expect("valid car")
    }

    #[test]
    fn model_currents_per_phase() {
        let car = zoe();
        assert_eq!(car.max_current_per_phase, 32.0);
        assert_eq!(car.sum_used_phases, 3.0);
        assert_eq!(car.min_loading_state, 65.6 / 2.0);
        assert_eq!(car.horizon(), 96);
    }

    #[test]
    fn single_phase_model() {
        let car = CarBuilder::from_model(2, CarModel::NissanLeaf2016).build();
        let car = car.ok();
        let car = car.as_ref();
        assert_eq!(car.map(Car::used_phase_count), Some(1));
        let per_phase = car.map(|c| c.max_current_per_phase).unwrap_or(0.0);
        assert!((per_phase - 6600.0 / 230.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_capacity_above_max() {
        let err = CarBuilder::new(3).max_capacity(10.0).current_capacity(11.0).build();
        assert!(matches!(err, Err(CarError::CapacityAboveMax { .. })));
    }

    #[test]
    fn rejects_negative_capacity() {
        let err = CarBuilder::new(3).current_capacity(-1.0).build();
        assert!(matches!(err, Err(CarError::NegativeCapacity { .. })));
    }

    #[test]
    fn rejects_min_loading_state_out_of_range() {
        let err = CarBuilder::new(3).max_capacity(10.0).min_loading_state(11.0).build();
        assert!(matches!(err, Err(CarError::MinLoadingState { .. })));
    }

    #[test]
    fn rejects_inconsistent_phase_ratio() {
        let err = CarBuilder::new(3).phases(1.0, 0.5, 0.0).currents(0.0, 32.0).build();
        assert!(matches!(err, Err(CarError::PhaseRatio { .. })));
    }

    #[test]
    fn rejects_empty_availability() {
        let err = CarBuilder::new(3).availability(10, 5).build();
        assert!(matches!(err, Err(CarError::Availability { .. })));
    }

    #[test]
    fn charging_stops_at_full() {
        let mut car = zoe();
        let added = car.add_charged_capacity(3600 * 10, 96.0, 0.85);
        assert!((added - 65.6).abs() < 1e-9);
        assert!(car.is_fully_charged());
        assert_eq!(car.missing_capacity(), 0.0);
    }

    #[test]
    fn missing_to_min_soc_goes_negative() {
        let mut car = zoe();
        car.add_charged_capacity(3600, 96.0, 0.85);
        assert!(car.missing_capacity_to_min_soc() < 0.0);
    }

    #[test]
    fn nonlinear_battery_needs_data() {
        let car = zoe();
        assert!(matches!(
            car.battery_sim(0.85),
            Err(BatteryError::MissingBatteryData(1))
        ));
    }

    #[test]
    fn plan_length_checked() {
        let mut car = zoe();
        assert!(car.set_plan(vec![0.0; 4]).is_err());
        assert!(car.set_plan(vec![16.0; 96]).is_ok());
        car.clear_plan();
        assert!(car.plan().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn allocator_is_monotonic() {
        let mut ids = CarIdAllocator::starting_at(5);
        assert_eq!(ids.allocate(), 5);
        assert_eq!(ids.allocate(), 6);
    }

    #[test]
    fn availability_window() {
        let car = CarBuilder::new(4).timestamps(3600, 7200).build().ok();
        let car = car.as_ref();
        assert_eq!(car.map(|c| c.is_available_at(5000)), Some(true));
        assert_eq!(car.map(|c| c.is_available_at(8000)), Some(false));
    }
}
