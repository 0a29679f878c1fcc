//! Resistor-only equivalent circuit model of a lithium-ion battery.
//!
//! The model charges in CC/CV (or CP/CV) mode: the cell current is limited
//! by a constant current (or power) until the terminal voltage reaches its
//! maximum, after which it decays as the open-circuit voltage approaches the
//! terminal voltage. Open-circuit voltage and internal resistance are looked
//! up from equidistant tables over state of charge.
//!
//! # Examples
//!
//! ```
//! use ev_charge_sim::model::battery::{BatteryData, BatterySim};
//!
//! let data = BatteryData::sample();
//! let mut sim = BatterySim::new(&data, data.capacity, 0.0, 0.85).ok();
//! let sim = sim.as_mut().map(|s| {
//!     s.step_forward(96.0);
//!     s.soc()
//! });
//! assert!(sim.unwrap_or(0.0) > 0.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::BatteryError;

use super::units::{ampere_hours, timeslot_from_seconds};

/// Charging algorithm used by the battery management system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeAlgorithm {
    /// Constant current, then constant voltage.
    Cccv,
    /// Constant power, then constant voltage.
    Cpcv,
}

/// Cell tables and default charging parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryData {
    /// Open-circuit voltage (V) at SoC `i * soc_step`.
    pub ocv: Vec<f64>,
    /// Internal resistance (Ohm) at SoC `i * soc_step`.
    pub resistance: Vec<f64>,
    /// Distance between table points on the SoC axis.
    pub soc_step: f64,
    /// Current limit (A) in the constant-current phase.
    pub constant_current: f64,
    /// Power limit (W) in the constant-power phase.
    pub constant_power: f64,
    /// Default capacity (Ah), replaced by the car's capacity when simulating a car.
    pub capacity: f64,
    /// Maximum terminal voltage (V).
    pub terminal_voltage: f64,
    pub algorithm: ChargeAlgorithm,
}

impl BatteryData {
    /// Reference cell with 21 table points between SoC 0 and 1.
    pub fn sample() -> Self {
        Self {
            ocv: vec![
                3.167, 3.413, 3.446, 3.488, 3.537, 3.571, 3.593, 3.610, 3.625, 3.642, 3.663, 3.695,
                3.755, 3.799, 3.846, 3.895, 3.945, 3.997, 4.051, 4.108, 4.166,
            ],
            resistance: vec![
                0.00335, 0.00212, 0.00196, 0.0019, 0.00184, 0.00175, 0.00166, 0.00163, 0.0016,
                0.00162, 0.00164, 0.00166, 0.00168, 0.001695, 0.00171, 0.001715, 0.00172,
                0.001725, 0.00173, 0.00175, 0.00186,
            ],
            soc_step: 0.05,
            constant_current: 96.0,
            constant_power: 343.8,
            capacity: 65.6,
            terminal_voltage: 4.166,
            algorithm: ChargeAlgorithm::Cccv,
        }
    }

    /// Sample cell with a flat internal resistance.
    pub fn with_constant_resistance(resistance: f64) -> Self {
        let mut data = Self::sample();
        data.resistance = vec![resistance; data.ocv.len()];
        data
    }

    pub fn ocv_at(&self, soc: f64) -> f64 {
        interpolate(&self.ocv, self.soc_step, soc)
    }

    pub fn resistance_at(&self, soc: f64) -> f64 {
        interpolate(&self.resistance, self.soc_step, soc)
    }

    /// Charging current (A, positive) the cell accepts at `soc`, capped by
    /// `max_allowed`. Stateless.
    pub fn current_for_soc(&self, soc: f64, max_allowed: f64) -> f64 {
        let r0 = self.resistance_at(soc);
        let v_ocv = self.ocv_at(soc);
        let v_max = self.terminal_voltage;

        // Cell current is negative while charging.
        let mut ik = match self.algorithm {
            ChargeAlgorithm::Cccv => ((v_ocv - v_max) / r0).max(-self.constant_current),
            ChargeAlgorithm::Cpcv => {
                let ik = (v_ocv - (v_ocv * v_ocv + 4.0 * r0 * self.constant_power).sqrt())
                    / (2.0 * r0);
                if v_ocv - ik * r0 > v_max {
                    (v_ocv - v_max) / r0
                } else {
                    ik
                }
            }
        };
        ik = ik.max(-max_allowed);
        -ik
    }
}

/// Linear interpolation over equidistant x values starting at 0. Values
/// outside the table clamp to the first or last entry.
fn interpolate(y: &[f64], dx: f64, xi: f64) -> f64 {
    let n = y.len();
    if n == 0 {
        return 0.0;
    }
    let ip = (xi / dx).ceil();
    if !(ip > 0.0) {
        return y[0];
    }
    let ip = ip as usize;
    if ip >= n {
        return y[n - 1];
    }
    let im = ip - 1;
    y[im] + (xi - im as f64 * dx) / dx * (y[ip] - y[im])
}

/// Stateful one-second-step simulation of a single battery.
///
/// `simulate` calls must be contiguous: a simulation can be continued from
/// where it stopped but never rewound or skipped ahead.
#[derive(Debug, Clone)]
pub struct BatterySim<'a> {
    data: &'a BatteryData,
    capacity: f64,
    efficiency: f64,
    step: i64,
    soc: f64,
    charged_ah: f64,
    next_current: f64,
}

impl<'a> BatterySim<'a> {
    /// Creates a simulation at `initial_soc` for a battery of `capacity` Ah.
    ///
    /// # Errors
    ///
    /// Returns [`BatteryError::InitialSoc`] if `initial_soc` is outside `[0, 1]`.
    pub fn new(
        data: &'a BatteryData,
        capacity: f64,
        initial_soc: f64,
        efficiency: f64,
    ) -> Result<Self, BatteryError> {
        if !(0.0..=1.0).contains(&initial_soc) {
            return Err(BatteryError::InitialSoc(initial_soc));
        }
        Ok(Self {
            data,
            capacity,
            efficiency,
            step: 0,
            soc: initial_soc,
            charged_ah: 0.0,
            next_current: 0.0,
        })
    }

    pub fn data(&self) -> &'a BatteryData {
        self.data
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// State of charge at the end of the last simulated second.
    pub fn soc(&self) -> f64 {
        self.soc
    }

    /// Charge (Ah) accumulated since construction. Negative after stepping backwards.
    pub fn charged_ah(&self) -> f64 {
        self.charged_ah
    }

    /// Current the battery would draw during the next second under the static limit.
    pub fn next_current(&self) -> f64 {
        self.next_current
    }

    pub fn current_for_soc(&self, soc: f64, max_allowed: f64) -> f64 {
        self.data.current_for_soc(soc, max_allowed)
    }

    fn delta_ah(&self, current: f64) -> f64 {
        self.efficiency * ampere_hours(1.0, current)
    }

    /// Charges for one second.
    pub fn step_forward(&mut self, max_allowed: f64) {
        let current = self.current_for_soc(self.soc, max_allowed);
        self.step += 1;
        let delta = self.delta_ah(current);
        self.charged_ah += delta;
        self.soc += delta / self.capacity;
    }

    /// Undoes one second of charging, approximating the previous second's
    /// current with the current at the present SoC.
    pub fn step_backward(&mut self, max_allowed: f64) {
        let current = self.current_for_soc(self.soc, max_allowed);
        self.next_current = current;
        self.step -= 1;
        let delta = self.delta_ah(current);
        self.charged_ah -= delta;
        self.soc -= delta / self.capacity;
    }

    /// Simulates `[start, end)` following `plan`.
    ///
    /// Each second is limited to `plan[k] * sum_used_phases` for its timeslot
    /// `k` unless the slot is negative (unset) or equals `ignore`, in which
    /// case only `max_static` applies. Seconds past the end of the plan draw
    /// no current. No-op when `start == end`, apart from refreshing
    /// [`next_current`](Self::next_current).
    ///
    /// # Errors
    ///
    /// Returns an error if `start` lies before the seconds already simulated,
    /// or after them once the simulation has started.
    pub fn simulate(
        &mut self,
        start: i64,
        end: i64,
        plan: &[f64],
        sum_used_phases: f64,
        max_static: f64,
        ignore: Option<usize>,
    ) -> Result<(), BatteryError> {
        if self.step > start {
            return Err(BatteryError::AlreadySimulated {
                step: self.step,
                start,
            });
        }
        if self.step != 0 && start > self.step {
            return Err(BatteryError::Hole {
                step: self.step,
                start,
            });
        }

        self.step = start;
        for second in start..end {
            let k = timeslot_from_seconds(second);
            let allowed = match plan.get(k) {
                Some(&planned) if planned >= 0.0 && Some(k) != ignore => {
                    max_static.min(planned * sum_used_phases)
                }
                Some(_) => max_static,
                None => 0.0,
            };
            self.step_forward(allowed);
        }
        self.next_current = self.current_for_soc(self.soc, max_static);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_clamps_and_interpolates() {
        let data = BatteryData::sample();
        assert_eq!(data.ocv_at(0.0), 3.167);
        assert_eq!(data.ocv_at(-0.2), 3.167);
        assert_eq!(data.ocv_at(1.5), 4.166);
        let mid = data.ocv_at(0.025);
        assert!((mid - (3.167 + 3.413) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn cccv_starts_at_constant_current() {
        let data = BatteryData::sample();
        assert!((data.current_for_soc(0.1, 200.0) - 96.0).abs() < 1e-9);
        assert!((data.current_for_soc(0.1, 32.0) - 32.0).abs() < 1e-9);
    }

    #[test]
    fn cccv_decays_near_full() {
        let data = BatteryData::sample();
        let low = data.current_for_soc(0.5, 96.0);
        let high = data.current_for_soc(0.97, 96.0);
        assert!(high < low);
        assert!(data.current_for_soc(1.0, 96.0).abs() < 1e-9);
    }

    #[test]
    fn cpcv_limits_power() {
        let mut data = BatteryData::sample();
        data.algorithm = ChargeAlgorithm::Cpcv;
        let i = data.current_for_soc(0.3, 1000.0);
        let v_term = data.ocv_at(0.3) + i * data.resistance_at(0.3);
        assert!((i * v_term - data.constant_power).abs() < 1e-6);
    }

    #[test]
    fn rejects_invalid_initial_soc() {
        let data = BatteryData::sample();
        assert!(BatterySim::new(&data, 65.6, 1.01, 0.85).is_err());
        assert!(BatterySim::new(&data, 65.6, -0.01, 0.85).is_err());
        assert!(BatterySim::new(&data, 65.6, 1.0, 0.85).is_ok());
    }

    #[test]
    fn forward_then_backward_restores_soc() {
        let data = BatteryData::with_constant_resistance(0.006);
        let mut sim = BatterySim::new(&data, 65.6, 0.2, 0.85).expect("valid sim");
        sim.step_forward(96.0);
        sim.step_backward(96.0);
        assert!((sim.soc() - 0.2).abs() < 1e-6);
        assert!(sim.charged_ah().abs() < 1e-6);
    }

    #[test]
    fn simulate_follows_plan() {
        let data = BatteryData::sample();
        let mut sim = BatterySim::new(&data, 65.6, 0.0, 0.85).expect("valid sim");
        let plan = [10.0, 0.0];
        assert!(sim.simulate(0, 1800, &plan, 3.0, 96.0, None).is_ok());
        let expected = 0.85 * 30.0 * 900.0 / 3600.0;
        assert!((sim.charged_ah() - expected).abs() < 1e-9);
        assert!((sim.next_current() - 96.0).abs() < 1e-9);
    }

    #[test]
    fn simulate_ignores_slot() {
        let data = BatteryData::sample();
        let mut sim = BatterySim::new(&data, 65.6, 0.0, 0.85).expect("valid sim");
        let plan = [0.0];
        assert!(sim.simulate(0, 900, &plan, 3.0, 48.0, Some(0)).is_ok());
        assert!((sim.charged_ah() - 0.85 * 48.0 * 0.25).abs() < 1e-9);
    }

    #[test]
    fn simulate_must_be_contiguous() {
        let data = BatteryData::sample();
        let mut sim = BatterySim::new(&data, 65.6, 0.0, 0.85).expect("valid sim");
        let plan = [32.0; 4];
        assert!(sim.simulate(300, 900, &plan, 3.0, 96.0, None).is_ok());
        assert!(matches!(
            sim.simulate(600, 900, &plan, 3.0, 96.0, None),
            Err(BatteryError::AlreadySimulated { .. })
        ));
        assert!(matches!(
            sim.simulate(1200, 1800, &plan, 3.0, 96.0, None),
            Err(BatteryError::Hole { .. })
        ));
        assert!(sim.simulate(900, 1800, &plan, 3.0, 96.0, None).is_ok());
    }
}
