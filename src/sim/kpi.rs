//! Post-hoc KPI computation from simulation records.

use std::fmt;

use crate::model::car::Car;

use super::engine::TimeslotRecord;

/// Aggregate key performance indicators derived from a complete run.
///
/// Computed post-hoc from the timeslot records and the final car states so
/// the report always agrees with the exported data.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    /// Charge stored in all batteries (Ah).
    pub total_charged_ah: f64,
    /// Share of cars that reached their minimum loading state (0.0-1.0).
    pub min_soc_share: f64,
    /// Share of cars that left full (0.0-1.0).
    pub full_share: f64,
    /// Highest mean root current on any phase (A).
    pub peak_root_current: f64,
    /// Energy drawn from the grid (kWh).
    pub energy_kwh: f64,
    pub energy_cost: f64,
    /// Timeslots during which some node was overloaded.
    pub violation_timeslots: usize,
}

impl SimulationReport {
    /// Computes all KPIs from the run's records and final car states.
    pub fn from_run(records: &[TimeslotRecord], cars: &[Car]) -> Self {
        let share = |n: usize| {
            if cars.is_empty() {
                0.0
            } else {
                n as f64 / cars.len() as f64
            }
        };
        let reached_min = cars
            .iter()
            .filter(|c| c.missing_capacity_to_min_soc() <= 1e-6)
            .count();
        let full = cars.iter().filter(|c| c.is_fully_charged()).count();

        let mut peak = 0.0_f64;
        let mut energy = 0.0;
        let mut cost = 0.0;
        let mut violations = 0;
        for r in records {
            peak = peak.max(r.root_current.max());
            energy += r.energy_kwh;
            cost += r.energy_cost;
            if !r.fuse_tree_valid {
                violations += 1;
            }
        }

        Self {
            total_charged_ah: cars.iter().map(|c| c.battery.charged_capacity()).sum(),
            min_soc_share: share(reached_min),
            full_share: share(full),
            peak_root_current: peak,
            energy_kwh: energy,
            energy_cost: cost,
            violation_timeslots: violations,
        }
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- KPI Report ---")?;
        writeln!(f, "Charged:               {:.2} Ah", self.total_charged_ah)?;
        writeln!(f, "Reached minimum SoC:   {:.1}%", 100.0 * self.min_soc_share)?;
        writeln!(f, "Fully charged:         {:.1}%", 100.0 * self.full_share)?;
        writeln!(f, "Peak root current:     {:.2} A", self.peak_root_current)?;
        writeln!(
            f,
            "Grid energy:           {:.2} kWh (cost {:.2})",
            self.energy_kwh, self.energy_cost
        )?;
        write!(f, "Fuse violations:       {}", self.violation_timeslots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::car::CarBuilder;
    use crate::model::phase::PhaseCurrents;

    fn record(k: usize, root: f64, valid: bool) -> TimeslotRecord {
        TimeslotRecord {
            timeslot: k,
            root_current: PhaseCurrents::new(root, root / 2.0, 0.0),
            planned_ah: 0.0,
            charged_ah: 1.0,
            energy_kwh: 2.0,
            energy_cost: 0.5,
            assigned_cars: 1,
            unassigned_cars: 0,
            fuse_tree_valid: valid,
        }
    }

    fn cars() -> Vec<Car> {
        let specs = [(40.0, 40.0), (40.0, 25.0), (40.0, 5.0), (40.0, 0.0)];
        specs
            .iter()
            .enumerate()
            .filter_map(|(id, &(max, current))| {
                CarBuilder::new(id as u32)
                    .max_capacity(max)
                    .current_capacity(current)
                    .build()
                    .ok()
            })
            .collect()
    }

    #[test]
    fn shares_and_totals() {
        let records = vec![record(0, 10.0, true), record(1, 30.0, false), record(2, 20.0, true)];
        let report = SimulationReport::from_run(&records, &cars());
        assert_eq!(report.full_share, 0.25);
        assert_eq!(report.min_soc_share, 0.5);
        assert_eq!(report.peak_root_current, 30.0);
        assert_eq!(report.energy_kwh, 6.0);
        assert_eq!(report.energy_cost, 1.5);
        assert_eq!(report.violation_timeslots, 1);
    }

    #[test]
    fn empty_run() {
        let report = SimulationReport::from_run(&[], &[]);
        assert_eq!(report.min_soc_share, 0.0);
        assert_eq!(report.violation_timeslots, 0);
        assert!(report.to_string().starts_with("--- KPI Report ---"));
    }
}
