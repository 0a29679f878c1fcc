//! Simulation driver, scenario generation and KPIs.

/// Simulated-second clock.
pub mod clock;
pub mod engine;
pub mod generator;
pub mod kpi;

pub use engine::{Simulation, SimulationSettings, TimeslotRecord};
pub use generator::{Scenario, ScenarioGenerator};
pub use kpi::SimulationReport;
