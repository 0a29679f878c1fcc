//! Real-time charging scheduler for electric vehicles behind a tree of fuses.

pub mod config;
pub mod error;
pub mod io;
/// Static scenario model.
pub mod model;
pub mod realtime;
/// Simulation driver, scenario generation and KPIs.
pub mod sim;
pub mod telemetry;
