//! Real-time scheduling: session state, fuse checks, event dispatch and the
//! charging strategies.

pub mod algorithmic;
pub mod dayahead;
pub mod event;
pub mod fill;
pub mod forecast;
pub mod from_dayahead;
pub mod greedy;
pub mod sorter;
pub mod state;
pub mod strategy;
pub mod validation;

pub use algorithmic::{Objectives, StrategyAlgorithmic};
pub use event::{Event, EventKind};
pub use from_dayahead::StrategyFromDayahead;
pub use greedy::StrategyGreedy;
pub use state::State;
pub use strategy::{Strategy, react};
