//! Static scenario model: units, phases, batteries, cars, stations, the fuse
//! tree and energy prices.

pub mod battery;
pub mod car;
pub mod fuse_tree;
pub mod phase;
pub mod prices;
pub mod station;
pub mod units;
