//! File output: plans, timeslot records and state snapshots.

pub mod export;
