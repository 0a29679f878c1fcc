//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use ev_charge_sim::model::battery::BatteryData;
use ev_charge_sim::model::car::{Car, CarBuilder, CarId, CarModel};
use ev_charge_sim::model::fuse_tree::{Fuse, FuseTree};
use ev_charge_sim::model::prices::EnergyPriceHistory;
use ev_charge_sim::model::station::{ChargingStation, PhaseRotation};
use ev_charge_sim::realtime::State;

/// Root fuse with two station children of 32 A each.
pub fn two_station_tree(root_a: f64) -> FuseTree {
    let root = Fuse::new(0, root_a)
        .add_child(ChargingStation::new(0, 32.0))
        .add_child(ChargingStation::new(1, 32.0));
    FuseTree::new(root).expect("valid tree")
}

/// 100 A root over two 50 A branches with two 32 A stations each. The
/// second station of every branch is wired with rotated phases.
pub fn branched_tree() -> FuseTree {
    let branch = |id: u32, first: u32| {
        Fuse::new(id, 50.0)
            .add_child(ChargingStation::new(first, 32.0))
            .add_child(ChargingStation::new(first + 1, 32.0).with_rotation(PhaseRotation::rotated(1)))
    };
    let root = Fuse::new(0, 100.0).add_child(branch(1, 0)).add_child(branch(2, 2));
    FuseTree::new(root).expect("valid tree")
}

/// Generic three-phase car without a minimum loading state.
pub fn car(id: CarId, max_ah: f64, current_ah: f64) -> Car {
    CarBuilder::new(id)
        .max_capacity(max_ah)
        .current_capacity(current_ah)
        .min_loading_state(0.0)
        .build()
        .expect("valid car")
}

/// Three-phase car parked between the given timeslots.
pub fn parked_tesla(id: CarId, first: usize, last: usize) -> Car {
    CarBuilder::from_model(id, CarModel::TeslaModelS)
        .current_capacity(20.0)
        .availability(first, last)
        .build()
        .expect("valid car")
}

/// Renault Zoe with the sample nonlinear battery at the given SoC.
pub fn nonlinear_zoe(id: CarId, soc: f64) -> Car {
    let max = CarModel::RenaultZoeZe40.spec().max_capacity;
    CarBuilder::from_model(id, CarModel::RenaultZoeZe40)
        .current_capacity(soc * max)
        .min_loading_state(0.0)
        .nonlinear(BatteryData::sample())
        .build()
        .expect("valid car")
}

/// Prices with the two first timeslots cheaper than the rest of the day.
pub fn cheap_morning_prices() -> EnergyPriceHistory {
    let mut p = vec![0.3; 96];
    p[0] = 0.1;
    p[1] = 0.2;
    EnergyPriceHistory::new(p, None).expect("valid prices")
}

pub fn state(tree: FuseTree, cars: Vec<Car>, prices: EnergyPriceHistory) -> State {
    State::new(0, tree, cars, prices).expect("valid state")
}

pub fn plan_of(state: &State, id: CarId) -> Vec<f64> {
    state.car(id).map(|c| c.plan().to_vec()).unwrap_or_default()
}
