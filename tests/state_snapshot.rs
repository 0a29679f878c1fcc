mod common;

use common::{car, cheap_morning_prices, two_station_tree};
use ev_charge_sim::model::phase::PhaseCurrents;
use ev_charge_sim::realtime::State;

fn populated() -> State {
    let cars = vec![car(0, 40.8, 10.0), car(1, 40.8, 0.0), car(2, 40.8, 0.0)];
    let mut st = common::state(two_station_tree(100.0), cars, cheap_morning_prices());
    st.set_time_seconds(1_234);
    st.add_car_assignment(0, 1).expect("assignment failed").expected_departure_seconds = 50_000;
    assert!(st.add_car_assignment(1, 0).is_ok());
    assert!(st.add_power_assignment(1, 0, PhaseCurrents::new(16.0, 16.0, 0.0)).is_ok());
    assert!(st.add_unassigned_car(2).is_ok());
    st
}

#[test]
fn snapshot_survives_json() {
    let original = populated();
    let json = original.snapshot_json().expect("snapshot should serialize");
    let cars = original.cars().to_vec();
    let restored = State::from_snapshot_json(&json, two_station_tree(100.0), cars, cheap_morning_prices());
    let restored = restored.expect("snapshot should restore");

    assert_eq!(restored.snapshot(), original.snapshot());
    assert_eq!(restored.current_timeslot(), 1);
    assert_eq!(restored.car_assignment(0).map(|a| a.expected_departure_seconds), Some(50_000));
    assert!(restored.free_stations().is_empty());
    assert!(restored.is_car_unassigned(2));
}

#[test]
fn snapshot_with_unknown_car_is_rejected() {
    let json = populated().snapshot_json().expect("snapshot should serialize");
    // Population without car 2.
    let cars = vec![car(0, 40.8, 10.0), car(1, 40.8, 0.0)];
    let restored = State::from_snapshot_json(&json, two_station_tree(100.0), cars, cheap_morning_prices());
    assert!(restored.is_err());
}

#[test]
fn malformed_json_is_an_error() {
    let cars = vec![car(0, 40.8, 0.0)];
    assert!(State::from_snapshot_json("{", two_station_tree(100.0), cars, cheap_morning_prices()).is_err());
}
