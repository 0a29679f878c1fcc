//! Nonlinear plan filling against the battery simulation.

use ev_charge_sim::model::battery::BatteryData;
use ev_charge_sim::model::car::{Car, CarBuilder, CarModel};
use ev_charge_sim::model::station::ChargingStation;
use ev_charge_sim::realtime::fill::ChargeScheduler;

const HORIZON: usize = 16;

fn zoe(soc: f64) -> Car {
    let max = CarModel::RenaultZoeZe40.spec().max_capacity;
    CarBuilder::from_model(0, CarModel::RenaultZoeZe40)
        .horizon(HORIZON)
        .availability(0, HORIZON - 1)
        .current_capacity(soc * max)
        .min_loading_state(0.0)
        .nonlinear(BatteryData::sample())
        .build()
        .expect("valid car")
}

fn fill(car: &mut Car, desired: f64, now: i64) -> (ChargeScheduler, f64) {
    let station = ChargingStation::new(0, 32.0);
    let mut s = ChargeScheduler::default().with_nonlinear(true);
    let first = (now / 900) as usize;
    let slots: Vec<usize> = (first..HORIZON).collect();
    let rest = s.fill_plan(car, &station, desired, &slots, now).expect("fill failed");
    (s, rest)
}

fn planned(s: &mut ChargeScheduler, car: &Car, now: i64) -> f64 {
    s.planned_capacity(&ChargingStation::new(0, 32.0), car, now).expect("simulation failed")
}

#[test]
fn backward_simulation_lands_on_a_small_target() {
    for soc in [0.0, 0.5] {
        let mut car = zoe(soc);
        let (mut s, _) = fill(&mut car, 0.1, 0);
        assert!(car.plan()[0] > 0.0 && car.plan()[0] < 32.0);
        assert!(car.plan()[1..].iter().all(|&c| c == 0.0));
        let got = planned(&mut s, &car, 0);
        assert!((got - 0.1).abs() < 1e-8, "soc={soc}: planned {got}");
    }
}

#[test]
fn exhaustive_sweep_from_empty() {
    let missing = zoe(0.0).missing_capacity();
    let mut targets: Vec<f64> = (1..).map(f64::from).take_while(|&d| d < missing).collect();
    targets.push(missing);
    for desired in targets {
        let mut car = zoe(0.0);
        let (mut s, _) = fill(&mut car, desired, 0);
        let got = planned(&mut s, &car, 0);
        assert!((got - desired).abs() < 1e-2, "desired={desired}: planned {got}");
    }
}

#[test]
fn fine_sweep_from_high_soc() {
    let missing = zoe(0.9).missing_capacity();
    let targets = (1..).map(|i| f64::from(i) * 0.1).take_while(|&d| d < missing);
    for desired in targets {
        let mut car = zoe(0.9);
        let (mut s, _) = fill(&mut car, desired, 0);
        let got = planned(&mut s, &car, 0);
        assert!((got - desired).abs() < 1e-2, "desired={desired:.1}: planned {got}");
    }
}

#[test]
fn sweep_over_soc_and_target_in_constant_current_range() {
    let capacity = CarModel::RenaultZoeZe40.spec().max_capacity;
    for soc in [0.05, 0.1, 0.3, 0.5] {
        for desired in [0.5, 5.0, 15.0, 25.0] {
            // Stay below the constant-voltage knee.
            if soc + desired / capacity > 0.8 {
                continue;
            }
            let mut car = zoe(soc);
            let (mut s, rest) = fill(&mut car, desired, 0);
            let got = planned(&mut s, &car, 0);
            assert!((got - desired).abs() < 1e-2, "soc={soc} desired={desired}: planned {got}");
            assert!(rest.abs() < 1e-2, "soc={soc} desired={desired}: rest {rest}");
            assert!(car.plan().iter().all(|&c| c <= 32.0 + 1e-9));
        }
    }
}

#[test]
fn filling_to_full_converges_in_constant_voltage() {
    let mut car = zoe(0.85);
    let missing = car.missing_capacity();
    let (mut s, _) = fill(&mut car, missing, 0);
    let got = planned(&mut s, &car, 0);
    assert!(got <= missing + 1e-6);
    assert!(got > 0.99 * missing, "planned {got} of {missing}");
}

#[test]
fn mid_timeslot_fill_never_overshoots() {
    let mut car = zoe(0.3);
    let (mut s, _) = fill(&mut car, 5.0, 450);
    assert!(car.plan()[0] > 0.0);
    let got = planned(&mut s, &car, 450);
    assert!(got > 0.0 && got <= 5.0 + 1e-6);
}

#[test]
fn full_battery_plans_nothing() {
    let mut car = zoe(1.0);
    let (mut s, rest) = fill(&mut car, 1.0, 0);
    assert!(planned(&mut s, &car, 0).abs() < 1e-9);
    assert!(rest > 0.0);
}

#[test]
fn linear_and_nonlinear_agree_at_low_soc() {
    let station = ChargingStation::new(0, 32.0);
    let mut linear_car = zoe(0.2);
    let mut nonlinear_car = zoe(0.2);
    let mut linear = ChargeScheduler::default();
    let slots: Vec<usize> = (0..HORIZON).collect();
    assert!(linear.fill_plan(&mut linear_car, &station, 10.0, &slots, 0).is_ok());
    let (_, _) = fill(&mut nonlinear_car, 10.0, 0);
    assert!((linear_car.plan()[0] - nonlinear_car.plan()[0]).abs() < 0.5);
}
