//! Property tests for the fill engine and charging priority.

use ev_charge_sim::model::car::{Car, CarBuilder};
use ev_charge_sim::model::station::ChargingStation;
use ev_charge_sim::realtime::StrategyAlgorithmic;
use ev_charge_sim::realtime::fill::ChargeScheduler;
use proptest::prelude::*;

fn planned_car(plan: &[f64]) -> Car {
    let mut car = CarBuilder::new(0).max_capacity(400.0).build().expect("valid car");
    for (slot, &value) in car.plan_mut().iter_mut().zip(plan) {
        *slot = value;
    }
    car
}

/// 40 Ah car with a 20 Ah minimum loading state.
fn minimum_car(capacity: f64) -> Car {
    CarBuilder::new(0)
        .max_capacity(40.0)
        .current_capacity(capacity)
        .min_loading_state(20.0)
        .build()
        .expect("valid car")
}

fn plan() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0..32.0f64, 96)
}

proptest! {
    /// Planned charge over adjacent intervals adds up.
    #[test]
    fn linear_capacity_is_additive(
        plan in plan(),
        now in 0i64..86_400,
        a in 0i64..86_400,
        b in 0i64..86_400,
        c in 0i64..86_400,
    ) {
        let mut bounds = [a.max(now), b.max(now), c.max(now)];
        bounds.sort_unstable();
        let [start, mid, end] = bounds;
        let car = planned_car(&plan);
        let s = ChargeScheduler::default();
        let whole = s.planned_capacity_linear(&car, now, start, end);
        let split = s.planned_capacity_linear(&car, now, start, mid) + s.planned_capacity_linear(&car, now, mid, end);
        prop_assert!((whole - split).abs() < 1e-6, "whole={whole}, split={split}");
        prop_assert!(whole >= -1e-9);
    }

    /// A linear fill never plans more than asked for and never exceeds the
    /// station limit.
    #[test]
    fn linear_fill_stays_within_limits(
        desired in 0.0..200.0f64,
        limit in 6.0..32.0f64,
        first in 0usize..90,
    ) {
        let mut car = planned_car(&[]);
        let station = ChargingStation::new(0, limit);
        let mut s = ChargeScheduler::default();
        let slots: Vec<usize> = (first..96).collect();
        let rest = s.fill_plan(&mut car, &station, desired, &slots, 0).expect("linear fill cannot fail");
        let planned = s.planned_capacity_linear(&car, 0, 0, 86_400);
        prop_assert!(planned <= desired + 1e-6);
        prop_assert!((planned + rest - desired).abs() < 1e-6);
        prop_assert!(car.plan().iter().all(|&c| c <= limit + 1e-9));
        prop_assert!(car.plan()[..first].iter().all(|&c| c == 0.0));
    }

    /// Cars below their minimum loading state outrank every car above it,
    /// and an earlier departure never lowers the priority.
    #[test]
    fn priority_orders_by_minimum_then_urgency(
        low in 0.0..19.0f64,
        high in 21.0..40.0f64,
        departure in 1_000i64..80_000,
        earlier in 1i64..900,
    ) {
        let below = minimum_car(low);
        let above = minimum_car(high);
        let station = ChargingStation::new(0, 32.0);
        let s = StrategyAlgorithmic::new();
        let p_below = s.charging_priority(&below, &station, 0, departure);
        let p_above = s.charging_priority(&above, &station, 0, departure);
        prop_assert!(p_below > p_above);
        prop_assert!(s.charging_priority(&below, &station, 0, departure - earlier) >= p_below);
    }

    /// With the same departure, the car further below its minimum loading
    /// state is more urgent.
    #[test]
    fn deeper_below_minimum_ranks_higher(
        further in 0.0..10.0f64,
        gap in 0.5..9.5f64,
        departure in 1_000i64..80_000,
    ) {
        let s = StrategyAlgorithmic::new();
        let station = ChargingStation::new(0, 32.0);
        let deep = minimum_car(further);
        let shallow = minimum_car(further + gap);
        prop_assert!(
            s.charging_priority(&deep, &station, 0, departure) > s.charging_priority(&shallow, &station, 0, departure)
        );
    }

    /// Past the minimum loading state, the fuller car is less urgent.
    #[test]
    fn closer_to_full_ranks_lower(
        emptier in 21.0..35.0f64,
        gap in 0.5..4.5f64,
        departure in 1_000i64..80_000,
    ) {
        let s = StrategyAlgorithmic::new();
        let station = ChargingStation::new(0, 32.0);
        let emptier_car = minimum_car(emptier);
        let fuller_car = minimum_car(emptier + gap);
        prop_assert!(
            s.charging_priority(&fuller_car, &station, 0, departure)
                < s.charging_priority(&emptier_car, &station, 0, departure)
        );
    }
}
