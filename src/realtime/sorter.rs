//! Orders candidate timeslots for filling.

use std::collections::BTreeSet;

use super::state::State;

/// Key by which candidate timeslots are ranked, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortingCriteria {
    /// Earliest first.
    Index,
    /// Lowest energy price first.
    Price,
    /// Lowest planned demand of the assigned cars first.
    PeakDemand,
}

impl SortingCriteria {
    fn key(self, state: &State, k: usize) -> f64 {
        match self {
            SortingCriteria::Index => k as f64,
            SortingCriteria::Price => state.prices().price(k),
            SortingCriteria::PeakDemand => state.planned_demand_at(k),
        }
    }
}

/// Timeslots in `[min_k, max_k)` not in `blocked`, ascending by `criteria`.
/// Ties keep timeslot order.
pub fn sorted_timeslots(
    state: &State,
    min_k: usize,
    max_k: usize,
    criteria: SortingCriteria,
    blocked: &BTreeSet<usize>,
) -> Vec<usize> {
    let mut keyed: Vec<(usize, f64)> = (min_k..max_k)
        .filter(|k| !blocked.contains(k))
        .map(|k| (k, criteria.key(state, k)))
        .collect();
    keyed.sort_by(|a, b| a.1.total_cmp(&b.1));
    keyed.into_iter().map(|(k, _)| k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::car::CarBuilder;
    use crate::model::fuse_tree::FuseTree;
    use crate::model::prices::EnergyPriceHistory;

    fn state(prices: Vec<f64>) -> State {
        let tree = FuseTree::simple(100.0, 2, 32.0).expect("valid tree");
        let prices = EnergyPriceHistory::new(prices, None).expect("valid prices");
        let cars = (0..2)
            .filter_map(|id| CarBuilder::new(id).horizon(prices.len()).build().ok())
            .collect();
        State::new(0, tree, cars, prices).expect("valid state")
    }

    #[test]
    fn index_skips_blocked() {
        let s = state(vec![0.3; 6]);
        let blocked = BTreeSet::from([2, 4]);
        assert_eq!(
            sorted_timeslots(&s, 1, 6, SortingCriteria::Index, &blocked),
            vec![1, 3, 5]
        );
    }

    #[test]
    fn price_is_stable_on_ties() {
        let s = state(vec![0.5, 0.2, 0.4, 0.2, 0.1]);
        assert_eq!(
            sorted_timeslots(&s, 0, 5, SortingCriteria::Price, &BTreeSet::new()),
            vec![4, 1, 3, 2, 0]
        );
    }

    #[test]
    fn peak_demand_counts_assigned_cars() {
        let mut s = state(vec![0.3; 4]);
        assert!(s.add_car_assignment(0, 0).is_ok());
        if let Some(car) = s.car_mut(0) {
            car.plan_mut()[0] = 10.0;
            car.plan_mut()[2] = 5.0;
        }
        // Unassigned car plans are ignored.
        if let Some(car) = s.car_mut(1) {
            car.plan_mut()[1] = 30.0;
        }
        assert_eq!(
            sorted_timeslots(&s, 0, 4, SortingCriteria::PeakDemand, &BTreeSet::new()),
            vec![1, 3, 2, 0]
        );
    }

    #[test]
    fn empty_range() {
        let s = state(vec![0.3; 4]);
        assert!(sorted_timeslots(&s, 3, 3, SortingCriteria::Index, &BTreeSet::new()).is_empty());
        assert!(sorted_timeslots(&s, 4, 2, SortingCriteria::Index, &BTreeSet::new()).is_empty());
    }
}
