//! Seeded synthetic scenarios: fuse tree, car population and prices.

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::config::ScenarioConfig;
use crate::error::{CarError, ScenarioError, TreeError};
use crate::model::battery::BatteryData;
use crate::model::car::{Car, CarBuilder, CarIdAllocator, CarModel};
use crate::model::fuse_tree::{Fuse, FuseTree};
use crate::model::prices::EnergyPriceHistory;
use crate::model::station::{ChargingStation, PhaseRotation, StationId};
use crate::model::units::{seconds_from_timeslot, timeslot_from_seconds};
use crate::realtime::state::State;

/// Everything a simulation needs besides the strategy.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub tree: FuseTree,
    pub cars: Vec<Car>,
    pub prices: EnergyPriceHistory,
}

impl Scenario {
    /// Session state at the configured start with every station free.
    pub fn into_state(self, start_seconds: i64) -> Result<State, ScenarioError> {
        Ok(State::new(start_seconds, self.tree, self.cars, self.prices)?)
    }
}

/// Draws scenarios from a [`ScenarioConfig`].
///
/// The same config and seed always produce the same scenario.
pub struct ScenarioGenerator {
    config: ScenarioConfig,
    rng: StdRng,
    ids: CarIdAllocator,
}

impl ScenarioGenerator {
    pub fn new(config: &ScenarioConfig) -> Self {
        Self {
            config: config.clone(),
            rng: StdRng::seed_from_u64(config.simulation.seed),
            ids: CarIdAllocator::new(),
        }
    }

    /// Builds the full scenario.
    ///
    /// # Errors
    ///
    /// Returns a [`ScenarioError`] if the tree or a car is inconsistent.
    pub fn generate(mut self) -> Result<Scenario, ScenarioError> {
        let tree = self.fuse_tree()?;
        let prices = self.prices()?;
        let cars = self.cars()?;
        debug!(
            stations = tree.station_count(),
            cars = cars.len(),
            timeslots = prices.len(),
            "scenario generated"
        );
        Ok(Scenario { tree, cars, prices })
    }

    /// Root fuse over level-1 fuses over level-2 fuses over stations.
    /// Station `i` is wired with its phases rotated by `i`.
    pub fn fuse_tree(&self) -> Result<FuseTree, TreeError> {
        let f = &self.config.fuse_tree;
        let mut fuse_id = 1;
        let mut station_id: StationId = 0;
        let mut root = Fuse::new(0, f.root_a);
        for _ in 0..f.level1_count {
            let mut level1 = Fuse::new(fuse_id, f.level1_a);
            fuse_id += 1;
            for _ in 0..f.level2_per_level1 {
                let mut level2 = Fuse::new(fuse_id, f.level2_a);
                fuse_id += 1;
                for _ in 0..f.stations_per_level2 {
                    let rotation = PhaseRotation::rotated(station_id as usize);
                    level2 = level2.add_child(ChargingStation::new(station_id, f.station_a).with_rotation(rotation));
                    station_id += 1;
                }
                level1 = level1.add_child(level2);
            }
            root = root.add_child(level1);
        }
        FuseTree::new(root)
    }

    /// One price per timeslot following the configured model.
    pub fn prices(&mut self) -> Result<EnergyPriceHistory, ScenarioError> {
        let p = self.config.prices.clone();
        let n = self.config.simulation.timeslots;
        let prices = (0..n)
            .map(|k| match p.model.as_str() {
                "random" if p.amplitude > 0.0 => {
                    (p.base + self.rng.random_range(-p.amplitude..=p.amplitude)).max(0.0)
                }
                "double_peak" => {
                    let hour = k as f64 * 0.25;
                    let morning = (-((hour - 8.0) / 1.5).powi(2)).exp();
                    let evening = (-((hour - 18.5) / 2.0).powi(2)).exp();
                    p.base + p.amplitude * (morning + evening)
                }
                _ => p.base,
            })
            .collect();
        Ok(EnergyPriceHistory::new(prices, None)?)
    }

    /// Draws the configured number of cars.
    pub fn cars(&mut self) -> Result<Vec<Car>, CarError> {
        (0..self.config.cars.count).map(|_| self.car()).collect()
    }

    fn car(&mut self) -> Result<Car, CarError> {
        let c = self.config.cars.clone();
        let horizon = self.config.simulation.timeslots;
        let end = seconds_from_timeslot(horizon) - 1;

        let model = match CarModel::from_name(&c.model) {
            Some(model) => model,
            None => CarModel::ALL[self.rng.random_range(0..CarModel::ALL.len())],
        };
        let arrival = self
            .rng
            .random_range(c.arrival_earliest_seconds..=c.arrival_latest_seconds)
            .clamp(0, end);
        let dwell = self.rng.random_range(c.dwell_min_seconds..=c.dwell_max_seconds);
        let departure = (arrival + dwell).min(end);
        let soc = self.rng.random_range(c.initial_soc_min..=c.initial_soc_max);

        let id = self.ids.allocate();
        let max_capacity = model.spec().max_capacity;
        let mut builder = CarBuilder::from_model(id, model)
            .horizon(horizon)
            .availability(timeslot_from_seconds(arrival), timeslot_from_seconds(departure))
            .timestamps(arrival, departure)
            .current_capacity(soc * max_capacity)
            .min_loading_state(c.min_soc * max_capacity);
        if self.config.strategy.nonlinear_charging {
            builder = builder.nonlinear(BatteryData::sample());
        }
        builder.build()
    }
}
