//! TOML-based scenario configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::car::CarModel;

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the baseline scenario. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Scheduling strategy parameters.
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Fuse tree topology and limits.
    #[serde(default)]
    pub fuse_tree: FuseTreeConfig,
    /// Car population.
    #[serde(default)]
    pub cars: CarsConfig,
    /// Energy price curve.
    #[serde(default)]
    pub prices: PricesConfig,
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Master random seed.
    pub seed: u64,
    /// Simulated second the run starts at.
    pub start_seconds: i64,
    /// Number of 15-minute timeslots (must be > 0).
    pub timeslots: usize,
    /// Strategy: `"algorithmic"`, `"greedy"` or `"dayahead"`.
    pub strategy: String,
    /// Seconds between reoptimize events, 0 disables them.
    pub reoptimize_interval_seconds: i64,
    /// Seconds between price change events.
    pub price_change_interval_seconds: i64,
    /// Day-ahead plan (JSON). Required by the `"dayahead"` strategy.
    pub dayahead_plan: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            start_seconds: 0,
            timeslots: 96,
            strategy: "algorithmic".to_string(),
            reoptimize_interval_seconds: 0,
            price_change_interval_seconds: 900,
            dayahead_plan: None,
        }
    }
}

/// Parameters of the algorithmic strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    /// Plan with the nonlinear battery model.
    pub nonlinear_charging: bool,
    /// Empty the overloaded slot of a rescheduled car instead of only
    /// removing the overload.
    pub reschedule_with_zero: bool,
    pub weight_fair_share: f64,
    pub weight_peak_shaving: f64,
    pub weight_energy_costs: f64,
    pub weight_load_imbalance: f64,
    /// Fill cars to full once they stay past their expected departure.
    pub refill_after_expected_departure: bool,
    /// Memoize nonlinear capacity queries.
    pub capacity_cache: bool,
    /// Share of grid charge that reaches the battery (0.0-1.0].
    pub charging_efficiency: f64,
    /// Departure forecast: `"median"` or `"oracle"`.
    pub departure_forecast: String,
    /// Departure predicted by the median forecast (seconds of day).
    pub median_departure_seconds: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            nonlinear_charging: false,
            reschedule_with_zero: true,
            weight_fair_share: 0.0,
            weight_peak_shaving: 0.0,
            weight_energy_costs: 1.0,
            weight_load_imbalance: 0.0,
            refill_after_expected_departure: true,
            capacity_cache: false,
            charging_efficiency: 0.85,
            departure_forecast: "median".to_string(),
            median_departure_seconds: 61_380,
        }
    }
}

/// Three-level fuse tree: root, level-1 fuses, level-2 fuses, stations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuseTreeConfig {
    /// Root limit per phase (A).
    pub root_a: f64,
    /// Level-1 fuse limit per phase (A).
    pub level1_a: f64,
    /// Level-2 fuse limit per phase (A).
    pub level2_a: f64,
    /// Station limit per phase (A).
    pub station_a: f64,
    pub level1_count: usize,
    pub level2_per_level1: usize,
    pub stations_per_level2: usize,
}

impl Default for FuseTreeConfig {
    fn default() -> Self {
        Self {
            root_a: 4000.0,
            level1_a: 1250.0,
            level2_a: 800.0,
            station_a: 32.0,
            level1_count: 2,
            level2_per_level1: 2,
            stations_per_level2: 5,
        }
    }
}

impl FuseTreeConfig {
    pub fn station_count(&self) -> usize {
        self.level1_count * self.level2_per_level1 * self.stations_per_level2
    }
}

/// Synthetic car population.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarsConfig {
    pub count: usize,
    /// Model key (e.g. `"renault_zoe_ze40"`) or `"mixed"`.
    pub model: String,
    pub arrival_earliest_seconds: i64,
    pub arrival_latest_seconds: i64,
    pub dwell_min_seconds: i64,
    pub dwell_max_seconds: i64,
    /// Initial state of charge range (0.0-1.0).
    pub initial_soc_min: f64,
    pub initial_soc_max: f64,
    /// Minimum SoC target as a fraction of capacity.
    pub min_soc: f64,
}

impl Default for CarsConfig {
    fn default() -> Self {
        Self {
            count: 30,
            model: "mixed".to_string(),
            arrival_earliest_seconds: 6 * 3600,
            arrival_latest_seconds: 10 * 3600,
            dwell_min_seconds: 4 * 3600,
            dwell_max_seconds: 10 * 3600,
            initial_soc_min: 0.1,
            initial_soc_max: 0.6,
            min_soc: 0.5,
        }
    }
}

/// Energy price curve.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricesConfig {
    /// `"flat"`, `"random"` or `"double_peak"`.
    pub model: String,
    /// Base price (€/kWh).
    pub base: f64,
    /// Variation around the base (€/kWh).
    pub amplitude: f64,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            model: "double_peak".to_string(),
            base: 0.25,
            amplitude: 0.1,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.timeslots"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl ScenarioConfig {
    /// Returns the baseline scenario: a generously fused site.
    pub fn baseline() -> Self {
        Self::default()
    }

    /// Returns the tight-fuse preset: the root carries less than the sum of
    /// its stations, so the scheduler has to shift charge around.
    pub fn tight_fuse() -> Self {
        Self {
            fuse_tree: FuseTreeConfig {
                root_a: 200.0,
                level1_a: 125.0,
                level2_a: 80.0,
                ..FuseTreeConfig::default()
            },
            cars: CarsConfig {
                count: 24,
                ..CarsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Returns the nonlinear preset: a small site planned with the battery
    /// model.
    pub fn nonlinear() -> Self {
        Self {
            strategy: StrategyConfig {
                nonlinear_charging: true,
                capacity_cache: true,
                ..StrategyConfig::default()
            },
            fuse_tree: FuseTreeConfig {
                root_a: 100.0,
                level1_count: 1,
                level2_per_level1: 1,
                stations_per_level2: 4,
                ..FuseTreeConfig::default()
            },
            cars: CarsConfig {
                count: 6,
                model: "renault_zoe_ze40".to_string(),
                ..CarsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "tight_fuse", "nonlinear"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "tight_fuse" => Ok(Self::tight_fuse()),
            "nonlinear" => Ok(Self::nonlinear()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigError {
                field: field.to_string(),
                message,
            });
        };

        let s = &self.simulation;
        if s.timeslots == 0 {
            push("simulation.timeslots", "must be > 0".into());
        }
        if s.start_seconds < 0 {
            push("simulation.start_seconds", "must be >= 0".into());
        }
        if !["algorithmic", "greedy", "dayahead"].contains(&s.strategy.as_str()) {
            push(
                "simulation.strategy",
                format!(
                    "must be \"algorithmic\", \"greedy\" or \"dayahead\", got \"{}\"",
                    s.strategy
                ),
            );
        }
        if s.strategy == "dayahead" && s.dayahead_plan.is_none() {
            push("simulation.dayahead_plan", "required by the dayahead strategy".into());
        }
        if s.reoptimize_interval_seconds < 0 {
            push("simulation.reoptimize_interval_seconds", "must be >= 0".into());
        }
        if s.reoptimize_interval_seconds > 0 && s.strategy != "algorithmic" {
            push(
                "simulation.reoptimize_interval_seconds",
                format!("strategy \"{}\" does not reoptimize, set 0", s.strategy),
            );
        }
        if s.price_change_interval_seconds <= 0 {
            push("simulation.price_change_interval_seconds", "must be > 0".into());
        }

        let st = &self.strategy;
        if !(st.charging_efficiency > 0.0 && st.charging_efficiency <= 1.0) {
            push("strategy.charging_efficiency", "must be in (0.0, 1.0]".into());
        }
        if st.departure_forecast != "median" && st.departure_forecast != "oracle" {
            push(
                "strategy.departure_forecast",
                format!("must be \"median\" or \"oracle\", got \"{}\"", st.departure_forecast),
            );
        }
        if !(0..86_400).contains(&st.median_departure_seconds) {
            push("strategy.median_departure_seconds", "must be within one day".into());
        }

        let f = &self.fuse_tree;
        for (field, value) in [
            ("fuse_tree.root_a", f.root_a),
            ("fuse_tree.level1_a", f.level1_a),
            ("fuse_tree.level2_a", f.level2_a),
            ("fuse_tree.station_a", f.station_a),
        ] {
            if value <= 0.0 {
                push(field, "must be > 0".into());
            }
        }
        if f.station_count() == 0 {
            push("fuse_tree.stations_per_level2", "tree must contain at least one station".into());
        }

        let c = &self.cars;
        if c.model != "mixed" && CarModel::from_name(&c.model).is_none() {
            push("cars.model", format!("unknown car model \"{}\"", c.model));
        }
        if c.arrival_earliest_seconds > c.arrival_latest_seconds {
            push("cars.arrival_earliest_seconds", "must be <= cars.arrival_latest_seconds".into());
        }
        if c.dwell_min_seconds <= 0 || c.dwell_min_seconds > c.dwell_max_seconds {
            push("cars.dwell_min_seconds", "must be > 0 and <= cars.dwell_max_seconds".into());
        }
        if !(0.0..=1.0).contains(&c.initial_soc_min)
            || !(0.0..=1.0).contains(&c.initial_soc_max)
            || c.initial_soc_min > c.initial_soc_max
        {
            push("cars.initial_soc_min", "SoC range must lie within [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&c.min_soc) {
            push("cars.min_soc", "must be in [0.0, 1.0]".into());
        }

        let p = &self.prices;
        if !["flat", "random", "double_peak"].contains(&p.model.as_str()) {
            push(
                "prices.model",
                format!("must be \"flat\", \"random\" or \"double_peak\", got \"{}\"", p.model),
            );
        }
        if p.base < 0.0 || p.amplitude < 0.0 {
            push("prices.base", "base and amplitude must be >= 0".into());
        }

        errors
    }
}
