//! Charging simulator entry point: CLI wiring and config-driven strategy
//! construction.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use tracing::{error, info};

use ev_charge_sim::config::ScenarioConfig;
use ev_charge_sim::io::export::{export_plans_csv, export_records_csv, export_state_json};
use ev_charge_sim::realtime::dayahead::DayaheadSchedule;
use ev_charge_sim::realtime::{State, Strategy, StrategyAlgorithmic, StrategyFromDayahead, StrategyGreedy};
use ev_charge_sim::sim::{Simulation, SimulationReport, SimulationSettings, ScenarioGenerator, TimeslotRecord};
use ev_charge_sim::telemetry::init_tracing;

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<PathBuf>,
    preset: Option<String>,
    seed_override: Option<u64>,
    plans_out: Option<PathBuf>,
    records_out: Option<PathBuf>,
    state_out: Option<PathBuf>,
}

fn print_help() {
    eprintln!("ev-charge-sim - Real-time EV charging scheduler simulation");
    eprintln!();
    eprintln!("Usage: ev-charge-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>        Load scenario from TOML config file");
    eprintln!(
        "  --preset <name>          Use a built-in preset ({})",
        ScenarioConfig::PRESETS.join(", ")
    );
    eprintln!("  --seed <u64>             Override random seed");
    eprintln!("  --plans-out <path>       Export final charging plans to CSV");
    eprintln!("  --records-out <path>     Export per-timeslot records to CSV");
    eprintln!("  --state-out <path>       Export the final state as JSON");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the baseline preset is used.");
    eprintln!("Set RUST_LOG (e.g. RUST_LOG=debug) to control log output.");
}

fn next_value(args: &[String], i: &mut usize, flag: &str, what: &str) -> String {
    *i += 1;
    match args.get(*i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("error: {flag} requires a {what} argument");
            process::exit(1);
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        seed_override: None,
        plans_out: None,
        records_out: None,
        state_out: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                cli.scenario_path = Some(PathBuf::from(next_value(&args, &mut i, "--scenario", "path")));
            }
            "--preset" => {
                cli.preset = Some(next_value(&args, &mut i, "--preset", "name"));
            }
            "--seed" => {
                let value = next_value(&args, &mut i, "--seed", "u64");
                if let Ok(s) = value.parse::<u64>() {
                    cli.seed_override = Some(s);
                } else {
                    eprintln!("error: --seed value \"{value}\" is not a valid u64");
                    process::exit(1);
                }
            }
            "--plans-out" => {
                cli.plans_out = Some(PathBuf::from(next_value(&args, &mut i, "--plans-out", "path")));
            }
            "--records-out" => {
                cli.records_out = Some(PathBuf::from(next_value(&args, &mut i, "--records-out", "path")));
            }
            "--state-out" => {
                cli.state_out = Some(PathBuf::from(next_value(&args, &mut i, "--state-out", "path")));
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    if cli.scenario_path.is_some() && cli.preset.is_some() {
        eprintln!("error: --scenario and --preset are mutually exclusive");
        process::exit(1);
    }

    cli
}

fn load_dayahead(path: &Path) -> DayaheadSchedule {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("error: cannot read day-ahead plan \"{}\": {e}", path.display());
            process::exit(1);
        }
    };
    match DayaheadSchedule::from_json(&json) {
        Ok(schedule) => schedule,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Runs one strategy to the end of the horizon.
fn run_with<S: Strategy>(state: State, strategy: S, settings: SimulationSettings) -> (Vec<TimeslotRecord>, State) {
    let mut simulation = Simulation::new(state, strategy, settings);
    match simulation.run() {
        Ok(records) => (records, simulation.into_state()),
        Err(e) => {
            error!(%e, "simulation aborted");
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn run_simulation(cfg: &ScenarioConfig, state: State) -> (Vec<TimeslotRecord>, State) {
    let settings = SimulationSettings::from_config(cfg);
    let dayahead = cfg.simulation.dayahead_plan.as_deref().map(load_dayahead);

    match cfg.simulation.strategy.as_str() {
        "greedy" => run_with(state, StrategyGreedy::new(), settings),
        "dayahead" => {
            let Some(schedule) = dayahead else {
                eprintln!("error: the dayahead strategy needs simulation.dayahead_plan");
                process::exit(1);
            };
            run_with(state, StrategyFromDayahead::new(schedule), settings)
        }
        _ => {
            let mut strategy = StrategyAlgorithmic::from_config(&cfg.strategy);
            if let Some(schedule) = dayahead {
                strategy = strategy.with_schedule(schedule);
            }
            run_with(state, strategy, settings)
        }
    }
}

fn main() {
    let cli = parse_args();
    init_tracing();

    // Load config: --scenario takes priority, then --preset, then baseline default
    let mut scenario = if let Some(ref path) = cli.scenario_path {
        match ScenarioConfig::from_toml_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match ScenarioConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        ScenarioConfig::baseline()
    };

    if let Some(seed) = cli.seed_override {
        scenario.simulation.seed = seed;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let state = match ScenarioGenerator::new(&scenario)
        .generate()
        .and_then(|s| s.into_state(scenario.simulation.start_seconds))
    {
        Ok(state) => state,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    info!(
        strategy = %scenario.simulation.strategy,
        seed = scenario.simulation.seed,
        "scenario ready"
    );

    let (records, state) = run_simulation(&scenario, state);

    let report = SimulationReport::from_run(&records, state.cars());
    println!("{report}");

    if let Some(ref path) = cli.plans_out {
        if let Err(e) = export_plans_csv(&state, path) {
            eprintln!("error: failed to write plans CSV: {e}");
            process::exit(1);
        }
        eprintln!("Plans written to {}", path.display());
    }
    if let Some(ref path) = cli.records_out {
        if let Err(e) = export_records_csv(&records, path) {
            eprintln!("error: failed to write records CSV: {e}");
            process::exit(1);
        }
        eprintln!("Records written to {}", path.display());
    }
    if let Some(ref path) = cli.state_out {
        if let Err(e) = export_state_json(&state, path) {
            eprintln!("error: failed to write state JSON: {e}");
            process::exit(1);
        }
        eprintln!("State written to {}", path.display());
    }
}
