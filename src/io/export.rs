//! CSV export of charging plans and simulation records, JSON export of the
//! session state.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::model::car::CarId;
use crate::model::station::StationId;
use crate::model::units::TIMESLOT_SECONDS;
use crate::realtime::state::State;
use crate::sim::engine::TimeslotRecord;

/// Column header of the plan export.
const PLANS_HEADER: &str = "car_id,station_id,k,current_per_phase,planned_ah";

/// Column header of the timeslot record export.
const RECORDS_HEADER: &str = "timeslot,root_l1_a,root_l2_a,root_l3_a,planned_ah,charged_ah,\
                              energy_kwh,energy_cost,assigned_cars,unassigned_cars,fuse_tree_valid";

/// Exports the non-zero plan entries of every car that was ever assigned.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_plans_csv(state: &State, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_plans_csv(state, io::BufWriter::new(file))
}

/// Writes one row per car and planned timeslot to any writer.
///
/// Cars are listed in assignment order with the station they were last
/// bound to.
pub fn write_plans_csv(state: &State, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(PLANS_HEADER.split(','))?;

    let mut latest: Vec<(CarId, StationId)> = Vec::new();
    for a in state.assignment_history().iter().rev() {
        if !latest.iter().any(|&(car, _)| car == a.car) {
            latest.push((a.car, a.station));
        }
    }
    latest.reverse();

    for (car_id, station) in latest {
        let Some(car) = state.car(car_id) else {
            continue;
        };
        let hours = TIMESLOT_SECONDS as f64 / 3600.0;
        for (k, &current) in car.plan().iter().enumerate() {
            if current <= 0.0 {
                continue;
            }
            wtr.write_record(&[
                car_id.to_string(),
                station.to_string(),
                k.to_string(),
                format!("{current:.4}"),
                format!("{:.4}", current * car.sum_used_phases * hours),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Exports the timeslot records to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_records_csv(records: &[TimeslotRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_records_csv(records, io::BufWriter::new(file))
}

/// Writes timeslot records as CSV to any writer.
pub fn write_records_csv(records: &[TimeslotRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(RECORDS_HEADER.split(',').map(str::trim))?;

    for r in records {
        wtr.write_record(&[
            r.timeslot.to_string(),
            format!("{:.4}", r.root_current.0[0]),
            format!("{:.4}", r.root_current.0[1]),
            format!("{:.4}", r.root_current.0[2]),
            format!("{:.4}", r.planned_ah),
            format!("{:.4}", r.charged_ah),
            format!("{:.4}", r.energy_kwh),
            format!("{:.4}", r.energy_cost),
            r.assigned_cars.to_string(),
            r.unassigned_cars.to_string(),
            r.fuse_tree_valid.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes the state snapshot as pretty JSON.
pub fn export_state_json(state: &State, path: &Path) -> io::Result<()> {
    let json = state
        .snapshot_json()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    std::fs::write(path, json)
}
