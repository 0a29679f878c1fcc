//! Constraint checker for the capacity network and assignment rules.
//!
//! Fuse checks come in two flavours: against every car's plan at a given
//! timeslot ([`validate_at_timeslot`]) and against the instantaneous power
//! assignments ([`validate`]). Both check every station against its own
//! per-station-phase draw first, in tree order, then every fuse bottom-up
//! against the summed grid-phase draw beneath it, and report the first
//! overloaded node as a [`Violation`].

use std::fmt;

use crate::error::ValidationError;
use crate::model::fuse_tree::{CapacityNode, NodeId};
use crate::model::phase::{Phase, PhaseCurrents};

use super::state::State;

/// Slack (A) allowed on every limit.
pub const TOLERANCE: f64 = 1e-6;

/// An overloaded node in the fuse tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    node: NodeId,
    label: String,
    is_station: bool,
    totals: PhaseCurrents,
    limits: PhaseCurrents,
    timeslot: Option<usize>,
}

impl Violation {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the overloaded node is a station. Station totals are per
    /// station phase, fuse totals per grid phase.
    pub fn is_station(&self) -> bool {
        self.is_station
    }

    pub fn totals(&self) -> PhaseCurrents {
        self.totals
    }

    pub fn limits(&self) -> PhaseCurrents {
        self.limits
    }

    /// Checked timeslot, `None` for the instantaneous check.
    pub fn timeslot(&self) -> Option<usize> {
        self.timeslot
    }

    /// Amount (A) by which `phase` exceeds its limit. Negative if within.
    pub fn delta(&self, phase: Phase) -> f64 {
        self.totals[phase] - self.limits[phase]
    }

    /// Phase to reduce current on. Ties go to the lower phase.
    pub fn phase_with_highest_delta(&self) -> Phase {
        Phase::ALL
            .into_iter()
            .fold(Phase::One, |best, p| if self.delta(p) > self.delta(best) { p } else { best })
    }

    pub fn highest_total(&self) -> f64 {
        self.totals.max()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} broken", self.label)?;
        if let Some(k) = self.timeslot {
            write!(f, " at k={k}")?;
        }
        for phase in Phase::ALL {
            write!(
                f,
                ", {}: {:.2}A/{:.2}A (delta={:.2}A)",
                phase,
                self.totals[phase],
                self.limits[phase],
                self.delta(phase)
            )?;
        }
        Ok(())
    }
}

fn within(totals: PhaseCurrents, node: &impl CapacityNode) -> bool {
    Phase::ALL
        .iter()
        .all(|&p| totals[p] <= node.limit(p) + TOLERANCE)
}

/// Shared walk for both check flavours over the subtree at `scope`.
/// `timeslot` selects plans over power assignments.
fn check(state: &State, scope: NodeId, timeslot: Option<usize>) -> Result<(), Violation> {
    let tree = state.tree();
    let in_scope = |id: NodeId| id == scope || tree.ancestors(id).any(|a| a == scope);
    let mut grid_totals = vec![PhaseCurrents::zero(); tree.len()];

    for station in tree.stations() {
        if !tree.stations_under(scope).contains(&station.id) {
            continue;
        }
        let (at_station, at_grid) = match timeslot {
            Some(k) => match state
                .car_assignment_by_station(station.id)
                .and_then(|a| state.car(a.car).map(|car| (a, car)))
            {
                Some((a, car)) => (
                    a.current_per_station_phase(car, station, k),
                    a.current_per_grid_phase(car, tree, k),
                ),
                None => continue,
            },
            None => match state.power_assignment_by_station(station.id) {
                Some(p) => (p.current_per_station_phase(), p.current_per_grid_phase(tree)),
                None => continue,
            },
        };

        let Some(node) = tree.station_node(station.id) else {
            continue;
        };
        if !within(at_station, station) {
            return Err(Violation {
                node,
                label: station.label(),
                is_station: true,
                totals: at_station,
                limits: CapacityNode::limits(station),
                timeslot,
            });
        }
        for ancestor in tree.ancestors(node) {
            grid_totals[ancestor.0] += at_grid;
        }
    }

    for &id in tree.post_order() {
        let Some(node) = tree.node(id) else {
            continue;
        };
        if node.is_station() || !in_scope(id) {
            continue;
        }
        let totals = grid_totals[id.0];
        if !within(totals, node) {
            return Err(Violation {
                node: id,
                label: node.label(),
                is_station: false,
                totals,
                limits: node.limits(),
                timeslot,
            });
        }
    }
    Ok(())
}

/// Checks the whole tree against every assigned car's plan at timeslot `k`.
pub fn validate_at_timeslot(state: &State, k: usize) -> Result<(), Violation> {
    check(state, state.tree().root(), Some(k))
}

/// Checks only the subtree rooted at `node` at timeslot `k`.
pub fn validate_node_at_timeslot(state: &State, node: NodeId, k: usize) -> Result<(), Violation> {
    check(state, node, Some(k))
}

/// Checks the whole tree against the current power assignments.
pub fn validate(state: &State) -> Result<(), Violation> {
    check(state, state.tree().root(), None)
}

pub fn is_fuse_tree_valid(state: &State) -> bool {
    validate(state).is_ok()
}

/// At most one assignment per car and per station.
pub fn validate_car_assignments(state: &State) -> Result<(), ValidationError> {
    let assignments = state.car_assignments();
    for (i, a) in assignments.iter().enumerate() {
        for b in &assignments[i + 1..] {
            if a.car == b.car {
                return Err(ValidationError::DuplicateCar(a.car));
            }
            if a.station == b.station {
                return Err(ValidationError::DuplicateStation(a.station));
            }
        }
    }
    Ok(())
}

/// Station fuse, car maximum, car minimum and phase ratio of every power
/// assignment.
pub fn validate_power_assignments(state: &State) -> Result<(), ValidationError> {
    for p in state.power_assignments() {
        let (Some(car), Some(station)) = (state.car(p.car), state.tree().station(p.station)) else {
            continue;
        };
        for phase in Phase::ALL {
            let current = p.currents[phase];
            let usage = car.phase_usage(phase);
            if current > station.limit(phase) + TOLERANCE {
                return Err(ValidationError::StationFuse {
                    car: car.id,
                    station: station.id,
                    phase: phase.number(),
                    current,
                    limit: station.limit(phase),
                });
            }
            if current > usage * car.max_current_per_phase + TOLERANCE {
                return Err(ValidationError::CarMax {
                    car: car.id,
                    phase: phase.number(),
                    current,
                    max: usage * car.max_current_per_phase,
                });
            }
            if current > 0.0 && current < usage * car.min_current_per_phase - TOLERANCE {
                return Err(ValidationError::CarMin {
                    car: car.id,
                    phase: phase.number(),
                    current,
                    min: usage * car.min_current_per_phase,
                });
            }
        }
        let [u1, u2, u3] = car.phase_usage.0;
        let [p1, p2, p3] = p.currents.0;
        if (u2 * p1 - u1 * p2).abs() > TOLERANCE || (u3 * p1 - u1 * p3).abs() > TOLERANCE {
            return Err(ValidationError::PhaseRatio { car: car.id });
        }
    }
    Ok(())
}

/// Fuse tree at the current instant, then assignment rules.
pub fn validate_state(state: &State) -> Result<(), ValidationError> {
    validate(state).map_err(ValidationError::Fuse)?;
    validate_car_assignments(state)?;
    validate_power_assignments(state)
}

pub fn is_state_valid(state: &State) -> bool {
    validate_state(state).is_ok()
}
