//! Charging stations: the leaves of the fuse tree.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

use super::car::CarType;
use super::phase::{Phase, PhaseCurrents};

/// Identifier of a charging station.
pub type StationId = u32;

/// Operational status reported by a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StationStatus {
    /// Free for the next arriving car.
    #[default]
    Free,
    /// Occupied by an ongoing session.
    Charging,
    /// Held for a specific car.
    Reserved,
    /// Blocked by a finished session or a parked car.
    Blocked,
    Maintenance,
    /// Connection to the station was lost.
    Disconnected,
}

/// Bijective mapping between a station's output phases and the grid phases
/// it draws from.
///
/// Stations are commonly wired with rotated phases so that single-phase cars
/// spread over the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRotation {
    station_to_grid: [Phase; 3],
    grid_to_station: [Phase; 3],
}

impl PhaseRotation {
    /// Station phase `n` sits on grid phase `n`.
    pub fn identity() -> Self {
        Self {
            station_to_grid: Phase::ALL,
            grid_to_station: Phase::ALL,
        }
    }

    /// Station phases 1, 2, 3 sit on grid phases `p1`, `p2`, `p3`.
    ///
    /// Returns `None` if the mapping is not a permutation.
    pub fn new(p1: Phase, p2: Phase, p3: Phase) -> Option<Self> {
        let station_to_grid = [p1, p2, p3];
        let mut grid_to_station = [Phase::One; 3];
        let mut seen = [false; 3];
        for (station, grid) in Phase::ALL.into_iter().zip(station_to_grid) {
            if seen[grid.index()] {
                return None;
            }
            seen[grid.index()] = true;
            grid_to_station[grid.index()] = station;
        }
        Some(Self {
            station_to_grid,
            grid_to_station,
        })
    }

    /// Cyclic rotation by `offset`: station phase 1 sits on grid phase `offset % 3 + 1`.
    pub fn rotated(offset: usize) -> Self {
        let p = |i: usize| Phase::ALL[(offset + i) % 3];
        // A cyclic shift is always a permutation.
        Self::new(p(0), p(1), p(2)).unwrap_or_else(Self::identity)
    }

    /// Grid phase consumed by station phase `station`.
    pub fn to_grid(&self, station: Phase) -> Phase {
        self.station_to_grid[station.index()]
    }

    /// Station phase fed by grid phase `grid`.
    pub fn to_station(&self, grid: Phase) -> Phase {
        self.grid_to_station[grid.index()]
    }
}

impl Default for PhaseRotation {
    fn default() -> Self {
        Self::identity()
    }
}

/// A three-phase charging station with its own per-phase fuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingStation {
    pub id: StationId,
    /// Per-phase current limit (A) of the station's own fuse.
    pub limits: PhaseCurrents,
    pub rotation: PhaseRotation,
    pub connected: [bool; 3],
    pub bev_allowed: bool,
    pub phev_allowed: bool,
    #[serde(default)]
    pub status: StationStatus,
}

impl ChargingStation {
    /// A fully connected station with the same limit on every phase.
    pub fn new(id: StationId, limit_per_phase: f64) -> Self {
        Self {
            id,
            limits: PhaseCurrents::uniform(limit_per_phase),
            rotation: PhaseRotation::identity(),
            connected: [true; 3],
            bev_allowed: true,
            phev_allowed: true,
            status: StationStatus::Free,
        }
    }

    pub fn with_rotation(mut self, rotation: PhaseRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_connected(mut self, connected: [bool; 3]) -> Self {
        self.connected = connected;
        self
    }

    /// Limit on station phase `phase`.
    pub fn limit(&self, phase: Phase) -> f64 {
        self.limits[phase]
    }

    pub fn is_phase_connected(&self, phase: Phase) -> bool {
        self.connected[phase.index()]
    }

    /// A disconnected phase must carry a zero limit.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DisconnectedPhase`] for the first offending phase.
    pub fn sanity_check(&self) -> Result<(), TreeError> {
        for (phase, limit) in self.limits.iter() {
            if !self.is_phase_connected(phase) && limit != 0.0 {
                return Err(TreeError::DisconnectedPhase {
                    node: format!("i{}", self.id),
                    phase: phase.number(),
                    limit,
                });
            }
        }
        Ok(())
    }

    pub fn admits(&self, car_type: CarType) -> bool {
        match car_type {
            CarType::Bev => self.bev_allowed,
            CarType::Phev => self.phev_allowed,
        }
    }
}

impl fmt::Display for ChargingStation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "station i{} {} (1->{} 2->{} 3->{})",
            self.id,
            self.limits,
            self.rotation.to_grid(Phase::One).number(),
            self.rotation.to_grid(Phase::Two).number(),
            self.rotation.to_grid(Phase::Three).number()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_is_bijective() {
        let r = PhaseRotation::rotated(1);
        assert_eq!(r.to_grid(Phase::One), Phase::Two);
        assert_eq!(r.to_grid(Phase::Three), Phase::One);
        for p in Phase::ALL {
            assert_eq!(r.to_station(r.to_grid(p)), p);
        }
    }

    #[test]
    fn rejects_non_permutation() {
        assert!(PhaseRotation::new(Phase::One, Phase::One, Phase::Two).is_none());
    }

    #[test]
    fn disconnected_phase_needs_zero_limit() {
        let s = ChargingStation::new(0, 32.0).with_connected([true, false, true]);
        assert!(matches!(
            s.sanity_check(),
            Err(TreeError::DisconnectedPhase { phase: 2, .. })
        ));
        let mut s = s;
        s.limits[Phase::Two] = 0.0;
        assert!(s.sanity_check().is_ok());
    }

    #[test]
    fn admission_flags() {
        let mut s = ChargingStation::new(0, 32.0);
        s.phev_allowed = false;
        assert!(s.admits(CarType::Bev));
        assert!(!s.admits(CarType::Phev));
    }
}
