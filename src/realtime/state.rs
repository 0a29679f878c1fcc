//! Session state: the single mutable aggregate of a running simulation.
//!
//! [`State`] owns the car population, the capacity network and the current
//! price series, and is the only place where car and power assignments are
//! created or removed. Strategies mutate car plans through it; the
//! simulation driver advances its clock.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AssignmentError;
use crate::model::car::{Car, CarId};
use crate::model::fuse_tree::{FuseTree, NodeId};
use crate::model::phase::{Phase, PhaseCurrents};
use crate::model::prices::EnergyPriceHistory;
use crate::model::station::{ChargingStation, StationId, StationStatus};
use crate::model::units::timeslot_from_seconds;

use super::forecast::DEFAULT_MEDIAN_DEPARTURE_SECONDS;

/// Maps per-station-phase currents onto grid phases, dropping phases that
/// are disconnected anywhere between the station and the root.
fn project_to_grid(tree: &FuseTree, station: &ChargingStation, at_station: PhaseCurrents) -> PhaseCurrents {
    let mut grid = PhaseCurrents::zero();
    for phase in Phase::ALL {
        if tree.is_grid_phase_connected(station.id, phase) {
            grid[phase] = at_station[station.rotation.to_station(phase)];
        }
    }
    grid
}

/// Binding of a car to a station for the duration of its stay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarAssignment {
    pub car: CarId,
    pub station: StationId,
    /// Estimated departure, refined by the forecaster or on lateness.
    pub expected_departure_seconds: i64,
}

impl CarAssignment {
    pub fn new(car: CarId, station: StationId) -> Self {
        Self {
            car,
            station,
            expected_departure_seconds: DEFAULT_MEDIAN_DEPARTURE_SECONDS,
        }
    }

    pub fn expected_departure_timeslot(&self) -> usize {
        timeslot_from_seconds(self.expected_departure_seconds)
    }

    /// Planned current on each station phase at timeslot `k`.
    pub fn current_per_station_phase(&self, car: &Car, station: &ChargingStation, k: usize) -> PhaseCurrents {
        let planned = car.plan().get(k).copied().unwrap_or(0.0).max(0.0);
        let mut currents = PhaseCurrents::zero();
        for phase in Phase::ALL {
            if station.is_phase_connected(phase) {
                currents[phase] = car.phase_usage(phase) * planned;
            }
        }
        currents
    }

    /// Planned current on each grid phase at timeslot `k`.
    pub fn current_per_grid_phase(&self, car: &Car, tree: &FuseTree, k: usize) -> PhaseCurrents {
        match tree.station(self.station) {
            Some(station) => project_to_grid(tree, station, self.current_per_station_phase(car, station, k)),
            None => PhaseCurrents::zero(),
        }
    }
}

/// Instantaneous three-phase current drawn by a car at its station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerAssignment {
    pub car: CarId,
    pub station: StationId,
    /// Current per station phase (A).
    pub currents: PhaseCurrents,
}

impl PowerAssignment {
    pub fn current_per_station_phase(&self) -> PhaseCurrents {
        self.currents
    }

    pub fn current_per_grid_phase(&self, tree: &FuseTree) -> PhaseCurrents {
        match tree.station(self.station) {
            Some(station) => project_to_grid(tree, station, self.currents),
            None => PhaseCurrents::zero(),
        }
    }
}

/// Serializable view of the live assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub start_seconds: i64,
    pub current_seconds: i64,
    pub current_timeslot: usize,
    pub car_assignments: Vec<CarAssignment>,
    pub power_assignments: Vec<PowerAssignment>,
    pub unassigned_cars: Vec<CarId>,
}

/// Live state of the parking lot.
#[derive(Debug, Clone)]
pub struct State {
    start_seconds: i64,
    current_seconds: i64,
    cars: Vec<Car>,
    car_index: HashMap<CarId, usize>,
    tree: FuseTree,
    prices: EnergyPriceHistory,
    free_stations: Vec<StationId>,
    occupied_stations: Vec<StationId>,
    car_assignments: Vec<CarAssignment>,
    power_assignments: Vec<PowerAssignment>,
    unassigned_cars: Vec<CarId>,
    history: Vec<CarAssignment>,
}

impl State {
    /// Creates a state at `start_seconds` with every station free.
    ///
    /// # Errors
    ///
    /// Returns [`AssignmentError::DuplicateCar`] if two cars share an id.
    pub fn new(
        start_seconds: i64,
        tree: FuseTree,
        cars: Vec<Car>,
        prices: EnergyPriceHistory,
    ) -> Result<Self, AssignmentError> {
        let mut car_index = HashMap::with_capacity(cars.len());
        for (i, car) in cars.iter().enumerate() {
            if car_index.insert(car.id, i).is_some() {
                return Err(AssignmentError::DuplicateCar(car.id));
            }
        }
        let free_stations = tree.stations().map(|s| s.id).collect();
        Ok(Self {
            start_seconds,
            current_seconds: start_seconds,
            cars,
            car_index,
            tree,
            prices,
            free_stations,
            occupied_stations: Vec::new(),
            car_assignments: Vec::new(),
            power_assignments: Vec::new(),
            unassigned_cars: Vec::new(),
            history: Vec::new(),
        })
    }

    pub fn start_seconds(&self) -> i64 {
        self.start_seconds
    }

    /// Seconds since midnight.
    pub fn current_seconds(&self) -> i64 {
        self.current_seconds
    }

    /// Timeslot containing the current time.
    pub fn current_timeslot(&self) -> usize {
        timeslot_from_seconds(self.current_seconds)
    }

    /// Number of planned timeslots.
    pub fn horizon(&self) -> usize {
        self.prices.len()
    }

    pub fn set_time_seconds(&mut self, seconds: i64) {
        self.current_seconds = seconds;
    }

    pub fn increment_time(&mut self) {
        self.current_seconds += 1;
    }

    pub fn tree(&self) -> &FuseTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut FuseTree {
        &mut self.tree
    }

    pub fn prices(&self) -> &EnergyPriceHistory {
        &self.prices
    }

    pub fn set_prices(&mut self, prices: EnergyPriceHistory) {
        self.prices = prices;
    }

    pub fn station_count(&self) -> usize {
        self.tree.station_count()
    }

    pub fn cars(&self) -> &[Car] {
        &self.cars
    }

    pub fn car(&self, id: CarId) -> Option<&Car> {
        self.car_index.get(&id).and_then(|&i| self.cars.get(i))
    }

    pub fn car_mut(&mut self, id: CarId) -> Option<&mut Car> {
        let i = *self.car_index.get(&id)?;
        self.cars.get_mut(i)
    }

    /// The car together with the station it is assigned to.
    pub fn car_and_station(&self, id: CarId) -> Result<(&Car, &ChargingStation), AssignmentError> {
        let assignment = self.car_assignment(id).ok_or(AssignmentError::CarNotAssigned(id))?;
        let station = self
            .tree
            .station(assignment.station)
            .ok_or(AssignmentError::UnknownStation(assignment.station))?;
        let car = self.car(id).ok_or(AssignmentError::UnknownCar(id))?;
        Ok((car, station))
    }

    /// Mutable car together with the station it is assigned to.
    pub fn car_and_station_mut(&mut self, id: CarId) -> Result<(&mut Car, &ChargingStation), AssignmentError> {
        let station_id = self
            .car_assignment(id)
            .ok_or(AssignmentError::CarNotAssigned(id))?
            .station;
        let station = self
            .tree
            .station(station_id)
            .ok_or(AssignmentError::UnknownStation(station_id))?;
        let index = *self.car_index.get(&id).ok_or(AssignmentError::UnknownCar(id))?;
        let car = self
            .cars
            .get_mut(index)
            .ok_or(AssignmentError::UnknownCar(id))?;
        Ok((car, station))
    }

    pub fn is_any_station_free(&self) -> bool {
        !self.free_stations.is_empty()
    }

    pub fn first_free_station(&self) -> Option<StationId> {
        self.free_stations.first().copied()
    }

    pub fn free_stations(&self) -> &[StationId] {
        &self.free_stations
    }

    pub fn occupied_stations(&self) -> &[StationId] {
        &self.occupied_stations
    }

    /// Station `id` if it is free.
    pub fn free_station(&self, id: StationId) -> Option<&ChargingStation> {
        self.free_stations
            .contains(&id)
            .then(|| self.tree.station(id))
            .flatten()
    }

    /// Station `id` if it is occupied.
    pub fn occupied_station(&self, id: StationId) -> Option<&ChargingStation> {
        self.occupied_stations
            .contains(&id)
            .then(|| self.tree.station(id))
            .flatten()
    }

    /// Returns a station to the free pool.
    ///
    /// # Errors
    ///
    /// Fails if the station is unknown or already free or occupied.
    pub fn add_free_station(&mut self, id: StationId) -> Result<(), AssignmentError> {
        if self.tree.station(id).is_none() {
            return Err(AssignmentError::UnknownStation(id));
        }
        if self.free_stations.contains(&id) {
            return Err(AssignmentError::StationNotOccupied(id));
        }
        if self.occupied_stations.contains(&id) {
            return Err(AssignmentError::StationOccupied(id));
        }
        self.free_stations.push(id);
        Ok(())
    }

    fn set_station_occupied(&mut self, id: StationId) -> Result<(), AssignmentError> {
        let pos = self
            .free_stations
            .iter()
            .position(|&s| s == id)
            .ok_or(AssignmentError::StationOccupied(id))?;
        self.free_stations.remove(pos);
        self.occupied_stations.push(id);
        if let Some(station) = self.tree.station_mut(id) {
            station.status = StationStatus::Charging;
        }
        Ok(())
    }

    fn set_station_free(&mut self, id: StationId) -> Result<(), AssignmentError> {
        let pos = self
            .occupied_stations
            .iter()
            .position(|&s| s == id)
            .ok_or(AssignmentError::StationNotOccupied(id))?;
        self.occupied_stations.remove(pos);
        self.free_stations.push(id);
        if let Some(station) = self.tree.station_mut(id) {
            station.status = StationStatus::Free;
        }
        Ok(())
    }

    pub fn car_assignments(&self) -> &[CarAssignment] {
        &self.car_assignments
    }

    /// Every car assignment ever made, including finished ones.
    pub fn assignment_history(&self) -> &[CarAssignment] {
        &self.history
    }

    pub fn car_assignment(&self, car: CarId) -> Option<&CarAssignment> {
        self.car_assignments.iter().find(|a| a.car == car)
    }

    pub fn car_assignment_mut(&mut self, car: CarId) -> Option<&mut CarAssignment> {
        self.car_assignments.iter_mut().find(|a| a.car == car)
    }

    pub fn car_assignment_by_station(&self, station: StationId) -> Option<&CarAssignment> {
        self.car_assignments.iter().find(|a| a.station == station)
    }

    /// Copies of the assignments at stations beneath `node`.
    pub fn car_assignments_under(&self, node: NodeId) -> Vec<CarAssignment> {
        self.tree
            .stations_under(node)
            .iter()
            .filter_map(|&s| self.car_assignment_by_station(s).cloned())
            .collect()
    }

    pub fn is_car_assigned(&self, car: CarId) -> bool {
        self.car_assignment(car).is_some()
    }

    pub fn is_station_assigned(&self, station: StationId) -> bool {
        self.car_assignment_by_station(station).is_some()
    }

    /// Binds `car` to `station` at the current time.
    ///
    /// # Errors
    ///
    /// Fails if either side is already bound, the station is not free, or
    /// the car is outside its availability window.
    pub fn add_car_assignment(&mut self, car: CarId, station: StationId) -> Result<&mut CarAssignment, AssignmentError> {
        let entry = self.car(car).ok_or(AssignmentError::UnknownCar(car))?;
        if self.is_car_assigned(car) {
            return Err(AssignmentError::CarAlreadyAssigned(car));
        }
        if self.is_station_assigned(station) {
            return Err(AssignmentError::StationOccupied(station));
        }
        if !entry.is_available_at(self.current_seconds) {
            return Err(AssignmentError::CarNotAvailable {
                car,
                time: self.current_seconds,
                arrival: entry.arrival_seconds,
                departure: entry.departure_seconds,
            });
        }
        if self.tree.station(station).is_none() {
            return Err(AssignmentError::UnknownStation(station));
        }
        self.set_station_occupied(station)?;

        let assignment = CarAssignment::new(car, station);
        self.history.push(assignment.clone());
        self.car_assignments.push(assignment);
        debug!(car, station, t = self.current_seconds, "car assigned");
        let last = self.car_assignments.len() - 1;
        Ok(&mut self.car_assignments[last])
    }

    /// Releases the binding of `car` and frees its station.
    ///
    /// # Errors
    ///
    /// Returns [`AssignmentError::CarNotAssigned`] if the car has no binding.
    pub fn remove_car_assignment(&mut self, car: CarId) -> Result<CarAssignment, AssignmentError> {
        let pos = self
            .car_assignments
            .iter()
            .position(|a| a.car == car)
            .ok_or(AssignmentError::CarNotAssigned(car))?;
        let station = self.car_assignments[pos].station;
        self.set_station_free(station)?;
        Ok(self.car_assignments.remove(pos))
    }

    pub fn unassigned_cars(&self) -> &[CarId] {
        &self.unassigned_cars
    }

    pub fn is_car_unassigned(&self, car: CarId) -> bool {
        self.unassigned_cars.contains(&car) && !self.is_car_assigned(car)
    }

    /// Records a car that found no place to charge.
    ///
    /// # Errors
    ///
    /// Fails if the car is assigned to a station or already recorded.
    pub fn add_unassigned_car(&mut self, car: CarId) -> Result<(), AssignmentError> {
        if self.car(car).is_none() {
            return Err(AssignmentError::UnknownCar(car));
        }
        if self.is_car_assigned(car) {
            return Err(AssignmentError::CarAlreadyAssigned(car));
        }
        if self.unassigned_cars.contains(&car) {
            return Err(AssignmentError::AlreadyUnassigned(car));
        }
        self.unassigned_cars.push(car);
        Ok(())
    }

    pub fn remove_unassigned_car(&mut self, car: CarId) -> Result<(), AssignmentError> {
        if self.is_car_assigned(car) {
            return Err(AssignmentError::CarAlreadyAssigned(car));
        }
        let pos = self
            .unassigned_cars
            .iter()
            .position(|&c| c == car)
            .ok_or(AssignmentError::NotUnassigned(car))?;
        self.unassigned_cars.remove(pos);
        Ok(())
    }

    pub fn power_assignments(&self) -> &[PowerAssignment] {
        &self.power_assignments
    }

    pub fn power_assignment(&self, car: CarId) -> Option<&PowerAssignment> {
        self.power_assignments.iter().find(|p| p.car == car)
    }

    pub fn power_assignment_by_station(&self, station: StationId) -> Option<&PowerAssignment> {
        self.power_assignments.iter().find(|p| p.station == station)
    }

    pub fn is_car_power_assigned(&self, car: CarId) -> bool {
        self.power_assignment(car).is_some()
    }

    /// Sets the instantaneous currents of an assigned car.
    ///
    /// # Errors
    ///
    /// Fails unless `car` is bound to `station` and has no power assignment yet.
    pub fn add_power_assignment(
        &mut self,
        car: CarId,
        station: StationId,
        currents: PhaseCurrents,
    ) -> Result<(), AssignmentError> {
        match self.car_assignment(car) {
            None => return Err(AssignmentError::CarNotAssigned(car)),
            Some(a) if a.station != station => return Err(AssignmentError::CarAlreadyAssigned(car)),
            Some(_) => {}
        }
        if self.is_car_power_assigned(car) {
            return Err(AssignmentError::PowerAlreadyAssigned(car));
        }
        self.power_assignments.push(PowerAssignment {
            car,
            station,
            currents,
        });
        Ok(())
    }

    /// Drops the power assignment of `car`, if any.
    pub fn remove_power_assignment(&mut self, car: CarId) -> Option<PowerAssignment> {
        let pos = self.power_assignments.iter().position(|p| p.car == car)?;
        debug!(car, t = self.current_seconds, "power assignment removed");
        Some(self.power_assignments.remove(pos))
    }

    /// Total planned current over all phases of assigned cars at timeslot `k`.
    pub fn planned_demand_at(&self, k: usize) -> f64 {
        self.car_assignments
            .iter()
            .filter_map(|a| self.car(a.car))
            .map(|car| car.sum_used_phases * car.plan().get(k).copied().unwrap_or(0.0))
            .sum()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            start_seconds: self.start_seconds,
            current_seconds: self.current_seconds,
            current_timeslot: self.current_timeslot(),
            car_assignments: self.car_assignments.clone(),
            power_assignments: self.power_assignments.clone(),
            unassigned_cars: self.unassigned_cars.clone(),
        }
    }

    pub fn snapshot_json(&self) -> Result<String, AssignmentError> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| AssignmentError::Snapshot(e.to_string()))
    }

    /// Rebuilds a state from `snapshot` against a car and station population.
    ///
    /// # Errors
    ///
    /// Fails if the snapshot references unknown cars or stations, or breaks
    /// the assignment rules.
    pub fn from_snapshot(
        snapshot: &StateSnapshot,
        tree: FuseTree,
        cars: Vec<Car>,
        prices: EnergyPriceHistory,
    ) -> Result<Self, AssignmentError> {
        let mut state = Self::new(snapshot.start_seconds, tree, cars, prices)?;
        state.set_time_seconds(snapshot.current_seconds);
        for a in &snapshot.car_assignments {
            let added = state.add_car_assignment(a.car, a.station)?;
            added.expected_departure_seconds = a.expected_departure_seconds;
        }
        for p in &snapshot.power_assignments {
            state.add_power_assignment(p.car, p.station, p.currents)?;
        }
        for &car in &snapshot.unassigned_cars {
            state.add_unassigned_car(car)?;
        }
        Ok(state)
    }

    pub fn from_snapshot_json(
        json: &str,
        tree: FuseTree,
        cars: Vec<Car>,
        prices: EnergyPriceHistory,
    ) -> Result<Self, AssignmentError> {
        let snapshot: StateSnapshot =
            serde_json::from_str(json).map_err(|e| AssignmentError::Snapshot(e.to_string()))?;
        Self::from_snapshot(&snapshot, tree, cars, prices)
    }
}
