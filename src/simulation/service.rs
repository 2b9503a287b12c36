//! Simulation lifecycle on top of [`LakeService`].
//!
//! Each simulation sits behind its own mutex, so adds to one simulation are
//! serialized while different simulations proceed in parallel. Geometry validation
//! runs before the lock is taken; every ledger check is repeated under the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ledger::StagedAdd;
use super::store::{LedgerChange, SimulationStore};
use super::{DrawnGeometry, Simulation, SimulationStatus, SimulationSummary, Subdivision};
use crate::bitset::Bitset;
use crate::error::{LakeGridError, Rejection, Result, ValidationCode};
use crate::lake::{GeometryRequest, InvalidSelection, LakeService, SelectionOutcome};

/// Result of adding a subdivision.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added {
        subdivision: Subdivision,
        simulation: SimulationSummary,
    },
    /// Ledger refused the selection
    Rejected(Rejection),
    /// Geometry failed validation against the lake
    Invalid(InvalidSelection),
}

impl AddOutcome {
    #[must_use]
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }

    /// Code of the (first) rejection cause, `None` when added.
    #[must_use]
    pub fn code(&self) -> Option<ValidationCode> {
        match self {
            Self::Added { .. } => None,
            Self::Rejected(r) => Some(r.code),
            Self::Invalid(inv) => inv.code(),
        }
    }
}

/// Result of removing a subdivision.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(SimulationSummary),
    Rejected(Rejection),
}

pub struct SimulationService {
    lakes: Arc<LakeService>,
    store: Arc<dyn SimulationStore>,
    simulations: RwLock<HashMap<Uuid, Arc<Mutex<Simulation>>>>,
    next_sequence: AtomicU64,
}

impl SimulationService {
    pub fn new(lakes: Arc<LakeService>, store: Arc<dyn SimulationStore>) -> Self {
        Self {
            lakes,
            store,
            simulations: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn lakes(&self) -> &Arc<LakeService> {
        &self.lakes
    }

    fn compression_level(&self) -> u32 {
        self.lakes.config().compression_level
    }

    fn handle(&self, simulation_id: Uuid) -> Result<Arc<Mutex<Simulation>>> {
        self.simulations
            .read()
            .get(&simulation_id)
            .cloned()
            .ok_or(LakeGridError::SimulationNotFound(simulation_id))
    }

    /// Create a draft simulation on a dataset version (the active one if `None`).
    ///
    /// # Errors
    /// `LakeNotFound`, `DatasetNotFound`, or `Store`.
    pub fn create_simulation(
        &self,
        lake_id: Uuid,
        dataset_version_id: Option<Uuid>,
        name: impl Into<String>,
    ) -> Result<SimulationSummary> {
        let resolver = self.lakes.resolver();
        let lake = resolver.lake(lake_id)?;
        let dataset = resolver.resolve_dataset_version(lake_id, dataset_version_id)?;

        let mut simulation = Simulation::new(lake_id, dataset.id, name, lake.grid.rows, lake.grid.cols);
        simulation.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let summary = simulation.summary(self.compression_level())?;
        self.store.apply(&LedgerChange::Created(summary.clone()))?;

        debug!(
            simulation_id = %summary.id,
            %lake_id,
            dataset_version_id = %dataset.id,
            "Created simulation"
        );
        self.simulations
            .write()
            .insert(summary.id, Arc::new(Mutex::new(simulation)));
        Ok(summary)
    }

    /// # Errors
    /// `SimulationNotFound`, or `Codec` if the occupied union cannot be encoded.
    pub fn simulation(&self, simulation_id: Uuid) -> Result<SimulationSummary> {
        self.handle(simulation_id)?.lock().summary(self.compression_level())
    }

    /// Summaries of every simulation on a lake, newest first.
    ///
    /// An unknown lake has no simulations.
    ///
    /// # Errors
    /// `Codec` if an occupied union cannot be encoded.
    pub fn simulations_for_lake(&self, lake_id: Uuid) -> Result<Vec<SimulationSummary>> {
        let handles: Vec<_> = self.simulations.read().values().cloned().collect();
        let mut matching: Vec<(u64, SimulationSummary)> = Vec::new();
        for handle in handles {
            let simulation = handle.lock();
            if simulation.lake_id == lake_id {
                matching.push((simulation.sequence, simulation.summary(self.compression_level())?));
            }
        }
        matching.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(matching.into_iter().map(|(_, summary)| summary).collect())
    }

    /// Subdivisions in insertion order.
    ///
    /// # Errors
    /// `SimulationNotFound`.
    pub fn subdivisions(&self, simulation_id: Uuid) -> Result<Vec<Subdivision>> {
        Ok(self.handle(simulation_id)?.lock().subdivisions().to_vec())
    }

    /// Raw occupied union, `None` while the simulation has no subdivisions.
    ///
    /// # Errors
    /// `SimulationNotFound`.
    pub fn occupied(&self, simulation_id: Uuid) -> Result<Option<Bitset>> {
        Ok(self.handle(simulation_id)?.lock().occupied().cloned())
    }

    /// Validate a drawn geometry and add it as a subdivision.
    ///
    /// A request without a dataset version uses the simulation's.
    ///
    /// # Errors
    /// Fatal conditions of [`LakeService::validate_geometry`], `SimulationNotFound`,
    /// or `Store`.
    pub fn add_subdivision(&self, simulation_id: Uuid, request: &GeometryRequest) -> Result<AddOutcome> {
        let handle = self.handle(simulation_id)?;
        let (lake_id, pinned, requested) = {
            let sim = handle.lock();
            let requested = request.dataset_version_id.unwrap_or(sim.dataset_version_id);
            if let Err(rejection) = sim.check_can_add(requested, self.lakes.config().max_subdivisions) {
                return Ok(self.rejected(simulation_id, rejection));
            }
            (sim.lake_id, sim.dataset_version_id, requested)
        };

        let pinned_request = request.clone().with_dataset_version(pinned);
        let selection = match self.lakes.validate_geometry(lake_id, &pinned_request)? {
            SelectionOutcome::Valid(selection) => selection,
            SelectionOutcome::Invalid(invalid) => {
                warn!(
                    %simulation_id,
                    code = ?invalid.code(),
                    blocked = invalid.report.blocked_cells,
                    "Subdivision geometry rejected"
                );
                return Ok(AddOutcome::Invalid(invalid));
            }
        };

        let drawn = DrawnGeometry::new(
            request.geometry.clone(),
            request.geometry_crs.clone(),
            request.all_touched,
        );
        let mut sim = handle.lock();
        self.add_locked(&mut sim, selection.bitset, requested, Some(drawn))
    }

    /// Add a precomputed selection bitset as a subdivision.
    ///
    /// # Errors
    /// `SimulationNotFound`, `BitsetDimensionMismatch` if the bitset does not fit
    /// the simulation's grid, or `Store`.
    pub fn add_subdivision_bitset(
        &self,
        simulation_id: Uuid,
        bitset: Bitset,
        dataset_version_id: Option<Uuid>,
    ) -> Result<AddOutcome> {
        let handle = self.handle(simulation_id)?;
        let mut sim = handle.lock();
        let requested = dataset_version_id.unwrap_or(sim.dataset_version_id);
        self.add_locked(&mut sim, bitset, requested, None)
    }

    fn add_locked(
        &self,
        sim: &mut Simulation,
        candidate: Bitset,
        dataset_version_id: Uuid,
        drawn: Option<DrawnGeometry>,
    ) -> Result<AddOutcome> {
        let staged = match sim.stage_add(candidate, dataset_version_id, drawn, self.lakes.config())? {
            Ok(staged) => staged,
            Err(rejection) => return Ok(self.rejected(sim.id, rejection)),
        };

        let summary = self.summary_after_add(sim, &staged)?;
        let subdivision = staged.subdivision().clone();
        self.store.apply(&LedgerChange::SubdivisionAdded {
            simulation: summary.clone(),
            subdivision: subdivision.clone(),
        })?;
        sim.commit_add(staged);

        debug!(
            simulation_id = %sim.id,
            subdivision_id = %subdivision.id,
            selected = subdivision.selected_cells,
            total = sim.total_selected_cells,
            "Added subdivision"
        );
        Ok(AddOutcome::Added {
            subdivision,
            simulation: summary,
        })
    }

    fn summary_after_add(&self, sim: &Simulation, staged: &StagedAdd) -> Result<SimulationSummary> {
        sim.summary_with(
            sim.status,
            Some(staged.occupied()),
            sim.subdivisions.len() + 1,
            sim.total_selected_cells + staged.subdivision().selected_cells,
            self.compression_level(),
        )
    }

    fn rejected(&self, simulation_id: Uuid, rejection: Rejection) -> AddOutcome {
        warn!(%simulation_id, code = %rejection.code, "Subdivision rejected");
        AddOutcome::Rejected(rejection)
    }

    /// Remove a subdivision and rebuild the occupied union.
    ///
    /// # Errors
    /// `SimulationNotFound`, `SubdivisionNotFound`, or `Store`.
    pub fn remove_subdivision(&self, simulation_id: Uuid, subdivision_id: Uuid) -> Result<RemoveOutcome> {
        let handle = self.handle(simulation_id)?;
        let mut sim = handle.lock();
        let staged = match sim.stage_remove(subdivision_id)? {
            Ok(staged) => staged,
            Err(rejection) => {
                warn!(%simulation_id, %subdivision_id, code = %rejection.code, "Removal rejected");
                return Ok(RemoveOutcome::Rejected(rejection));
            }
        };

        let summary = sim.summary_with(
            sim.status,
            staged.occupied(),
            sim.subdivisions.len() - 1,
            staged.total_selected_cells,
            self.compression_level(),
        )?;
        self.store.apply(&LedgerChange::SubdivisionRemoved {
            simulation: summary.clone(),
            subdivision_id,
        })?;
        sim.commit_remove(staged);

        debug!(
            %simulation_id,
            %subdivision_id,
            remaining = sim.subdivisions.len(),
            "Removed subdivision, rebuilt occupied union"
        );
        Ok(RemoveOutcome::Removed(summary))
    }

    /// Lock a simulation against further changes. Finalizing twice is a no-op.
    ///
    /// # Errors
    /// `SimulationNotFound`, or `Store`.
    pub fn finalize(&self, simulation_id: Uuid) -> Result<SimulationSummary> {
        let handle = self.handle(simulation_id)?;
        let mut sim = handle.lock();
        if sim.status == SimulationStatus::Finalized {
            return sim.summary(self.compression_level());
        }

        let summary = sim.summary_with(
            SimulationStatus::Finalized,
            sim.occupied.as_ref(),
            sim.subdivisions.len(),
            sim.total_selected_cells,
            self.compression_level(),
        )?;
        self.store.apply(&LedgerChange::Finalized(summary.clone()))?;
        sim.finalize();
        debug!(%simulation_id, "Finalized simulation");
        Ok(summary)
    }
}
