//! Simulations: sets of subdivisions that never share a grid cell.
//!
//! - [`ledger`]: the occupied-cell ledger of one simulation (staged, then committed)
//! - [`store`]: persistence collaborator receiving every committed change
//! - [`service`]: [`SimulationService`], serializing mutations per simulation

pub mod ledger;
pub mod service;
pub mod store;

pub use ledger::{StagedAdd, StagedRemove};
pub use service::{AddOutcome, RemoveOutcome, SimulationService};
pub use store::{LedgerChange, MemoryStore, NullStore, SimulationStore};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::bitset::{Bitset, EncodedBitset, BIT_ORDER, CELL_ORDER, ENCODING};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Draft,
    Finalized,
}

/// The geometry a subdivision was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnGeometry {
    pub geometry: JsonValue,
    pub geometry_crs: String,
    pub all_touched: bool,
}

/// One accepted selection of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subdivision {
    pub id: Uuid,
    pub simulation_id: Uuid,
    /// `None` for subdivisions added from a raw bitset
    pub drawn: Option<DrawnGeometry>,
    #[serde(skip)]
    pub bitset: Bitset,
    pub selection_bitset_base64: EncodedBitset,
    pub selected_cells: usize,
}

/// A simulation with its subdivisions and occupied-cell union.
///
/// Mutated only through [`Simulation::stage_add`] / [`Simulation::commit_add`] and
/// their removal counterparts.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub(crate) id: Uuid,
    pub(crate) lake_id: Uuid,
    pub(crate) dataset_version_id: Uuid,
    pub(crate) name: String,
    pub(crate) status: SimulationStatus,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    /// Union of all subdivision bitsets, `None` while there are none
    pub(crate) occupied: Option<Bitset>,
    pub(crate) subdivisions: Vec<Subdivision>,
    pub(crate) total_selected_cells: usize,
    /// Creation order within a service, newest highest
    pub(crate) sequence: u64,
}

impl Simulation {
    /// Empty draft simulation bound to one dataset version.
    pub fn new(
        lake_id: Uuid,
        dataset_version_id: Uuid,
        name: impl Into<String>,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lake_id,
            dataset_version_id,
            name: name.into(),
            status: SimulationStatus::Draft,
            rows,
            cols,
            occupied: None,
            subdivisions: Vec::new(),
            total_selected_cells: 0,
            sequence: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn lake_id(&self) -> Uuid {
        self.lake_id
    }

    #[must_use]
    pub fn dataset_version_id(&self) -> Uuid {
        self.dataset_version_id
    }

    #[must_use]
    pub fn status(&self) -> SimulationStatus {
        self.status
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[must_use]
    pub fn occupied(&self) -> Option<&Bitset> {
        self.occupied.as_ref()
    }

    #[must_use]
    pub fn subdivisions(&self) -> &[Subdivision] {
        &self.subdivisions
    }

    #[must_use]
    pub fn subdivision_count(&self) -> usize {
        self.subdivisions.len()
    }

    #[must_use]
    pub fn total_selected_cells(&self) -> usize {
        self.total_selected_cells
    }

    /// Persisted view of this simulation.
    ///
    /// # Errors
    /// `Codec` if the occupied bitset cannot be encoded.
    pub fn summary(&self, compression_level: u32) -> Result<SimulationSummary> {
        self.summary_with(
            self.status,
            self.occupied.as_ref(),
            self.subdivisions.len(),
            self.total_selected_cells,
            compression_level,
        )
    }

    /// Summary with the mutable parts replaced, for changes not yet committed.
    pub(crate) fn summary_with(
        &self,
        status: SimulationStatus,
        occupied: Option<&Bitset>,
        subdivision_count: usize,
        total_selected_cells: usize,
        compression_level: u32,
    ) -> Result<SimulationSummary> {
        Ok(SimulationSummary {
            id: self.id,
            lake_id: self.lake_id,
            dataset_version_id: self.dataset_version_id,
            name: self.name.clone(),
            status,
            rows: self.rows,
            cols: self.cols,
            encoding: ENCODING.to_string(),
            bit_order: BIT_ORDER.to_string(),
            cell_order: CELL_ORDER.to_string(),
            occupied_bitset_base64: occupied.map(|b| b.encode(compression_level)).transpose()?,
            subdivision_count,
            total_selected_cells,
        })
    }
}

/// Simulation row as handed to the store and returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub id: Uuid,
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
    pub name: String,
    pub status: SimulationStatus,
    pub rows: usize,
    pub cols: usize,
    pub encoding: String,
    pub bit_order: String,
    pub cell_order: String,
    pub occupied_bitset_base64: Option<EncodedBitset>,
    pub subdivision_count: usize,
    pub total_selected_cells: usize,
}
