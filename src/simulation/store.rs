//! Persistence of simulation changes.
//!
//! The service hands every mutation to a [`SimulationStore`] before applying it in
//! memory. If `apply` fails the mutation is dropped and the error is returned to
//! the caller.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::{SimulationSummary, Subdivision};
use crate::error::{LakeGridError, Result};

/// A committed change, carrying the simulation row as it will be after the change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LedgerChange {
    Created(SimulationSummary),
    SubdivisionAdded {
        simulation: SimulationSummary,
        subdivision: Subdivision,
    },
    SubdivisionRemoved {
        simulation: SimulationSummary,
        subdivision_id: Uuid,
    },
    Finalized(SimulationSummary),
}

impl LedgerChange {
    /// Simulation row after the change.
    #[must_use]
    pub fn simulation(&self) -> &SimulationSummary {
        match self {
            Self::Created(s) | Self::Finalized(s) => s,
            Self::SubdivisionAdded { simulation, .. } | Self::SubdivisionRemoved { simulation, .. } => simulation,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::SubdivisionAdded { .. } => "subdivision_added",
            Self::SubdivisionRemoved { .. } => "subdivision_removed",
            Self::Finalized(_) => "finalized",
        }
    }
}

/// Receives every simulation change in commit order.
///
/// Implementations must write a change atomically: either the simulation row and
/// the subdivision row both land, or neither does.
pub trait SimulationStore: Send + Sync {
    /// # Errors
    /// `Store` if the change could not be persisted.
    fn apply(&self, change: &LedgerChange) -> Result<()>;
}

/// Store that accepts and forgets everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl SimulationStore for NullStore {
    fn apply(&self, _change: &LedgerChange) -> Result<()> {
        Ok(())
    }
}

/// Store that records changes in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    changes: Mutex<Vec<LedgerChange>>,
    fail_next: Mutex<Option<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted change so far.
    #[must_use]
    pub fn changes(&self) -> Vec<LedgerChange> {
        self.changes.lock().clone()
    }

    /// Make the next `apply` fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }
}

impl SimulationStore for MemoryStore {
    fn apply(&self, change: &LedgerChange) -> Result<()> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(LakeGridError::Store(reason));
        }
        debug!(
            simulation_id = %change.simulation().id,
            change = change.kind(),
            "Stored simulation change"
        );
        self.changes.lock().push(change.clone());
        Ok(())
    }
}
