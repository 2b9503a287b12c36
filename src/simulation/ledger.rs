//! Occupied-cell ledger of a simulation.
//!
//! Every mutation is computed first ([`Simulation::stage_add`],
//! [`Simulation::stage_remove`]) without touching the simulation, then applied with
//! the matching `commit_*` once the store has accepted it. A failed store write
//! therefore leaves the simulation exactly as it was.
//!
//! No cell is ever covered by two subdivisions, so on removal the union is simply
//! rebuilt as the OR of the remaining subdivisions.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{DrawnGeometry, Simulation, SimulationStatus, Subdivision};
use crate::bitset::Bitset;
use crate::config::EngineConfig;
use crate::error::{LakeGridError, Rejection, Result, ValidationCode};

/// An accepted addition, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedAdd {
    pub(crate) subdivision: Subdivision,
    pub(crate) occupied: Bitset,
}

impl StagedAdd {
    #[must_use]
    pub fn subdivision(&self) -> &Subdivision {
        &self.subdivision
    }

    /// Occupied union after the addition.
    #[must_use]
    pub fn occupied(&self) -> &Bitset {
        &self.occupied
    }
}

/// An accepted removal, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRemove {
    pub(crate) subdivision_id: Uuid,
    pub(crate) occupied: Option<Bitset>,
    pub(crate) total_selected_cells: usize,
}

impl StagedRemove {
    #[must_use]
    pub fn subdivision_id(&self) -> Uuid {
        self.subdivision_id
    }

    /// Occupied union after the removal, `None` if nothing remains.
    #[must_use]
    pub fn occupied(&self) -> Option<&Bitset> {
        self.occupied.as_ref()
    }
}

impl Simulation {
    fn check_draft(&self) -> std::result::Result<(), Rejection> {
        match self.status {
            SimulationStatus::Draft => Ok(()),
            SimulationStatus::Finalized => Err(Rejection::new(
                ValidationCode::SimulationFinalized,
                "Simulation is finalized; subdivisions can no longer change.",
            )),
        }
    }

    /// Checks that do not depend on the candidate selection: draft status,
    /// capacity and dataset version, in that order.
    ///
    /// # Errors
    /// The first failed check as a [`Rejection`].
    pub fn check_can_add(
        &self,
        dataset_version_id: Uuid,
        max_subdivisions: usize,
    ) -> std::result::Result<(), Rejection> {
        self.check_draft()?;
        if self.subdivisions.len() >= max_subdivisions {
            return Err(Rejection::new(
                ValidationCode::MaxSubdivisionsExceeded,
                format!("Simulation already has the maximum of {max_subdivisions} subdivisions."),
            ));
        }
        if dataset_version_id != self.dataset_version_id {
            return Err(Rejection::new(
                ValidationCode::DatasetVersionImmutable,
                format!(
                    "Simulation is bound to dataset version {}; got {dataset_version_id}.",
                    self.dataset_version_id
                ),
            ));
        }
        Ok(())
    }

    /// Stage the addition of a candidate selection.
    ///
    /// # Errors
    /// `BitsetDimensionMismatch` if the candidate is not sized for this grid;
    /// `BitsetPaddingSet` if it sets bits past the last cell;
    /// `Codec` if it cannot be encoded. User-recoverable failures come back as
    /// the inner `Err`.
    pub fn stage_add(
        &self,
        candidate: Bitset,
        dataset_version_id: Uuid,
        drawn: Option<DrawnGeometry>,
        config: &EngineConfig,
    ) -> Result<std::result::Result<StagedAdd, Rejection>> {
        if let Err(rejection) = self.check_can_add(dataset_version_id, config.max_subdivisions) {
            return Ok(Err(rejection));
        }

        let cells = self.rows * self.cols;
        let expected = Bitset::byte_len(cells);
        if candidate.len() != expected {
            return Err(LakeGridError::BitsetDimensionMismatch {
                left: candidate.len(),
                right: expected,
            });
        }
        if candidate.has_padding_bits(cells) {
            return Err(LakeGridError::BitsetPaddingSet { cells });
        }

        let selected_cells = candidate.count_ones();
        if selected_cells == 0 {
            return Ok(Err(Rejection::new(
                ValidationCode::EmptySelection,
                "Selection is empty (0 selected cells).",
            )));
        }

        let occupied = match &self.occupied {
            None => candidate.clone(),
            Some(occupied) => {
                let overlap = occupied.intersection(&candidate)?.count_ones();
                if overlap > 0 {
                    return Ok(Err(Rejection::new(
                        ValidationCode::SubdivisionOverlap,
                        format!("Selection overlaps existing subdivisions in {overlap} cells."),
                    )));
                }
                occupied.union(&candidate)?
            }
        };

        Ok(Ok(StagedAdd {
            subdivision: Subdivision {
                id: Uuid::new_v4(),
                simulation_id: self.id,
                drawn,
                selection_bitset_base64: candidate.encode(config.compression_level)?,
                bitset: candidate,
                selected_cells,
            },
            occupied,
        }))
    }

    /// Apply a staged addition.
    pub fn commit_add(&mut self, staged: StagedAdd) {
        self.total_selected_cells += staged.subdivision.selected_cells;
        self.occupied = Some(staged.occupied);
        self.subdivisions.push(staged.subdivision);
    }

    /// Stage the removal of a subdivision, rebuilding the union from the rest.
    ///
    /// # Errors
    /// `SubdivisionNotFound` for an unknown id. A finalized simulation comes back
    /// as the inner `Err`.
    pub fn stage_remove(&self, subdivision_id: Uuid) -> Result<std::result::Result<StagedRemove, Rejection>> {
        if let Err(rejection) = self.check_draft() {
            return Ok(Err(rejection));
        }
        if !self.subdivisions.iter().any(|s| s.id == subdivision_id) {
            return Err(LakeGridError::SubdivisionNotFound {
                simulation_id: self.id,
                subdivision_id,
            });
        }

        let mut occupied: Option<Bitset> = None;
        let mut total_selected_cells = 0;
        for sub in self.subdivisions.iter().filter(|s| s.id != subdivision_id) {
            match occupied.as_mut() {
                None => occupied = Some(sub.bitset.clone()),
                Some(union) => union.union_in_place(&sub.bitset)?,
            }
            total_selected_cells += sub.selected_cells;
        }

        Ok(Ok(StagedRemove {
            subdivision_id,
            occupied,
            total_selected_cells,
        }))
    }

    /// Apply a staged removal.
    pub fn commit_remove(&mut self, staged: StagedRemove) {
        self.subdivisions.retain(|s| s.id != staged.subdivision_id);
        self.occupied = staged.occupied;
        self.total_selected_cells = staged.total_selected_cells;
    }

    /// Lock the simulation. Returns `false` if it was already finalized.
    pub fn finalize(&mut self) -> bool {
        let changed = self.status == SimulationStatus::Draft;
        self.status = SimulationStatus::Finalized;
        changed
    }
}

impl DrawnGeometry {
    pub fn new(geometry: JsonValue, geometry_crs: impl Into<String>, all_touched: bool) -> Self {
        Self {
            geometry,
            geometry_crs: geometry_crs.into(),
            all_touched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4x4 grid: two bytes of cells.
    fn sim() -> Simulation {
        Simulation::new(Uuid::new_v4(), Uuid::new_v4(), "test", 4, 4)
    }

    fn bits(bytes: [u8; 2]) -> Bitset {
        Bitset::from_bytes(bytes.to_vec())
    }

    fn add(sim: &mut Simulation, candidate: Bitset) -> std::result::Result<Uuid, Rejection> {
        let dv = sim.dataset_version_id;
        let staged = sim.stage_add(candidate, dv, None, &EngineConfig::default()).unwrap()?;
        let id = staged.subdivision().id;
        sim.commit_add(staged);
        Ok(id)
    }

    #[test]
    fn test_first_add_sets_occupied() {
        let mut s = sim();
        add(&mut s, bits([0b0000_0011, 0x00])).unwrap();
        assert_eq!(s.occupied(), Some(&bits([0b0000_0011, 0x00])));
        assert_eq!(s.subdivision_count(), 1);
        assert_eq!(s.total_selected_cells(), 2);
        assert_eq!(s.subdivisions()[0].selection_bitset_base64.decode().unwrap(), bits([3, 0]));
    }

    #[test]
    fn test_same_selection_twice_overlaps() {
        let mut s = sim();
        add(&mut s, bits([0b1000_0000, 0x01])).unwrap();
        let before = s.clone();
        let rejection = add(&mut s, bits([0b1000_0000, 0x01])).unwrap_err();
        assert_eq!(rejection.code, ValidationCode::SubdivisionOverlap);
        assert_eq!(s, before);
    }

    #[test]
    fn test_disjoint_adds_accumulate() {
        let mut s = sim();
        add(&mut s, bits([0x0f, 0x00])).unwrap();
        add(&mut s, bits([0xf0, 0x00])).unwrap();
        add(&mut s, bits([0x00, 0x01])).unwrap();
        assert_eq!(s.occupied(), Some(&bits([0xff, 0x01])));
        assert_eq!(s.total_selected_cells(), 9);
        // One shared cell is enough to reject
        assert_eq!(add(&mut s, bits([0x00, 0x03])).unwrap_err().code, ValidationCode::SubdivisionOverlap);
    }

    #[test]
    fn test_remove_rebuilds_union() {
        let mut s = sim();
        let a = add(&mut s, bits([0x0f, 0x00])).unwrap();
        add(&mut s, bits([0x00, 0xf0])).unwrap();
        let staged = s.stage_remove(a).unwrap().unwrap();
        s.commit_remove(staged);
        assert_eq!(s.occupied(), Some(&bits([0x00, 0xf0])));
        assert_eq!(s.total_selected_cells(), 4);
        assert_eq!(s.subdivision_count(), 1);
        // The freed cells can be claimed again
        add(&mut s, bits([0x01, 0x00])).unwrap();
    }

    #[test]
    fn test_remove_only_subdivision_clears_occupied() {
        let mut s = sim();
        let a = add(&mut s, bits([0x10, 0x00])).unwrap();
        let staged = s.stage_remove(a).unwrap().unwrap();
        assert!(staged.occupied().is_none());
        s.commit_remove(staged);
        assert!(s.occupied().is_none());
        assert_eq!(s.total_selected_cells(), 0);
        assert_eq!(s.subdivision_count(), 0);
    }

    #[test]
    fn test_remove_unknown_is_fatal() {
        let s = sim();
        let err = s.stage_remove(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.code(), "SUBDIVISION_NOT_FOUND");
    }

    #[test]
    fn test_empty_candidate_is_rejected() {
        let mut s = sim();
        assert_eq!(add(&mut s, bits([0, 0])).unwrap_err().code, ValidationCode::EmptySelection);
        assert!(s.occupied().is_none());
    }

    #[test]
    fn test_wrong_length_is_fatal() {
        let s = sim();
        let dv = s.dataset_version_id;
        let err = s
            .stage_add(Bitset::from_bytes(vec![1, 0, 0]), dv, None, &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "BITSET_DIMENSION_MISMATCH");
    }

    #[test]
    fn test_padding_bits_are_fatal() {
        // 3x3 grid: bit 9 is past the last cell
        let mut s = Simulation::new(Uuid::new_v4(), Uuid::new_v4(), "padded", 3, 3);
        let dv = s.dataset_version_id;
        let err = s
            .stage_add(Bitset::from_bytes(vec![0x00, 0b10]), dv, None, &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, LakeGridError::BitsetPaddingSet { cells: 9 }));
        assert_eq!(err.code(), "BITSET_DIMENSION_MISMATCH");
        assert_eq!(s.subdivision_count(), 0);
        assert_eq!(s.total_selected_cells(), 0);
        assert!(s.occupied().is_none());

        // Cell 8 itself is a real cell
        add(&mut s, Bitset::from_bytes(vec![0x00, 0b01])).unwrap();
        assert_eq!(s.total_selected_cells(), 1);
    }

    #[test]
    fn test_dataset_version_is_immutable() {
        let s = sim();
        let rejection = s
            .stage_add(bits([1, 0]), Uuid::new_v4(), None, &EngineConfig::default())
            .unwrap()
            .unwrap_err();
        assert_eq!(rejection.code, ValidationCode::DatasetVersionImmutable);
    }

    #[test]
    fn test_capacity_limit() {
        let mut s = sim();
        let config = EngineConfig::default().with_max_subdivisions(2);
        let dv = s.dataset_version_id;
        for byte in [0x01, 0x02] {
            let staged = s.stage_add(bits([byte, 0]), dv, None, &config).unwrap().unwrap();
            s.commit_add(staged);
        }
        let rejection = s.stage_add(bits([0x04, 0]), dv, None, &config).unwrap().unwrap_err();
        assert_eq!(rejection.code, ValidationCode::MaxSubdivisionsExceeded);
    }

    #[test]
    fn test_finalized_rejects_changes() {
        let mut s = sim();
        let a = add(&mut s, bits([1, 0])).unwrap();
        assert!(s.finalize());
        assert!(!s.finalize());
        assert_eq!(s.status(), SimulationStatus::Finalized);
        assert_eq!(add(&mut s, bits([2, 0])).unwrap_err().code, ValidationCode::SimulationFinalized);
        let rejection = s.stage_remove(a).unwrap().unwrap_err();
        assert_eq!(rejection.code, ValidationCode::SimulationFinalized);
    }

    #[test]
    fn test_checks_run_in_order() {
        // Finalized wins over a wrong dataset version and an empty candidate
        let mut s = sim();
        s.finalize();
        let rejection = s
            .stage_add(bits([0, 0]), Uuid::new_v4(), None, &EngineConfig::default())
            .unwrap()
            .unwrap_err();
        assert_eq!(rejection.code, ValidationCode::SimulationFinalized);
    }

    #[test]
    fn test_summary_encodes_occupied() {
        let mut s = sim();
        assert!(s.summary(6).unwrap().occupied_bitset_base64.is_none());
        add(&mut s, bits([0xaa, 0x55])).unwrap();
        let summary = s.summary(6).unwrap();
        assert_eq!(summary.subdivision_count, 1);
        assert_eq!(summary.total_selected_cells, 8);
        assert_eq!(summary.occupied_bitset_base64.unwrap().decode().unwrap(), bits([0xaa, 0x55]));
    }
}
