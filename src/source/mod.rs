//! Lake and constraint-layer sources.
//!
//! The engine never touches a database or blob store directly. It resolves lakes
//! and dataset versions through a [`LakeResolver`] and reads decoded layer rasters
//! through a [`LayerProvider`]. [`MemoryLakeSource`] implements both for tests and
//! embedded use.
//!
//! # Example
//!
//! ```rust
//! use lakegrid::source::{DatasetVersion, LakeRecord, LakeResolver, MemoryLakeSource};
//! use lakegrid::GridSpec;
//! use uuid::Uuid;
//!
//! let source = MemoryLakeSource::new();
//! let lake = LakeRecord::new("Lake Demo", GridSpec::new(10, 10, 30.0, "EPSG:32632", 500_000.0, 5_000_000.0));
//! let lake_id = lake.id;
//! source.insert_lake(lake);
//! source.insert_dataset_version(DatasetVersion::active(lake_id, "2024-01"));
//!
//! // No explicit version: the active one is used
//! let dv = source.resolve_dataset_version(lake_id, None).unwrap();
//! assert_eq!(dv.version, "2024-01");
//! ```

pub mod memory;

pub use memory::MemoryLakeSource;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraint::{ConstraintLayer, LayerKind};
use crate::error::{LakeGridError, Result};
use crate::grid::GridSpec;

/// A lake and its fixed grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LakeRecord {
    pub id: Uuid,
    pub name: String,
    pub grid: GridSpec,
}

impl LakeRecord {
    /// New lake with a random id.
    pub fn new(name: impl Into<String>, grid: GridSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            grid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetStatus {
    Active,
    Inactive,
}

/// An immutable snapshot of a lake's constraint layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub id: Uuid,
    pub lake_id: Uuid,
    /// Human-readable label, e.g. `2024-01`
    pub version: String,
    pub status: DatasetStatus,
}

impl DatasetVersion {
    pub fn active(lake_id: Uuid, version: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lake_id,
            version: version.into(),
            status: DatasetStatus::Active,
        }
    }

    pub fn inactive(lake_id: Uuid, version: impl Into<String>) -> Self {
        Self {
            status: DatasetStatus::Inactive,
            ..Self::active(lake_id, version)
        }
    }
}

/// Resolves lakes and their dataset versions.
pub trait LakeResolver: Send + Sync {
    /// # Errors
    /// `LakeNotFound` for an unknown id.
    fn lake(&self, lake_id: Uuid) -> Result<LakeRecord>;

    /// All dataset versions of a lake.
    ///
    /// # Errors
    /// Collaborator failures only; an unknown lake may return an empty list.
    fn dataset_versions(&self, lake_id: Uuid) -> Result<Vec<DatasetVersion>>;

    /// Resolve an explicit dataset version, or the lake's active one when `None`.
    ///
    /// # Errors
    /// `DatasetNotFound` if the version does not exist, belongs to another lake,
    /// or the lake has no active version.
    fn resolve_dataset_version(
        &self,
        lake_id: Uuid,
        dataset_version_id: Option<Uuid>,
    ) -> Result<DatasetVersion> {
        let versions = self.dataset_versions(lake_id)?;
        let found = match dataset_version_id {
            None => versions.into_iter().find(|dv| dv.status == DatasetStatus::Active),
            Some(id) => versions.into_iter().find(|dv| dv.id == id),
        };
        found
            .filter(|dv| dv.lake_id == lake_id)
            .ok_or_else(|| LakeGridError::DatasetNotFound {
                lake_id,
                detail: dataset_version_id.map_or_else(
                    || "no active dataset version".to_string(),
                    |id| format!("unknown dataset version {id}"),
                ),
            })
    }
}

/// Reads decoded constraint rasters.
pub trait LayerProvider: Send + Sync {
    /// # Errors
    /// `LayerNotFound` if the dataset version has no layer of this kind.
    fn layer(&self, dataset_version_id: Uuid, kind: LayerKind) -> Result<Arc<ConstraintLayer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver {
        lake: LakeRecord,
        versions: Vec<DatasetVersion>,
    }

    impl LakeResolver for FixedResolver {
        fn lake(&self, lake_id: Uuid) -> Result<LakeRecord> {
            if lake_id == self.lake.id {
                Ok(self.lake.clone())
            } else {
                Err(LakeGridError::LakeNotFound(lake_id))
            }
        }

        fn dataset_versions(&self, _lake_id: Uuid) -> Result<Vec<DatasetVersion>> {
            Ok(self.versions.clone())
        }
    }

    fn resolver() -> FixedResolver {
        let lake = LakeRecord::new("l", GridSpec::new(2, 2, 1.0, "EPSG:3857", 0.0, 2.0));
        let old = DatasetVersion::inactive(lake.id, "v1");
        let current = DatasetVersion::active(lake.id, "v2");
        FixedResolver {
            versions: vec![old, current],
            lake,
        }
    }

    #[test]
    fn test_resolves_active_by_default() {
        let r = resolver();
        let dv = r.resolve_dataset_version(r.lake.id, None).unwrap();
        assert_eq!(dv.version, "v2");
    }

    #[test]
    fn test_resolves_explicit_inactive_version() {
        let r = resolver();
        let id = r.versions[0].id;
        assert_eq!(r.resolve_dataset_version(r.lake.id, Some(id)).unwrap().version, "v1");
    }

    #[test]
    fn test_rejects_foreign_or_unknown_version() {
        let mut r = resolver();
        let err = r.resolve_dataset_version(r.lake.id, Some(Uuid::new_v4())).unwrap_err();
        assert_eq!(err.code(), "DATASET_NOT_FOUND");

        // A version that claims another lake
        r.versions[1].lake_id = Uuid::new_v4();
        let id = r.versions[1].id;
        assert!(r.resolve_dataset_version(r.lake.id, Some(id)).is_err());
        assert!(r.resolve_dataset_version(r.lake.id, None).is_err());
    }

    #[test]
    fn test_dataset_status_serializes_upper() {
        assert_eq!(serde_json::to_string(&DatasetStatus::Active).unwrap(), "\"ACTIVE\"");
    }
}
