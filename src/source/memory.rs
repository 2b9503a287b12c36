//! In-memory lake source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{DatasetVersion, LakeRecord, LakeResolver, LayerProvider};
use crate::constraint::{ConstraintLayer, LayerKind};
use crate::error::{LakeGridError, Result};

#[derive(Default)]
struct Catalog {
    lakes: HashMap<Uuid, LakeRecord>,
    versions: HashMap<Uuid, Vec<DatasetVersion>>,
    layers: HashMap<(Uuid, LayerKind), Arc<ConstraintLayer>>,
}

/// Lakes, dataset versions and layers held in process memory.
///
/// Counts layer reads so callers can observe cache behaviour.
#[derive(Default)]
pub struct MemoryLakeSource {
    catalog: RwLock<Catalog>,
    layer_reads: AtomicUsize,
}

impl MemoryLakeSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_lake(&self, lake: LakeRecord) {
        debug!(lake_id = %lake.id, name = %lake.name, "Registered lake");
        self.catalog.write().lakes.insert(lake.id, lake);
    }

    pub fn insert_dataset_version(&self, version: DatasetVersion) {
        debug!(lake_id = %version.lake_id, dataset_version_id = %version.id, "Registered dataset version");
        self.catalog
            .write()
            .versions
            .entry(version.lake_id)
            .or_default()
            .push(version);
    }

    /// Register a layer, replacing any previous layer of the same kind.
    pub fn insert_layer(&self, dataset_version_id: Uuid, layer: ConstraintLayer) {
        debug!(%dataset_version_id, layer = %layer.kind(), "Registered layer");
        self.catalog
            .write()
            .layers
            .insert((dataset_version_id, layer.kind()), Arc::new(layer));
    }

    /// Number of successful [`LayerProvider::layer`] calls so far.
    #[must_use]
    pub fn layer_reads(&self) -> usize {
        self.layer_reads.load(Ordering::Relaxed)
    }
}

impl LakeResolver for MemoryLakeSource {
    fn lake(&self, lake_id: Uuid) -> Result<LakeRecord> {
        self.catalog
            .read()
            .lakes
            .get(&lake_id)
            .cloned()
            .ok_or(LakeGridError::LakeNotFound(lake_id))
    }

    fn dataset_versions(&self, lake_id: Uuid) -> Result<Vec<DatasetVersion>> {
        Ok(self
            .catalog
            .read()
            .versions
            .get(&lake_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl LayerProvider for MemoryLakeSource {
    fn layer(&self, dataset_version_id: Uuid, kind: LayerKind) -> Result<Arc<ConstraintLayer>> {
        let layer = self
            .catalog
            .read()
            .layers
            .get(&(dataset_version_id, kind))
            .cloned()
            .ok_or_else(|| LakeGridError::LayerNotFound {
                dataset_version_id,
                kind: kind.to_string(),
            })?;
        self.layer_reads.fetch_add(1, Ordering::Relaxed);
        Ok(layer)
    }
}
