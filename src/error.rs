//! Error types.
//!
//! Two classes of failure flow through this crate:
//!
//! - [`LakeGridError`]: fatal conditions (misconfigured dataset, broken invariant,
//!   collaborator failure). These are always returned as `Err`.
//! - [`ValidationCode`] / [`Rejection`]: user-recoverable conditions. These are carried
//!   inside outcome types such as [`crate::SelectionOutcome`] and
//!   [`crate::AddOutcome`] and never surface as `Err` from a service call.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Fatal errors.
#[derive(Error, Debug)]
pub enum LakeGridError {
    /// No lake with this id.
    #[error("Lake not found: {0}")]
    LakeNotFound(Uuid),

    /// Dataset version missing, not owned by the lake, or no active version.
    #[error("Dataset version not found for lake {lake_id}: {detail}")]
    DatasetNotFound { lake_id: Uuid, detail: String },

    /// Required constraint layer missing from a dataset version.
    #[error("Layer '{kind}' not found in dataset version {dataset_version_id}")]
    LayerNotFound { dataset_version_id: Uuid, kind: String },

    /// Constraint layer shape differs from the grid.
    #[error("Layer '{kind}' is {actual_rows}x{actual_cols}, grid is {rows}x{cols}")]
    DimensionMismatch {
        kind: String,
        rows: usize,
        cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    /// Two bitsets that should describe the same grid have different byte lengths.
    #[error("Bitset length mismatch: {left} bytes vs {right} bytes")]
    BitsetDimensionMismatch { left: usize, right: usize },

    /// Bitset of the right length with bits set past the last cell.
    #[error("Bitset sets padding bits past cell {cells}")]
    BitsetPaddingSet { cells: usize },

    /// Grid origin convention other than `top_left`.
    #[error("Unsupported origin corner '{0}', only 'top_left' is supported")]
    UnsupportedOriginCorner(String),

    /// Grid spec with non-positive dimensions or cell size.
    #[error("Invalid grid spec: {0}")]
    InvalidGrid(String),

    /// CRS identifier or transform failure on the grid side.
    #[error("CRS error: {0}")]
    Crs(String),

    /// Corrupt encoded bitset (bad base64 or zlib stream).
    #[error("Bitset codec error: {0}")]
    Codec(String),

    #[error("Simulation not found: {0}")]
    SimulationNotFound(Uuid),

    #[error("Subdivision {subdivision_id} not found in simulation {simulation_id}")]
    SubdivisionNotFound {
        simulation_id: Uuid,
        subdivision_id: Uuid,
    },

    /// Persistence collaborator refused or failed a mutation.
    #[error("Store error: {0}")]
    Store(String),
}

impl LakeGridError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LakeNotFound(_) => "LAKE_NOT_FOUND",
            Self::DatasetNotFound { .. } => "DATASET_NOT_FOUND",
            Self::LayerNotFound { .. } => "LAYER_NOT_FOUND",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::BitsetDimensionMismatch { .. } | Self::BitsetPaddingSet { .. } => {
                "BITSET_DIMENSION_MISMATCH"
            }
            Self::UnsupportedOriginCorner(_) => "UNSUPPORTED_ORIGIN_CORNER",
            Self::InvalidGrid(_) => "INVALID_GRID",
            Self::Crs(_) => "CRS_ERROR",
            Self::Codec(_) => "BITSET_CODEC_ERROR",
            Self::SimulationNotFound(_) => "SIMULATION_NOT_FOUND",
            Self::SubdivisionNotFound { .. } => "SUBDIVISION_NOT_FOUND",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

/// Result type for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, LakeGridError>;

/// User-recoverable outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    EmptySelection,
    IntersectsWater,
    IntersectsInhabitants,
    IntersectsNodata,
    SubdivisionOverlap,
    MaxSubdivisionsExceeded,
    DatasetVersionImmutable,
    SimulationFinalized,
    InvalidGeojson,
    UnsupportedGeometry,
    InvalidGeometry,
}

impl ValidationCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptySelection => "EMPTY_SELECTION",
            Self::IntersectsWater => "INTERSECTS_WATER",
            Self::IntersectsInhabitants => "INTERSECTS_INHABITANTS",
            Self::IntersectsNodata => "INTERSECTS_NODATA",
            Self::SubdivisionOverlap => "SUBDIVISION_OVERLAP",
            Self::MaxSubdivisionsExceeded => "MAX_SUBDIVISIONS_EXCEEDED",
            Self::DatasetVersionImmutable => "DATASET_VERSION_IMMUTABLE",
            Self::SimulationFinalized => "SIMULATION_FINALIZED",
            Self::InvalidGeojson => "INVALID_GEOJSON",
            Self::UnsupportedGeometry => "UNSUPPORTED_GEOMETRY",
            Self::InvalidGeometry => "INVALID_GEOMETRY",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-recoverable rejection with a human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Rejection {
    pub code: ValidationCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
