#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`grid`]: Lake grid spec ([`GridSpec`]) and boolean cell masks ([`SelectionMask`])
//! - [`geometry`]: GeoJSON polygon parsing, validity checks and reprojection
//! - [`raster`]: Polygon → cell rasterization (centre rule or all-touched)
//! - [`bitset`]: Packed LSB0 bitsets and their zlib+base64 text form
//! - [`constraint`]: Water / inhabitants layers, blocking evaluation and statistics
//! - [`cache`]: Injectable result caches ([`TtlCache`], [`NoCache`])
//! - [`source`]: Lake resolver and layer provider collaborators
//! - [`lake`]: [`LakeService`], the lake-level operations
//! - [`simulation`]: [`SimulationService`] and the non-overlapping subdivision ledger

// ============================================================================
// Public modules
// ============================================================================

pub mod bitset;
pub mod cache;
pub mod casting;
pub mod config;
pub mod constraint;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod lake;
pub mod raster;
pub mod simulation;
pub mod source;

// ============================================================================
// Errors & Configuration
// ============================================================================

pub use config::EngineConfig;
pub use error::{LakeGridError, Rejection, Result, ValidationCode};

// ============================================================================
// Grid & Bitsets
// ============================================================================

pub use bitset::{
    Bitset,
    EncodedBitset,
    BIT_ORDER,
    CELL_ORDER,
    ENCODING,
};
pub use grid::{
    BoundingBox,
    GeoTransform,
    GridSpec,
    ORIGIN_TOP_LEFT,
    SelectionMask,
};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::PolygonGeometry;
pub use geometry::parse::parse_geometry;
pub use geometry::projection::{
    parse_crs,
    project_point,
    Reprojector,
};
pub use raster::rasterize;

// ============================================================================
// Constraints
// ============================================================================

pub use constraint::{
    BlockedBreakdown,
    ConstraintLayer,
    ConstraintReport,
    LayerKind,
    LayerStatistics,
};

// ============================================================================
// Caching & Sources
// ============================================================================

pub use cache::{NoCache, ResultCache, TtlCache};
pub use source::{
    DatasetVersion,
    LakeRecord,
    LakeResolver,
    LayerProvider,
    MemoryLakeSource,
};

// ============================================================================
// Services
// ============================================================================
// Primary API: LakeService::validate_geometry(...), SimulationService::add_subdivision(...)

pub use lake::{
    GeometryRequest,
    GeometryValidation,
    LakeService,
    SelectionOutcome,
};
pub use simulation::{
    AddOutcome,
    MemoryStore,
    NullStore,
    RemoveOutcome,
    SimulationService,
    SimulationStore,
};
