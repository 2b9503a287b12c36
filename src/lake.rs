//! Lake-level operations: grid manifest, blocked mask, layer statistics and
//! geometry validation.
//!
//! User-drawn geometry goes through one pipeline:
//!
//! ```text
//! GeoJSON ─ parse ─ reproject ─ rasterize ─ mask ─ evaluate ─ SelectionOutcome
//! ```
//!
//! Drawing problems (bad GeoJSON, empty selection, blocked cells) end up in
//! [`SelectionOutcome::Invalid`]. Misconfiguration (missing lake or layer,
//! shape mismatch, unsupported origin) is returned as `Err`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bitset::{Bitset, EncodedBitset, BIT_ORDER, CELL_ORDER, ENCODING};
use crate::cache::{read_through, ResultCache, TtlCache};
use crate::config::EngineConfig;
use crate::constraint::{self, BlockedBreakdown, ConstraintReport, LayerKind, LayerStatistics};
use crate::error::{LakeGridError, Rejection, Result, ValidationCode};
use crate::geometry::parse::parse_geometry;
use crate::geometry::projection::{bbox_to_wgs84, parse_crs, Reprojector};
use crate::grid::{GridSpec, SelectionMask};
use crate::raster::rasterize;
use crate::source::{DatasetVersion, LakeRecord, LakeResolver, LayerProvider};

/// Default CRS of drawn geometry (web map clients emit lon/lat).
pub const DEFAULT_GEOMETRY_CRS: &str = "EPSG:4326";

fn default_geometry_crs() -> String {
    DEFAULT_GEOMETRY_CRS.to_string()
}

/// A geometry drawn by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRequest {
    /// `None` selects the lake's active dataset version
    #[serde(default)]
    pub dataset_version_id: Option<Uuid>,
    /// GeoJSON geometry object (not a `Feature`)
    pub geometry: JsonValue,
    #[serde(default = "default_geometry_crs")]
    pub geometry_crs: String,
    #[serde(default)]
    pub all_touched: bool,
}

impl GeometryRequest {
    pub fn new(geometry: JsonValue) -> Self {
        Self {
            dataset_version_id: None,
            geometry,
            geometry_crs: default_geometry_crs(),
            all_touched: false,
        }
    }

    #[must_use]
    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.geometry_crs = crs.into();
        self
    }

    #[must_use]
    pub fn with_all_touched(mut self, all_touched: bool) -> Self {
        self.all_touched = all_touched;
        self
    }

    #[must_use]
    pub fn with_dataset_version(mut self, dataset_version_id: Uuid) -> Self {
        self.dataset_version_id = Some(dataset_version_id);
        self
    }
}

/// Cache key of per-dataset results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetKey {
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
}

/// Cache key of per-layer results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerKey {
    pub dataset: DatasetKey,
    pub kind: LayerKind,
}

pub type BlockedMaskCache = dyn ResultCache<DatasetKey, Arc<BlockedMask>>;
pub type LayerStatsCache = dyn ResultCache<LayerKey, Arc<LayerStats>>;

/// Map bootstrap data for a lake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridManifest {
    pub lake_id: Uuid,
    pub grid: GridSpec,
    /// `[minx, miny, maxx, maxy]` in the grid CRS
    pub bbox_lake_crs: [f64; 4],
    /// `[minlon, minlat, maxlon, maxlat]`
    pub bbox_wgs84: [f64; 4],
    /// `[[min_lat, min_lon], [max_lat, max_lon]]`
    pub leaflet_bounds: [[f64; 2]; 2],
}

/// Every blocked cell of a dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedMask {
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
    pub rows: usize,
    pub cols: usize,
    pub encoding: String,
    pub bit_order: String,
    pub cell_order: String,
    pub blocked_bitset_base64: EncodedBitset,
    pub blocked_count: usize,
    pub water_count: usize,
    pub inhabited_count: usize,
    pub nodata_count: usize,
}

/// Statistics of one layer of a dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
    pub layer_kind: LayerKind,
    pub rows: usize,
    pub cols: usize,
    pub dtype: String,
    pub nodata: Option<f64>,
    pub stats: LayerStatistics,
}

/// Selection of a geometry without constraint evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterizeResult {
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
    pub rows: usize,
    pub cols: usize,
    pub encoding: String,
    pub bit_order: String,
    pub cell_order: String,
    /// Number of selected cells
    pub cell_count: usize,
    pub selection_bitset_base64: EncodedBitset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RasterizeOutcome {
    Rasterized(RasterizeResult),
    Rejected(Rejection),
}

/// A non-empty selection that touches no blocked cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
    pub rows: usize,
    pub cols: usize,
    pub mask: SelectionMask,
    pub bitset: Bitset,
    pub report: ConstraintReport,
}

impl Selection {
    #[must_use]
    pub fn selected_cells(&self) -> usize {
        self.report.selected_cells
    }
}

/// A selection that cannot be accepted, with everything a client needs to explain why.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidSelection {
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
    pub rows: usize,
    pub cols: usize,
    /// One entry per cause, never empty
    pub errors: Vec<Rejection>,
    /// Computed selection, when the geometry got as far as rasterization
    pub mask: Option<SelectionMask>,
    pub report: ConstraintReport,
}

impl InvalidSelection {
    /// Code of the first cause.
    #[must_use]
    pub fn code(&self) -> Option<ValidationCode> {
        self.errors.first().map(|e| e.code)
    }
}

/// Result of validating a geometry against a lake.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Valid(Selection),
    Invalid(InvalidSelection),
}

impl SelectionOutcome {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Flatten to the response shape returned to clients.
    ///
    /// # Errors
    /// `Codec` if the selection preview cannot be encoded.
    pub fn to_response(&self, compression_level: u32) -> Result<GeometryValidation> {
        let (lake_id, dataset_version_id, rows, cols, report, bitset, errors) = match self {
            Self::Valid(s) => (
                s.lake_id,
                s.dataset_version_id,
                s.rows,
                s.cols,
                s.report,
                Some(s.bitset.clone()),
                Vec::new(),
            ),
            Self::Invalid(inv) => (
                inv.lake_id,
                inv.dataset_version_id,
                inv.rows,
                inv.cols,
                inv.report,
                inv.mask.as_ref().filter(|m| !m.is_empty()).map(Bitset::pack),
                inv.errors.clone(),
            ),
        };
        let selection_bitset_base64 = bitset
            .as_ref()
            .map(|b| b.encode(compression_level))
            .transpose()?;
        Ok(GeometryValidation {
            ok: self.is_valid(),
            lake_id,
            dataset_version_id,
            rows,
            cols,
            selected_cells: report.selected_cells,
            blocked_cells: report.blocked_cells,
            blocked_breakdown: report.blocked_breakdown,
            encoding: ENCODING.to_string(),
            bit_order: BIT_ORDER.to_string(),
            cell_order: CELL_ORDER.to_string(),
            selection_bitset: bitset,
            selection_bitset_base64,
            errors,
        })
    }
}

/// Client-facing validation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryValidation {
    pub ok: bool,
    pub lake_id: Uuid,
    pub dataset_version_id: Uuid,
    pub rows: usize,
    pub cols: usize,
    pub selected_cells: usize,
    pub blocked_cells: usize,
    pub blocked_breakdown: BlockedBreakdown,
    pub encoding: String,
    pub bit_order: String,
    pub cell_order: String,
    /// Raw packed selection, absent when nothing is selected
    #[serde(skip)]
    pub selection_bitset: Option<Bitset>,
    pub selection_bitset_base64: Option<EncodedBitset>,
    pub errors: Vec<Rejection>,
}

/// Lake and dataset resolved for one request.
struct Resolved {
    lake: LakeRecord,
    dataset: DatasetVersion,
}

/// Entry point for lake-level operations.
pub struct LakeService {
    resolver: Arc<dyn LakeResolver>,
    layers: Arc<dyn LayerProvider>,
    config: EngineConfig,
    blocked_cache: Arc<BlockedMaskCache>,
    stats_cache: Arc<LayerStatsCache>,
}

impl LakeService {
    /// Service with TTL caches sized from `config`.
    pub fn new(
        resolver: Arc<dyn LakeResolver>,
        layers: Arc<dyn LayerProvider>,
        config: EngineConfig,
    ) -> Self {
        let blocked_cache = Arc::new(TtlCache::new(
            config.blocked_cache_capacity(),
            config.blocked_cache_ttl(),
        ));
        let stats_cache = Arc::new(TtlCache::new(
            config.stats_cache_capacity(),
            config.stats_cache_ttl(),
        ));
        Self {
            resolver,
            layers,
            config,
            blocked_cache,
            stats_cache,
        }
    }

    /// Replace both result caches.
    #[must_use]
    pub fn with_caches(mut self, blocked: Arc<BlockedMaskCache>, stats: Arc<LayerStatsCache>) -> Self {
        self.blocked_cache = blocked;
        self.stats_cache = stats;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<dyn LakeResolver> {
        &self.resolver
    }

    /// Drop every cached blocked mask and layer statistic.
    pub fn clear_caches(&self) {
        self.blocked_cache.clear();
        self.stats_cache.clear();
    }

    fn resolve(&self, lake_id: Uuid, dataset_version_id: Option<Uuid>) -> Result<Resolved> {
        let lake = self.resolver.lake(lake_id)?;
        let dataset = self.resolver.resolve_dataset_version(lake_id, dataset_version_id)?;
        Ok(Resolved { lake, dataset })
    }

    /// Grid spec and bounds of a lake.
    ///
    /// # Errors
    /// `LakeNotFound`, `UnsupportedOriginCorner` or `Crs` for a bad grid CRS.
    pub fn grid_manifest(&self, lake_id: Uuid) -> Result<GridManifest> {
        let lake = self.resolver.lake(lake_id)?;
        let bbox = lake.grid.bbox()?;
        let wgs = bbox_to_wgs84(&bbox, &lake.grid.crs)?;
        Ok(GridManifest {
            lake_id,
            bbox_lake_crs: bbox.to_array(),
            bbox_wgs84: wgs.to_array(),
            leaflet_bounds: [[wgs.miny, wgs.minx], [wgs.maxy, wgs.maxx]],
            grid: lake.grid,
        })
    }

    /// Blocked mask of a dataset version (active one if `None`), cached.
    ///
    /// # Errors
    /// `LakeNotFound`, `DatasetNotFound`, `LayerNotFound`, `DimensionMismatch`.
    pub fn blocked_mask(&self, lake_id: Uuid, dataset_version_id: Option<Uuid>) -> Result<Arc<BlockedMask>> {
        let Resolved { lake, dataset } = self.resolve(lake_id, dataset_version_id)?;
        let key = DatasetKey {
            lake_id,
            dataset_version_id: dataset.id,
        };
        read_through(self.blocked_cache.as_ref(), key, || {
            let (rows, cols) = (lake.grid.rows, lake.grid.cols);
            let water = self.layers.layer(dataset.id, LayerKind::Water)?;
            let inhabitants = self.layers.layer(dataset.id, LayerKind::Inhabitants)?;
            let blocked = constraint::blocked_cells(rows, cols, &[water.as_ref(), inhabitants.as_ref()])?;
            debug!(
                %lake_id,
                dataset_version_id = %dataset.id,
                blocked = blocked.blocked_count(),
                "Computed blocked mask"
            );
            Ok(Arc::new(BlockedMask {
                lake_id,
                dataset_version_id: dataset.id,
                rows,
                cols,
                encoding: ENCODING.to_string(),
                bit_order: BIT_ORDER.to_string(),
                cell_order: CELL_ORDER.to_string(),
                blocked_bitset_base64: Bitset::pack(&blocked.mask).encode(self.config.compression_level)?,
                blocked_count: blocked.blocked_count(),
                water_count: blocked.water_count,
                inhabited_count: blocked.inhabited_count,
                nodata_count: blocked.nodata_count,
            }))
        })
    }

    /// Statistics of one layer (active dataset version if `None`), cached.
    ///
    /// # Errors
    /// `LakeNotFound`, `DatasetNotFound`, `LayerNotFound`, `DimensionMismatch`.
    pub fn layer_stats(
        &self,
        lake_id: Uuid,
        dataset_version_id: Option<Uuid>,
        kind: LayerKind,
    ) -> Result<Arc<LayerStats>> {
        let Resolved { lake, dataset } = self.resolve(lake_id, dataset_version_id)?;
        let key = LayerKey {
            dataset: DatasetKey {
                lake_id,
                dataset_version_id: dataset.id,
            },
            kind,
        };
        read_through(self.stats_cache.as_ref(), key, || {
            let layer = self.layers.layer(dataset.id, kind)?;
            layer.check_shape(lake.grid.rows, lake.grid.cols)?;
            Ok(Arc::new(LayerStats {
                lake_id,
                dataset_version_id: dataset.id,
                layer_kind: kind,
                rows: lake.grid.rows,
                cols: lake.grid.cols,
                dtype: layer.dtype().to_string(),
                nodata: layer.nodata(),
                stats: constraint::layer_statistics(&layer),
            }))
        })
    }

    /// Rasterize a geometry onto the lake grid without constraint checks.
    ///
    /// # Errors
    /// `LakeNotFound`, `DatasetNotFound`, `UnsupportedOriginCorner`, or `Crs`
    /// for a bad grid CRS.
    pub fn rasterize(&self, lake_id: Uuid, request: &GeometryRequest) -> Result<RasterizeOutcome> {
        let Resolved { lake, dataset } = self.resolve(lake_id, request.dataset_version_id)?;
        let mask = match select(&lake.grid, request)? {
            Ok(mask) => mask,
            Err(rejection) => return Ok(RasterizeOutcome::Rejected(rejection)),
        };
        Ok(RasterizeOutcome::Rasterized(RasterizeResult {
            lake_id,
            dataset_version_id: dataset.id,
            rows: lake.grid.rows,
            cols: lake.grid.cols,
            encoding: ENCODING.to_string(),
            bit_order: BIT_ORDER.to_string(),
            cell_order: CELL_ORDER.to_string(),
            cell_count: mask.count(),
            selection_bitset_base64: Bitset::pack(&mask).encode(self.config.preview_compression_level)?,
        }))
    }

    /// Validate a drawn geometry against the water and inhabitants layers.
    ///
    /// # Errors
    /// Fatal conditions only: `LakeNotFound`, `DatasetNotFound`, `LayerNotFound`,
    /// `DimensionMismatch`, `UnsupportedOriginCorner`, `Crs` for a bad grid CRS.
    pub fn validate_geometry(&self, lake_id: Uuid, request: &GeometryRequest) -> Result<SelectionOutcome> {
        let Resolved { lake, dataset } = self.resolve(lake_id, request.dataset_version_id)?;
        let (rows, cols) = (lake.grid.rows, lake.grid.cols);
        let invalid = |errors: Vec<Rejection>, mask: Option<SelectionMask>, report: ConstraintReport| {
            SelectionOutcome::Invalid(InvalidSelection {
                lake_id,
                dataset_version_id: dataset.id,
                rows,
                cols,
                errors,
                mask,
                report,
            })
        };

        let mask = match select(&lake.grid, request)? {
            Ok(mask) => mask,
            Err(rejection) => {
                debug!(%lake_id, code = %rejection.code, "Geometry rejected");
                return Ok(invalid(vec![rejection], None, ConstraintReport::default()));
            }
        };

        if mask.is_empty() {
            let rejection = Rejection::new(
                ValidationCode::EmptySelection,
                "Geometry does not intersect the lake grid (0 selected cells).",
            );
            return Ok(invalid(vec![rejection], Some(mask), ConstraintReport::default()));
        }

        let water = self.layers.layer(dataset.id, LayerKind::Water)?;
        let inhabitants = self.layers.layer(dataset.id, LayerKind::Inhabitants)?;
        let report = constraint::evaluate(&mask, &[water.as_ref(), inhabitants.as_ref()])?;

        if !report.is_clear() {
            let errors = report
                .causes()
                .into_iter()
                .map(|code| Rejection::new(code, cause_message(code, &report.blocked_breakdown)))
                .collect();
            debug!(
                %lake_id,
                selected = report.selected_cells,
                blocked = report.blocked_cells,
                "Selection intersects blocked cells"
            );
            return Ok(invalid(errors, Some(mask), report));
        }

        Ok(SelectionOutcome::Valid(Selection {
            lake_id,
            dataset_version_id: dataset.id,
            rows,
            cols,
            bitset: Bitset::pack(&mask),
            mask,
            report,
        }))
    }
}

fn cause_message(code: ValidationCode, breakdown: &BlockedBreakdown) -> String {
    match code {
        ValidationCode::IntersectsWater => {
            format!("Selection intersects water in {} cells.", breakdown.water)
        }
        ValidationCode::IntersectsInhabitants => {
            format!("Selection intersects inhabited areas in {} cells.", breakdown.inhabitants)
        }
        ValidationCode::IntersectsNodata => {
            format!("Selection intersects no-data cells in {} cells.", breakdown.nodata)
        }
        other => other.to_string(),
    }
}

/// Parse, reproject and rasterize a request onto a grid.
///
/// The outer `Result` carries fatal grid problems; the inner one user errors.
fn select(grid: &GridSpec, request: &GeometryRequest) -> Result<std::result::Result<SelectionMask, Rejection>> {
    grid.geo_transform()?;
    let grid_epsg = parse_crs(&grid.crs)?;

    let geometry = match parse_geometry(&request.geometry) {
        Ok(g) => g,
        Err(rejection) => return Ok(Err(rejection)),
    };

    let reprojection_error =
        |e: LakeGridError| Rejection::new(ValidationCode::InvalidGeometry, format!("Reprojection error: {e}"));
    let projected = match parse_crs(&request.geometry_crs)
        .and_then(|source| Reprojector::from_epsg(source, grid_epsg))
        .and_then(|r| r.reproject(&geometry))
    {
        Ok(g) => g,
        Err(e) => {
            warn!(geometry_crs = %request.geometry_crs, grid_crs = %grid.crs, error = %e, "Reprojection failed");
            return Ok(Err(reprojection_error(e)));
        }
    };

    Ok(Ok(rasterize(&projected, grid, request.all_touched)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use crate::constraint::ConstraintLayer;
    use crate::source::MemoryLakeSource;
    use serde_json::json;

    struct Fixture {
        source: Arc<MemoryLakeSource>,
        service: LakeService,
        lake_id: Uuid,
        dataset_version_id: Uuid,
    }

    /// 10x10 unit grid in EPSG:3857 anchored at (0, 10).
    /// Water in row 0, inhabitants in (9, 9), nodata in (5, 0).
    fn fixture() -> Fixture {
        let source = Arc::new(MemoryLakeSource::new());
        let lake = LakeRecord::new("Test Lake", GridSpec::new(10, 10, 1.0, "EPSG:3857", 0.0, 10.0));
        let lake_id = lake.id;
        let dv = DatasetVersion::active(lake_id, "v1");
        let dataset_version_id = dv.id;
        source.insert_lake(lake);
        source.insert_dataset_version(dv);

        let mut water = vec![0.0; 100];
        water[..10].fill(1.0);
        water[50] = 255.0;
        let mut inh = vec![0.0; 100];
        inh[99] = 12.0;
        source.insert_layer(
            dataset_version_id,
            ConstraintLayer::new(LayerKind::Water, 10, 10, water).unwrap().with_nodata(255.0),
        );
        source.insert_layer(
            dataset_version_id,
            ConstraintLayer::new(LayerKind::Inhabitants, 10, 10, inh).unwrap(),
        );

        let service = LakeService::new(source.clone(), source.clone(), EngineConfig::default());
        Fixture {
            source,
            service,
            lake_id,
            dataset_version_id,
        }
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> JsonValue {
        json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]
        })
    }

    fn request(geometry: JsonValue) -> GeometryRequest {
        GeometryRequest::new(geometry).with_crs("EPSG:3857")
    }

    #[test]
    fn test_clear_selection_is_valid() {
        let f = fixture();
        let outcome = f.service.validate_geometry(f.lake_id, &request(square(2.0, 6.0, 4.0, 8.0))).unwrap();
        let SelectionOutcome::Valid(selection) = &outcome else {
            panic!("expected valid selection: {outcome:?}");
        };
        assert_eq!(selection.selected_cells(), 4);
        assert_eq!(selection.dataset_version_id, f.dataset_version_id);
        assert_eq!(selection.bitset.count_ones(), 4);

        let response = outcome.to_response(9).unwrap();
        assert!(response.ok);
        assert!(response.errors.is_empty());
        let decoded = response.selection_bitset_base64.unwrap().decode().unwrap();
        assert_eq!(decoded, selection.bitset);
    }

    #[test]
    fn test_water_intersection_keeps_preview() {
        let f = fixture();
        // Rows 0 and 1, cols 0..3
        let outcome = f.service.validate_geometry(f.lake_id, &request(square(0.0, 8.0, 3.0, 10.0))).unwrap();
        let SelectionOutcome::Invalid(inv) = &outcome else {
            panic!("expected invalid selection");
        };
        assert_eq!(inv.code(), Some(ValidationCode::IntersectsWater));
        assert_eq!(inv.report.selected_cells, 6);
        assert_eq!(inv.report.blocked_breakdown.water, 3);

        let response = outcome.to_response(9).unwrap();
        assert!(!response.ok);
        assert_eq!(response.blocked_cells, 3);
        assert!(response.selection_bitset_base64.is_some());
    }

    #[test]
    fn test_every_cause_is_reported_in_order() {
        let f = fixture();
        // Whole grid
        let outcome = f.service.validate_geometry(f.lake_id, &request(square(0.0, 0.0, 10.0, 10.0))).unwrap();
        let SelectionOutcome::Invalid(inv) = outcome else {
            panic!("expected invalid selection");
        };
        let codes: Vec<_> = inv.errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                ValidationCode::IntersectsWater,
                ValidationCode::IntersectsInhabitants,
                ValidationCode::IntersectsNodata
            ]
        );
        assert_eq!(inv.report.blocked_breakdown, BlockedBreakdown { water: 10, inhabitants: 1, nodata: 1 });
        assert_eq!(inv.report.blocked_cells, 12);
    }

    #[test]
    fn test_empty_selection() {
        let f = fixture();
        let outcome = f.service.validate_geometry(f.lake_id, &request(square(50.0, 50.0, 60.0, 60.0))).unwrap();
        let SelectionOutcome::Invalid(inv) = &outcome else {
            panic!("expected invalid selection");
        };
        assert_eq!(inv.code(), Some(ValidationCode::EmptySelection));
        let response = outcome.to_response(9).unwrap();
        assert_eq!(response.selected_cells, 0);
        assert!(response.selection_bitset_base64.is_none());
    }

    #[test]
    fn test_geometry_errors_are_outcomes() {
        let f = fixture();
        let point = request(json!({"type": "Point", "coordinates": [1, 1]}));
        let SelectionOutcome::Invalid(inv) = f.service.validate_geometry(f.lake_id, &point).unwrap() else {
            panic!("expected invalid selection");
        };
        assert_eq!(inv.code(), Some(ValidationCode::UnsupportedGeometry));
        assert!(inv.mask.is_none());

        let bad_crs = request(square(2.0, 6.0, 4.0, 8.0)).with_crs("EPSG:999999");
        let SelectionOutcome::Invalid(inv) = f.service.validate_geometry(f.lake_id, &bad_crs).unwrap() else {
            panic!("expected invalid selection");
        };
        assert_eq!(inv.code(), Some(ValidationCode::InvalidGeometry));
    }

    #[test]
    fn test_lon_lat_input_is_reprojected() {
        let f = fixture();
        // A few metres around the 3857 origin, drawn in degrees
        let geometry = square(0.000_018, 0.000_018, 0.000_036, 0.000_054);
        let outcome = f
            .service
            .validate_geometry(f.lake_id, &GeometryRequest::new(geometry))
            .unwrap();
        let SelectionOutcome::Valid(selection) = outcome else {
            panic!("expected valid selection");
        };
        // x in ~[2.0, 4.0] m, y in ~[2.0, 6.0] m: rows 4..=7, cols 2..=3
        assert_eq!(selection.selected_cells(), 8);
        assert!(selection.mask.get(7, 2) && selection.mask.get(4, 3));
    }

    #[test]
    fn test_missing_records_are_fatal() {
        let f = fixture();
        let req = request(square(2.0, 6.0, 4.0, 8.0));
        let err = f.service.validate_geometry(Uuid::new_v4(), &req).unwrap_err();
        assert_eq!(err.code(), "LAKE_NOT_FOUND");

        let req = req.with_dataset_version(Uuid::new_v4());
        let err = f.service.validate_geometry(f.lake_id, &req).unwrap_err();
        assert_eq!(err.code(), "DATASET_NOT_FOUND");
    }

    #[test]
    fn test_missing_layer_is_fatal() {
        let f = fixture();
        let dv = DatasetVersion::inactive(f.lake_id, "empty");
        let dv_id = dv.id;
        f.source.insert_dataset_version(dv);
        let req = request(square(2.0, 6.0, 4.0, 8.0)).with_dataset_version(dv_id);
        let err = f.service.validate_geometry(f.lake_id, &req).unwrap_err();
        assert_eq!(err.code(), "LAYER_NOT_FOUND");
    }

    #[test]
    fn test_layer_shape_mismatch_is_fatal() {
        let f = fixture();
        f.source.insert_layer(
            f.dataset_version_id,
            ConstraintLayer::new(LayerKind::Inhabitants, 9, 10, vec![0.0; 90]).unwrap(),
        );
        let err = f
            .service
            .validate_geometry(f.lake_id, &request(square(2.0, 6.0, 4.0, 8.0)))
            .unwrap_err();
        assert_eq!(err.code(), "DIMENSION_MISMATCH");
        assert_eq!(f.service.blocked_mask(f.lake_id, None).unwrap_err().code(), "DIMENSION_MISMATCH");
    }

    #[test]
    fn test_blocked_mask_is_cached() {
        let f = fixture();
        let first = f.service.blocked_mask(f.lake_id, None).unwrap();
        assert_eq!(first.blocked_count, 12);
        assert_eq!((first.water_count, first.inhabited_count, first.nodata_count), (10, 1, 1));
        assert_eq!(first.encoding, ENCODING);
        let mask = first.blocked_bitset_base64.decode().unwrap().unpack(10, 10).unwrap();
        assert!(mask.get(0, 9) && mask.get(9, 9) && mask.get(5, 0) && !mask.get(5, 5));

        let reads = f.source.layer_reads();
        let second = f.service.blocked_mask(f.lake_id, Some(f.dataset_version_id)).unwrap();
        assert_eq!(second, first);
        assert_eq!(f.source.layer_reads(), reads);

        f.service.clear_caches();
        f.service.blocked_mask(f.lake_id, None).unwrap();
        assert_eq!(f.source.layer_reads(), reads + 2);
    }

    #[test]
    fn test_no_cache_recomputes() {
        let f = fixture();
        let service = LakeService::new(f.source.clone(), f.source.clone(), EngineConfig::default())
            .with_caches(Arc::new(NoCache::new()), Arc::new(NoCache::new()));
        service.blocked_mask(f.lake_id, None).unwrap();
        service.blocked_mask(f.lake_id, None).unwrap();
        assert_eq!(f.source.layer_reads(), 4);
    }

    #[test]
    fn test_layer_stats() {
        let f = fixture();
        let stats = f.service.layer_stats(f.lake_id, None, LayerKind::Water).unwrap();
        assert_eq!(stats.layer_kind, LayerKind::Water);
        assert_eq!(stats.nodata, Some(255.0));
        assert_eq!(stats.stats.count(), 99);
        let err = f.service.layer_stats(f.lake_id, None, LayerKind::Ci).unwrap_err();
        assert_eq!(err.code(), "LAYER_NOT_FOUND");
    }

    #[test]
    fn test_rasterize_only() {
        let f = fixture();
        // Overlaps water, which rasterize does not care about
        let outcome = f.service.rasterize(f.lake_id, &request(square(0.0, 8.0, 3.0, 10.0))).unwrap();
        let RasterizeOutcome::Rasterized(result) = outcome else {
            panic!("expected rasterized geometry");
        };
        assert_eq!(result.cell_count, 6);
        let bits = result.selection_bitset_base64.decode().unwrap();
        assert_eq!(bits.len(), Bitset::byte_len(100));

        let outcome = f.service.rasterize(f.lake_id, &request(json!({"coordinates": []}))).unwrap();
        assert!(matches!(outcome, RasterizeOutcome::Rejected(r) if r.code == ValidationCode::InvalidGeojson));
    }

    #[test]
    fn test_grid_manifest() {
        let source = Arc::new(MemoryLakeSource::new());
        let lake = LakeRecord::new("UTM", GridSpec::new(100, 200, 30.0, "EPSG:32632", 500_000.0, 5_000_000.0));
        let lake_id = lake.id;
        source.insert_lake(lake);
        let service = LakeService::new(source.clone(), source, EngineConfig::default());

        let manifest = service.grid_manifest(lake_id).unwrap();
        assert_eq!(manifest.bbox_lake_crs, [500_000.0, 4_997_000.0, 506_000.0, 5_000_000.0]);
        let [[min_lat, min_lon], [max_lat, max_lon]] = manifest.leaflet_bounds;
        assert!((min_lon - 9.0).abs() < 1e-6);
        assert!(min_lat < max_lat && min_lon < max_lon);
        assert!(min_lat > 45.0 && max_lat < 45.2);
    }

    #[test]
    fn test_unsupported_origin_is_fatal() {
        let source = Arc::new(MemoryLakeSource::new());
        let mut grid = GridSpec::new(10, 10, 1.0, "EPSG:3857", 0.0, 10.0);
        grid.origin_corner = "center".to_string();
        let lake = LakeRecord::new("Odd", grid);
        let lake_id = lake.id;
        source.insert_lake(lake);
        source.insert_dataset_version(DatasetVersion::active(lake_id, "v1"));
        let service = LakeService::new(source.clone(), source, EngineConfig::default());

        let err = service
            .validate_geometry(lake_id, &request(square(2.0, 6.0, 4.0, 8.0)))
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ORIGIN_CORNER");
        assert!(service.grid_manifest(lake_id).is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: GeometryRequest = serde_json::from_value(json!({
            "geometry": {"type": "Polygon", "coordinates": []}
        }))
        .unwrap();
        assert_eq!(req.geometry_crs, DEFAULT_GEOMETRY_CRS);
        assert!(!req.all_touched);
        assert!(req.dataset_version_id.is_none());
    }
}
