//! Constraint layers and selection evaluation.
//!
//! A constraint layer is a numeric raster with exactly the grid's shape. Cells
//! equal to the layer's no-data sentinel are invalid and always block; valid
//! cells block according to the layer kind:
//!
//! | kind | blocks when |
//! |---|---|
//! | `water` | value ≠ 0 |
//! | `inhabitants` | value > 0 |
//! | `ci` | never |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::casting::usize_to_f64;
use crate::error::{LakeGridError, Result, ValidationCode};
use crate::grid::SelectionMask;

/// Semantic kind of a constraint layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Water,
    Inhabitants,
    /// Continuous coefficient, informational only
    Ci,
}

impl LayerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Inhabitants => "inhabitants",
            Self::Ci => "ci",
        }
    }

    /// Kinds that take part in blocking.
    pub const BLOCKING: [Self; 2] = [Self::Water, Self::Inhabitants];
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "water" => Ok(Self::Water),
            "inhabitants" => Ok(Self::Inhabitants),
            "ci" => Ok(Self::Ci),
            other => Err(format!("unknown layer kind '{other}'")),
        }
    }
}

/// A row-major numeric raster aligned with a lake grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintLayer {
    kind: LayerKind,
    rows: usize,
    cols: usize,
    values: Vec<f64>,
    nodata: Option<f64>,
    dtype: String,
}

impl ConstraintLayer {
    /// # Errors
    /// `InvalidGrid` if `values.len() != rows * cols`.
    pub fn new(kind: LayerKind, rows: usize, cols: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(LakeGridError::InvalidGrid(format!(
                "layer '{kind}' has {} values, expected {rows}x{cols}",
                values.len()
            )));
        }
        Ok(Self {
            kind,
            rows,
            cols,
            values,
            nodata: None,
            dtype: "float64".to_string(),
        })
    }

    /// Layer from nested rows.
    ///
    /// # Errors
    /// `InvalidGrid` for ragged input.
    pub fn from_rows(kind: LayerKind, rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(LakeGridError::InvalidGrid(format!("layer '{kind}' has ragged rows")));
        }
        Self::new(kind, rows.len(), cols, rows.concat())
    }

    #[must_use]
    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Storage type reported in statistics (e.g. `uint8`, `float32`).
    #[must_use]
    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = dtype.into();
        self
    }

    #[must_use]
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    #[must_use]
    pub fn dtype(&self) -> &str {
        &self.dtype
    }

    /// True unless cell `i` holds the no-data sentinel. A NaN sentinel matches NaN.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, i: usize) -> bool {
        let v = self.values[i];
        match self.nodata {
            None => true,
            Some(nd) if nd.is_nan() => !v.is_nan(),
            Some(nd) => v != nd,
        }
    }

    /// True if a valid cell `i` blocks for this layer's kind.
    #[inline]
    fn blocks(&self, i: usize) -> bool {
        let v = self.values[i];
        match self.kind {
            LayerKind::Water => v != 0.0,
            LayerKind::Inhabitants => v > 0.0,
            LayerKind::Ci => false,
        }
    }

    /// # Errors
    /// `DimensionMismatch` if the layer is not `rows x cols`.
    pub fn check_shape(&self, rows: usize, cols: usize) -> Result<()> {
        if (self.rows, self.cols) == (rows, cols) {
            return Ok(());
        }
        warn!(
            layer = %self.kind,
            rows, cols,
            actual_rows = self.rows,
            actual_cols = self.cols,
            "constraint layer does not match grid"
        );
        Err(LakeGridError::DimensionMismatch {
            kind: self.kind.to_string(),
            rows,
            cols,
            actual_rows: self.rows,
            actual_cols: self.cols,
        })
    }
}

/// Blocking causes of one cell across a set of layers.
#[derive(Debug, Clone, Copy, Default)]
struct CellHits {
    water: bool,
    inhabitants: bool,
    nodata: bool,
}

impl CellHits {
    fn classify(layers: &[&ConstraintLayer], i: usize) -> Self {
        let mut hits = Self::default();
        for layer in layers.iter().filter(|l| l.kind != LayerKind::Ci) {
            if !layer.is_valid(i) {
                hits.nodata = true;
            } else if layer.blocks(i) {
                match layer.kind {
                    LayerKind::Water => hits.water = true,
                    LayerKind::Inhabitants => hits.inhabitants = true,
                    LayerKind::Ci => {}
                }
            }
        }
        hits
    }

    fn any(self) -> bool {
        self.water || self.inhabitants || self.nodata
    }
}

/// Per-cause counts of blocked selected cells. One cell may count under several causes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedBreakdown {
    pub water: usize,
    pub inhabitants: usize,
    pub nodata: usize,
}

/// Outcome of evaluating a selection against constraint layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintReport {
    pub selected_cells: usize,
    /// Selected cells with at least one blocking cause
    pub blocked_cells: usize,
    pub blocked_breakdown: BlockedBreakdown,
}

impl ConstraintReport {
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.blocked_cells == 0
    }

    /// Cause codes for every non-zero breakdown entry, in the order water, inhabitants, nodata.
    #[must_use]
    pub fn causes(&self) -> Vec<ValidationCode> {
        let b = &self.blocked_breakdown;
        [
            (b.water, ValidationCode::IntersectsWater),
            (b.inhabitants, ValidationCode::IntersectsInhabitants),
            (b.nodata, ValidationCode::IntersectsNodata),
        ]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(_, code)| code)
        .collect()
    }
}

/// Evaluate a selection against constraint layers.
///
/// # Errors
/// `DimensionMismatch` if any layer's shape differs from the mask's.
pub fn evaluate(mask: &SelectionMask, layers: &[&ConstraintLayer]) -> Result<ConstraintReport> {
    let (rows, cols) = mask.shape();
    for layer in layers {
        layer.check_shape(rows, cols)?;
    }

    let mut report = ConstraintReport::default();
    for (i, _) in mask.cells().iter().enumerate().filter(|(_, c)| **c) {
        report.selected_cells += 1;
        let hits = CellHits::classify(layers, i);
        let b = &mut report.blocked_breakdown;
        b.water += usize::from(hits.water);
        b.inhabitants += usize::from(hits.inhabitants);
        b.nodata += usize::from(hits.nodata);
        report.blocked_cells += usize::from(hits.any());
    }
    Ok(report)
}

/// Every blocked cell of a grid, with per-cause totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedCells {
    pub mask: SelectionMask,
    pub water_count: usize,
    pub inhabited_count: usize,
    pub nodata_count: usize,
}

impl BlockedCells {
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.mask.count()
    }
}

/// Compute the blocked mask `water ∪ inhabitants ∪ nodata` of a grid.
///
/// # Errors
/// `DimensionMismatch` if any layer's shape differs from `rows x cols`.
pub fn blocked_cells(rows: usize, cols: usize, layers: &[&ConstraintLayer]) -> Result<BlockedCells> {
    for layer in layers {
        layer.check_shape(rows, cols)?;
    }
    let mut water_count = 0;
    let mut inhabited_count = 0;
    let mut nodata_count = 0;
    let cells = (0..rows * cols)
        .map(|i| {
            let hits = CellHits::classify(layers, i);
            water_count += usize::from(hits.water);
            inhabited_count += usize::from(hits.inhabitants);
            nodata_count += usize::from(hits.nodata);
            hits.any()
        })
        .collect();
    Ok(BlockedCells {
        mask: SelectionMask::from_cells(rows, cols, cells)?,
        water_count,
        inhabited_count,
        nodata_count,
    })
}

/// Summary statistics of one layer over its valid cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerStatistics {
    Inhabitants {
        count: usize,
        min: f64,
        max: f64,
        p50: f64,
        p95: f64,
        inhabited_cells: usize,
        inhabited_fraction: f64,
        total_inhabitants: f64,
    },
    Ci {
        count: usize,
        min: f64,
        max: f64,
        p50: f64,
        p95: f64,
    },
    Water {
        count: usize,
        water_count: usize,
        water_fraction: f64,
    },
    /// No valid cells
    Empty { count: usize },
}

impl LayerStatistics {
    /// Number of valid cells.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Inhabitants { count, .. }
            | Self::Ci { count, .. }
            | Self::Water { count, .. }
            | Self::Empty { count } => *count,
        }
    }
}

/// Compute statistics for a layer, ignoring no-data cells.
#[must_use]
pub fn layer_statistics(layer: &ConstraintLayer) -> LayerStatistics {
    let mut valid: Vec<f64> = (0..layer.values.len())
        .filter(|&i| layer.is_valid(i))
        .map(|i| layer.values[i])
        .collect();
    if valid.is_empty() {
        return LayerStatistics::Empty { count: 0 };
    }

    let total = usize_to_f64(layer.rows * layer.cols);
    let count = valid.len();

    match layer.kind {
        LayerKind::Water => {
            let water_count = valid.iter().filter(|&&v| v != 0.0).count();
            let water_fraction = usize_to_f64(water_count) / total;
            LayerStatistics::Water { count, water_count, water_fraction }
        }
        LayerKind::Inhabitants => {
            let inhabited_cells = valid.iter().filter(|&&v| v > 0.0).count();
            let total_inhabitants = valid.iter().map(|v| v.max(0.0)).sum();
            valid.sort_by(f64::total_cmp);
            let inhabited_fraction = usize_to_f64(inhabited_cells) / total;
            LayerStatistics::Inhabitants {
                count,
                min: valid[0],
                max: valid[count - 1],
                p50: percentile(&valid, 50.0),
                p95: percentile(&valid, 95.0),
                inhabited_cells,
                inhabited_fraction,
                total_inhabitants,
            }
        }
        LayerKind::Ci => {
            valid.sort_by(f64::total_cmp);
            LayerStatistics::Ci {
                count,
                min: valid[0],
                max: valid[count - 1],
                p50: percentile(&valid, 50.0),
                p95: percentile(&valid, 95.0),
            }
        }
    }
}

/// Percentile of sorted, non-empty data with linear interpolation between closest ranks.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * usize_to_f64(sorted.len() - 1);
    let lo = rank.floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (i, j) = (lo as usize, rank.ceil() as usize);
    sorted[i] + (sorted[j] - sorted[i]) * (rank - lo)
}
