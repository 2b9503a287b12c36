//! Lake grid definition and in-memory selection masks.
//!
//! A lake grid is a fixed-resolution raster of square cells anchored at its
//! top-left corner in the lake's native CRS. Row 0 is the northernmost row and
//! column 0 the westernmost column.

use serde::{Deserialize, Serialize};

use crate::casting::{f64_to_cell_index, usize_to_f64};
use crate::error::{LakeGridError, Result};

/// The only supported `origin_corner` value.
pub const ORIGIN_TOP_LEFT: &str = "top_left";

/// Grid geometry bound to a lake / dataset snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    /// Cell edge length in grid CRS units (metres for projected CRSs)
    #[serde(alias = "cell_size_m")]
    pub cell_size: f64,
    /// CRS identifier, e.g. `EPSG:32632`
    pub crs: String,
    #[serde(default = "default_origin_corner")]
    pub origin_corner: String,
    pub origin_x: f64,
    pub origin_y: f64,
}

fn default_origin_corner() -> String {
    ORIGIN_TOP_LEFT.to_string()
}

impl GridSpec {
    /// Create a top-left anchored grid.
    pub fn new(
        rows: usize,
        cols: usize,
        cell_size: f64,
        crs: impl Into<String>,
        origin_x: f64,
        origin_y: f64,
    ) -> Self {
        Self {
            rows,
            cols,
            cell_size,
            crs: crs.into(),
            origin_corner: default_origin_corner(),
            origin_x,
            origin_y,
        }
    }

    /// Total number of cells.
    #[inline]
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Affine transform of this grid.
    ///
    /// # Errors
    /// `UnsupportedOriginCorner` for any origin other than `top_left`, `InvalidGrid`
    /// for zero dimensions or a non-positive / non-finite cell size.
    pub fn geo_transform(&self) -> Result<GeoTransform> {
        if self.origin_corner != ORIGIN_TOP_LEFT {
            return Err(LakeGridError::UnsupportedOriginCorner(self.origin_corner.clone()));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(LakeGridError::InvalidGrid(format!(
                "grid must have at least one row and column, got {}x{}",
                self.rows, self.cols
            )));
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(LakeGridError::InvalidGrid(format!(
                "cell size must be positive, got {}",
                self.cell_size
            )));
        }
        if !(self.origin_x.is_finite() && self.origin_y.is_finite()) {
            return Err(LakeGridError::InvalidGrid("origin must be finite".to_string()));
        }
        Ok(GeoTransform {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            cell_size: self.cell_size,
        })
    }

    /// Grid extent `(minx, miny, maxx, maxy)` in the grid CRS.
    ///
    /// # Errors
    /// Same conditions as [`GridSpec::geo_transform`].
    pub fn bbox(&self) -> Result<BoundingBox> {
        let transform = self.geo_transform()?;
        let (minx, maxy) = (transform.origin_x, transform.origin_y);
        let maxx = minx + usize_to_f64(self.cols) * transform.cell_size;
        let miny = maxy - usize_to_f64(self.rows) * transform.cell_size;
        Ok(BoundingBox::new(minx, miny, maxx, maxy))
    }

    /// `(row, col)` of the cell containing a grid-CRS coordinate, if any.
    ///
    /// # Errors
    /// Same conditions as [`GridSpec::geo_transform`].
    pub fn cell_at(&self, x: f64, y: f64) -> Result<Option<(usize, usize)>> {
        let (px, py) = self.geo_transform()?.world_to_pixel(x, y);
        Ok(f64_to_cell_index(py, self.rows).zip(f64_to_cell_index(px, self.cols)))
    }
}

/// North-up affine transform for a top-left anchored grid of square cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
}

impl GeoTransform {
    /// World coordinate to continuous pixel coordinate `(col, row)`.
    ///
    /// Cell `(r, c)` covers `[c, c + 1) x [r, r + 1)` in pixel space.
    #[inline]
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.cell_size,
            (self.origin_y - y) / self.cell_size,
        )
    }

    /// Continuous pixel coordinate `(col, row)` to world coordinate.
    #[inline]
    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.cell_size,
            self.origin_y - row * self.cell_size,
        )
    }
}

/// Bounding box in a coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// `[minx, miny, maxx, maxy]`
    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }
}

/// Boolean selection over a grid, row-major, `true` = selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionMask {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
}

impl SelectionMask {
    /// All-unselected mask of the given shape.
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![false; rows * cols],
        }
    }

    /// Mask from row-major cells.
    ///
    /// # Errors
    /// `InvalidGrid` if `cells.len() != rows * cols`.
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<bool>) -> Result<Self> {
        if cells.len() != rows * cols {
            return Err(LakeGridError::InvalidGrid(format!(
                "mask of {} cells cannot have shape {rows}x{cols}",
                cells.len()
            )));
        }
        Ok(Self { rows, cols, cells })
    }

    /// Mask from nested rows; every row must have the same length.
    ///
    /// # Errors
    /// `InvalidGrid` for ragged input.
    pub fn from_rows(rows: &[Vec<bool>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(LakeGridError::InvalidGrid("ragged mask rows".to_string()));
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            cells: rows.concat(),
        })
    }

    #[inline]
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row-major cells.
    #[inline]
    #[must_use]
    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    /// # Panics
    /// If `(row, col)` is outside the mask.
    #[inline]
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> bool {
        assert!(row < self.rows && col < self.cols, "cell ({row}, {col}) out of bounds");
        self.cells[row * self.cols + col]
    }

    /// # Panics
    /// If `(row, col)` is outside the mask.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        assert!(row < self.rows && col < self.cols, "cell ({row}, {col}) out of bounds");
        self.cells[row * self.cols + col] = value;
    }

    /// Select columns `cols` (half-open) of one row.
    #[inline]
    pub(crate) fn fill_row(&mut self, row: usize, cols: std::ops::Range<usize>) {
        let start = row * self.cols;
        self.cells[start + cols.start..start + cols.end].fill(true);
    }

    /// Number of selected cells.
    #[must_use]
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// True if no cell is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|&c| c)
    }

    /// Iterate `(row, col)` of selected cells in row-major order.
    pub fn selected(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let cols = self.cols;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c)
            .map(move |(i, _)| (i / cols, i % cols))
    }
}
