//! Polygon rasterization onto a lake grid.
//!
//! Works in continuous pixel space, where cell `(r, c)` is the unit square
//! `[c, c + 1] x [r, r + 1]` and row 0 is the top of the grid.
//!
//! ## Default mode
//! A cell is selected when its centre lies inside the geometry (even-odd rule
//! over every ring of every part). Centres exactly on a left or top edge count
//! as inside, centres on a right or bottom edge do not, so two polygons sharing
//! an edge never both claim a cell.
//!
//! ## All-touched mode
//! The default selection plus every cell whose closed square is touched by a
//! boundary segment. A boundary running exactly along a grid line touches the
//! cells on both sides of it, so a grid-aligned rectangle also claims the ring
//! of cells around it.

use std::ops::Range;

use geo_types::Coord;

use crate::casting::{f64_to_range_bound, usize_to_f64};
use crate::error::Result;
use crate::geometry::PolygonGeometry;
use crate::grid::{GeoTransform, GridSpec, SelectionMask};

/// Rasterize a geometry already expressed in the grid CRS.
///
/// # Errors
/// Any error from [`GridSpec::geo_transform`], notably `UnsupportedOriginCorner`.
pub fn rasterize(
    geometry: &PolygonGeometry,
    grid: &GridSpec,
    all_touched: bool,
) -> Result<SelectionMask> {
    let transform = grid.geo_transform()?;
    let mut mask = SelectionMask::new(grid.rows, grid.cols);

    let edges = pixel_edges(geometry, &transform);
    if edges.is_empty() {
        return Ok(mask);
    }

    fill_centres(&edges, &mut mask);
    if all_touched {
        mark_touched(&edges, &mut mask);
    }
    Ok(mask)
}

/// Ring segments of every part, in pixel coordinates.
fn pixel_edges(geometry: &PolygonGeometry, transform: &GeoTransform) -> Vec<(Coord<f64>, Coord<f64>)> {
    let to_pixel = |c: &Coord<f64>| {
        let (x, y) = transform.world_to_pixel(c.x, c.y);
        Coord { x, y }
    };
    geometry
        .rings()
        .flat_map(|ring| {
            ring.0
                .windows(2)
                .map(move |w| (to_pixel(&w[0]), to_pixel(&w[1])))
        })
        .filter(|(a, b)| a != b)
        .collect()
}

/// Even-odd scanline fill sampled at cell centres.
fn fill_centres(edges: &[(Coord<f64>, Coord<f64>)], mask: &mut SelectionMask) {
    let (rows, cols) = mask.shape();
    let (min_y, max_y) = edges.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (a, b)| {
        (lo.min(a.y).min(b.y), hi.max(a.y).max(b.y))
    });
    // Centre y = r + 0.5 must fall in [min_y, max_y)
    let row_range = f64_to_range_bound((min_y - 0.5).ceil(), rows)
        ..f64_to_range_bound((max_y - 0.5).ceil(), rows);

    let mut crossings: Vec<f64> = Vec::new();
    for row in row_range {
        let y = usize_to_f64(row) + 0.5;
        crossings.clear();
        for (a, b) in edges {
            // Half-open in y so shared vertices are counted once
            if (a.y <= y && y < b.y) || (b.y <= y && y < a.y) {
                crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let span = centre_span(pair[0], pair[1], cols);
            if !span.is_empty() {
                mask.fill_row(row, span);
            }
        }
    }
}

/// Columns whose centre `c + 0.5` lies in `[xa, xb)`.
#[inline]
fn centre_span(xa: f64, xb: f64, cols: usize) -> Range<usize> {
    f64_to_range_bound((xa - 0.5).ceil(), cols)..f64_to_range_bound((xb - 0.5).ceil(), cols)
}

/// Mark every cell whose closed square `[c, c + 1] x [r, r + 1]` a segment touches.
fn mark_touched(edges: &[(Coord<f64>, Coord<f64>)], mask: &mut SelectionMask) {
    let (rows, cols) = mask.shape();
    for (a, b) in edges {
        let (y_lo, y_hi) = (a.y.min(b.y), a.y.max(b.y));
        // Bands r with r <= y_hi and r + 1 >= y_lo
        let row_range =
            f64_to_range_bound(y_lo.ceil() - 1.0, rows)..f64_to_range_bound(y_hi.floor() + 1.0, rows);
        for row in row_range {
            let band_lo = usize_to_f64(row);
            let (x_lo, x_hi) = clip_to_band(*a, *b, band_lo, band_lo + 1.0);
            // Columns c with c <= x_hi and c + 1 >= x_lo
            let span =
                f64_to_range_bound(x_lo.ceil() - 1.0, cols)..f64_to_range_bound(x_hi.floor() + 1.0, cols);
            if !span.is_empty() {
                mask.fill_row(row, span);
            }
        }
    }
}

/// x-extent of the part of segment `a-b` inside the horizontal band `[lo, hi]`.
fn clip_to_band(a: Coord<f64>, b: Coord<f64>, lo: f64, hi: f64) -> (f64, f64) {
    if a.y == b.y {
        return (a.x.min(b.x), a.x.max(b.x));
    }
    let x_at = |y: f64| {
        let t = ((y - a.y) / (b.y - a.y)).clamp(0.0, 1.0);
        a.x + t * (b.x - a.x)
    };
    let (x1, x2) = (x_at(lo), x_at(hi));
    (x1.min(x2), x1.max(x2))
}
