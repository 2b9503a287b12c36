//! Numeric casting between continuous pixel space and integer cell indices.
//!
//! # Assumptions
//!
//! ## Grid Dimensions (`usize` ↔ `f64`)
//! Row and column counts convert to `f64` without checks: `f64` represents every
//! integer up to 2^53 exactly and no lake grid approaches that.
//!
//! ## Pixel Coordinates (`f64` → `usize`)
//! Continuous pixel coordinates come from projected user geometry and may be
//! negative, far outside the grid, or (for degenerate transforms) NaN. Every
//! conversion to an index goes through one of the helpers below.

/// Convert a pixel coordinate to a cell index, returning `None` if outside `0..len`.
#[inline]
#[must_use]
pub fn f64_to_cell_index(value: f64, len: usize) -> Option<usize> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    // In range for the cast: non-negative and not NaN
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = value.floor() as usize;
    (index < len).then_some(index)
}

/// Clamp a pixel-space bound to `0..=len`, for use as a half-open range endpoint.
///
/// NaN and negative values clamp to `0`, values past the grid to `len`.
#[inline]
#[must_use]
pub fn f64_to_range_bound(value: f64, len: usize) -> usize {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    if value >= usize_to_f64(len) {
        return len;
    }
    // In range for the cast: 0 < value < len
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bound = value as usize;
    bound
}

/// Grid dimension as `f64`.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn usize_to_f64(value: usize) -> f64 {
    value as f64
}
