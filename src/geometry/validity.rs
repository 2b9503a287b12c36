//! Topological validity checks for polygonal geometry.
//!
//! Successful parsing says nothing about validity, so every parsed geometry goes
//! through [`validate`]. The rules follow the OGC simple-features model:
//!
//! - every ring has at least three distinct vertices and finite coordinates
//! - exterior rings enclose a non-zero area
//! - rings do not self-intersect
//! - rings of one polygon touch at isolated points at most, holes lie in the shell
//! - holes are not nested inside other holes
//! - parts of a multipolygon have disjoint interiors
//!
//! Segment tests are quadratic in vertex count, which is fine for hand-drawn
//! selection polygons.

use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Contains, Intersects};
use geo_types::{Coord, Line, LineString, Point, Polygon};

use super::PolygonGeometry;

/// Check a geometry, returning a short reason on failure.
///
/// # Errors
/// A human-readable reason for the first violated rule.
pub fn validate(geometry: &PolygonGeometry) -> Result<(), String> {
    let polygons = geometry.polygons();
    if polygons.is_empty() {
        return Err("empty geometry".to_string());
    }
    for polygon in polygons {
        validate_polygon(polygon)?;
    }
    for (i, a) in polygons.iter().enumerate() {
        for b in &polygons[i + 1..] {
            if parts_overlap(a, b) {
                return Err("multipolygon parts overlap".to_string());
            }
        }
    }
    Ok(())
}

fn validate_polygon(polygon: &Polygon<f64>) -> Result<(), String> {
    let rings: Vec<Vec<Line<f64>>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_segments)
        .collect::<Result<_, _>>()?;

    for segments in &rings {
        if ring_self_intersects(segments) {
            return Err("ring self-intersection".to_string());
        }
    }

    let shell = Polygon::new(polygon.exterior().clone(), vec![]);
    if shell.unsigned_area() <= 0.0 {
        return Err("zero-area exterior ring".to_string());
    }

    for (i, a) in rings.iter().enumerate() {
        for b in &rings[i + 1..] {
            if rings_cross(a, b) {
                return Err("rings cross or share an edge".to_string());
            }
        }
    }

    for hole in polygon.interiors() {
        if hole.coords().any(|c| !shell.intersects(&Point::from(*c))) {
            return Err("hole lies outside the exterior ring".to_string());
        }
    }

    let holes: Vec<Polygon<f64>> = polygon
        .interiors()
        .iter()
        .map(|ring| Polygon::new(ring.clone(), vec![]))
        .collect();
    for (i, a) in holes.iter().enumerate() {
        for b in &holes[i + 1..] {
            if ring_inside(a, b) || ring_inside(b, a) {
                return Err("holes are nested".to_string());
            }
        }
    }
    Ok(())
}

/// Some vertex of `inner`'s ring lies strictly inside `outer`.
fn ring_inside(outer: &Polygon<f64>, inner: &Polygon<f64>) -> bool {
    inner.exterior().coords().any(|c| outer.contains(&Point::from(*c)))
}

/// Segments of a closed ring with consecutive duplicate vertices collapsed.
fn ring_segments(ring: &LineString<f64>) -> Result<Vec<Line<f64>>, String> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for c in ring.coords() {
        if !(c.x.is_finite() && c.y.is_finite()) {
            return Err("non-finite coordinate".to_string());
        }
        if coords.last() != Some(c) {
            coords.push(*c);
        }
    }
    if coords.first() != coords.last() {
        return Err("ring is not closed".to_string());
    }
    // Closed ring: n distinct vertices plus the repeated first one
    if coords.len() < 4 {
        return Err("ring has fewer than three distinct vertices".to_string());
    }
    Ok(coords.windows(2).map(|w| Line::new(w[0], w[1])).collect())
}

fn ring_self_intersects(segments: &[Line<f64>]) -> bool {
    let n = segments.len();
    for i in 0..n {
        for j in i + 1..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                // Neighbours always share their common vertex
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => return true,
            }
        }
    }
    false
}

fn rings_cross(a: &[Line<f64>], b: &[Line<f64>]) -> bool {
    a.iter().any(|sa| {
        b.iter().any(|sb| {
            matches!(
                line_intersection(*sa, *sb),
                Some(LineIntersection::SinglePoint { is_proper: true, .. })
                    | Some(LineIntersection::Collinear { .. })
            )
        })
    })
}

fn parts_overlap(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    let edges = |p: &Polygon<f64>| -> Vec<Line<f64>> { p.exterior().lines().collect() };
    if rings_cross(&edges(a), &edges(b)) {
        return true;
    }
    b.exterior().coords().any(|c| a.contains(&Point::from(*c)))
        || a.exterior().coords().any(|c| b.contains(&Point::from(*c)))
}
