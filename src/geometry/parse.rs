//! GeoJSON geometry parsing.
//!
//! Accepts a GeoJSON *geometry* object (not a `Feature`) of type `Polygon` or
//! `MultiPolygon`. MultiPolygon is accepted because overlap and constraint checks
//! happen at cell level, so multiple parts never weaken any invariant.

use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value as JsonValue;

use super::validity;
use super::PolygonGeometry;
use crate::error::{Rejection, ValidationCode};

/// Parse and validate a GeoJSON geometry.
///
/// # Errors
/// - `INVALID_GEOJSON`: not an object, missing `type`, or malformed coordinates
/// - `UNSUPPORTED_GEOMETRY`: any type other than `Polygon` / `MultiPolygon`
/// - `INVALID_GEOMETRY`: empty, non-finite, or topologically invalid
pub fn parse_geometry(value: &JsonValue) -> Result<PolygonGeometry, Rejection> {
    let type_name = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| {
            Rejection::new(
                ValidationCode::InvalidGeojson,
                "Invalid GeoJSON geometry: missing 'type'.",
            )
        })?
        .to_string();

    let parsed = geojson::Geometry::try_from(value.clone()).map_err(|e| {
        Rejection::new(ValidationCode::InvalidGeojson, format!("GeoJSON parse error: {e}"))
    })?;

    let geometry = match &parsed.value {
        geojson::Value::Polygon(rings) => PolygonGeometry::Polygon(polygon_from_rings(rings)?),
        geojson::Value::MultiPolygon(parts) => {
            if parts.is_empty() {
                return Err(empty());
            }
            let polygons = parts
                .iter()
                .map(|rings| polygon_from_rings(rings))
                .collect::<Result<Vec<_>, _>>()?;
            PolygonGeometry::MultiPolygon(MultiPolygon::new(polygons))
        }
        _ => {
            return Err(Rejection::new(
                ValidationCode::UnsupportedGeometry,
                format!("Unsupported geometry type: {type_name}. Use Polygon/MultiPolygon."),
            ));
        }
    };

    validity::validate(&geometry).map_err(|reason| {
        Rejection::new(
            ValidationCode::InvalidGeometry,
            format!("Geometry is not valid: {reason}."),
        )
    })?;

    Ok(geometry)
}

fn empty() -> Rejection {
    Rejection::new(ValidationCode::InvalidGeometry, "Geometry is empty.")
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, Rejection> {
    let Some((exterior, interiors)) = rings.split_first() else {
        return Err(empty());
    };
    if exterior.is_empty() {
        return Err(empty());
    }
    let exterior = ring_from_positions(exterior)?;
    let interiors = interiors
        .iter()
        .map(|ring| ring_from_positions(ring))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring_from_positions(positions: &[Vec<f64>]) -> Result<LineString<f64>, Rejection> {
    positions
        .iter()
        .map(|position| match position.as_slice() {
            // Extra ordinates (elevation, measure) are ignored
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(Rejection::new(
                ValidationCode::InvalidGeojson,
                "GeoJSON parse error: position needs at least two ordinates",
            )),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}
