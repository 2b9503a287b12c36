//! CRS identifiers and reprojection using pure Rust (proj4rs + crs-definitions).
//!
//! Coordinates are always handled in `(x, y)` = `(longitude, latitude)` order for
//! geographic systems, whatever axis order the EPSG registry declares. This avoids
//! the classic lat/lon swap when clients send GeoJSON (which is always x/y).

use geo_types::Coord;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::PolygonGeometry;
use crate::error::{LakeGridError, Result};
use crate::grid::BoundingBox;

/// EPSG code of WGS84 longitude/latitude.
pub const WGS84: i32 = 4326;

/// Normalise a CRS identifier to an EPSG code.
///
/// Accepted forms: `EPSG:4326` (any case), `4326`, `urn:ogc:def:crs:EPSG::4326`,
/// and `CRS84` / `OGC:CRS84` (WGS84 in lon/lat order).
///
/// # Errors
/// `Crs` if the identifier is not one of the forms above or names a code
/// unknown to the crs-definitions database.
pub fn parse_crs(identifier: &str) -> Result<i32> {
    let trimmed = identifier.trim();
    let upper = trimmed.to_ascii_uppercase();

    if matches!(upper.as_str(), "CRS84" | "OGC:CRS84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84") {
        return Ok(WGS84);
    }

    let code_str = upper
        .strip_prefix("EPSG:")
        .or_else(|| upper.strip_prefix("URN:OGC:DEF:CRS:EPSG::"))
        .unwrap_or(&upper);

    let code: i32 = code_str
        .parse()
        .map_err(|_| LakeGridError::Crs(format!("Unrecognised CRS identifier '{trimmed}'")))?;

    if get_proj_string(code).is_none() {
        return Err(LakeGridError::Crs(format!(
            "EPSG:{code} is not in the crs-definitions database"
        )));
    }
    Ok(code)
}

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
#[must_use]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg).ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        // Fallback: assume 4326 and similar are geographic
        epsg == WGS84 || (4000..5000).contains(&epsg)
    }
}

/// Forward coordinate transform between two CRSs.
///
/// Built once per geometry so the PROJ definitions are parsed once, not per vertex.
/// Equal source and target codes short-circuit to the identity, which keeps
/// grid-native input bit-exact.
pub struct Reprojector {
    source_epsg: i32,
    target_epsg: i32,
    projs: Option<(Proj, Proj)>,
    /// True if source uses degrees (needs radian conversion)
    source_is_geographic: bool,
    /// True if target uses degrees (needs radian conversion)
    target_is_geographic: bool,
}

impl Reprojector {
    /// Create a reprojector from two CRS identifiers.
    ///
    /// # Errors
    /// `Crs` if either identifier is unrecognised or its definition cannot be parsed.
    pub fn new(source_crs: &str, target_crs: &str) -> Result<Self> {
        Self::from_epsg(parse_crs(source_crs)?, parse_crs(target_crs)?)
    }

    /// Create a reprojector from two EPSG codes.
    ///
    /// # Errors
    /// `Crs` if either code is not in the database or its definition cannot be parsed.
    pub fn from_epsg(source_epsg: i32, target_epsg: i32) -> Result<Self> {
        let projs = if source_epsg == target_epsg {
            None
        } else {
            Some((load_proj(source_epsg)?, load_proj(target_epsg)?))
        };
        Ok(Self {
            source_epsg,
            target_epsg,
            projs,
            source_is_geographic: is_geographic_crs(source_epsg),
            target_is_geographic: is_geographic_crs(target_epsg),
        })
    }

    #[inline]
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    #[must_use]
    pub fn source_epsg(&self) -> i32 {
        self.source_epsg
    }

    #[must_use]
    pub fn target_epsg(&self) -> i32 {
        self.target_epsg
    }

    /// Transform one `(x, y)` coordinate.
    ///
    /// # Errors
    /// `Crs` if the transform fails or yields a non-finite coordinate.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((source_proj, target_proj)) = &self.projs else {
            return Ok((x, y));
        };

        // proj4rs uses radians for geographic coordinates
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source_proj, target_proj, &mut point).map_err(|e| {
            LakeGridError::Crs(format!(
                "Transform from EPSG:{} to EPSG:{} failed at ({x}, {y}): {e:?}",
                self.source_epsg, self.target_epsg
            ))
        })?;

        let (out_x, out_y) = if self.target_is_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !(out_x.is_finite() && out_y.is_finite()) {
            return Err(LakeGridError::Crs(format!(
                "Transform from EPSG:{} to EPSG:{} produced a non-finite coordinate at ({x}, {y})",
                self.source_epsg, self.target_epsg
            )));
        }
        Ok((out_x, out_y))
    }

    /// Reproject every vertex of a geometry.
    ///
    /// # Errors
    /// `Crs` on the first vertex that fails to transform.
    pub fn reproject(&self, geometry: &PolygonGeometry) -> Result<PolygonGeometry> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|c| {
            let (x, y) = self.transform(c.x, c.y)?;
            Ok(Coord { x, y })
        })
    }
}

fn load_proj(epsg: i32) -> Result<Proj> {
    let proj_str = get_proj_string(epsg).ok_or_else(|| {
        LakeGridError::Crs(format!("EPSG:{epsg} is not in the crs-definitions database"))
    })?;
    Proj::from_proj_string(proj_str)
        .map_err(|e| LakeGridError::Crs(format!("Invalid projection EPSG:{epsg}: {e:?}")))
}

/// Project a point from one EPSG code to another.
///
/// # Errors
/// Returns an error if the EPSG code is not supported or the projection transformation fails.
#[inline]
pub fn project_point(source_epsg: i32, target_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
    // No-op if same CRS
    if source_epsg == target_epsg {
        return Ok((x, y));
    }
    Reprojector::from_epsg(source_epsg, target_epsg)?.transform(x, y)
}

/// Reproject a geometry between two CRS identifiers.
///
/// # Errors
/// `Crs` for unknown identifiers or failed transforms.
pub fn reproject_geometry(
    geometry: &PolygonGeometry,
    source_crs: &str,
    target_crs: &str,
) -> Result<PolygonGeometry> {
    Reprojector::new(source_crs, target_crs)?.reproject(geometry)
}

/// Transform a bounding box to WGS84 `(minlon, minlat, maxlon, maxlat)`.
///
/// Only the min and max corners are transformed, matching how lake bounds are
/// published to map clients.
///
/// # Errors
/// `Crs` for an unknown identifier or failed transform.
pub fn bbox_to_wgs84(bbox: &BoundingBox, source_crs: &str) -> Result<BoundingBox> {
    let reprojector = Reprojector::from_epsg(parse_crs(source_crs)?, WGS84)?;
    let (lon1, lat1) = reprojector.transform(bbox.minx, bbox.miny)?;
    let (lon2, lat2) = reprojector.transform(bbox.maxx, bbox.maxy)?;
    Ok(BoundingBox::new(
        lon1.min(lon2),
        lat1.min(lat2),
        lon1.max(lon2),
        lat1.max(lat2),
    ))
}
