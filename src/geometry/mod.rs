//! Polygonal geometry accepted by the selection engine.
//!
//! - [`parse`]: GeoJSON geometry payload → [`PolygonGeometry`]
//! - [`validity`]: explicit topological validity checks
//! - [`projection`]: CRS identifiers and reprojection into the grid CRS

pub mod parse;
pub mod projection;
pub mod validity;

use geo::BoundingRect;
use geo_types::{Coord, LineString, MultiPolygon, Polygon, Rect};

/// A validated `Polygon` or `MultiPolygon`.
///
/// This is the only geometry shape the engine works with; every other GeoJSON
/// type is rejected at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonGeometry {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl PolygonGeometry {
    /// GeoJSON type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// The polygon parts (one for `Polygon`).
    #[must_use]
    pub fn polygons(&self) -> &[Polygon<f64>] {
        match self {
            Self::Polygon(p) => std::slice::from_ref(p),
            Self::MultiPolygon(mp) => &mp.0,
        }
    }

    /// Iterate every ring (exteriors and holes) of every part.
    pub fn rings(&self) -> impl Iterator<Item = &LineString<f64>> {
        self.polygons()
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
    }

    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Self::Polygon(p) => p.bounding_rect(),
            Self::MultiPolygon(mp) => mp.bounding_rect(),
        }
    }

    /// Apply a fallible transform to every vertex, keeping the variant.
    ///
    /// # Errors
    /// The first error returned by `f`.
    pub fn try_map_coords<E>(
        &self,
        mut f: impl FnMut(Coord<f64>) -> Result<Coord<f64>, E>,
    ) -> Result<Self, E> {
        Ok(match self {
            Self::Polygon(p) => Self::Polygon(map_polygon(p, &mut f)?),
            Self::MultiPolygon(mp) => Self::MultiPolygon(MultiPolygon::new(
                mp.0.iter()
                    .map(|p| map_polygon(p, &mut f))
                    .collect::<Result<Vec<_>, E>>()?,
            )),
        })
    }
}

fn map_polygon<E>(
    polygon: &Polygon<f64>,
    f: &mut impl FnMut(Coord<f64>) -> Result<Coord<f64>, E>,
) -> Result<Polygon<f64>, E> {
    let mut map_ring = |ring: &LineString<f64>| -> Result<LineString<f64>, E> {
        ring.coords()
            .map(|c| f(*c))
            .collect::<Result<Vec<_>, E>>()
            .map(LineString::new)
    };
    let exterior = map_ring(polygon.exterior())?;
    let interiors = polygon
        .interiors()
        .iter()
        .map(&mut map_ring)
        .collect::<Result<Vec<_>, E>>()?;
    Ok(Polygon::new(exterior, interiors))
}
