//! Geometry conversion, repair, and simplification helpers.

use geo::{
    BoundingRect as _, Centroid as _, Geometry, LineString, MultiPolygon, Point, Polygon, Rect,
    Simplify as _,
};
use rstar::AABB;

use crate::SpatialError;

/// Minimum number of coordinates in a closed, non-degenerate ring.
const MIN_RING_COORDS: usize = 4;

/// Converts a `GeoJSON` geometry into a [`geo::Geometry`].
///
/// Returns `None` for geometries `geo` cannot represent.
#[must_use]
pub fn from_geojson(geometry: geojson::Geometry) -> Option<Geometry<f64>> {
    geometry.try_into().ok()
}

/// Extracts a [`MultiPolygon`] from a `Polygon` or `MultiPolygon` geometry.
#[must_use]
pub fn to_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Repairs a boundary polygon for indexing.
///
/// Rings are closed, polygons whose exterior ring is degenerate are dropped,
/// and degenerate holes are removed. Returns `None` when nothing usable
/// remains.
#[must_use]
pub fn repair_multipolygon(mp: MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let polygons: Vec<Polygon<f64>> = mp
        .into_iter()
        .filter_map(|polygon| {
            let (exterior, interiors) = polygon.into_inner();
            let exterior = close_ring(exterior)?;
            let interiors = interiors.into_iter().filter_map(close_ring).collect();
            Some(Polygon::new(exterior, interiors))
        })
        .collect();

    if polygons.is_empty() {
        None
    } else {
        Some(MultiPolygon(polygons))
    }
}

fn close_ring(mut ring: LineString<f64>) -> Option<LineString<f64>> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return None;
    }
    ring.close();
    (ring.0.len() >= MIN_RING_COORDS).then_some(ring)
}

/// Representative point of a geometry (its centroid).
#[must_use]
pub fn centroid(geometry: &Geometry<f64>) -> Option<Point<f64>> {
    geometry.centroid()
}

/// Bounding rectangle of a set of geometries, if any has extent.
#[must_use]
pub fn combined_bounds<'a>(
    geometries: impl IntoIterator<Item = &'a Geometry<f64>>,
) -> Option<Rect<f64>> {
    geometries
        .into_iter()
        .filter_map(Geometry::bounding_rect)
        .reduce(|acc, rect| {
            Rect::new(
                geo::Coord {
                    x: acc.min().x.min(rect.min().x),
                    y: acc.min().y.min(rect.min().y),
                },
                geo::Coord {
                    x: acc.max().x.max(rect.max().x),
                    y: acc.max().y.max(rect.max().y),
                },
            )
        })
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
#[must_use]
pub fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

/// Simplifies a [`MultiPolygon`] with Ramer-Douglas-Peucker.
///
/// # Errors
///
/// Returns [`SpatialError::InvalidGeometry`] if the tolerance is not a
/// finite positive number or if simplification collapses any ring of the
/// input, in which case the caller should keep the original geometry.
pub fn simplify_multipolygon(
    mp: &MultiPolygon<f64>,
    tolerance: f64,
) -> Result<MultiPolygon<f64>, SpatialError> {
    if !tolerance.is_finite() || tolerance <= 0.0 {
        return Err(SpatialError::InvalidGeometry {
            message: format!("Invalid simplification tolerance {tolerance}"),
        });
    }

    let simplified = mp.simplify(tolerance);

    if simplified.0.len() != mp.0.len() {
        return Err(SpatialError::InvalidGeometry {
            message: "Simplification dropped polygons".to_string(),
        });
    }

    for polygon in &simplified {
        if polygon.exterior().0.len() < MIN_RING_COORDS {
            return Err(SpatialError::InvalidGeometry {
                message: "Simplification collapsed an exterior ring".to_string(),
            });
        }
    }

    Ok(simplified)
}

/// Total number of coordinates across all rings.
#[must_use]
pub fn vertex_count(mp: &MultiPolygon<f64>) -> usize {
    mp.iter()
        .map(|p| p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>())
        .sum()
}

#[cfg(test)]
mod tests {
    use geo::{Coord, polygon};

    use super::*;

    fn wiggly_square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 500.0, y: 1.0),
            (x: 1000.0, y: 0.0),
            (x: 1000.0, y: 1000.0),
            (x: 500.0, y: 999.0),
            (x: 0.0, y: 1000.0),
            (x: 0.0, y: 0.0),
        ]])
    }

    #[test]
    fn simplification_reduces_vertices() {
        let mp = wiggly_square();
        let simplified = simplify_multipolygon(&mp, 10.0).unwrap();
        assert!(vertex_count(&simplified) < vertex_count(&mp));
    }

    #[test]
    fn simplification_rejects_bad_tolerance() {
        let mp = wiggly_square();
        assert!(simplify_multipolygon(&mp, f64::NAN).is_err());
        assert!(simplify_multipolygon(&mp, 0.0).is_err());
    }

    #[test]
    fn repair_closes_open_rings_and_drops_degenerate_ones() {
        let open = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]),
            vec![LineString::from(vec![(0.2, 0.2), (0.3, 0.2)])],
        );
        let degenerate = Polygon::new(LineString::from(vec![(5.0, 5.0), (6.0, 6.0)]), vec![]);
        let repaired = repair_multipolygon(MultiPolygon(vec![open, degenerate])).unwrap();
        assert_eq!(repaired.0.len(), 1);
        assert!(repaired.0[0].exterior().is_closed());
        assert!(repaired.0[0].interiors().is_empty());
    }

    #[test]
    fn converts_geojson_polygon() {
        let json = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;
        let geojson: geojson::GeoJson = json.parse().unwrap();
        let geometry = geojson::Geometry::try_from(geojson).unwrap();
        let mp = to_multipolygon(from_geojson(geometry).unwrap()).unwrap();
        let c = centroid(&Geometry::MultiPolygon(mp)).unwrap();
        assert!((c.x() - 0.5).abs() < 1e-12);
        assert!((c.y() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn combines_bounds() {
        let a = Geometry::Point(Point::new(1.0, 2.0));
        let b = Geometry::Point(Point::new(-3.0, 5.0));
        let rect = combined_bounds([&a, &b]).unwrap();
        assert_eq!(rect.min(), Coord { x: -3.0, y: 2.0 });
        assert_eq!(rect.max(), Coord { x: 1.0, y: 5.0 });
    }
}
