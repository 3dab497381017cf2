#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index for administrative-unit attribution.
//!
//! Builds an R-tree over commune polygons and provides fast
//! point-in-polygon lookups for grid-cell centroids. Also hosts the
//! coordinate reference system registry ([`crs`]) and the geometry helpers
//! ([`geometry`]) shared by the aggregation pipeline.

pub mod crs;
pub mod geometry;

use geo::{Contains, Intersects, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};
use thiserror::Error;

pub use crs::{Crs, Reprojector};

/// Errors that can occur during spatial operations.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// The EPSG code is not in the supported registry.
    #[error("Unsupported CRS: EPSG:{epsg}")]
    UnsupportedCrs {
        /// The requested EPSG code.
        epsg: u32,
    },

    /// The CRS cannot be used to measure distances.
    #[error("EPSG:{epsg} does not preserve distances")]
    NotDistancePreserving {
        /// The requested EPSG code.
        epsg: u32,
    },

    /// A coordinate transformation failed.
    #[error("Projection error: {message}")]
    Projection {
        /// Description of what went wrong.
        message: String,
    },

    /// A geometry could not be used for the requested operation.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry {
        /// Description of what went wrong.
        message: String,
    },
}

/// A boundary polygon stored in the R-tree with its unit key.
struct BoundaryEntry {
    key: String,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over administrative-unit polygons.
///
/// Constructed once per run from the boundary dataset. All coordinates
/// must be expressed in the boundary dataset's CRS.
pub struct SpatialIndex {
    units: RTree<BoundaryEntry>,
}

impl SpatialIndex {
    /// Bulk-loads an R-tree from `(unit key, polygon)` pairs.
    ///
    /// Entries with an empty key or an empty polygon are skipped.
    #[must_use]
    pub fn build(boundaries: impl IntoIterator<Item = (String, MultiPolygon<f64>)>) -> Self {
        let entries: Vec<BoundaryEntry> = boundaries
            .into_iter()
            .filter(|(key, polygon)| !key.is_empty() && !polygon.0.is_empty())
            .map(|(key, polygon)| BoundaryEntry {
                envelope: geometry::compute_envelope(&polygon),
                key,
                polygon,
            })
            .collect();

        let units = RTree::bulk_load(entries);
        log::info!("Loaded {} administrative units into spatial index", units.size());

        Self { units }
    }

    /// Number of indexed polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.size()
    }

    /// Whether the index holds no polygons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.size() == 0
    }

    /// Look up the unit key whose polygon holds the point.
    ///
    /// A point strictly inside a polygon wins. A point lying exactly on a
    /// boundary shared by several units matches the unit with the
    /// lexicographically smallest key, so the result never depends on
    /// R-tree traversal order.
    #[must_use]
    pub fn lookup(&self, x: f64, y: f64) -> Option<&str> {
        let point = geo::Point::new(x, y);
        let query_env = AABB::from_point([x, y]);

        let mut interior: Option<&str> = None;
        let mut on_boundary: Option<&str> = None;

        for entry in self.units.locate_in_envelope_intersecting(&query_env) {
            if entry.polygon.contains(&point) {
                interior = Some(smallest_key(interior, &entry.key));
            } else if entry.polygon.intersects(&point) {
                on_boundary = Some(smallest_key(on_boundary, &entry.key));
            }
        }

        interior.or(on_boundary)
    }
}

fn smallest_key<'a>(current: Option<&'a str>, candidate: &'a str) -> &'a str {
    match current {
        Some(existing) if existing <= candidate => existing,
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    fn two_units() -> SpatialIndex {
        SpatialIndex::build(vec![
            ("01002".to_string(), square(1.0, 0.0, 1.0)),
            ("01001".to_string(), square(0.0, 0.0, 1.0)),
        ])
    }

    #[test]
    fn finds_containing_unit() {
        let index = two_units();
        assert_eq!(index.lookup(0.5, 0.5), Some("01001"));
        assert_eq!(index.lookup(1.5, 0.5), Some("01002"));
    }

    #[test]
    fn misses_point_outside_all_units() {
        let index = two_units();
        assert_eq!(index.lookup(5.0, 5.0), None);
        assert_eq!(index.lookup(-0.1, 0.5), None);
    }

    #[test]
    fn shared_edge_resolves_to_smallest_key() {
        let index = two_units();
        assert_eq!(index.lookup(1.0, 0.5), Some("01001"));
    }

    #[test]
    fn outer_edge_still_matches() {
        let index = two_units();
        assert_eq!(index.lookup(2.0, 0.5), Some("01002"));
    }

    #[test]
    fn skips_empty_entries() {
        let index = SpatialIndex::build(vec![
            (String::new(), square(0.0, 0.0, 1.0)),
            ("01003".to_string(), MultiPolygon(vec![])),
        ]);
        assert!(index.is_empty());
    }
}
