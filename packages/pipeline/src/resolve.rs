//! Geo-key resolver.
//!
//! Years that publish a native unit key keep it. Other years are attributed
//! by spatial join: each cell geometry is reprojected into the boundary CRS,
//! its centroid is located in the unit R-tree, and cells whose centroid
//! falls outside every unit are dropped and counted.

use std::cell::OnceCell;
use std::sync::Arc;

use serde::Serialize;
use wealth_map_grid_models::GridCell;
use wealth_map_spatial::{Reprojector, SpatialIndex, geometry};

use crate::boundary::BoundarySet;
use crate::normalize::{CellTable, NormalizedRow};
use crate::{PipelineError, ProgressCallback};

/// Outcome of attributing one year's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub year: u16,
    /// Whether the native unit key column was used instead of a spatial join.
    pub native_key: bool,
    pub matched: usize,
    /// Cells that could not be attributed to any unit.
    pub dropped: usize,
}

/// Attributes cells to administrative units.
///
/// The R-tree is only built the first time a year needs a spatial join.
pub struct GeoKeyResolver<'a> {
    boundaries: &'a BoundarySet,
    index: OnceCell<SpatialIndex>,
}

impl<'a> GeoKeyResolver<'a> {
    #[must_use]
    pub const fn new(boundaries: &'a BoundarySet) -> Self {
        Self {
            boundaries,
            index: OnceCell::new(),
        }
    }

    /// Resolves one year's cells.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Spatial`] if no transformation exists between
    /// the grid CRS and the boundary CRS.
    pub fn resolve(
        &self,
        table: CellTable,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<(Vec<GridCell>, ResolveReport), PipelineError> {
        if table.has_native_key() {
            return Ok(resolve_native(table));
        }
        let index = self.index.get_or_init(|| self.boundaries.spatial_index());
        resolve_spatial(table, self.boundaries, index, progress)
    }
}

/// Resolves one year's cells, building a fresh index when a spatial join is
/// needed.
///
/// # Errors
///
/// See [`GeoKeyResolver::resolve`].
pub fn resolve_geo_keys(
    table: CellTable,
    boundaries: &BoundarySet,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<(Vec<GridCell>, ResolveReport), PipelineError> {
    GeoKeyResolver::new(boundaries).resolve(table, progress)
}

fn resolve_native(table: CellTable) -> (Vec<GridCell>, ResolveReport) {
    let year = table.year;
    let total = table.rows.len();
    let cells: Vec<GridCell> = table
        .rows
        .into_iter()
        .filter_map(|row| {
            row.unit_key.map(|unit_key| GridCell {
                year,
                unit_key,
                counts: row.counts,
            })
        })
        .collect();

    let report = ResolveReport {
        year,
        native_key: true,
        matched: cells.len(),
        dropped: total - cells.len(),
    };
    log::info!(
        "{year}: {} cells keyed by native unit code, {} without a code dropped",
        report.matched,
        report.dropped
    );
    (cells, report)
}

fn resolve_spatial(
    table: CellTable,
    boundaries: &BoundarySet,
    index: &SpatialIndex,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<(Vec<GridCell>, ResolveReport), PipelineError> {
    let year = table.year;
    let reprojector = Reprojector::new(table.crs, boundaries.crs())?;
    if !reprojector.is_identity() {
        log::info!(
            "{year}: reprojecting cells from {} to {}",
            reprojector.source(),
            reprojector.target()
        );
    }

    progress.set_message(format!("Spatial join {year}"));
    progress.set_total(table.rows.len() as u64);
    progress.set_position(0);

    let mut cells = Vec::with_capacity(table.rows.len());
    let mut dropped = 0_usize;
    let mut projection_failures = 0_usize;

    for NormalizedRow {
        counts, geometry, ..
    } in table.rows
    {
        progress.inc(1);

        let Some(geometry) = geometry else {
            dropped += 1;
            continue;
        };
        let geometry = match reprojector.transform_geometry(&geometry) {
            Ok(g) => g,
            Err(e) => {
                log::debug!("{year}: {e}");
                projection_failures += 1;
                dropped += 1;
                continue;
            }
        };
        let unit_key = geometry::centroid(&geometry).and_then(|c| index.lookup(c.x(), c.y()));

        match unit_key {
            Some(unit_key) => cells.push(GridCell {
                year,
                unit_key: unit_key.to_string(),
                counts,
            }),
            None => dropped += 1,
        }
    }

    if projection_failures > 0 {
        log::warn!("{year}: {projection_failures} cells could not be reprojected");
    }

    let report = ResolveReport {
        year,
        native_key: false,
        matched: cells.len(),
        dropped,
    };
    log::info!(
        "{year}: spatial join matched {} cells, dropped {} outside every unit",
        report.matched,
        report.dropped
    );

    Ok((cells, report))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wealth_map_grid_models::GridField;
    use wealth_map_spatial::Crs;

    use super::*;
    use crate::config::SchemaConfig;
    use crate::load::{DatasetFormat, parse_dataset};
    use crate::normalize::normalize_tiles;
    use crate::null_progress;

    fn square(x0: f64, y0: f64, size: f64) -> serde_json::Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]]]
        })
    }

    fn boundaries() -> BoundarySet {
        let collection = json!({
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "EPSG:2154"}},
            "features": [
                {"type": "Feature", "properties": {"insee": "01001"}, "geometry": square(0.0, 0.0, 2000.0)},
                {"type": "Feature", "properties": {"insee": "01002"}, "geometry": square(2000.0, 0.0, 2000.0)},
            ]
        });
        let dataset = parse_dataset(
            "communes",
            &collection.to_string(),
            DatasetFormat::Collection,
            Crs::Wgs84,
        )
        .unwrap();
        BoundarySet::from_dataset(&dataset, &SchemaConfig::default(), Crs::Lambert93).unwrap()
    }

    fn table(features: &serde_json::Value) -> CellTable {
        let collection = json!({
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "EPSG:2154"}},
            "features": features
        });
        let dataset = parse_dataset(
            "grid",
            &collection.to_string(),
            DatasetFormat::Collection,
            Crs::Wgs84,
        )
        .unwrap();
        normalize_tiles(dataset, 2019, &SchemaConfig::default(), Crs::Lambert93)
    }

    #[test]
    fn spatial_join_attributes_and_drops() {
        let boundaries = boundaries();
        let cells = table(&json!([
            {"type": "Feature", "properties": {"ind": 10}, "geometry": square(0.0, 0.0, 1000.0)},
            {"type": "Feature", "properties": {"ind": 20}, "geometry": square(3000.0, 1000.0, 1000.0)},
            {"type": "Feature", "properties": {"ind": 30}, "geometry": square(9000.0, 9000.0, 1000.0)},
            {"type": "Feature", "properties": {"ind": 40}, "geometry": null},
        ]));

        let (resolved, report) = resolve_geo_keys(cells, &boundaries, &null_progress()).unwrap();

        assert!(!report.native_key);
        assert_eq!(report.matched, 2);
        assert_eq!(report.dropped, 2);
        assert_eq!(resolved[0].unit_key, "01001");
        assert_eq!(resolved[1].unit_key, "01002");
        assert!((resolved[1].counts.get(GridField::Population) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn centroid_on_shared_edge_is_deterministic() {
        let boundaries = boundaries();
        let cells = table(&json!([
            {"type": "Feature", "properties": {"ind": 1}, "geometry": square(1500.0, 500.0, 1000.0)},
        ]));
        let (resolved, report) = resolve_geo_keys(cells, &boundaries, &null_progress()).unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(resolved[0].unit_key, "01001");
    }

    #[test]
    fn native_key_skips_spatial_join() {
        let boundaries = boundaries();
        let cells = table(&json!([
            {"type": "Feature", "properties": {"ind": 5, "lcog_geo": "01002"}, "geometry": null},
            {"type": "Feature", "properties": {"ind": 5, "lcog_geo": ""}, "geometry": square(0.0, 0.0, 1000.0)},
        ]));

        let resolver = GeoKeyResolver::new(&boundaries);
        let (resolved, report) = resolver.resolve(cells, &null_progress()).unwrap();

        assert!(report.native_key);
        assert_eq!(report.matched, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(resolved[0].unit_key, "01002");
        assert!(resolver.index.get().is_none());
    }
}
