//! Gravity-distance feature: planar distance from each unit's centroid to a
//! fixed landmark, measured in a metric CRS.

use std::collections::BTreeMap;

use geo::{Centroid as _, Coord, Distance as _, Euclidean, Point};
use wealth_map_spatial::{Crs, Reprojector};

use crate::PipelineError;
use crate::boundary::BoundarySet;
use crate::config::GravityConfig;

const METERS_PER_KILOMETER: f64 = 1000.0;

/// Distance in kilometers from every unit with geometry to the configured
/// landmark.
///
/// Unit polygons are reprojected from the boundary CRS into
/// `metric_epsg` before their centroid is taken. A unit that cannot be
/// reprojected is skipped with a warning.
///
/// # Errors
///
/// Returns [`PipelineError::Spatial`] if `metric_epsg` is unsupported or
/// does not preserve distances, or if the landmark cannot be projected.
pub fn gravity_distances(
    boundaries: &BoundarySet,
    config: &GravityConfig,
) -> Result<BTreeMap<String, f64>, PipelineError> {
    let metric = Crs::metric_from_epsg(config.metric_epsg)?;

    let landmark = Reprojector::new(Crs::Wgs84, metric)?.transform_coord(Coord {
        x: config.lon,
        y: config.lat,
    })?;
    let landmark = Point::from(landmark);
    log::info!(
        "Gravity reference {} at ({}, {}) projected to ({:.1}, {:.1}) in {metric}",
        config.name,
        config.lat,
        config.lon,
        landmark.x(),
        landmark.y()
    );

    let reprojector = Reprojector::new(boundaries.crs(), metric)?;
    let mut distances = BTreeMap::new();
    let mut failures = 0_usize;

    for unit in boundaries.units() {
        let Some(geometry) = &unit.geometry else {
            continue;
        };
        let centroid = match reprojector.transform_geometry(geometry) {
            Ok(projected) => projected.centroid(),
            Err(e) => {
                log::debug!("Unit {}: {e}", unit.key);
                failures += 1;
                continue;
            }
        };
        if let Some(centroid) = centroid {
            distances.insert(
                unit.key.clone(),
                Euclidean.distance(centroid, landmark) / METERS_PER_KILOMETER,
            );
        }
    }

    if failures > 0 {
        log::warn!("{failures} units could not be reprojected for gravity distances");
    }
    log::info!(
        "Computed gravity distances for {} of {} units",
        distances.len(),
        boundaries.len()
    );

    Ok(distances)
}
