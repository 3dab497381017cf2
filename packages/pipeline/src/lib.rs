#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregation and indicator-derivation pipeline for gridded household
//! survey data.
//!
//! A run is a pure function from the configured input files to a set of
//! output tables:
//!
//! 1. [`load`] reads the per-year grid datasets and the boundary dataset.
//! 2. [`normalize`] coerces the known numeric fields of each year.
//! 3. [`resolve`] attributes every cell to an administrative unit, by native
//!    key when the year carries one and by spatial join otherwise.
//! 4. [`aggregate`] sums cells per (year, unit) and per year, and
//!    [`indicators`] re-derives every ratio from the sums.
//! 5. [`gravity`] adds the distance from each unit to a reference point.
//! 6. [`tables`] assembles the `timeseries`, `by_region`, `geo`, and
//!    `raw_grouped` outputs.
//!
//! Nothing is cached here; memoization belongs to the caller.

pub mod aggregate;
pub mod boundary;
pub mod config;
pub mod gravity;
pub mod indicators;
pub mod inspect;
pub mod load;
pub mod normalize;
pub mod progress;
pub mod resolve;
pub mod schema;
pub mod tables;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use wealth_map_grid_models::FieldPresence;
use wealth_map_spatial::{Crs, SpatialError};

pub use config::{PipelineConfig, parse_config_toml};
pub use indicators::{DEFAULT_FILL, safe_divide, safe_divide_slice};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use tables::PipelineTables;

/// Errors that abort a pipeline run.
///
/// Per-row data-quality problems (unattributable cells, degenerate
/// denominators, failed simplification) are absorbed and never surface
/// here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input file does not exist.
    #[error("Missing input: {artifact}")]
    MissingInput {
        /// Path of the missing file.
        artifact: String,
    },

    /// None of the accepted aliases of a required column is present.
    #[error("Dataset {dataset} has none of the columns {candidates:?}")]
    MissingColumn {
        /// Name of the dataset that was probed.
        dataset: String,
        /// Accepted aliases, in priority order.
        candidates: Vec<String>,
    },

    /// No survey year could be loaded.
    #[error("No grid dataset could be loaded for any configured year")]
    NoData,

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A dataset is not valid `GeoJSON`.
    #[error("Invalid GeoJSON in {path}: {source}")]
    GeoJson {
        /// Dataset path or name.
        path: String,
        /// Underlying parse error.
        #[source]
        source: geojson::Error,
    },

    /// A JSON error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be parsed.
    #[error(transparent)]
    Config(#[from] toml::de::Error),

    /// A CRS or geometry operation failed.
    #[error(transparent)]
    Spatial(#[from] SpatialError),
}

/// Loads the configured inputs and runs the whole pipeline.
///
/// # Errors
///
/// Returns an error if an input file or a required column is missing, if a
/// dataset cannot be parsed, or if a CRS is unsupported.
pub fn run(
    config: &PipelineConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PipelineTables, PipelineError> {
    let inputs = load::load_inputs(config)?;
    run_with_inputs(inputs, config, progress)
}

/// Runs the pipeline on already-loaded inputs.
///
/// # Errors
///
/// Returns an error if the boundary dataset has no unit identifier column,
/// if a CRS is unsupported, or if `gravity.metric_epsg` does not preserve
/// distances.
pub fn run_with_inputs(
    inputs: load::RawInputs,
    config: &PipelineConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PipelineTables, PipelineError> {
    if inputs.years.is_empty() {
        return Err(PipelineError::NoData);
    }

    let projected_fallback = Crs::metric_from_epsg(config.gravity.metric_epsg)?;
    let boundaries =
        boundary::BoundarySet::from_dataset(&inputs.communes, &config.schema, projected_fallback)?;
    drop(inputs.communes);

    let resolver = resolve::GeoKeyResolver::new(&boundaries);
    let mut presence: BTreeMap<u16, FieldPresence> = BTreeMap::new();
    let mut cells = Vec::new();
    let mut reports = Vec::new();

    for (year, dataset) in inputs.years {
        progress.set_message(format!("Normalizing {year}"));
        let table = normalize::normalize_tiles(dataset, year, &config.schema, projected_fallback);
        presence.insert(year, table.presence.clone());

        let (year_cells, report) = resolver.resolve(table, progress)?;
        cells.extend(year_cells);
        reports.push(report);
    }

    progress.set_message("Aggregating".to_string());
    let mut units = aggregate::aggregate_units(&cells, &presence);
    let national = aggregate::aggregate_national(&cells, &presence);
    drop(cells);

    progress.set_message("Computing gravity distances".to_string());
    let distances = gravity::gravity_distances(&boundaries, &config.gravity)?;
    aggregate::attach_gravity(&mut units, &distances);

    progress.set_message("Building tables".to_string());
    let tables = tables::build_tables(units, national, &boundaries, &config.simplify, reports);
    progress.finish(format!(
        "Built {} unit-year rows across {} years",
        tables.by_region.len(),
        tables.timeseries.len()
    ));

    Ok(tables)
}
