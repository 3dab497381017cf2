//! Dataset inspection: what a file contains and how its columns resolve.

use std::path::Path;

use serde::Serialize;
use wealth_map_grid_models::GridField;
use wealth_map_spatial::Crs;
use wealth_map_spatial::crs::EPSG_WGS84;

use crate::load::{RawDataset, read_dataset};
use crate::schema::{ResolvedSchema, resolve_alias};
use crate::{PipelineConfig, PipelineError};

/// Summary of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetReport {
    pub name: String,
    pub features: usize,
    /// Features that carry a usable geometry.
    pub with_geometry: usize,
    /// Declared (or assumed) CRS, as `EPSG:<code>`.
    pub declared_crs: String,
    /// CRS after the coordinate-magnitude plausibility check.
    pub effective_crs: String,
    /// Normalized column names.
    pub columns: Vec<String>,
    /// Canonical field to source column, for every field that resolved.
    pub fields: Vec<(GridField, String)>,
    pub missing_fields: Vec<GridField>,
    pub cell_unit_key: Option<String>,
    pub avg_income: Option<String>,
    pub unit_key: Option<String>,
    pub unit_name: Option<String>,
}

/// Reads a dataset and reports how it resolves against the configured
/// schema, both as a grid file and as a boundary file.
///
/// # Errors
///
/// Returns any error from [`read_dataset`], or [`PipelineError::Spatial`]
/// if a configured fallback CRS is unsupported.
pub fn inspect_dataset(
    path: &Path,
    config: &PipelineConfig,
) -> Result<DatasetReport, PipelineError> {
    let fallback = Crs::from_epsg(config.data.grid_crs.unwrap_or(EPSG_WGS84))?;
    let projected_fallback = Crs::from_epsg(config.gravity.metric_epsg)?;
    let dataset = read_dataset(path, fallback)?;
    Ok(report(&dataset, config, projected_fallback))
}

/// Builds the report for an already loaded dataset.
#[must_use]
pub fn report(
    dataset: &RawDataset,
    config: &PipelineConfig,
    projected_fallback: Crs,
) -> DatasetReport {
    let schema = ResolvedSchema::resolve(&dataset.columns, &config.schema);
    let missing_fields = GridField::all()
        .iter()
        .copied()
        .filter(|f| schema.column(*f).is_none())
        .collect();

    DatasetReport {
        name: dataset.name.clone(),
        features: dataset.len(),
        with_geometry: dataset
            .features
            .iter()
            .filter(|f| f.geometry.is_some())
            .count(),
        declared_crs: dataset.crs.to_string(),
        effective_crs: dataset.effective_crs(projected_fallback).to_string(),
        columns: dataset.columns.iter().cloned().collect(),
        missing_fields,
        cell_unit_key: schema.cell_unit_key.clone(),
        avg_income: schema.avg_income.clone(),
        fields: schema.fields,
        unit_key: resolve_alias(&dataset.columns, &config.schema.unit_key),
        unit_name: resolve_alias(&dataset.columns, &config.schema.unit_name),
    }
}
