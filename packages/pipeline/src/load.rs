//! Raw dataset loading.
//!
//! Datasets are `GeoJSON`, either one `FeatureCollection` or one feature per
//! line. Property keys are normalized (trim + lowercase) as they are read so
//! every later lookup works on canonical names.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead as _;
use std::path::Path;

use geo::Geometry;
use geojson::GeoJson;
use serde_json::Value;
use wealth_map_spatial::crs::{self, Crs};
use wealth_map_spatial::geometry;

use crate::{PipelineConfig, PipelineError};

/// One row of a raw dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    /// Properties keyed by normalized column name.
    pub properties: BTreeMap<String, Value>,
    pub geometry: Option<Geometry<f64>>,
}

/// A tabular dataset with per-row geometry.
#[derive(Debug, Clone)]
pub struct RawDataset {
    /// File name or label, used in logs and errors.
    pub name: String,
    /// CRS declared by the file, or the configured fallback.
    pub crs: Crs,
    /// Every normalized column name seen on any row.
    pub columns: BTreeSet<String>,
    pub features: Vec<RawFeature>,
}

impl RawDataset {
    /// The declared CRS corrected by a plausibility check on coordinate
    /// magnitudes: data advertised as degrees whose coordinates exceed the
    /// longitude/latitude range is taken to be in `projected_fallback`.
    #[must_use]
    pub fn effective_crs(&self, projected_fallback: Crs) -> Crs {
        let bounds =
            geometry::combined_bounds(self.features.iter().filter_map(|f| f.geometry.as_ref()));
        crs::effective_crs(self.crs, bounds.as_ref(), projected_fallback)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// All inputs of one pipeline run.
#[derive(Debug, Clone)]
pub struct RawInputs {
    /// Grid dataset per survey year.
    pub years: BTreeMap<u16, RawDataset>,
    /// Administrative boundary dataset.
    pub communes: RawDataset,
}

/// Encoding of a `GeoJSON` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// A single `FeatureCollection` document.
    Collection,
    /// One feature per line (`GeoJSONSeq` / newline-delimited).
    Sequence,
}

impl DatasetFormat {
    /// Picks the encoding from the file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("geojsonseq" | "geojsonl" | "ndjson" | "jsonl") => Self::Sequence,
            _ => Self::Collection,
        }
    }
}

/// Normalizes a column name: surrounding whitespace removed, lowercased.
#[must_use]
pub fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Loads every configured dataset.
///
/// A survey year whose file is missing is skipped with a warning.
///
/// # Errors
///
/// * [`PipelineError::MissingInput`] if the boundary file does not exist
/// * [`PipelineError::NoData`] if no survey year could be loaded
/// * parse errors from [`read_dataset`]
pub fn load_inputs(config: &PipelineConfig) -> Result<RawInputs, PipelineError> {
    let communes_path = config.communes_path();
    if !communes_path.exists() {
        return Err(PipelineError::MissingInput {
            artifact: communes_path.display().to_string(),
        });
    }
    let communes_fallback = Crs::from_epsg(config.data.communes_crs.unwrap_or(crs::EPSG_WGS84))?;
    let grid_fallback = Crs::from_epsg(config.data.grid_crs.unwrap_or(crs::EPSG_WGS84))?;

    let mut years = BTreeMap::new();
    for (year, path) in config.year_paths() {
        if !path.exists() {
            log::warn!("Skipping {year}: {} does not exist", path.display());
            continue;
        }
        let dataset = read_dataset(&path, grid_fallback)?;
        log::info!(
            "Loaded {year} grid: {} cells, {} columns, {}",
            dataset.len(),
            dataset.columns.len(),
            dataset.crs
        );
        years.insert(year, dataset);
    }

    if years.is_empty() {
        return Err(PipelineError::NoData);
    }

    let communes = read_dataset(&communes_path, communes_fallback)?;
    log::info!(
        "Loaded boundaries: {} units, {}",
        communes.len(),
        communes.crs
    );

    Ok(RawInputs { years, communes })
}

/// Reads one dataset from disk.
///
/// # Errors
///
/// * [`PipelineError::MissingInput`] if the file does not exist
/// * [`PipelineError::Io`] if it cannot be read
/// * [`PipelineError::GeoJson`] if it is not valid `GeoJSON`
/// * [`PipelineError::Spatial`] if it declares an unsupported CRS
pub fn read_dataset(path: &Path, fallback_crs: Crs) -> Result<RawDataset, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            artifact: path.display().to_string(),
        });
    }

    let name = path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    );

    match DatasetFormat::from_path(path) {
        DatasetFormat::Collection => {
            let contents = std::fs::read_to_string(path)?;
            parse_collection(&name, &contents, fallback_crs)
        }
        DatasetFormat::Sequence => {
            let reader = std::io::BufReader::new(std::fs::File::open(path)?);
            let mut builder = DatasetBuilder::new(name, fallback_crs);
            for line in reader.lines() {
                builder.push_line(&line?)?;
            }
            Ok(builder.finish())
        }
    }
}

/// Parses a dataset held in memory.
///
/// # Errors
///
/// Returns [`PipelineError::GeoJson`] if the text is not valid `GeoJSON`, or
/// [`PipelineError::Spatial`] if it declares an unsupported CRS.
pub fn parse_dataset(
    name: &str,
    contents: &str,
    format: DatasetFormat,
    fallback_crs: Crs,
) -> Result<RawDataset, PipelineError> {
    match format {
        DatasetFormat::Collection => parse_collection(name, contents, fallback_crs),
        DatasetFormat::Sequence => {
            let mut builder = DatasetBuilder::new(name.to_string(), fallback_crs);
            for line in contents.lines() {
                builder.push_line(line)?;
            }
            Ok(builder.finish())
        }
    }
}

fn parse_collection(
    name: &str,
    contents: &str,
    fallback_crs: Crs,
) -> Result<RawDataset, PipelineError> {
    let geojson: GeoJson = contents.parse().map_err(|source| PipelineError::GeoJson {
        path: name.to_string(),
        source,
    })?;

    let mut builder = DatasetBuilder::new(name.to_string(), fallback_crs);
    match geojson {
        GeoJson::FeatureCollection(collection) => {
            if let Some(epsg) = collection
                .foreign_members
                .as_ref()
                .and_then(|members| members.get("crs"))
                .and_then(declared_epsg)
            {
                builder.crs = Crs::from_epsg(epsg)?;
            }
            for feature in collection.features {
                builder.push(feature);
            }
        }
        GeoJson::Feature(feature) => builder.push(feature),
        GeoJson::Geometry(geometry) => builder.push(geojson::Feature::from(geometry)),
    }
    Ok(builder.finish())
}

/// Reads the EPSG code from a legacy `crs` member, either
/// `{"type": "name", "properties": {"name": "..."}}` or a bare string.
fn declared_epsg(crs: &Value) -> Option<u32> {
    let name = match crs {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("properties")?.get("name")?.as_str()?,
        _ => return None,
    };
    Crs::parse_epsg_name(name)
}

struct DatasetBuilder {
    name: String,
    crs: Crs,
    columns: BTreeSet<String>,
    features: Vec<RawFeature>,
    invalid_geometries: usize,
}

impl DatasetBuilder {
    const fn new(name: String, crs: Crs) -> Self {
        Self {
            name,
            crs,
            columns: BTreeSet::new(),
            features: Vec::new(),
            invalid_geometries: 0,
        }
    }

    fn push_line(&mut self, line: &str) -> Result<(), PipelineError> {
        // RFC 8142 record separators
        let line = line.trim_start_matches('\u{1e}').trim();
        if line.is_empty() {
            return Ok(());
        }
        let geojson: GeoJson = line.parse().map_err(|source| PipelineError::GeoJson {
            path: self.name.clone(),
            source,
        })?;
        let feature =
            geojson::Feature::try_from(geojson).map_err(|source| PipelineError::GeoJson {
                path: self.name.clone(),
                source,
            })?;
        self.push(feature);
        Ok(())
    }

    fn push(&mut self, feature: geojson::Feature) {
        let properties: BTreeMap<String, Value> = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (normalize_column(&k), v))
            .collect();
        self.columns.extend(properties.keys().cloned());

        let had_geometry = feature.geometry.is_some();
        let geometry = feature.geometry.and_then(geometry::from_geojson);
        if had_geometry && geometry.is_none() {
            self.invalid_geometries += 1;
        }

        self.features.push(RawFeature {
            properties,
            geometry,
        });
    }

    fn finish(self) -> RawDataset {
        if self.invalid_geometries > 0 {
            log::warn!(
                "{}: {} features have geometry that could not be converted",
                self.name,
                self.invalid_geometries
            );
        }
        log::debug!(
            "{}: parsed {} features with columns {:?}",
            self.name,
            self.features.len(),
            self.columns
        );
        RawDataset {
            name: self.name,
            crs: self.crs,
            columns: self.columns,
            features: self.features,
        }
    }
}
