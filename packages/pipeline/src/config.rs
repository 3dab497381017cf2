//! Pipeline configuration.
//!
//! Loaded from TOML. Every field has a default matching the published
//! 2015/2017/2019 1km grid files and the 2020 commune boundaries, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! Column aliases are explicit, ordered priority lists: the first alias
//! present in a dataset wins, and resolution happens once per dataset at
//! load time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Input file locations.
    pub data: DataConfig,
    /// Column alias lists.
    pub schema: SchemaConfig,
    /// Gravity-distance reference point.
    pub gravity: GravityConfig,
    /// Geometry simplification tolerances for the `geo` table.
    pub simplify: SimplifyConfig,
}

impl PipelineConfig {
    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingInput`] if the file does not exist,
    /// or a parse error if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::MissingInput {
                artifact: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        let config = parse_config_toml(&contents)?;
        log::info!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Path of the boundary dataset.
    #[must_use]
    pub fn communes_path(&self) -> PathBuf {
        self.data.data_dir.join(&self.data.communes)
    }

    /// Paths of the per-year grid datasets, keyed by survey year.
    #[must_use]
    pub fn year_paths(&self) -> BTreeMap<u16, PathBuf> {
        self.data
            .years
            .iter()
            .map(|y| (y.year, self.data.data_dir.join(&y.file)))
            .collect()
    }
}

/// Parses a [`PipelineConfig`] from a TOML string.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the TOML is malformed or contains
/// unknown keys.
pub fn parse_config_toml(toml_str: &str) -> Result<PipelineConfig, PipelineError> {
    Ok(toml::de::from_str(toml_str)?)
}

/// Input dataset locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Directory all file names are resolved against.
    pub data_dir: PathBuf,
    /// Grid dataset per survey year.
    pub years: Vec<YearFile>,
    /// Administrative boundary dataset file name.
    pub communes: String,
    /// EPSG code assumed for grid files that do not declare a CRS.
    pub grid_crs: Option<u32>,
    /// EPSG code assumed for the boundary file if it does not declare a CRS.
    pub communes_crs: Option<u32>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            years: vec![
                YearFile::new(2015, "Filosofi2015_carreaux_1000m_metropole.geojson"),
                YearFile::new(2017, "Filosofi2017_carreaux_1km_met.geojson"),
                YearFile::new(2019, "carreaux_1km_met.geojson"),
            ],
            communes: "communes2020.geojson".to_string(),
            grid_crs: None,
            communes_crs: None,
        }
    }
}

/// One survey year and its grid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YearFile {
    pub year: u16,
    pub file: String,
}

impl YearFile {
    #[must_use]
    pub fn new(year: u16, file: &str) -> Self {
        Self {
            year,
            file: file.to_string(),
        }
    }
}

/// Ordered alias lists used to resolve dataset columns into the canonical
/// schema. Aliases are compared after trim + lowercase normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    /// Unit identifier column in the boundary dataset.
    pub unit_key: Vec<String>,
    /// Unit display name column in the boundary dataset.
    pub unit_name: Vec<String>,
    /// Native unit identifier column in grid datasets. Years lacking it are
    /// attributed by spatial join.
    pub cell_unit_key: Vec<String>,
    /// Per-cell average income column, used when the income sum is absent.
    pub avg_income: Vec<String>,
    /// Extra aliases per canonical grid field, keyed by canonical column name
    /// (e.g. `men_pauv = ["nb_men_pauv"]`). The canonical name is always
    /// tried first.
    pub fields: BTreeMap<String, Vec<String>>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            unit_key: strings(&["insee", "insee_com", "code_insee", "com", "code"]),
            unit_name: strings(&["nom", "nom_com", "nom_comm", "libelle"]),
            cell_unit_key: strings(&["lcog_geo"]),
            avg_income: strings(&["avg_income"]),
            fields: BTreeMap::new(),
        }
    }
}

/// Reference landmark for the gravity-distance feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GravityConfig {
    /// Landmark name, used for logging.
    pub name: String,
    /// WGS84 latitude of the landmark.
    pub lat: f64,
    /// WGS84 longitude of the landmark.
    pub lon: f64,
    /// Metric, distance-preserving CRS the distance is measured in.
    pub metric_epsg: u32,
}

impl Default for GravityConfig {
    fn default() -> Self {
        Self {
            name: "Geneva".to_string(),
            lat: 46.2044,
            lon: 6.1432,
            metric_epsg: wealth_map_spatial::crs::EPSG_LAMBERT_93,
        }
    }
}

/// Simplification tolerances, in CRS units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimplifyConfig {
    /// Tolerance when the boundary CRS is in meters.
    pub meters_tolerance: f64,
    /// Tolerance when the boundary CRS is in degrees.
    pub degrees_tolerance: f64,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            meters_tolerance: 200.0,
            degrees_tolerance: 0.005,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}
