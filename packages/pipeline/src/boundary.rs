//! Administrative boundaries.

use std::collections::BTreeMap;

use geo::{Centroid as _, Geometry, MultiPolygon, Point, Rect};
use wealth_map_spatial::{Crs, SpatialIndex, geometry};

use crate::PipelineError;
use crate::config::SchemaConfig;
use crate::load::RawDataset;
use crate::normalize::unit_key_from_value;
use crate::schema::resolve_alias;

/// One commune.
#[derive(Debug, Clone, PartialEq)]
pub struct AdministrativeUnit {
    pub key: String,
    pub name: Option<String>,
    /// Repaired boundary. `None` when the source geometry was missing or
    /// unusable; such units stay in the attribute tables but are never
    /// matched spatially.
    pub geometry: Option<MultiPolygon<f64>>,
}

impl AdministrativeUnit {
    /// Display name, falling back to the unit key.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    #[must_use]
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.as_ref().and_then(MultiPolygon::centroid)
    }
}

/// All administrative units of a run, keyed by unit code.
#[derive(Debug, Clone)]
pub struct BoundarySet {
    crs: Crs,
    key_column: String,
    name_column: Option<String>,
    units: BTreeMap<String, AdministrativeUnit>,
}

impl BoundarySet {
    /// Builds the unit table from the boundary dataset.
    ///
    /// Rows without a key are skipped. Rows sharing a key are merged: their
    /// polygons are combined and the first non-empty name is kept.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingColumn`] if none of the configured
    /// unit key aliases is present.
    pub fn from_dataset(
        dataset: &RawDataset,
        schema: &SchemaConfig,
        projected_fallback: Crs,
    ) -> Result<Self, PipelineError> {
        let key_column = resolve_alias(&dataset.columns, &schema.unit_key).ok_or_else(|| {
            PipelineError::MissingColumn {
                dataset: dataset.name.clone(),
                candidates: schema.unit_key.clone(),
            }
        })?;
        let name_column = resolve_alias(&dataset.columns, &schema.unit_name);
        if name_column.is_none() {
            log::warn!(
                "{}: no name column among {:?}, using unit keys as names",
                dataset.name,
                schema.unit_name
            );
        }

        let crs = dataset.effective_crs(projected_fallback);
        let mut units: BTreeMap<String, AdministrativeUnit> = BTreeMap::new();
        let mut keyless = 0_usize;
        let mut without_geometry = 0_usize;

        for feature in &dataset.features {
            let Some(key) = feature.properties.get(&key_column).and_then(unit_key_from_value)
            else {
                keyless += 1;
                continue;
            };
            let name = name_column
                .as_ref()
                .and_then(|column| feature.properties.get(column))
                .and_then(|value| match value {
                    serde_json::Value::String(s) if !s.trim().is_empty() => {
                        Some(s.trim().to_string())
                    }
                    _ => None,
                });
            let polygon = feature
                .geometry
                .clone()
                .and_then(geometry::to_multipolygon)
                .and_then(geometry::repair_multipolygon);
            if polygon.is_none() {
                without_geometry += 1;
            }

            let unit = units.entry(key.clone()).or_insert_with(|| AdministrativeUnit {
                key,
                name: None,
                geometry: None,
            });
            if unit.name.is_none() {
                unit.name = name;
            }
            if let Some(polygon) = polygon {
                match &mut unit.geometry {
                    Some(existing) => existing.0.extend(polygon.0),
                    None => unit.geometry = Some(polygon),
                }
            }
        }

        if keyless > 0 {
            log::warn!("{}: skipped {keyless} rows without a unit key", dataset.name);
        }
        if without_geometry > 0 {
            log::warn!(
                "{}: {without_geometry} rows have no usable polygon",
                dataset.name
            );
        }
        log::info!(
            "{}: {} administrative units keyed by '{key_column}' in {crs}",
            dataset.name,
            units.len()
        );

        Ok(Self {
            crs,
            key_column,
            name_column,
            units,
        })
    }

    /// Effective CRS of the unit geometries.
    #[must_use]
    pub const fn crs(&self) -> Crs {
        self.crs
    }

    #[must_use]
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    #[must_use]
    pub fn name_column(&self) -> Option<&str> {
        self.name_column.as_deref()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AdministrativeUnit> {
        self.units.get(key)
    }

    /// Units in key order.
    pub fn units(&self) -> impl Iterator<Item = &AdministrativeUnit> {
        self.units.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Builds an R-tree over the units that have geometry.
    #[must_use]
    pub fn spatial_index(&self) -> SpatialIndex {
        SpatialIndex::build(
            self.units
                .values()
                .filter_map(|u| u.geometry.clone().map(|g| (u.key.clone(), g))),
        )
    }

    /// Bounding rectangle of every unit geometry.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let geometries: Vec<Geometry<f64>> = self
            .units
            .values()
            .filter_map(|u| u.geometry.clone().map(Geometry::MultiPolygon))
            .collect();
        geometry::combined_bounds(&geometries)
    }
}
