//! Table builder.
//!
//! Assembles the presentation-facing outputs from the aggregated records:
//! the national `timeseries`, the named `by_region` panel, the latest-year
//! `geo` snapshot with simplified boundaries, and `raw_grouped`.

use geo::MultiPolygon;
use serde::Serialize;
use wealth_map_grid_models::{Indicator, NamedUnitYear, NationalYearRecord, UnitYearRecord};
use wealth_map_spatial::{Crs, geometry};

use crate::boundary::BoundarySet;
use crate::config::SimplifyConfig;
use crate::resolve::ResolveReport;

/// One unit of the latest-year snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoUnit {
    pub record: NamedUnitYear,
    /// Boundary in the snapshot CRS, simplified unless simplification
    /// failed for this unit.
    pub geometry: MultiPolygon<f64>,
    pub simplified: bool,
}

/// Latest-year units joined with their boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoSnapshot {
    /// CRS of every geometry in the snapshot (the boundary dataset's).
    pub crs: Crs,
    /// The snapshot year, `None` when no unit-year row exists.
    pub year: Option<u16>,
    pub units: Vec<GeoUnit>,
}

/// Every output of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineTables {
    /// One national row per year.
    pub timeseries: Vec<NationalYearRecord>,
    /// Unit-year rows for units present in the boundary dataset, with names.
    pub by_region: Vec<NamedUnitYear>,
    pub geo: GeoSnapshot,
    /// Every unit-year row, before the boundary join.
    pub raw_grouped: Vec<UnitYearRecord>,
    /// Geo-key resolution outcome per year.
    pub resolve_reports: Vec<ResolveReport>,
}

/// Simplification tolerance for a CRS: degree-based systems need a
/// tolerance several orders of magnitude smaller than metric ones.
#[must_use]
pub const fn simplification_tolerance(crs: Crs, config: &SimplifyConfig) -> f64 {
    if crs.is_geographic() {
        config.degrees_tolerance
    } else {
        config.meters_tolerance
    }
}

/// Builds the output tables.
#[must_use]
pub fn build_tables(
    units: Vec<UnitYearRecord>,
    national: Vec<NationalYearRecord>,
    boundaries: &BoundarySet,
    simplify: &SimplifyConfig,
    resolve_reports: Vec<ResolveReport>,
) -> PipelineTables {
    let by_region: Vec<NamedUnitYear> = units
        .iter()
        .filter_map(|record| {
            boundaries.get(&record.unit_key).map(|unit| NamedUnitYear {
                name: unit.display_name().to_string(),
                record: record.clone(),
            })
        })
        .collect();

    let unmatched = units.len() - by_region.len();
    if unmatched > 0 {
        log::warn!(
            "{unmatched} unit-year rows have a unit key absent from the boundary dataset and are left out of by_region"
        );
    }

    let geo = build_geo(&by_region, boundaries, simplify);

    log::info!(
        "Built tables: {} timeseries rows, {} by_region rows, {} geo units",
        national.len(),
        by_region.len(),
        geo.units.len()
    );

    PipelineTables {
        timeseries: national,
        by_region,
        geo,
        raw_grouped: units,
        resolve_reports,
    }
}

fn build_geo(
    by_region: &[NamedUnitYear],
    boundaries: &BoundarySet,
    simplify: &SimplifyConfig,
) -> GeoSnapshot {
    let crs = boundaries.crs();
    let year = by_region.iter().map(|r| r.record.year).max();
    let Some(latest) = year else {
        return GeoSnapshot {
            crs,
            year,
            units: Vec::new(),
        };
    };

    let tolerance = simplification_tolerance(crs, simplify);
    let mut failures = 0_usize;

    let units: Vec<GeoUnit> = by_region
        .iter()
        .filter(|r| r.record.year == latest)
        .filter_map(|r| {
            let original = boundaries.get(&r.record.unit_key)?.geometry.as_ref()?;
            let (geometry, simplified) =
                match geometry::simplify_multipolygon(original, tolerance) {
                    Ok(simplified) => (simplified, true),
                    Err(e) => {
                        log::warn!(
                            "Keeping original geometry for {}: {e}",
                            r.record.unit_key
                        );
                        failures += 1;
                        (original.clone(), false)
                    }
                };
            Some(GeoUnit {
                record: r.clone(),
                geometry,
                simplified,
            })
        })
        .collect();

    log::info!(
        "Simplified {} geo units for {latest} with tolerance {tolerance} ({failures} kept original)",
        units.len() - failures
    );

    GeoSnapshot {
        crs,
        year,
        units,
    }
}

/// One row of a commune comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub name: String,
    pub unit_key: String,
    pub year: u16,
    /// One value per column of [`ComparisonTable::indicators`]; `None`
    /// when the indicator was not computed for that year.
    pub values: Vec<Option<f64>>,
}

/// Selected indicators for selected communes, across years.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonTable {
    pub indicators: Vec<Indicator>,
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Extracts the requested indicators for the named communes.
///
/// A commune matches by display name or unit key. Indicators not computed
/// for any matching row are left out of the table. An empty name list
/// yields an empty table.
#[must_use]
pub fn commune_comparison<S: AsRef<str>>(
    by_region: &[NamedUnitYear],
    names: &[S],
    indicators: &[Indicator],
) -> ComparisonTable {
    let selected: Vec<&NamedUnitYear> = by_region
        .iter()
        .filter(|r| {
            names
                .iter()
                .any(|n| n.as_ref() == r.name || n.as_ref() == r.record.unit_key)
        })
        .collect();

    if selected.is_empty() {
        return ComparisonTable::default();
    }

    let indicators: Vec<Indicator> = indicators
        .iter()
        .copied()
        .filter(|i| selected.iter().any(|r| r.record.indicators.contains(*i)))
        .collect();

    let rows = selected
        .into_iter()
        .map(|r| ComparisonRow {
            name: r.name.clone(),
            unit_key: r.record.unit_key.clone(),
            year: r.record.year,
            values: indicators
                .iter()
                .map(|i| r.record.indicators.get(*i))
                .collect(),
        })
        .collect();

    ComparisonTable { indicators, rows }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wealth_map_grid_models::{Counts, DerivedTotals, IndicatorValues};

    use super::*;
    use crate::config::SchemaConfig;
    use crate::load::{DatasetFormat, parse_dataset};

    fn boundaries() -> BoundarySet {
        let collection = json!({
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "EPSG:2154"}},
            "features": [
                {"type": "Feature", "properties": {"insee": "01001", "nom": "Alpha"}, "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [5000.0, 10.0], [10000.0, 0.0], [10000.0, 10000.0], [0.0, 10000.0], [0.0, 0.0]]]
                }},
                {"type": "Feature", "properties": {"insee": "01002", "nom": "Beta"}, "geometry": null},
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

    fn record(year: u16, unit_key: &str, poverty: Option<f64>) -> UnitYearRecord {
        let mut indicators = IndicatorValues::default();
        if let Some(value) = poverty {
            indicators.insert(Indicator::PovertyRate, value);
        }
        UnitYearRecord {
            year,
            unit_key: unit_key.to_string(),
            counts: Counts::default(),
            totals: DerivedTotals::default(),
            indicators,
            gravity_km: None,
        }
    }

    fn tables() -> PipelineTables {
        let units = vec![
            record(2015, "01001", Some(10.0)),
            record(2019, "01001", Some(12.0)),
            record(2019, "01002", None),
            record(2019, "99999", Some(50.0)),
        ];
        build_tables(
            units,
            Vec::new(),
            &boundaries(),
            &SimplifyConfig::default(),
            Vec::new(),
        )
    }

    #[test]
    fn by_region_joins_names_and_drops_unknown_units() {
        let tables = tables();
        assert_eq!(tables.raw_grouped.len(), 4);
        assert_eq!(tables.by_region.len(), 3);
        assert_eq!(tables.by_region[0].name, "Alpha");
        assert_eq!(tables.by_region[2].name, "Beta");
    }

    #[test]
    fn geo_holds_latest_year_units_with_geometry() {
        let tables = tables();
        assert_eq!(tables.geo.year, Some(2019));
        assert_eq!(tables.geo.crs, Crs::Lambert93);
        assert_eq!(tables.geo.units.len(), 1);

        let unit = &tables.geo.units[0];
        assert_eq!(unit.record.record.unit_key, "01001");
        assert!(unit.simplified);
        assert!(geometry::vertex_count(&unit.geometry) < 6);
    }

    #[test]
    fn failed_simplification_keeps_original_geometry() {
        let units = vec![
            record(2015, "01001", Some(10.0)),
            record(2019, "01001", Some(12.0)),
            record(2019, "99999", Some(50.0)),
        ];
        let national = vec![NationalYearRecord {
            year: 2019,
            counts: Counts::default(),
            totals: DerivedTotals::default(),
            indicators: IndicatorValues::default(),
        }];
        let simplify = SimplifyConfig {
            meters_tolerance: 0.0,
            ..SimplifyConfig::default()
        };
        let boundaries = boundaries();
        let tables = build_tables(units, national, &boundaries, &simplify, Vec::new());

        assert_eq!(tables.geo.units.len(), 1);
        let unit = &tables.geo.units[0];
        assert!(!unit.simplified);
        assert_eq!(
            Some(&unit.geometry),
            boundaries.get("01001").unwrap().geometry.as_ref()
        );

        assert_eq!(tables.timeseries.len(), 1);
        assert_eq!(tables.by_region.len(), 2);
        assert_eq!(tables.raw_grouped.len(), 3);
    }

    #[test]
    fn tolerance_follows_crs_units() {
        let config = SimplifyConfig::default();
        assert!((simplification_tolerance(Crs::Lambert93, &config) - 200.0).abs() < f64::EPSILON);
        assert!((simplification_tolerance(Crs::Wgs84, &config) - 0.005).abs() < f64::EPSILON);
    }

    #[test]
    fn comparison_selects_named_units_and_present_indicators() {
        let tables = tables();
        let table = commune_comparison(
            &tables.by_region,
            &["Alpha", "01002"],
            &[Indicator::PovertyRate, Indicator::YouthPct],
        );

        assert_eq!(table.indicators, vec![Indicator::PovertyRate]);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0].values, vec![Some(10.0)]);
        assert_eq!(table.rows[2].name, "Beta");
        assert_eq!(table.rows[2].values, vec![None]);
    }

    #[test]
    fn comparison_with_no_names_is_empty() {
        let tables = tables();
        let table = commune_comparison::<&str>(&tables.by_region, &[], Indicator::all());
        assert!(table.is_empty());
        assert!(table.indicators.is_empty());
    }
}
