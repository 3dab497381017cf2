//! Writers for the pipeline output tables.
//!
//! The three tabular outputs are CSV files sharing one column layout for
//! the values: indicators in column order, then derived totals, then the
//! summed counts. Undefined (`NaN`) and omitted indicators are written as
//! empty cells. The geo snapshot is a GeoJSON `FeatureCollection`.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use serde_json::{Value, json};
use wealth_map_grid_models::{
    Counts, DerivedTotals, GridField, Indicator, IndicatorValues, NamedUnitYear,
    NationalYearRecord, UnitYearRecord,
};
use wealth_map_pipeline::PipelineTables;
use wealth_map_pipeline::tables::GeoSnapshot;
use wealth_map_spatial::Crs;

/// National series, one row per year.
pub const OUTPUT_TIMESERIES: &str = "timeseries.csv";

/// Named unit-year panel.
pub const OUTPUT_BY_REGION: &str = "by_region.csv";

/// Latest-year units with simplified boundaries.
pub const OUTPUT_GEO: &str = "geo.geojson";

/// Every unit-year row before the boundary join.
pub const OUTPUT_RAW_GROUPED: &str = "raw_grouped.csv";

/// Every output file, in write order.
pub const OUTPUTS: &[&str] = &[
    OUTPUT_TIMESERIES,
    OUTPUT_BY_REGION,
    OUTPUT_GEO,
    OUTPUT_RAW_GROUPED,
];

const TOTAL_COLUMNS: [&str; 4] = ["pop_youth", "pop_working", "pop_senior", "total_housing_est"];

/// Cell text for a value: empty when absent or undefined.
#[must_use]
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

fn json_number(value: Option<f64>) -> Value {
    match value {
        Some(v) if v.is_finite() => json!(v),
        _ => Value::Null,
    }
}

fn value_header() -> impl Iterator<Item = String> {
    Indicator::all()
        .iter()
        .map(|i| i.as_ref().to_string())
        .chain(TOTAL_COLUMNS.iter().map(ToString::to_string))
        .chain(GridField::all().iter().map(|f| f.column().to_string()))
}

fn value_cells(
    indicators: &IndicatorValues,
    totals: &DerivedTotals,
    counts: &Counts,
) -> Vec<String> {
    let totals = [
        totals.pop_youth,
        totals.pop_working,
        totals.pop_senior,
        totals.total_housing_est,
    ];
    Indicator::all()
        .iter()
        .map(|i| format_value(indicators.get(*i)))
        .chain(totals.into_iter().map(|v| format_value(Some(v))))
        .chain(
            GridField::all()
                .iter()
                .map(|f| format_value(Some(counts.get(*f)))),
        )
        .collect()
}

fn unit_cells(record: &UnitYearRecord) -> Vec<String> {
    [
        record.unit_key.clone(),
        record.year.to_string(),
        format_value(record.gravity_km),
    ]
    .into_iter()
    .chain(value_cells(&record.indicators, &record.totals, &record.counts))
    .collect()
}

/// Writes the national series.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_timeseries(path: &Path, records: &[NationalYearRecord]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(std::iter::once("year".to_string()).chain(value_header()))?;
    for record in records {
        writer.write_record(
            std::iter::once(record.year.to_string()).chain(value_cells(
                &record.indicators,
                &record.totals,
                &record.counts,
            )),
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the named unit-year panel.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_by_region(path: &Path, rows: &[NamedUnitYear]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(
        ["name", "unit_key", "year", "gravity_km"]
            .into_iter()
            .map(ToString::to_string)
            .chain(value_header()),
    )?;
    for row in rows {
        writer.write_record(std::iter::once(row.name.clone()).chain(unit_cells(&row.record)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the unit-year rows before the boundary join.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_raw_grouped(path: &Path, records: &[UnitYearRecord]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(
        ["unit_key", "year", "gravity_km"]
            .into_iter()
            .map(ToString::to_string)
            .chain(value_header()),
    )?;
    for record in records {
        writer.write_record(&unit_cells(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Builds the GeoJSON `FeatureCollection` for the snapshot.
///
/// Non-WGS84 snapshots carry a legacy `crs` member naming their EPSG code.
#[must_use]
pub fn geo_collection(snapshot: &GeoSnapshot) -> Value {
    let features: Vec<Value> = snapshot
        .units
        .iter()
        .map(|unit| {
            let record = &unit.record.record;
            let mut properties = serde_json::Map::new();
            properties.insert("name".to_string(), json!(unit.record.name));
            properties.insert("unit_key".to_string(), json!(record.unit_key));
            properties.insert("year".to_string(), json!(record.year));
            properties.insert("gravity_km".to_string(), json_number(record.gravity_km));
            for indicator in Indicator::all() {
                properties.insert(
                    indicator.as_ref().to_string(),
                    json_number(record.indicators.get(*indicator)),
                );
            }
            properties.insert("simplified".to_string(), json!(unit.simplified));

            let geometry = geojson::Geometry::new(geojson::Value::from(&unit.geometry));
            json!({
                "type": "Feature",
                "properties": properties,
                "geometry": geometry,
            })
        })
        .collect();

    let mut collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if snapshot.crs != Crs::Wgs84 {
        collection["crs"] = json!({
            "type": "name",
            "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", snapshot.crs.epsg())},
        });
    }
    collection
}

/// Writes the geo snapshot.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_geo(path: &Path, snapshot: &GeoSnapshot) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &geo_collection(snapshot))?;
    writer.flush()?;
    Ok(())
}

/// Writes one named output into `dir`.
///
/// # Errors
///
/// Returns an error if the output name is unknown or the file cannot be
/// written.
pub fn write_output(
    dir: &Path,
    output_name: &str,
    tables: &PipelineTables,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = dir.join(output_name);
    match output_name {
        OUTPUT_TIMESERIES => write_timeseries(&path, &tables.timeseries)?,
        OUTPUT_BY_REGION => write_by_region(&path, &tables.by_region)?,
        OUTPUT_GEO => write_geo(&path, &tables.geo)?,
        OUTPUT_RAW_GROUPED => write_raw_grouped(&path, &tables.raw_grouped)?,
        other => return Err(format!("Unknown output: {other}").into()),
    }
    log::info!("Wrote {}", path.display());
    Ok(())
}
