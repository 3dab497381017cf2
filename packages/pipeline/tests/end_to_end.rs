use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Value, json};
use wealth_map_grid_models::{GridField, Indicator};
use wealth_map_pipeline::config::YearFile;
use wealth_map_pipeline::load::{DatasetFormat, RawInputs, parse_dataset};
use wealth_map_pipeline::{PipelineConfig, PipelineError, null_progress, run, run_with_inputs};
use wealth_map_spatial::{Crs, SpatialError};

const UNITS: [(&str, &str); 3] = [("01001", "Alpha"), ("01002", "Beta"), ("01003", "Gamma")];
const UNIT_SIZE: f64 = 4000.0;

fn square(x0: f64, y0: f64, size: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[[x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]]]
    })
}

fn lambert_collection(features: Vec<Value>) -> String {
    json!({
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::2154"}},
        "features": features,
    })
    .to_string()
}

fn communes() -> String {
    lambert_collection(
        UNITS
            .iter()
            .enumerate()
            .map(|(u, (code, name))| {
                json!({
                    "type": "Feature",
                    "properties": {"INSEE_COM": code, "NOM": name},
                    "geometry": square(u as f64 * UNIT_SIZE, 0.0, UNIT_SIZE),
                })
            })
            .collect(),
    )
}

/// Households and poor households of cell `i` of unit `u` in `year`.
fn cell_counts(year: u16, u: usize, i: usize) -> (f64, f64) {
    let households = (10 * (u + 1) + 5 * i) as f64;
    let poor = if year == 2015 {
        (2 * u + i + 1) as f64
    } else {
        (u + i) as f64
    };
    (households, poor)
}

fn cell_properties(year: u16, u: usize, i: usize) -> serde_json::Map<String, Value> {
    let (households, poor) = cell_counts(year, u, i);
    let population = households * 2.0;
    let mut properties = serde_json::Map::new();
    properties.insert("Ind".to_string(), json!(population));
    properties.insert("men".to_string(), json!(households.to_string()));
    properties.insert("men_pauv".to_string(), json!(poor));
    properties.insert("ind_25_39".to_string(), json!(population));
    properties.insert("log_soc".to_string(), json!(1));
    properties
}

/// 2015 carries the native unit code and no geometry.
fn grid_2015() -> String {
    let mut features = Vec::new();
    for (u, (code, _)) in UNITS.iter().enumerate() {
        for i in 0..4 {
            let mut properties = cell_properties(2015, u, i);
            let key = if u == 0 {
                json!(1001)
            } else {
                json!(code)
            };
            properties.insert("lcog_geo".to_string(), key);
            features.push(json!({"type": "Feature", "properties": properties, "geometry": null}));
        }
    }
    lambert_collection(features)
}

/// 2019 needs a spatial join; one extra cell lies outside every unit.
fn grid_2019() -> String {
    let mut features = Vec::new();
    for u in 0..UNITS.len() {
        for i in 0..4 {
            let x0 = u as f64 * UNIT_SIZE + 200.0 + i as f64 * 900.0;
            features.push(json!({
                "type": "Feature",
                "properties": cell_properties(2019, u, i),
                "geometry": square(x0, 1000.0, 800.0),
            }));
        }
    }
    features.push(json!({
        "type": "Feature",
        "properties": {"ind": 1000, "men": 500, "men_pauv": 500},
        "geometry": square(50_000.0, 50_000.0, 1000.0),
    }));
    lambert_collection(features)
}

fn inputs() -> RawInputs {
    let parse = |name: &str, contents: &str| {
        parse_dataset(name, contents, DatasetFormat::Collection, Crs::Wgs84).unwrap()
    };
    RawInputs {
        years: BTreeMap::from([
            (2015, parse("grid2015", &grid_2015())),
            (2019, parse("grid2019", &grid_2019())),
        ]),
        communes: parse("communes", &communes()),
    }
}

fn expected_poverty_rate(year: u16, u: usize) -> f64 {
    let (households, poor) = (0..4)
        .map(|i| cell_counts(year, u, i))
        .fold((0.0, 0.0), |(h, p), (ch, cp)| (h + ch, p + cp));
    poor / households * 100.0
}

#[test]
fn by_region_has_one_row_per_unit_and_year_with_weighted_rates() {
    let tables = run_with_inputs(inputs(), &PipelineConfig::default(), &null_progress()).unwrap();

    assert_eq!(tables.by_region.len(), 6);
    for row in &tables.by_region {
        let u = UNITS
            .iter()
            .position(|(code, _)| *code == row.record.unit_key)
            .unwrap();
        assert_eq!(row.name, UNITS[u].1);

        let rate = row.record.indicators.get(Indicator::PovertyRate).unwrap();
        let expected = expected_poverty_rate(row.record.year, u);
        assert!(
            (rate - expected).abs() < 1e-6,
            "{} {}: {rate} != {expected}",
            row.record.year,
            row.record.unit_key
        );
    }
}

#[test]
fn rates_stay_within_bounds() {
    let tables = run_with_inputs(inputs(), &PipelineConfig::default(), &null_progress()).unwrap();

    let unit_values = tables.by_region.iter().map(|r| &r.record.indicators);
    let national_values = tables.timeseries.iter().map(|r| &r.indicators);
    for values in unit_values.chain(national_values) {
        for (indicator, value) in values.iter() {
            if indicator.is_rate() {
                assert!(
                    value.is_nan() || (0.0..=100.0).contains(&value),
                    "{indicator} = {value}"
                );
            }
        }
    }

    for row in &tables.by_region {
        let counts = &row.record.counts;
        let bands = counts.sum_of(GridField::AGE_BANDS);
        assert!((bands - counts.get(GridField::Population)).abs() < 1e-9);
        for field in GridField::all() {
            assert!(counts.get(*field) >= 0.0);
        }
    }
}

#[test]
fn reports_native_and_spatial_resolution() {
    let tables = run_with_inputs(inputs(), &PipelineConfig::default(), &null_progress()).unwrap();

    let reports: Vec<_> = tables
        .resolve_reports
        .iter()
        .map(|r| (r.year, r.native_key, r.matched, r.dropped))
        .collect();
    assert_eq!(reports, vec![(2015, true, 12, 0), (2019, false, 12, 1)]);
}

#[test]
fn national_series_rederives_from_all_cells() {
    let tables = run_with_inputs(inputs(), &PipelineConfig::default(), &null_progress()).unwrap();
    assert_eq!(tables.timeseries.len(), 2);

    for record in &tables.timeseries {
        let (households, poor) = (0..UNITS.len())
            .flat_map(|u| (0..4).map(move |i| (u, i)))
            .map(|(u, i)| cell_counts(record.year, u, i))
            .fold((0.0, 0.0), |(h, p), (ch, cp)| (h + ch, p + cp));
        let rate = record.indicators.get(Indicator::PovertyRate).unwrap();
        assert!((rate - poor / households * 100.0).abs() < 1e-6);
        assert!(!record.indicators.contains(Indicator::AvgIncome));

        let social = record.indicators.get(Indicator::SocialHousingRate).unwrap();
        assert!((social - 12.0 / households * 100.0).abs() < 1e-6);
    }
}

#[test]
fn geo_snapshot_and_gravity() {
    let tables = run_with_inputs(inputs(), &PipelineConfig::default(), &null_progress()).unwrap();

    assert_eq!(tables.geo.year, Some(2019));
    assert_eq!(tables.geo.crs, Crs::Lambert93);
    assert_eq!(tables.geo.units.len(), 3);
    assert!(tables.geo.units.iter().all(|u| u.record.record.year == 2019));

    let distances: Vec<f64> = tables
        .by_region
        .iter()
        .filter(|r| r.record.year == 2019)
        .map(|r| r.record.gravity_km.unwrap())
        .collect();
    assert_eq!(distances.len(), 3);
    assert!(distances.iter().all(|d| d.is_finite() && *d > 0.0));
}

#[test]
fn boundary_without_identifier_column_fails_the_run() {
    let mut inputs = inputs();
    inputs.communes = parse_dataset(
        "communes",
        &lambert_collection(vec![json!({
            "type": "Feature",
            "properties": {"nom": "Alpha"},
            "geometry": square(0.0, 0.0, UNIT_SIZE),
        })]),
        DatasetFormat::Collection,
        Crs::Wgs84,
    )
    .unwrap();

    let err = run_with_inputs(inputs, &PipelineConfig::default(), &null_progress()).unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumn { .. }));
}

#[test]
fn geographic_gravity_crs_fails_before_any_work() {
    let mut config = PipelineConfig::default();
    config.gravity.metric_epsg = 4326;

    let err = run_with_inputs(inputs(), &config, &null_progress()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Spatial(SpatialError::NotDistancePreserving { epsg: 4326 })
    ));
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("wealth_map_{name}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn runs_from_files_and_skips_missing_years() {
    let dir = scratch_dir("files");
    std::fs::write(dir.join("communes.geojson"), communes()).unwrap();

    // The 2019 grid as one feature per line, with the CRS from configuration.
    let collection: Value = serde_json::from_str(&grid_2019()).unwrap();
    let lines: Vec<String> = collection["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(Value::to_string)
        .collect();
    std::fs::write(dir.join("grid2019.geojsonseq"), lines.join("\n")).unwrap();

    let mut config = PipelineConfig::default();
    config.data.data_dir.clone_from(&dir);
    config.data.communes = "communes.geojson".to_string();
    config.data.grid_crs = Some(2154);
    config.data.years = vec![
        YearFile::new(2015, "missing.geojson"),
        YearFile::new(2019, "grid2019.geojsonseq"),
    ];

    let tables = run(&config, &null_progress()).unwrap();
    assert_eq!(tables.timeseries.len(), 1);
    assert_eq!(tables.by_region.len(), 3);
    assert_eq!(tables.resolve_reports[0].dropped, 1);

    config.data.communes = "absent.geojson".to_string();
    assert!(matches!(
        run(&config, &null_progress()),
        Err(PipelineError::MissingInput { .. })
    ));

    config.data.communes = "communes.geojson".to_string();
    config.data.years = vec![YearFile::new(2017, "missing.geojson")];
    assert!(matches!(
        run(&config, &null_progress()),
        Err(PipelineError::NoData)
    ));

    std::fs::remove_dir_all(&dir).ok();
}
