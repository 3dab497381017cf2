//! Tile normalizer.
//!
//! Turns one year's raw grid dataset into dense [`Counts`] rows. Every known
//! numeric field is coerced to `f64`; unparseable, absent, negative, or
//! non-finite values become zero. No row is dropped here.

use geo::Geometry;
use serde_json::Value;
use wealth_map_grid_models::{Counts, FieldPresence, GridField};
use wealth_map_spatial::Crs;

use crate::config::SchemaConfig;
use crate::load::{RawDataset, RawFeature};
use crate::schema::ResolvedSchema;

/// Width numeric unit codes are zero-padded to (`1001` becomes `"01001"`).
pub const UNIT_KEY_WIDTH: usize = 5;

/// Age bands are expected to sum to the population within this many persons.
const AGE_BAND_TOLERANCE: f64 = 0.5;

/// One normalized grid cell, possibly not yet attributed to a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// Native unit key, when the year publishes one and the row carries it.
    pub unit_key: Option<String>,
    pub counts: Counts,
    pub geometry: Option<Geometry<f64>>,
}

/// One year's normalized cells.
#[derive(Debug, Clone)]
pub struct CellTable {
    pub year: u16,
    /// Effective CRS of the row geometries.
    pub crs: Crs,
    pub schema: ResolvedSchema,
    /// Fields published this year.
    pub presence: FieldPresence,
    pub rows: Vec<NormalizedRow>,
}

impl CellTable {
    /// Whether the year carries a native unit key column.
    #[must_use]
    pub const fn has_native_key(&self) -> bool {
        self.schema.cell_unit_key.is_some()
    }
}

/// Coerces a property value to a non-negative count.
///
/// Numbers pass through, numeric strings are parsed (surrounding
/// whitespace and a decimal comma are tolerated), booleans become 1 or 0,
/// and everything else is 0.
#[must_use]
pub fn parse_numeric(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    };
    if parsed.is_finite() && parsed > 0.0 {
        parsed
    } else {
        0.0
    }
}

/// Reads a unit key from a property value.
///
/// Integer codes, including integral floats such as `1001.0`, are
/// zero-padded to [`UNIT_KEY_WIDTH`] digits, since spreadsheet round-trips
/// commonly strip the leading zero of départements 01-09.
#[must_use]
pub fn unit_key_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(integral_code))
            .map_or_else(
                || Some(n.to_string()),
                |code| Some(format!("{code:0UNIT_KEY_WIDTH$}")),
            ),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Largest float that still holds every integer exactly.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::float_cmp)]
fn integral_code(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value <= MAX_EXACT_FLOAT && value.trunc() == value)
        .then_some(value as u64)
}

/// Normalizes one year's grid dataset.
///
/// The dataset's columns are resolved against `schema`, its effective CRS
/// is determined with `projected_fallback` as the plausibility fallback, and
/// each row is converted to [`Counts`].
#[must_use]
pub fn normalize_tiles(
    dataset: RawDataset,
    year: u16,
    schema: &SchemaConfig,
    projected_fallback: Crs,
) -> CellTable {
    let resolved = ResolvedSchema::resolve(&dataset.columns, schema);
    let presence = resolved.presence();
    let crs = dataset.effective_crs(projected_fallback);

    log::info!(
        "{year}: resolved {} of {} fields from {}{}{}",
        resolved.fields.len(),
        GridField::all().len(),
        dataset.name,
        if resolved.derives_income() {
            ", income derived from average income"
        } else {
            ""
        },
        resolved
            .cell_unit_key
            .as_deref()
            .map_or_else(String::new, |k| format!(", unit key '{k}'")),
    );

    let rows: Vec<NormalizedRow> = dataset
        .features
        .into_iter()
        .map(|feature| normalize_row(feature, &resolved))
        .collect();

    let mismatched = age_band_mismatches(&rows, &presence);
    if mismatched > 0 {
        log::warn!(
            "{year}: {mismatched} of {} cells have age bands that do not sum to the population",
            rows.len()
        );
    }

    CellTable {
        year,
        crs,
        schema: resolved,
        presence,
        rows,
    }
}

fn normalize_row(feature: RawFeature, schema: &ResolvedSchema) -> NormalizedRow {
    let RawFeature {
        properties,
        geometry,
    } = feature;
    let value_of = |column: &str| properties.get(column).map_or(0.0, parse_numeric);

    let mut counts = Counts::default();
    for (field, column) in &schema.fields {
        counts.set(*field, value_of(column));
    }

    if schema.derives_income()
        && let Some(avg_income) = schema.avg_income.as_deref()
    {
        let income = value_of(avg_income) * counts.get(GridField::Population);
        counts.set(GridField::IncomeSum, income);
    }

    let unit_key = schema
        .cell_unit_key
        .as_deref()
        .and_then(|column| properties.get(column))
        .and_then(unit_key_from_value);

    NormalizedRow {
        unit_key,
        counts,
        geometry,
    }
}

/// Number of rows whose age bands differ from the population by more than
/// half a person. Zero when the year does not publish every band.
#[must_use]
pub fn age_band_mismatches(rows: &[NormalizedRow], presence: &FieldPresence) -> usize {
    if !presence.contains(GridField::Population) || !presence.all_of(GridField::AGE_BANDS) {
        return 0;
    }
    rows.iter()
        .filter(|row| {
            let bands = row.counts.sum_of(GridField::AGE_BANDS);
            (bands - row.counts.get(GridField::Population)).abs() > AGE_BAND_TOLERANCE
        })
        .count()
}
