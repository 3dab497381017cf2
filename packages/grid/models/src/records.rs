//! Record shapes flowing through and out of the aggregation pipeline.

use serde::Serialize;

use crate::{Counts, DerivedTotals, IndicatorValues};

/// One normalized grid cell attributed to an administrative unit.
///
/// Ephemeral: built for a single run, consumed by aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCell {
    /// Survey year.
    pub year: u16,
    /// Administrative unit (commune) code. Never empty.
    pub unit_key: String,
    /// Additive quantities for this cell.
    pub counts: Counts,
}

/// Aggregated quantities for one (administrative unit, year).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitYearRecord {
    pub year: u16,
    pub unit_key: String,
    /// Summed additive quantities.
    pub counts: Counts,
    pub totals: DerivedTotals,
    /// Indicators re-derived from `counts`.
    pub indicators: IndicatorValues,
    /// Distance from the unit centroid to the gravity reference point, in
    /// kilometers. Year-independent. `None` when the unit has no usable
    /// geometry.
    pub gravity_km: Option<f64>,
}

/// National aggregate for one year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NationalYearRecord {
    pub year: u16,
    pub counts: Counts,
    pub totals: DerivedTotals,
    pub indicators: IndicatorValues,
}

/// A [`UnitYearRecord`] joined with the unit's display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedUnitYear {
    /// Display name, falling back to the unit key when the boundary dataset
    /// carries no name column.
    pub name: String,
    #[serde(flatten)]
    pub record: UnitYearRecord,
}

