//! Derived indicator catalog.
//!
//! Indicators are always re-derived from summed [`Counts`](crate::Counts),
//! never averaged across cells or units.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A normalized indicator computed from additive sums.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Indicator {
    /// Income sum divided by population.
    AvgIncome,
    /// Poor households per 100 households.
    PovertyRate,
    /// Owner households per 100 households.
    OwnershipRate,
    /// Social housing units per 100 dwellings.
    SocialHousingRate,
    /// Population aged 0-17, percent.
    YouthPct,
    /// Population aged 65+, percent.
    SeniorPct,
    /// Population aged 18-64, percent.
    WorkingAgePct,
    SingleParentPct,
    SinglePersonPct,
    /// Dwellings built before 1945, percent of the era total.
    OldHousingPct,
    /// Dwellings built after 1990, percent of the era total.
    NewHousingPct,
    HousesPct,
    ApartmentsPct,
}

impl Indicator {
    /// Returns all variants of this enum, in output column order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::AvgIncome,
            Self::PovertyRate,
            Self::OwnershipRate,
            Self::SocialHousingRate,
            Self::YouthPct,
            Self::SeniorPct,
            Self::WorkingAgePct,
            Self::SingleParentPct,
            Self::SinglePersonPct,
            Self::OldHousingPct,
            Self::NewHousingPct,
            Self::HousesPct,
            Self::ApartmentsPct,
        ]
    }

    /// Whether this indicator is a percentage clamped to `[0, 100]`.
    #[must_use]
    pub const fn is_rate(self) -> bool {
        !matches!(self, Self::AvgIncome)
    }

    /// Human-readable label: the column name in title case
    /// (`poverty_rate` -> `Poverty Rate`).
    #[must_use]
    pub fn label(self) -> String {
        self.as_ref()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars).collect()
                })
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Indicator values for one record.
///
/// A missing key means the indicator could not be computed because a source
/// field was not published that year. A present `NaN` means the indicator
/// is undefined (degenerate denominator).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValues(BTreeMap<Indicator, f64>);

impl IndicatorValues {
    /// Stores a value, replacing any previous one.
    pub fn insert(&mut self, indicator: Indicator, value: f64) {
        self.0.insert(indicator, value);
    }

    /// Value of an indicator, or `None` when it was omitted.
    #[must_use]
    pub fn get(&self, indicator: Indicator) -> Option<f64> {
        self.0.get(&indicator).copied()
    }

    /// Whether the indicator was computed (possibly as undefined).
    #[must_use]
    pub fn contains(&self, indicator: Indicator) -> bool {
        self.0.contains_key(&indicator)
    }

    /// Iterates computed indicators in column order.
    pub fn iter(&self) -> impl Iterator<Item = (Indicator, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Intermediate sums carried alongside indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedTotals {
    /// Population aged 0-17.
    pub pop_youth: f64,
    /// Population aged 18-64.
    pub pop_working: f64,
    /// Population aged 65+.
    pub pop_senior: f64,
    /// Sum of the construction-era dwelling counts.
    pub total_housing_est: f64,
}
