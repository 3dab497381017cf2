#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Grid survey field catalog and aggregated record types.
//!
//! This crate defines the canonical set of additive quantities published
//! per 1km² grid cell (population, households, age bands, construction
//! eras, ...), the derived indicators computed from them, and the record
//! shapes produced by the aggregation pipeline. It is independent of any
//! geometry or file format.

pub mod indicator;
pub mod records;

use std::collections::BTreeSet;
use std::ops::AddAssign;

use serde::ser::SerializeMap as _;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use indicator::{DerivedTotals, Indicator, IndicatorValues};
pub use records::{GridCell, NamedUnitYear, NationalYearRecord, UnitYearRecord};

/// Number of variants in [`GridField`].
pub const FIELD_COUNT: usize = 26;

/// An additive quantity published per grid cell.
///
/// The string form of each variant is the canonical (lowercase) column name
/// used by the survey files.
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
pub enum GridField {
    /// Number of individuals.
    #[serde(rename = "ind")]
    #[strum(serialize = "ind")]
    Population,
    /// Number of households.
    #[serde(rename = "men")]
    #[strum(serialize = "men")]
    Households,
    /// Households below the poverty line.
    #[serde(rename = "men_pauv")]
    #[strum(serialize = "men_pauv")]
    PoorHouseholds,
    /// Owner-occupier households.
    #[serde(rename = "men_prop")]
    #[strum(serialize = "men_prop")]
    OwnerHouseholds,
    /// Social housing units.
    #[serde(rename = "log_soc")]
    #[strum(serialize = "log_soc")]
    SocialHousing,
    /// Sum of winsorized standard of living over individuals (income x population).
    #[serde(rename = "ind_snv")]
    #[strum(serialize = "ind_snv")]
    IncomeSum,
    #[serde(rename = "ind_0_3")]
    #[strum(serialize = "ind_0_3")]
    Age0To3,
    #[serde(rename = "ind_4_5")]
    #[strum(serialize = "ind_4_5")]
    Age4To5,
    #[serde(rename = "ind_6_10")]
    #[strum(serialize = "ind_6_10")]
    Age6To10,
    #[serde(rename = "ind_11_17")]
    #[strum(serialize = "ind_11_17")]
    Age11To17,
    #[serde(rename = "ind_18_24")]
    #[strum(serialize = "ind_18_24")]
    Age18To24,
    #[serde(rename = "ind_25_39")]
    #[strum(serialize = "ind_25_39")]
    Age25To39,
    #[serde(rename = "ind_40_54")]
    #[strum(serialize = "ind_40_54")]
    Age40To54,
    #[serde(rename = "ind_55_64")]
    #[strum(serialize = "ind_55_64")]
    Age55To64,
    #[serde(rename = "ind_65_79")]
    #[strum(serialize = "ind_65_79")]
    Age65To79,
    #[serde(rename = "ind_80p")]
    #[strum(serialize = "ind_80p")]
    Age80Plus,
    /// Dwellings built before 1945.
    #[serde(rename = "log_av45")]
    #[strum(serialize = "log_av45")]
    BuiltBefore1945,
    #[serde(rename = "log_45_70")]
    #[strum(serialize = "log_45_70")]
    Built1945To1970,
    #[serde(rename = "log_70_90")]
    #[strum(serialize = "log_70_90")]
    Built1970To1990,
    /// Dwellings built after 1990.
    #[serde(rename = "log_ap90")]
    #[strum(serialize = "log_ap90")]
    BuiltAfter1990,
    /// Dwellings of unknown construction date.
    #[serde(rename = "log_inc")]
    #[strum(serialize = "log_inc")]
    BuiltUnknown,
    /// Households living in a detached house.
    #[serde(rename = "men_mais")]
    #[strum(serialize = "men_mais")]
    Houses,
    /// Households living in a collective building.
    #[serde(rename = "men_coll")]
    #[strum(serialize = "men_coll")]
    Apartments,
    /// Single-person households.
    #[serde(rename = "men_1ind")]
    #[strum(serialize = "men_1ind")]
    SinglePerson,
    /// Households of five or more persons.
    #[serde(rename = "men_5ind")]
    #[strum(serialize = "men_5ind")]
    LargeHouseholds,
    /// Single-parent households.
    #[serde(rename = "men_fmp")]
    #[strum(serialize = "men_fmp")]
    SingleParent,
}

impl GridField {
    /// Age bands 0-17.
    pub const YOUTH: &'static [Self] = &[Self::Age0To3, Self::Age4To5, Self::Age6To10, Self::Age11To17];

    /// Age bands 18-64.
    pub const WORKING_AGE: &'static [Self] = &[
        Self::Age18To24,
        Self::Age25To39,
        Self::Age40To54,
        Self::Age55To64,
    ];

    /// Age bands 65 and over.
    pub const SENIOR: &'static [Self] = &[Self::Age65To79, Self::Age80Plus];

    /// All age bands. Mutually exclusive and exhaustive over the population.
    pub const AGE_BANDS: &'static [Self] = &[
        Self::Age0To3,
        Self::Age4To5,
        Self::Age6To10,
        Self::Age11To17,
        Self::Age18To24,
        Self::Age25To39,
        Self::Age40To54,
        Self::Age55To64,
        Self::Age65To79,
        Self::Age80Plus,
    ];

    /// All construction eras. Mutually exclusive and exhaustive over dwellings.
    pub const HOUSING_ERAS: &'static [Self] = &[
        Self::BuiltBefore1945,
        Self::Built1945To1970,
        Self::Built1970To1990,
        Self::BuiltAfter1990,
        Self::BuiltUnknown,
    ];

    /// Returns all variants of this enum, in column order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Population,
            Self::Households,
            Self::PoorHouseholds,
            Self::OwnerHouseholds,
            Self::SocialHousing,
            Self::IncomeSum,
            Self::Age0To3,
            Self::Age4To5,
            Self::Age6To10,
            Self::Age11To17,
            Self::Age18To24,
            Self::Age25To39,
            Self::Age40To54,
            Self::Age55To64,
            Self::Age65To79,
            Self::Age80Plus,
            Self::BuiltBefore1945,
            Self::Built1945To1970,
            Self::Built1970To1990,
            Self::BuiltAfter1990,
            Self::BuiltUnknown,
            Self::Houses,
            Self::Apartments,
            Self::SinglePerson,
            Self::LargeHouseholds,
            Self::SingleParent,
        ]
    }

    /// Position of this field inside a [`Counts`] vector.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Canonical column name (e.g. `"men_pauv"`).
    #[must_use]
    pub const fn column(self) -> &'static str {
        Self::COLUMNS[self.index()]
    }

    const COLUMNS: [&'static str; FIELD_COUNT] = [
        "ind",
        "men",
        "men_pauv",
        "men_prop",
        "log_soc",
        "ind_snv",
        "ind_0_3",
        "ind_4_5",
        "ind_6_10",
        "ind_11_17",
        "ind_18_24",
        "ind_25_39",
        "ind_40_54",
        "ind_55_64",
        "ind_65_79",
        "ind_80p",
        "log_av45",
        "log_45_70",
        "log_70_90",
        "log_ap90",
        "log_inc",
        "men_mais",
        "men_coll",
        "men_1ind",
        "men_5ind",
        "men_fmp",
    ];
}

/// The set of [`GridField`]s a survey year actually published.
///
/// Absent fields still sum as zero, but indicators depending on them are
/// omitted rather than reported as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPresence(BTreeSet<GridField>);

impl FieldPresence {
    /// Presence set with every field marked present.
    #[must_use]
    pub fn full() -> Self {
        Self(GridField::all().iter().copied().collect())
    }

    /// Marks a field as present.
    pub fn insert(&mut self, field: GridField) {
        self.0.insert(field);
    }

    /// Whether the field was published.
    #[must_use]
    pub fn contains(&self, field: GridField) -> bool {
        self.0.contains(&field)
    }

    /// Whether at least one of the fields was published.
    #[must_use]
    pub fn any_of(&self, fields: &[GridField]) -> bool {
        fields.iter().any(|f| self.contains(*f))
    }

    /// Whether every one of the fields was published.
    #[must_use]
    pub fn all_of(&self, fields: &[GridField]) -> bool {
        fields.iter().all(|f| self.contains(*f))
    }

    /// Iterates the present fields in column order.
    pub fn iter(&self) -> impl Iterator<Item = GridField> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<GridField> for FieldPresence {
    fn from_iter<I: IntoIterator<Item = GridField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A dense vector of additive quantities, one slot per [`GridField`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Counts([f64; FIELD_COUNT]);

impl Default for Counts {
    fn default() -> Self {
        Self([0.0; FIELD_COUNT])
    }
}

impl Counts {
    /// Value of a single field.
    #[must_use]
    pub const fn get(&self, field: GridField) -> f64 {
        self.0[field.index()]
    }

    /// Overwrites a single field.
    pub const fn set(&mut self, field: GridField, value: f64) {
        self.0[field.index()] = value;
    }

    /// Sum over a group of fields.
    #[must_use]
    pub fn sum_of(&self, fields: &[GridField]) -> f64 {
        fields.iter().map(|f| self.get(*f)).sum()
    }

    /// Builds a vector from `(field, value)` pairs; unspecified fields are zero.
    #[must_use]
    pub fn from_pairs(pairs: &[(GridField, f64)]) -> Self {
        let mut counts = Self::default();
        for (field, value) in pairs {
            counts.set(*field, *value);
        }
        counts
    }
}

impl AddAssign<&Self> for Counts {
    fn add_assign(&mut self, rhs: &Self) {
        for (lhs, rhs) in self.0.iter_mut().zip(rhs.0.iter()) {
            *lhs += rhs;
        }
    }
}

impl Serialize for Counts {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIELD_COUNT))?;
        for field in GridField::all() {
            map.serialize_entry(field.column(), &self.get(*field))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn field_count_matches_variants() {
        assert_eq!(GridField::all().len(), FIELD_COUNT);
        for (i, field) in GridField::all().iter().enumerate() {
            assert_eq!(field.index(), i, "{field:?} out of order");
        }
    }

    #[test]
    fn column_names_match_strum_and_parse_back() {
        for field in GridField::all() {
            assert_eq!(field.column(), field.as_ref());
            assert_eq!(GridField::from_str(field.column()).unwrap(), *field);
        }
    }

    #[test]
    fn age_groups_partition_age_bands() {
        let grouped: usize =
            GridField::YOUTH.len() + GridField::WORKING_AGE.len() + GridField::SENIOR.len();
        assert_eq!(grouped, GridField::AGE_BANDS.len());
        for band in GridField::AGE_BANDS {
            let memberships = [GridField::YOUTH, GridField::WORKING_AGE, GridField::SENIOR]
                .iter()
                .filter(|group| group.contains(band))
                .count();
            assert_eq!(memberships, 1, "{band:?} must belong to exactly one group");
        }
    }

    #[test]
    fn counts_add_assign_is_fieldwise() {
        let mut a = Counts::from_pairs(&[(GridField::Population, 10.0), (GridField::Households, 4.0)]);
        let b = Counts::from_pairs(&[(GridField::Population, 5.0), (GridField::SocialHousing, 2.0)]);
        a += &b;
        assert!((a.get(GridField::Population) - 15.0).abs() < f64::EPSILON);
        assert!((a.get(GridField::Households) - 4.0).abs() < f64::EPSILON);
        assert!((a.get(GridField::SocialHousing) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counts_serialize_by_column_name() {
        let counts = Counts::from_pairs(&[(GridField::PoorHouseholds, 3.0)]);
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["men_pauv"], serde_json::json!(3.0));
        assert_eq!(json["ind"], serde_json::json!(0.0));
    }

    #[test]
    fn presence_group_queries() {
        let presence: FieldPresence = [GridField::Age0To3, GridField::Households]
            .into_iter()
            .collect();
        assert!(presence.any_of(GridField::YOUTH));
        assert!(!presence.all_of(GridField::YOUTH));
        assert!(!presence.any_of(GridField::SENIOR));
    }
}
