//! Aggregator.
//!
//! Sums cell counts per (year, unit) and per year, then re-derives every
//! indicator from the sums.

use std::collections::BTreeMap;

use wealth_map_grid_models::{
    Counts, FieldPresence, GridCell, NationalYearRecord, UnitYearRecord,
};

use crate::indicators::{derive_indicators, derive_totals};

/// Per-year field presence, as recorded by the normalizer.
pub type PresenceByYear = BTreeMap<u16, FieldPresence>;

fn presence_for(presence: &PresenceByYear, year: u16) -> FieldPresence {
    presence.get(&year).cloned().unwrap_or_default()
}

fn unit_record(
    year: u16,
    unit_key: String,
    counts: Counts,
    presence: &FieldPresence,
    gravity_km: Option<f64>,
) -> UnitYearRecord {
    UnitYearRecord {
        year,
        unit_key,
        totals: derive_totals(&counts),
        indicators: derive_indicators(&counts, presence),
        counts,
        gravity_km,
    }
}

/// One record per (year, unit), ordered by year then unit key.
#[must_use]
pub fn aggregate_units(cells: &[GridCell], presence: &PresenceByYear) -> Vec<UnitYearRecord> {
    let mut groups: BTreeMap<(u16, &str), Counts> = BTreeMap::new();
    for cell in cells {
        *groups
            .entry((cell.year, cell.unit_key.as_str()))
            .or_default() += &cell.counts;
    }

    log::info!(
        "Aggregated {} cells into {} unit-year groups",
        cells.len(),
        groups.len()
    );

    groups
        .into_iter()
        .map(|((year, unit_key), counts)| {
            unit_record(
                year,
                unit_key.to_string(),
                counts,
                &presence_for(presence, year),
                None,
            )
        })
        .collect()
}

/// One national record per year, summed over all cells.
#[must_use]
pub fn aggregate_national(
    cells: &[GridCell],
    presence: &PresenceByYear,
) -> Vec<NationalYearRecord> {
    let mut groups: BTreeMap<u16, Counts> = BTreeMap::new();
    for cell in cells {
        *groups.entry(cell.year).or_default() += &cell.counts;
    }

    groups
        .into_iter()
        .map(|(year, counts)| NationalYearRecord {
            year,
            totals: derive_totals(&counts),
            indicators: derive_indicators(&counts, &presence_for(presence, year)),
            counts,
        })
        .collect()
}

/// Re-groups already aggregated records by (year, unit) and re-derives
/// their indicators. Aggregating partial batches and then re-aggregating
/// yields the same table as a single pass.
#[must_use]
pub fn reaggregate(records: &[UnitYearRecord], presence: &PresenceByYear) -> Vec<UnitYearRecord> {
    let mut groups: BTreeMap<(u16, &str), (Counts, Option<f64>)> = BTreeMap::new();
    for record in records {
        let (counts, gravity) = groups
            .entry((record.year, record.unit_key.as_str()))
            .or_default();
        *counts += &record.counts;
        if gravity.is_none() {
            *gravity = record.gravity_km;
        }
    }

    groups
        .into_iter()
        .map(|((year, unit_key), (counts, gravity_km))| {
            unit_record(
                year,
                unit_key.to_string(),
                counts,
                &presence_for(presence, year),
                gravity_km,
            )
        })
        .collect()
}

/// Sets the year-independent gravity distance on every record of a unit.
pub fn attach_gravity(records: &mut [UnitYearRecord], distances: &BTreeMap<String, f64>) {
    for record in records {
        record.gravity_km = distances.get(&record.unit_key).copied();
    }
}

#[cfg(test)]
mod tests {
    use wealth_map_grid_models::{GridField, Indicator};

    use super::*;

    fn cell(year: u16, unit: &str, pairs: &[(GridField, f64)]) -> GridCell {
        GridCell {
            year,
            unit_key: unit.to_string(),
            counts: Counts::from_pairs(pairs),
        }
    }

    fn full(years: &[u16]) -> PresenceByYear {
        years.iter().map(|y| (*y, FieldPresence::full())).collect()
    }

    #[test]
    fn ratios_are_rederived_from_sums_not_averaged() {
        // group A: 10% poverty over 100 households, group B: 50% over 10
        let cells = vec![
            cell(
                2019,
                "U",
                &[(GridField::Households, 100.0), (GridField::PoorHouseholds, 10.0)],
            ),
            cell(
                2019,
                "U",
                &[(GridField::Households, 10.0), (GridField::PoorHouseholds, 5.0)],
            ),
        ];
        let records = aggregate_units(&cells, &full(&[2019]));
        assert_eq!(records.len(), 1);

        let rate = records[0].indicators.get(Indicator::PovertyRate).unwrap();
        let weighted = (10.0 + 5.0) / (100.0 + 10.0) * 100.0;
        let averaged = f64::midpoint(10.0, 50.0);
        assert!((rate - weighted).abs() < 1e-9);
        assert!((rate - averaged).abs() > 1.0);
    }

    #[test]
    fn groups_by_year_and_unit() {
        let cells = vec![
            cell(2017, "B", &[(GridField::Population, 1.0)]),
            cell(2015, "A", &[(GridField::Population, 2.0)]),
            cell(2017, "A", &[(GridField::Population, 3.0)]),
            cell(2017, "B", &[(GridField::Population, 4.0)]),
        ];
        let records = aggregate_units(&cells, &full(&[2015, 2017]));
        let keys: Vec<(u16, &str)> = records
            .iter()
            .map(|r| (r.year, r.unit_key.as_str()))
            .collect();
        assert_eq!(keys, vec![(2015, "A"), (2017, "A"), (2017, "B")]);
        assert!((records[2].counts.get(GridField::Population) - 5.0).abs() < f64::EPSILON);

        let national = aggregate_national(&cells, &full(&[2015, 2017]));
        assert_eq!(national.len(), 2);
        assert!((national[1].counts.get(GridField::Population) - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reaggregation_is_idempotent() {
        let cells = vec![
            cell(
                2019,
                "U",
                &[
                    (GridField::Households, 7.0),
                    (GridField::PoorHouseholds, 1.0),
                    (GridField::Population, 15.0),
                    (GridField::IncomeSum, 300_000.0),
                ],
            ),
            cell(
                2019,
                "U",
                &[
                    (GridField::Households, 3.0),
                    (GridField::PoorHouseholds, 2.0),
                    (GridField::Population, 5.0),
                    (GridField::IncomeSum, 50_000.0),
                ],
            ),
            cell(
                2019,
                "V",
                &[
                    (GridField::Households, 4.0),
                    (GridField::PoorHouseholds, 4.0),
                    (GridField::Population, 9.0),
                ],
            ),
        ];
        let presence = full(&[2019]);
        let single_pass = aggregate_units(&cells, &presence);

        let mut batched = aggregate_units(&cells[..1], &presence);
        batched.extend(aggregate_units(&cells[1..], &presence));
        let merged = reaggregate(&batched, &presence);

        assert_eq!(merged.len(), single_pass.len());
        for (a, b) in merged.iter().zip(&single_pass) {
            assert_eq!(a.unit_key, b.unit_key);
            for (indicator, value) in b.indicators.iter() {
                let other = a.indicators.get(indicator).unwrap();
                assert!(
                    (value.is_nan() && other.is_nan()) || (value - other).abs() < 1e-9,
                    "{indicator}: {value} vs {other}"
                );
            }
        }

        let again = reaggregate(&single_pass, &presence);
        let counts: Vec<Counts> = again.iter().map(|r| r.counts).collect();
        let expected: Vec<Counts> = single_pass.iter().map(|r| r.counts).collect();
        assert_eq!(counts, expected);
    }

    #[test]
    fn attaches_gravity_per_unit() {
        let cells = vec![
            cell(2015, "A", &[(GridField::Population, 1.0)]),
            cell(2019, "A", &[(GridField::Population, 1.0)]),
            cell(2019, "B", &[(GridField::Population, 1.0)]),
        ];
        let mut records = aggregate_units(&cells, &full(&[2015, 2019]));
        let distances = BTreeMap::from([("A".to_string(), 12.5)]);
        attach_gravity(&mut records, &distances);

        assert_eq!(records[0].gravity_km, Some(12.5));
        assert_eq!(records[1].gravity_km, Some(12.5));
        assert_eq!(records[2].gravity_km, None);
    }

    #[test]
    fn missing_presence_omits_indicators() {
        let cells = vec![cell(2015, "A", &[(GridField::Population, 1.0)])];
        let records = aggregate_units(&cells, &PresenceByYear::new());
        assert!(records[0].indicators.is_empty());
    }
}
