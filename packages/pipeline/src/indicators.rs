//! Indicator engine.
//!
//! Every rate and share goes through [`safe_divide`]. Indicators are only
//! ever derived from summed [`Counts`], never averaged across cells.

use wealth_map_grid_models::{
    Counts, DerivedTotals, FieldPresence, GridField, Indicator, IndicatorValues,
};

/// Value substituted for an undefined ratio.
pub const DEFAULT_FILL: f64 = f64::NAN;

/// Divides `numerator` by `denominator`, returning `fill` when the
/// denominator is zero, NaN, or infinite, or when the quotient is not
/// finite.
#[must_use]
pub fn safe_divide(numerator: f64, denominator: f64, fill: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return fill;
    }
    let quotient = numerator / denominator;
    if quotient.is_finite() { quotient } else { fill }
}

/// Element-wise [`safe_divide`]. The output has the length of the shorter
/// input.
#[must_use]
pub fn safe_divide_slice(numerators: &[f64], denominators: &[f64], fill: f64) -> Vec<f64> {
    numerators
        .iter()
        .zip(denominators)
        .map(|(n, d)| safe_divide(*n, *d, fill))
        .collect()
}

/// `numerator / denominator × 100`, clamped to `[0, 100]`. Undefined stays
/// NaN.
#[must_use]
pub fn percentage(numerator: f64, denominator: f64) -> f64 {
    clamp_rate(safe_divide(numerator, denominator, DEFAULT_FILL) * 100.0)
}

/// Clamps a rate into `[0, 100]`, leaving NaN untouched.
#[must_use]
pub fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() { value } else { value.clamp(0.0, 100.0) }
}

/// Helper sums carried on every aggregated record.
#[must_use]
pub fn derive_totals(counts: &Counts) -> DerivedTotals {
    DerivedTotals {
        pop_youth: counts.sum_of(GridField::YOUTH),
        pop_working: counts.sum_of(GridField::WORKING_AGE),
        pop_senior: counts.sum_of(GridField::SENIOR),
        total_housing_est: counts.sum_of(GridField::HOUSING_ERAS),
    }
}

/// Denominator of the social housing rate: the estimated dwelling stock when
/// it is known, the household count otherwise.
#[must_use]
pub fn social_housing_denominator(counts: &Counts) -> f64 {
    let housing = counts.sum_of(GridField::HOUSING_ERAS);
    if housing > 0.0 {
        housing
    } else {
        counts.get(GridField::Households)
    }
}

/// Derives every indicator whose source fields were published.
///
/// Indicators needing an unpublished field are omitted; indicators whose
/// denominator is degenerate are present as NaN.
#[must_use]
pub fn derive_indicators(counts: &Counts, presence: &FieldPresence) -> IndicatorValues {
    let totals = derive_totals(counts);
    let population = counts.get(GridField::Population);
    let households = counts.get(GridField::Households);
    let has = |field| presence.contains(field);
    let per_household = |field| percentage(counts.get(field), households);

    let mut values = IndicatorValues::default();

    if has(GridField::IncomeSum) {
        values.insert(
            Indicator::AvgIncome,
            safe_divide(counts.get(GridField::IncomeSum), population, DEFAULT_FILL),
        );
    }

    if has(GridField::Households) {
        for (indicator, field) in [
            (Indicator::PovertyRate, GridField::PoorHouseholds),
            (Indicator::OwnershipRate, GridField::OwnerHouseholds),
            (Indicator::SingleParentPct, GridField::SingleParent),
            (Indicator::SinglePersonPct, GridField::SinglePerson),
        ] {
            if has(field) {
                values.insert(indicator, per_household(field));
            }
        }
    }

    if has(GridField::SocialHousing) {
        values.insert(
            Indicator::SocialHousingRate,
            percentage(
                counts.get(GridField::SocialHousing),
                social_housing_denominator(counts),
            ),
        );
    }

    if has(GridField::Population) {
        for (indicator, group, sum) in [
            (Indicator::YouthPct, GridField::YOUTH, totals.pop_youth),
            (Indicator::WorkingAgePct, GridField::WORKING_AGE, totals.pop_working),
            (Indicator::SeniorPct, GridField::SENIOR, totals.pop_senior),
        ] {
            if presence.any_of(group) {
                values.insert(indicator, percentage(sum, population));
            }
        }
    }

    for (indicator, field) in [
        (Indicator::OldHousingPct, GridField::BuiltBefore1945),
        (Indicator::NewHousingPct, GridField::BuiltAfter1990),
    ] {
        if has(field) {
            values.insert(
                indicator,
                percentage(counts.get(field), totals.total_housing_est),
            );
        }
    }

    if presence.all_of(&[GridField::Houses, GridField::Apartments]) {
        let typed = counts.get(GridField::Houses) + counts.get(GridField::Apartments);
        values.insert(
            Indicator::HousesPct,
            percentage(counts.get(GridField::Houses), typed),
        );
        values.insert(
            Indicator::ApartmentsPct,
            percentage(counts.get(GridField::Apartments), typed),
        );
    }

    values
}
