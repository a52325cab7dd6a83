//! ACA premium tax credit reconciliation.
//!
//! Pre-Medicare retirees buying marketplace coverage reconcile advance
//! credits against the allowed PTC for the year's actual MAGI. A negative
//! reconciliation is a repayment (capped below 400% FPL); a positive one
//! is additional credit.

use crate::model::params::FilingStatus;

/// Federal poverty level for a household (2024 guidelines, used for 2025
/// coverage). Alaska and Hawaii have their own schedules.
#[must_use]
pub fn federal_poverty_level(household_size: u8, state: &str) -> f64 {
    let size = f64::from(household_size.max(1));
    let (first, additional) = match state {
        "AK" => (18_810.0, 6_730.0),
        "HI" => (17_310.0, 6_190.0),
        _ => (15_060.0, 5_380.0),
    };
    first + additional * (size - 1.0)
}

/// Expected-contribution percentage on the post-ARPA sliding scale,
/// linearly interpolated within each band and capped at 8.5%.
#[must_use]
pub fn applicable_percentage(fpl_ratio: f64) -> f64 {
    let points: [(f64, f64); 6] = [
        (1.50, 0.000),
        (2.00, 0.020),
        (2.50, 0.040),
        (3.00, 0.060),
        (4.00, 0.085),
        (f64::INFINITY, 0.085),
    ];
    if fpl_ratio <= points[0].0 {
        return 0.0;
    }
    let mut prev = points[0];
    for point in &points[1..] {
        if fpl_ratio <= point.0 {
            let span = point.0 - prev.0;
            let t = if span.is_finite() && span > 0.0 {
                (fpl_ratio - prev.0) / span
            } else {
                1.0
            };
            return prev.1 + t * (point.1 - prev.1);
        }
        prev = *point;
    }
    0.085
}

/// Repayment cap for excess advance credits, by FPL ratio and filing
/// status. Households at or above 400% FPL repay in full.
#[must_use]
pub fn repayment_cap(fpl_ratio: f64, filing: FilingStatus) -> f64 {
    let single = matches!(filing, FilingStatus::Single);
    if fpl_ratio < 2.0 {
        if single { 375.0 } else { 750.0 }
    } else if fpl_ratio < 3.0 {
        if single { 950.0 } else { 1_900.0 }
    } else if fpl_ratio < 4.0 {
        if single { 1_575.0 } else { 3_150.0 }
    } else {
        f64::INFINITY
    }
}

/// ACA inputs for one tax year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcaReconInput {
    pub household_size: u8,
    pub benchmark_annual_premium: f64,
    pub aptc_applied: f64,
    pub coverage_months: u8,
}

/// PTC reconciliation delta: positive = additional credit to the filer,
/// negative = repayment owed (already capped).
#[must_use]
pub fn reconcile_ptc(
    input: &AcaReconInput,
    magi: f64,
    state: &str,
    filing: FilingStatus,
) -> f64 {
    let fpl = federal_poverty_level(input.household_size, state);
    let ratio = if fpl > 0.0 { magi / fpl } else { f64::INFINITY };
    let expected_contribution = applicable_percentage(ratio) * magi.max(0.0);
    let months = f64::from(input.coverage_months.min(12)) / 12.0;
    let allowed_ptc = (input.benchmark_annual_premium - expected_contribution).max(0.0) * months;

    let delta = allowed_ptc - input.aptc_applied;
    if delta >= 0.0 {
        delta
    } else {
        -((-delta).min(repayment_cap(ratio, filing)))
    }
}
