//! Federal tax tables and component calculations.
//!
//! Bracket tables are built in for 2024 and 2025; later years project the
//! 2025 thresholds at 2% per year, matching the engine's cost-of-living
//! assumption. All functions are pure.

use crate::model::params::FilingStatus;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxBracket {
    /// Lower bound of the bracket.
    pub threshold: f64,
    pub rate: f64,
}

const RATES: [f64; 7] = [0.10, 0.12, 0.22, 0.24, 0.32, 0.35, 0.37];

// Bracket lower bounds by filing status (2024 and 2025).
const SINGLE_2024: [f64; 7] = [0.0, 11_600.0, 47_150.0, 100_525.0, 191_950.0, 243_725.0, 609_350.0];
const SINGLE_2025: [f64; 7] = [0.0, 11_925.0, 48_475.0, 103_350.0, 197_300.0, 250_525.0, 626_350.0];
const MARRIED_2024: [f64; 7] =
    [0.0, 23_200.0, 94_300.0, 201_050.0, 383_900.0, 487_450.0, 731_200.0];
const MARRIED_2025: [f64; 7] =
    [0.0, 23_850.0, 96_950.0, 206_700.0, 394_600.0, 501_050.0, 751_600.0];
const HOH_2024: [f64; 7] = [0.0, 16_550.0, 63_100.0, 100_500.0, 191_950.0, 243_700.0, 609_350.0];
const HOH_2025: [f64; 7] = [0.0, 17_000.0, 64_850.0, 103_350.0, 197_300.0, 250_500.0, 626_350.0];

/// Threshold growth applied beyond the last built-in year.
const PROJECTION_GROWTH: f64 = 0.02;
const LAST_TABLE_YEAR: i32 = 2025;

/// Inflation projection factor for a tax year.
#[must_use]
pub fn projection_factor(year: i32) -> f64 {
    if year <= LAST_TABLE_YEAR {
        1.0
    } else {
        (1.0 + PROJECTION_GROWTH).powi(year - LAST_TABLE_YEAR)
    }
}

/// Ordinary-income brackets for a year and filing status.
#[must_use]
pub fn ordinary_brackets(year: i32, filing: FilingStatus) -> Vec<TaxBracket> {
    let thresholds = match (filing, year) {
        (FilingStatus::Single, ..=2024) => &SINGLE_2024,
        (FilingStatus::Single, _) => &SINGLE_2025,
        (FilingStatus::Married, ..=2024) => &MARRIED_2024,
        (FilingStatus::Married, _) => &MARRIED_2025,
        (FilingStatus::HeadOfHousehold, ..=2024) => &HOH_2024,
        (FilingStatus::HeadOfHousehold, _) => &HOH_2025,
    };
    let factor = projection_factor(year);
    thresholds
        .iter()
        .zip(RATES.iter())
        .map(|(t, r)| TaxBracket {
            threshold: t * factor,
            rate: *r,
        })
        .collect()
}

/// Progressive tax over bracket lower bounds.
#[must_use]
pub fn bracket_tax(income: f64, brackets: &[TaxBracket]) -> f64 {
    if income <= 0.0 || brackets.is_empty() {
        return 0.0;
    }
    let mut tax = 0.0;
    for (i, bracket) in brackets.iter().enumerate() {
        if income <= bracket.threshold {
            break;
        }
        let upper = brackets
            .get(i + 1)
            .map(|b| b.threshold)
            .unwrap_or(f64::INFINITY);
        tax += (income.min(upper) - bracket.threshold) * bracket.rate;
    }
    tax
}

/// Marginal rate at an income level.
#[must_use]
pub fn marginal_rate(income: f64, brackets: &[TaxBracket]) -> f64 {
    let mut rate = brackets.first().map(|b| b.rate).unwrap_or(0.0);
    for bracket in brackets {
        if income >= bracket.threshold {
            rate = bracket.rate;
        }
    }
    rate
}

/// Standard deduction by filing status.
#[must_use]
pub fn standard_deduction(year: i32, filing: FilingStatus) -> f64 {
    let base = match (filing, year) {
        (FilingStatus::Single, ..=2024) => 14_600.0,
        (FilingStatus::Single, _) => 15_000.0,
        (FilingStatus::Married, ..=2024) => 29_200.0,
        (FilingStatus::Married, _) => 30_000.0,
        (FilingStatus::HeadOfHousehold, ..=2024) => 21_900.0,
        (FilingStatus::HeadOfHousehold, _) => 22_500.0,
    };
    base * projection_factor(year)
}

/// Additional standard deduction for age 65+, doubled when both spouses
/// qualify on a married return.
#[must_use]
pub fn senior_additional_deduction(
    year: i32,
    filing: FilingStatus,
    age: u8,
    spouse_age: Option<u8>,
) -> f64 {
    let per_person = match (filing, year) {
        (FilingStatus::Married, ..=2024) => 1_550.0,
        (FilingStatus::Married, _) => 1_600.0,
        (_, ..=2024) => 1_950.0,
        (_, _) => 2_000.0,
    } * projection_factor(year);

    let mut qualifying = 0.0;
    if age >= 65 {
        qualifying += 1.0;
    }
    if filing.is_married() && spouse_age.is_some_and(|a| a >= 65) {
        qualifying += 1.0;
    }
    per_person * qualifying
}

/// Taxable portion of Social Security benefits from provisional income.
#[must_use]
pub fn taxable_social_security(gross_ss: f64, other_income: f64, filing: FilingStatus) -> f64 {
    if gross_ss <= 0.0 {
        return 0.0;
    }
    let (lower, upper) = match filing {
        FilingStatus::Married => (32_000.0, 44_000.0),
        _ => (25_000.0, 34_000.0),
    };
    let provisional = other_income + 0.5 * gross_ss;
    if provisional <= lower {
        0.0
    } else if provisional <= upper {
        (0.5 * (provisional - lower)).min(0.5 * gross_ss)
    } else {
        let tier_one = (0.5 * (upper - lower)).min(0.5 * gross_ss);
        (0.85 * (provisional - upper) + tier_one).min(0.85 * gross_ss)
    }
}

/// Long-term capital-gains 0/15/20 breakpoints (top of 0% band, top of 15%
/// band).
#[must_use]
pub fn ltcg_breakpoints(year: i32, filing: FilingStatus) -> (f64, f64) {
    let (zero_top, fifteen_top) = match (filing, year) {
        (FilingStatus::Single, ..=2024) => (47_025.0, 518_900.0),
        (FilingStatus::Single, _) => (48_350.0, 533_400.0),
        (FilingStatus::Married, ..=2024) => (94_050.0, 583_750.0),
        (FilingStatus::Married, _) => (96_700.0, 600_050.0),
        (FilingStatus::HeadOfHousehold, ..=2024) => (63_000.0, 551_350.0),
        (FilingStatus::HeadOfHousehold, _) => (64_750.0, 566_700.0),
    };
    let factor = projection_factor(year);
    (zero_top * factor, fifteen_top * factor)
}

/// LTCG tax with gains stacked on top of taxable ordinary income.
#[must_use]
pub fn ltcg_tax(taxable_ordinary: f64, capital_gains: f64, year: i32, filing: FilingStatus) -> f64 {
    if capital_gains <= 0.0 {
        return 0.0;
    }
    let (zero_top, fifteen_top) = ltcg_breakpoints(year, filing);
    let stack_bottom = taxable_ordinary.max(0.0);
    let stack_top = stack_bottom + capital_gains;

    let in_zero = (stack_top.min(zero_top) - stack_bottom).max(0.0);
    let in_fifteen = (stack_top.min(fifteen_top) - stack_bottom.max(zero_top)).max(0.0);
    let in_twenty = (stack_top - stack_bottom.max(fifteen_top)).max(0.0);
    debug_assert!((in_zero + in_fifteen + in_twenty - capital_gains).abs() < 1e-6);

    in_fifteen * 0.15 + in_twenty * 0.20
}

/// Net investment income tax threshold (not inflation indexed).
#[must_use]
pub fn niit_threshold(filing: FilingStatus) -> f64 {
    match filing {
        FilingStatus::Married => 250_000.0,
        _ => 200_000.0,
    }
}

/// NIIT: 3.8% of the lesser of net investment income and the MAGI excess
/// over the threshold.
#[must_use]
pub fn niit(capital_gains: f64, magi: f64, filing: FilingStatus) -> f64 {
    let threshold = niit_threshold(filing);
    if magi <= threshold || capital_gains <= 0.0 {
        return 0.0;
    }
    0.038 * capital_gains.min(magi - threshold)
}

/// Additional Medicare tax: 0.9% of earned income over the threshold.
#[must_use]
pub fn additional_medicare(earned_income: f64, filing: FilingStatus) -> f64 {
    let threshold = match filing {
        FilingStatus::Married => 250_000.0,
        _ => 200_000.0,
    };
    0.009 * (earned_income - threshold).max(0.0)
}

/// QBI deduction: 20% of qualified business income, capped at 20% of
/// taxable ordinary income.
#[must_use]
pub fn qbi_deduction(qbi_income: f64, taxable_ordinary: f64) -> f64 {
    if qbi_income <= 0.0 {
        return 0.0;
    }
    (0.20 * qbi_income).min(0.20 * taxable_ordinary.max(0.0))
}

/// Alternative minimum tax on the simplified AMTI = taxable ordinary +
/// LTCG base. Returns the excess of tentative minimum tax over the regular
/// federal tax.
#[must_use]
pub fn amt(
    taxable_ordinary: f64,
    capital_gains: f64,
    regular_federal_tax: f64,
    year: i32,
    filing: FilingStatus,
) -> f64 {
    let factor = projection_factor(year);
    let (exemption, phaseout_start) = match (filing, year) {
        (FilingStatus::Married, ..=2024) => (133_300.0, 1_218_700.0),
        (FilingStatus::Married, _) => (137_000.0 * factor, 1_252_700.0 * factor),
        (_, ..=2024) => (85_700.0, 609_350.0),
        (_, _) => (88_100.0 * factor, 626_350.0 * factor),
    };
    let rate_breakpoint = if year <= 2024 {
        232_600.0
    } else {
        239_100.0 * factor
    };

    let amti = taxable_ordinary.max(0.0) + capital_gains.max(0.0);
    let exemption = (exemption - 0.25 * (amti - phaseout_start).max(0.0)).max(0.0);
    let base = (amti - exemption).max(0.0);
    let tentative = if base <= rate_breakpoint {
        base * 0.26
    } else {
        rate_breakpoint * 0.26 + (base - rate_breakpoint) * 0.28
    };
    (tentative - regular_federal_tax).max(0.0)
}
