//! State income-tax overlay.
//!
//! Built-in minimal configuration set keyed by state abbreviation. A state
//! with no entry degrades to no state tax (the caller records a warning).
//! State rules cover Social Security taxability, pension exemptions, and
//! senior standard deductions.

use rustc_hash::FxHashMap;
use std::sync::OnceLock;

use crate::model::params::FilingStatus;
use crate::taxes::federal::{TaxBracket, bracket_tax};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateStandardDeduction {
    pub single: f64,
    pub married: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RetireeRules {
    /// Pension/retirement income excluded per person, once past the age
    /// threshold.
    pub pension_exemption: f64,
    pub social_security_taxed: bool,
    pub age_threshold: u8,
    /// Extra per-person deduction for seniors.
    pub senior_deduction: f64,
}

#[derive(Debug, Clone)]
pub struct StateTaxConfig {
    pub name: &'static str,
    pub has_income_tax: bool,
    pub standard_deduction: StateStandardDeduction,
    pub brackets_single: Vec<TaxBracket>,
    pub brackets_married: Vec<TaxBracket>,
    pub retiree: RetireeRules,
}

impl StateTaxConfig {
    fn no_tax(name: &'static str) -> Self {
        Self {
            name,
            has_income_tax: false,
            standard_deduction: StateStandardDeduction {
                single: 0.0,
                married: 0.0,
            },
            brackets_single: Vec::new(),
            brackets_married: Vec::new(),
            retiree: RetireeRules::default(),
        }
    }

    fn flat(
        name: &'static str,
        rate: f64,
        deduction: StateStandardDeduction,
        retiree: RetireeRules,
    ) -> Self {
        Self {
            name,
            has_income_tax: true,
            standard_deduction: deduction,
            brackets_single: vec![TaxBracket {
                threshold: 0.0,
                rate,
            }],
            brackets_married: vec![TaxBracket {
                threshold: 0.0,
                rate,
            }],
            retiree,
        }
    }
}

fn bracket(threshold: f64, rate: f64) -> TaxBracket {
    TaxBracket { threshold, rate }
}

/// Built-in state table. Kept deliberately small: the common retirement
/// destinations plus the no-income-tax states.
fn build_table() -> FxHashMap<&'static str, StateTaxConfig> {
    let mut table = FxHashMap::default();

    for state in ["FL", "TX", "WA", "NV", "TN", "SD", "WY", "AK", "NH"] {
        table.insert(state, StateTaxConfig::no_tax(state));
    }

    table.insert(
        "CA",
        StateTaxConfig {
            name: "California",
            has_income_tax: true,
            standard_deduction: StateStandardDeduction {
                single: 5_540.0,
                married: 11_080.0,
            },
            brackets_single: vec![
                bracket(0.0, 0.01),
                bracket(10_756.0, 0.02),
                bracket(25_499.0, 0.04),
                bracket(40_245.0, 0.06),
                bracket(55_866.0, 0.08),
                bracket(70_606.0, 0.093),
                bracket(360_659.0, 0.103),
                bracket(432_787.0, 0.113),
                bracket(721_314.0, 0.123),
            ],
            brackets_married: vec![
                bracket(0.0, 0.01),
                bracket(21_512.0, 0.02),
                bracket(50_998.0, 0.04),
                bracket(80_490.0, 0.06),
                bracket(111_732.0, 0.08),
                bracket(141_212.0, 0.093),
                bracket(721_318.0, 0.103),
                bracket(865_574.0, 0.113),
                bracket(1_442_628.0, 0.123),
            ],
            retiree: RetireeRules {
                pension_exemption: 0.0,
                social_security_taxed: false,
                age_threshold: 65,
                senior_deduction: 149.0,
            },
        },
    );

    table.insert(
        "NY",
        StateTaxConfig {
            name: "New York",
            has_income_tax: true,
            standard_deduction: StateStandardDeduction {
                single: 8_000.0,
                married: 16_050.0,
            },
            brackets_single: vec![
                bracket(0.0, 0.04),
                bracket(8_500.0, 0.045),
                bracket(11_700.0, 0.0525),
                bracket(13_900.0, 0.055),
                bracket(80_650.0, 0.06),
                bracket(215_400.0, 0.0685),
                bracket(1_077_550.0, 0.0965),
            ],
            brackets_married: vec![
                bracket(0.0, 0.04),
                bracket(17_150.0, 0.045),
                bracket(23_600.0, 0.0525),
                bracket(27_900.0, 0.055),
                bracket(161_550.0, 0.06),
                bracket(323_200.0, 0.0685),
                bracket(2_155_350.0, 0.0965),
            ],
            retiree: RetireeRules {
                pension_exemption: 20_000.0,
                social_security_taxed: false,
                age_threshold: 59,
                senior_deduction: 0.0,
            },
        },
    );

    table.insert(
        "PA",
        StateTaxConfig::flat(
            "Pennsylvania",
            0.0307,
            StateStandardDeduction {
                single: 0.0,
                married: 0.0,
            },
            RetireeRules {
                // PA exempts retirement income entirely past 59.5.
                pension_exemption: f64::INFINITY,
                social_security_taxed: false,
                age_threshold: 60,
                senior_deduction: 0.0,
            },
        ),
    );

    table.insert(
        "IL",
        StateTaxConfig::flat(
            "Illinois",
            0.0495,
            StateStandardDeduction {
                single: 2_425.0,
                married: 4_850.0,
            },
            RetireeRules {
                pension_exemption: f64::INFINITY,
                social_security_taxed: false,
                age_threshold: 0,
                senior_deduction: 1_000.0,
            },
        ),
    );

    table.insert(
        "MA",
        StateTaxConfig::flat(
            "Massachusetts",
            0.05,
            StateStandardDeduction {
                single: 0.0,
                married: 0.0,
            },
            RetireeRules {
                pension_exemption: 0.0,
                social_security_taxed: false,
                age_threshold: 65,
                senior_deduction: 700.0,
            },
        ),
    );

    table.insert(
        "NJ",
        StateTaxConfig {
            name: "New Jersey",
            has_income_tax: true,
            standard_deduction: StateStandardDeduction {
                single: 0.0,
                married: 0.0,
            },
            brackets_single: vec![
                bracket(0.0, 0.014),
                bracket(20_000.0, 0.0175),
                bracket(35_000.0, 0.035),
                bracket(40_000.0, 0.05525),
                bracket(75_000.0, 0.0637),
                bracket(500_000.0, 0.0897),
                bracket(1_000_000.0, 0.1075),
            ],
            brackets_married: vec![
                bracket(0.0, 0.014),
                bracket(20_000.0, 0.0175),
                bracket(50_000.0, 0.0245),
                bracket(70_000.0, 0.035),
                bracket(80_000.0, 0.05525),
                bracket(150_000.0, 0.0637),
                bracket(500_000.0, 0.0897),
                bracket(1_000_000.0, 0.1075),
            ],
            retiree: RetireeRules {
                pension_exemption: 75_000.0,
                social_security_taxed: false,
                age_threshold: 62,
                senior_deduction: 1_000.0,
            },
        },
    );

    table.insert(
        "AZ",
        StateTaxConfig::flat(
            "Arizona",
            0.025,
            StateStandardDeduction {
                single: 14_600.0,
                married: 29_200.0,
            },
            RetireeRules {
                pension_exemption: 2_500.0,
                social_security_taxed: false,
                age_threshold: 0,
                senior_deduction: 0.0,
            },
        ),
    );

    table.insert(
        "NC",
        StateTaxConfig::flat(
            "North Carolina",
            0.0425,
            StateStandardDeduction {
                single: 12_750.0,
                married: 25_500.0,
            },
            RetireeRules::default(),
        ),
    );

    table.insert(
        "CO",
        StateTaxConfig::flat(
            "Colorado",
            0.044,
            StateStandardDeduction {
                single: 14_600.0,
                married: 29_200.0,
            },
            RetireeRules {
                pension_exemption: 24_000.0,
                // SS is taxable but folded into the pension exemption for
                // 65+, which this model approximates with the exemption.
                social_security_taxed: true,
                age_threshold: 65,
                senior_deduction: 0.0,
            },
        ),
    );

    table.insert(
        "MN",
        StateTaxConfig {
            name: "Minnesota",
            has_income_tax: true,
            standard_deduction: StateStandardDeduction {
                single: 14_575.0,
                married: 29_150.0,
            },
            brackets_single: vec![
                bracket(0.0, 0.0535),
                bracket(31_690.0, 0.068),
                bracket(104_090.0, 0.0785),
                bracket(193_240.0, 0.0985),
            ],
            brackets_married: vec![
                bracket(0.0, 0.0535),
                bracket(46_330.0, 0.068),
                bracket(184_040.0, 0.0785),
                bracket(321_450.0, 0.0985),
            ],
            retiree: RetireeRules {
                pension_exemption: 0.0,
                social_security_taxed: true,
                age_threshold: 65,
                senior_deduction: 0.0,
            },
        },
    );

    table.insert(
        "VA",
        StateTaxConfig {
            name: "Virginia",
            has_income_tax: true,
            standard_deduction: StateStandardDeduction {
                single: 8_000.0,
                married: 16_000.0,
            },
            brackets_single: vec![
                bracket(0.0, 0.02),
                bracket(3_000.0, 0.03),
                bracket(5_000.0, 0.05),
                bracket(17_000.0, 0.0575),
            ],
            brackets_married: vec![
                bracket(0.0, 0.02),
                bracket(3_000.0, 0.03),
                bracket(5_000.0, 0.05),
                bracket(17_000.0, 0.0575),
            ],
            retiree: RetireeRules {
                pension_exemption: 12_000.0,
                social_security_taxed: false,
                age_threshold: 65,
                senior_deduction: 800.0,
            },
        },
    );

    table.insert(
        "GA",
        StateTaxConfig::flat(
            "Georgia",
            0.0539,
            StateStandardDeduction {
                single: 12_000.0,
                married: 24_000.0,
            },
            RetireeRules {
                pension_exemption: 65_000.0,
                social_security_taxed: false,
                age_threshold: 65,
                senior_deduction: 1_300.0,
            },
        ),
    );

    table
}

fn table() -> &'static FxHashMap<&'static str, StateTaxConfig> {
    static TABLE: OnceLock<FxHashMap<&'static str, StateTaxConfig>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

#[must_use]
pub fn state_config(state: &str) -> Option<&'static StateTaxConfig> {
    table().get(state)
}

/// Inputs the state overlay needs from the federal computation.
#[derive(Debug, Clone, Copy)]
pub struct StateTaxInput {
    pub filing: FilingStatus,
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub social_security_gross: f64,
    pub taxable_social_security_federal: f64,
    pub pension_income: f64,
    pub age: u8,
    pub spouse_age: Option<u8>,
}

/// State tax for a configured state. `None` means the state was not found
/// (caller degrades to zero with a warning).
#[must_use]
pub fn compute_state_tax(state: &str, input: &StateTaxInput) -> Option<f64> {
    let config = state_config(state)?;
    if !config.has_income_tax {
        return Some(0.0);
    }

    let retiree = &config.retiree;
    let seniors = qualifying_seniors(input, retiree.age_threshold);

    // State-taxable Social Security: states either exempt it entirely or
    // follow the federal taxable portion.
    let taxable_ss = if retiree.social_security_taxed {
        input.taxable_social_security_federal
    } else {
        0.0
    };

    let pension_exclusion = if retiree.pension_exemption.is_infinite() {
        input.pension_income + tax_deferred_income(input)
    } else {
        (retiree.pension_exemption * f64::from(seniors.max(1))).min(input.pension_income)
    };

    let deduction = match input.filing {
        FilingStatus::Married => config.standard_deduction.married,
        _ => config.standard_deduction.single,
    } + retiree.senior_deduction * f64::from(seniors);

    let taxable = (input.ordinary_income + input.capital_gains + taxable_ss
        - pension_exclusion
        - deduction)
        .max(0.0);

    let brackets = match input.filing {
        FilingStatus::Married => &config.brackets_married,
        _ => &config.brackets_single,
    };
    Some(bracket_tax(taxable, brackets))
}

fn qualifying_seniors(input: &StateTaxInput, age_threshold: u8) -> u8 {
    let mut count = 0;
    if input.age >= age_threshold {
        count += 1;
    }
    if input.spouse_age.is_some_and(|a| a >= age_threshold) {
        count += 1;
    }
    count
}

/// Full-exclusion states (PA, IL) exempt all tax-deferred withdrawals, not
/// just labelled pensions; approximate that as the ordinary income net of
/// earned income.
fn tax_deferred_income(input: &StateTaxInput) -> f64 {
    (input.ordinary_income - input.pension_income).max(0.0)
}
