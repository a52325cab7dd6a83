//! Tax kernel: federal, state, capital-gains, NIIT, additional Medicare,
//! AMT, IRMAA, and ACA reconciliation for one year's income decomposition.

pub mod aca;
pub mod federal;
pub mod irmaa;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::model::params::{FilingStatus, ItemizationOptions};
pub use aca::AcaReconInput;
pub use federal::TaxBracket;
pub use irmaa::IrmaaResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionType {
    Standard,
    Itemized,
}

/// One year's income decomposition, as seen by the kernel.
#[derive(Debug, Clone)]
pub struct TaxYearInput<'a> {
    pub year: i32,
    pub filing_status: FilingStatus,
    pub state: &'a str,
    /// Ordinary income excluding Social Security and capital gains
    /// (tax-deferred withdrawals, pension, wages, part-time).
    pub ordinary_income: f64,
    pub capital_gains: f64,
    pub social_security_gross: f64,
    pub pension_income: f64,
    pub earned_income: f64,
    pub age: u8,
    pub spouse_age: Option<u8>,
    pub itemization: Option<&'a ItemizationOptions>,
    /// MAGI from two years earlier, for IRMAA. The caller owns the
    /// lookback; the kernel never peeks at current-year MAGI for IRMAA.
    pub magi_two_years_prior: Option<f64>,
    pub aca: Option<AcaReconInput>,
}

/// Full kernel output.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxComputation {
    pub federal_tax: f64,
    pub state_tax: f64,
    pub capital_gains_tax: f64,
    pub niit_tax: f64,
    pub additional_medicare_tax: f64,
    pub amt_tax: f64,
    pub total_tax: f64,
    pub deduction_type: DeductionType,
    pub deduction_amount: f64,
    pub taxable_ordinary_income: f64,
    pub taxable_capital_gains: f64,
    pub taxable_social_security: f64,
    pub modified_agi: f64,
    pub irmaa: IrmaaResult,
    /// Positive = repayment owed, negative = additional credit.
    pub aca_reconciliation: f64,
    /// Combined federal + state marginal rate at the taxable income level.
    pub marginal_rate: f64,
    /// The state had no configuration entry; tax degraded to zero.
    pub state_missing: bool,
}

/// SALT itemized-deduction cap.
const SALT_CAP: f64 = 10_000.0;
/// Medical expenses deduct only above this fraction of AGI.
const MEDICAL_AGI_FLOOR: f64 = 0.075;

/// Compute all tax components for one year. Pure; the 13-step order is
/// load-bearing (SS taxability feeds AGI, AGI feeds deductions, the
/// ordinary tax feeds LTCG stacking and AMT).
#[must_use]
pub fn compute_taxes(input: &TaxYearInput<'_>) -> TaxComputation {
    let filing = input.filing_status;

    // 1. Taxable Social Security from provisional income.
    let other_income = input.ordinary_income + input.capital_gains;
    let taxable_ss =
        federal::taxable_social_security(input.social_security_gross, other_income, filing);

    // 2. AGI.
    let agi = input.ordinary_income + input.capital_gains + taxable_ss;

    // 3-4. Deduction: standard (plus senior additional) vs itemized.
    let standard = federal::standard_deduction(input.year, filing)
        + federal::senior_additional_deduction(input.year, filing, input.age, input.spouse_age);
    let itemized = input.itemization.map_or(0.0, |opts| {
        opts.salt_paid.min(SALT_CAP)
            + opts.mortgage_interest
            + opts.charitable_gifts
            + (opts.medical_expenses - MEDICAL_AGI_FLOOR * agi).max(0.0)
            + opts.other_itemized
    });
    let force_itemized = input
        .itemization
        .and_then(|opts| opts.use_itemized)
        .unwrap_or(false);
    let (deduction_type, deduction_amount) = if force_itemized || itemized > standard {
        (DeductionType::Itemized, itemized)
    } else {
        (DeductionType::Standard, standard)
    };

    // 5. QBI on top of the deduction.
    let pre_qbi = (input.ordinary_income + taxable_ss - deduction_amount).max(0.0);
    let qbi = input
        .itemization
        .map_or(0.0, |opts| federal::qbi_deduction(opts.qbi_income, pre_qbi));
    let taxable_ordinary = (pre_qbi - qbi).max(0.0);

    // 6. Federal ordinary tax.
    let brackets = federal::ordinary_brackets(input.year, filing);
    let federal_tax = federal::bracket_tax(taxable_ordinary, &brackets);

    // 7. LTCG stacked on ordinary. Deduction left over after sheltering
    // ordinary income shelters gains.
    let leftover_deduction =
        (deduction_amount - (input.ordinary_income + taxable_ss)).max(0.0);
    let taxable_gains = (input.capital_gains - leftover_deduction).max(0.0);
    let capital_gains_tax =
        federal::ltcg_tax(taxable_ordinary, taxable_gains, input.year, filing);

    // 8-9. Surtaxes.
    let niit_tax = federal::niit(taxable_gains, agi, filing);
    let additional_medicare_tax = federal::additional_medicare(input.earned_income, filing);

    // 10. AMT.
    let amt_tax = federal::amt(taxable_ordinary, taxable_gains, federal_tax, input.year, filing);

    // 11. IRMAA from the two-year lookback MAGI.
    let irmaa = irmaa::irmaa_surcharge(
        input.magi_two_years_prior.unwrap_or(0.0),
        filing,
        input.year,
        input.age,
    );

    // 12. ACA reconciliation against current-year MAGI. The kernel's sign
    // convention is "positive = tax owed"; the PTC helper returns
    // "positive = credit due".
    let aca_reconciliation = input
        .aca
        .as_ref()
        .map_or(0.0, |aca| -aca::reconcile_ptc(aca, agi, input.state, filing));

    // 13. State overlay; missing entry degrades to zero.
    let state_input = state::StateTaxInput {
        filing,
        ordinary_income: input.ordinary_income,
        capital_gains: input.capital_gains,
        social_security_gross: input.social_security_gross,
        taxable_social_security_federal: taxable_ss,
        pension_income: input.pension_income,
        age: input.age,
        spouse_age: input.spouse_age,
    };
    let (state_tax, state_missing) = match state::compute_state_tax(input.state, &state_input) {
        Some(tax) => (tax, false),
        None => (0.0, true),
    };

    let total_tax = federal_tax
        + state_tax
        + capital_gains_tax
        + niit_tax
        + additional_medicare_tax
        + amt_tax
        + aca_reconciliation.max(0.0);

    let marginal_rate = combined_marginal_rate(input, taxable_ordinary, &brackets);

    TaxComputation {
        federal_tax,
        state_tax,
        capital_gains_tax,
        niit_tax,
        additional_medicare_tax,
        amt_tax,
        total_tax,
        deduction_type,
        deduction_amount,
        taxable_ordinary_income: taxable_ordinary,
        taxable_capital_gains: taxable_gains,
        taxable_social_security: taxable_ss,
        modified_agi: agi,
        irmaa,
        aca_reconciliation,
        marginal_rate,
        state_missing,
    }
}

fn combined_marginal_rate(
    input: &TaxYearInput<'_>,
    taxable_ordinary: f64,
    brackets: &[TaxBracket],
) -> f64 {
    let federal = federal::marginal_rate(taxable_ordinary, brackets);
    let state = state::state_config(input.state)
        .filter(|c| c.has_income_tax)
        .map_or(0.0, |config| {
            let state_brackets = match input.filing_status {
                FilingStatus::Married => &config.brackets_married,
                _ => &config.brackets_single,
            };
            federal::marginal_rate(taxable_ordinary, state_brackets)
        });
    (federal + state).min(0.60)
}
