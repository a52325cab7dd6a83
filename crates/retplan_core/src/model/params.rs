//! Simulation input model: household demographics, asset buckets, cash
//! flows, market assumptions, and strategy switches.
//!
//! Everything here is a plain value type. The upstream profile format is
//! camelCase JSON, so wire-facing structs carry `rename_all = "camelCase"`.

use serde::{Deserialize, Serialize};

use crate::error::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    /// Multiplier applied to base period-table mortality.
    #[must_use]
    pub fn mortality_multiplier(self) -> f64 {
        match self {
            HealthStatus::Excellent => 0.7,
            HealthStatus::Good => 1.0,
            HealthStatus::Fair => 1.5,
            HealthStatus::Poor => 2.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    Married,
    HeadOfHousehold,
}

impl FilingStatus {
    #[must_use]
    pub fn is_married(self) -> bool {
        matches!(self, FilingStatus::Married)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalTiming {
    Start,
    Mid,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlidepathStrategy {
    Traditional,
    BondTent,
    RisingEquity,
}

/// Whether `expected_return` is a geometric (CAGR) or arithmetic (AAGR)
/// mean. The sampler converts CAGR inputs via `AAGR = CAGR + sigma^2 / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnBasis {
    Cagr,
    Aagr,
}

/// Mortality treatment for a scenario. There is no default on purpose: the
/// upstream engines disagree on which mode is canonical per profile, so the
/// caller must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MortalityMode {
    /// Stochastic annual survival draws; scenario ends at the second death.
    Stochastic,
    /// Deterministic horizon at age 93 with simplified two-year LTC shocks
    /// at ages 91-92.
    FixedHorizon93,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareType {
    Home,
    Assisted,
    Nursing,
    Memory,
}

/// Tax-treatment buckets of the household portfolio.
///
/// Invariant: `total_assets` equals the sum of the four components after
/// every mutation; `debit`/`credit`/`grow` maintain it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssetBuckets {
    pub tax_deferred: f64,
    pub tax_free: f64,
    pub capital_gains: f64,
    pub cash_equivalents: f64,
    pub total_assets: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    TaxDeferred,
    TaxFree,
    CapitalGains,
    CashEquivalents,
}

impl AssetBuckets {
    #[must_use]
    pub fn new(tax_deferred: f64, tax_free: f64, capital_gains: f64, cash_equivalents: f64) -> Self {
        Self {
            tax_deferred,
            tax_free,
            capital_gains,
            cash_equivalents,
            total_assets: tax_deferred + tax_free + capital_gains + cash_equivalents,
        }
    }

    #[must_use]
    pub fn balance(&self, kind: BucketKind) -> f64 {
        match kind {
            BucketKind::TaxDeferred => self.tax_deferred,
            BucketKind::TaxFree => self.tax_free,
            BucketKind::CapitalGains => self.capital_gains,
            BucketKind::CashEquivalents => self.cash_equivalents,
        }
    }

    /// Withdraw up to `amount`; returns what was actually available.
    pub fn debit(&mut self, kind: BucketKind, amount: f64) -> f64 {
        let slot = self.slot(kind);
        let taken = amount.min(*slot).max(0.0);
        *slot -= taken;
        self.total_assets -= taken;
        taken
    }

    pub fn credit(&mut self, kind: BucketKind, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        *self.slot(kind) += amount;
        self.total_assets += amount;
    }

    /// Apply one period's growth: `rate` to the invested buckets and
    /// `cash_rate` to cash equivalents.
    pub fn grow(&mut self, rate: f64, cash_rate: f64) {
        self.tax_deferred *= 1.0 + rate;
        self.tax_free *= 1.0 + rate;
        self.capital_gains *= 1.0 + rate;
        self.cash_equivalents *= 1.0 + cash_rate;
        self.recompute_total();
    }

    pub fn recompute_total(&mut self) {
        self.total_assets =
            self.tax_deferred + self.tax_free + self.capital_gains + self.cash_equivalents;
    }

    #[must_use]
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        let sum = self.tax_deferred + self.tax_free + self.capital_gains + self.cash_equivalents;
        (self.total_assets - sum).abs() <= tolerance
    }

    fn slot(&mut self, kind: BucketKind) -> &mut f64 {
        match kind {
            BucketKind::TaxDeferred => &mut self.tax_deferred,
            BucketKind::TaxFree => &mut self.tax_free,
            BucketKind::CapitalGains => &mut self.capital_gains,
            BucketKind::CashEquivalents => &mut self.cash_equivalents,
        }
    }
}

/// Portfolio weights over the engine's five asset classes. Must sum to ~1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub stocks: f64,
    pub intl_stocks: f64,
    pub bonds: f64,
    pub reits: f64,
    pub cash: f64,
}

impl Allocation {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.stocks + self.intl_stocks + self.bonds + self.reits + self.cash
    }

    #[must_use]
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.stocks,
            self.intl_stocks,
            self.bonds,
            self.reits,
            self.cash,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSecurityIncome {
    pub annual_benefit: f64,
    pub claim_age: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionIncome {
    pub annual_amount: f64,
    pub start_age: u8,
    /// Fraction continuing to the surviving spouse.
    #[serde(default = "default_survivor_fraction")]
    pub survivor_fraction: f64,
}

fn default_survivor_fraction() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartTimeIncome {
    pub annual_amount: f64,
    pub start_age: u8,
    pub end_age: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnuityIncome {
    pub annual_amount: f64,
    pub start_age: u8,
}

/// Income streams belonging to one spouse.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonIncome {
    pub social_security: Option<SocialSecurityIncome>,
    pub pension: Option<PensionIncome>,
    pub part_time: Option<PartTimeIncome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    pub current_age: u8,
    pub spouse_age: Option<u8>,
    pub retirement_age: u8,
    pub spouse_retirement_age: Option<u8>,
    pub life_expectancy: u8,
    pub spouse_life_expectancy: Option<u8>,
    pub gender: Gender,
    pub spouse_gender: Option<Gender>,
    pub health: HealthStatus,
    pub spouse_health: Option<HealthStatus>,
    pub filing_status: FilingStatus,
    pub birth_year: i32,
    pub spouse_birth_year: Option<i32>,
    /// Two-letter state of residence, for state tax and LTC regional costs.
    pub state: String,
}

impl Demographics {
    #[must_use]
    pub fn has_spouse(&self) -> bool {
        self.spouse_age.is_some()
    }
}

/// Explicit split of annual savings across bucket types (fractions).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSplit {
    pub tax_deferred: f64,
    pub tax_free: f64,
    pub taxable: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlows {
    pub annual_retirement_expenses: f64,
    /// Baseline annual healthcare spend once on Medicare.
    pub annual_healthcare_costs: f64,
    pub annual_savings: f64,
    pub spouse_annual_savings: Option<f64>,
    pub user_income: PersonIncome,
    pub spouse_income: Option<PersonIncome>,
    #[serde(default)]
    pub annuities: Vec<AnnuityIncome>,
    #[serde(default)]
    pub legacy_goal: f64,
    /// When present, savings are routed by these fractions instead of the
    /// default 70/20/10 tax-deferred / tax-free / taxable split.
    pub contribution_split: Option<ContributionSplit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub expected_return: f64,
    pub return_basis: ReturnBasis,
    pub return_volatility: f64,
    pub inflation_rate: f64,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LtcInsurancePolicy {
    pub daily_benefit: f64,
    pub elimination_period_days: u32,
    pub inflation_rider: bool,
    pub annual_premium: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemizationOptions {
    /// Force itemizing even when the standard deduction is larger.
    pub use_itemized: Option<bool>,
    #[serde(default)]
    pub salt_paid: f64,
    #[serde(default)]
    pub mortgage_interest: f64,
    #[serde(default)]
    pub charitable_gifts: f64,
    #[serde(default)]
    pub medical_expenses: f64,
    #[serde(default)]
    pub other_itemized: f64,
    #[serde(default)]
    pub qbi_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcaEnrollment {
    pub household_size: u8,
    pub benchmark_annual_premium: f64,
    pub aptc_applied: f64,
    pub coverage_months: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub withdrawal_rate: f64,
    pub use_guardrails: bool,
    /// Share of spending treated as essential (never cut by guardrails).
    #[serde(default = "default_essential_share")]
    pub essential_share: f64,
    pub withdrawal_timing: WithdrawalTiming,
    pub glidepath: GlidepathStrategy,
    pub mortality_mode: MortalityMode,
    /// Enable stochastic LTC episode modelling.
    #[serde(default)]
    pub model_ltc: bool,
    pub ltc_insurance: Option<LtcInsurancePolicy>,
    pub itemization: Option<ItemizationOptions>,
    pub aca: Option<AcaEnrollment>,
    /// Keep expenses in today's dollars instead of drawing inflation.
    #[serde(default)]
    pub real_dollars: bool,
    /// Retirement spending smile: -1%/yr to year 20, then +1%/yr.
    #[serde(default)]
    pub spending_smile: bool,
    /// Restrict regime-based discretionary cuts to bear/crisis regimes.
    #[serde(default)]
    pub discretionary_bear_only: bool,
    /// Benefit reduction applied to Social Security from 2033 on.
    #[serde(default = "default_ss_haircut")]
    pub social_security_haircut: f64,
    /// Annual qualified charitable distribution target (0 = none).
    #[serde(default)]
    pub qcd_annual_target: f64,
    /// Continue a scenario past the second death while assets remain.
    #[serde(default)]
    pub continue_past_death: bool,
}

fn default_essential_share() -> f64 {
    0.70
}

fn default_ss_haircut() -> f64 {
    0.23
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarianceReduction {
    pub use_antithetic_variates: bool,
    pub use_stratified_sampling: bool,
    pub use_control_variates: bool,
    /// Early-retirement shock dimensions covered by Latin-Hypercube rows.
    pub lhs_dimensions: Option<usize>,
}

impl VarianceReduction {
    pub const DEFAULT_LHS_DIMENSIONS: usize = 30;
}

/// Complete input to a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParams {
    pub demographics: Demographics,
    pub assets: AssetBuckets,
    /// Per-owner bucket decomposition (user, spouse) when tracked upstream.
    pub owner_buckets: Option<(AssetBuckets, AssetBuckets)>,
    /// Cost basis of the taxable account, when tracked. Absent, the solver
    /// falls back to a holding-period heuristic.
    pub taxable_basis: Option<f64>,
    pub cash_flows: CashFlows,
    pub market: MarketAssumptions,
    pub strategy: Strategy,
    pub random_seed: u32,
    pub variance_reduction: VarianceReduction,
    /// Calendar year of the first simulated year.
    pub start_year: i32,
}

impl SimulationParams {
    /// Structural validation per the batch contract: fatal errors abort the
    /// batch; warnings ride along in the result.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let d = &self.demographics;

        if d.retirement_age < d.current_age {
            report.error(format!(
                "retirement age {} precedes current age {}",
                d.retirement_age, d.current_age
            ));
        }
        if d.life_expectancy < d.retirement_age {
            report.error(format!(
                "life expectancy {} precedes retirement age {}",
                d.life_expectancy, d.retirement_age
            ));
        }
        if d.filing_status.is_married() != d.has_spouse() {
            report.error("filing status inconsistent with spouse presence");
        }
        if let (Some(spouse_age), Some(spouse_birth)) = (d.spouse_age, d.spouse_birth_year) {
            let implied = self.start_year - i32::from(spouse_age);
            if (implied - spouse_birth).abs() > 1 {
                report.error(format!(
                    "spouse birth year {spouse_birth} inconsistent with age {spouse_age}"
                ));
            }
        }
        let implied_birth = self.start_year - i32::from(d.current_age);
        if (implied_birth - d.birth_year).abs() > 1 {
            report.error(format!(
                "birth year {} inconsistent with age {}",
                d.birth_year, d.current_age
            ));
        }

        let alloc = &self.market.allocation;
        for (name, weight) in [
            ("stocks", alloc.stocks),
            ("intlStocks", alloc.intl_stocks),
            ("bonds", alloc.bonds),
            ("reits", alloc.reits),
            ("cash", alloc.cash),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                report.error(format!("allocation {name} = {weight} outside [0, 1]"));
            }
        }
        if (alloc.sum() - 1.0).abs() > 0.01 {
            report.error(format!("allocation sums to {:.4}, expected 1", alloc.sum()));
        }

        let b = &self.assets;
        for (name, value) in [
            ("taxDeferred", b.tax_deferred),
            ("taxFree", b.tax_free),
            ("capitalGains", b.capital_gains),
            ("cashEquivalents", b.cash_equivalents),
        ] {
            if value < 0.0 {
                report.error(format!("bucket {name} is negative: {value}"));
            }
        }
        if !b.is_consistent(b.total_assets.abs().max(1.0) * 1e-6 + 1.0) {
            report.error("totalAssets does not match the sum of bucket components");
        }

        if !(0.0..=0.25).contains(&self.strategy.withdrawal_rate) {
            report.error(format!(
                "withdrawal rate {} outside [0, 0.25]",
                self.strategy.withdrawal_rate
            ));
        }
        if !(0.0..=1.0).contains(&self.strategy.essential_share) {
            report.error(format!(
                "essential share {} outside [0, 1]",
                self.strategy.essential_share
            ));
        }
        if self.cash_flows.annual_retirement_expenses < 0.0 {
            report.error("annual retirement expenses are negative");
        }

        if self.market.return_volatility > 0.40 {
            report.warn(format!(
                "return volatility {:.2} is unusually high",
                self.market.return_volatility
            ));
        }
        if self.market.expected_return > 0.12 {
            report.warn(format!(
                "expected return {:.2} is unusually high",
                self.market.expected_return
            ));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets() -> AssetBuckets {
        AssetBuckets::new(600_000.0, 300_000.0, 80_000.0, 20_000.0)
    }

    #[test]
    fn bucket_total_tracks_mutations() {
        let mut b = buckets();
        assert!(b.is_consistent(1e-9));

        let taken = b.debit(BucketKind::TaxDeferred, 50_000.0);
        assert_eq!(taken, 50_000.0);
        assert!(b.is_consistent(1e-9));

        b.credit(BucketKind::CapitalGains, 12_345.0);
        assert!(b.is_consistent(1e-9));

        b.grow(0.07, 0.02);
        assert!(b.is_consistent(1e-6));
    }

    #[test]
    fn bucket_debit_clamps_at_balance() {
        let mut b = buckets();
        let taken = b.debit(BucketKind::CashEquivalents, 1_000_000.0);
        assert_eq!(taken, 20_000.0);
        assert_eq!(b.cash_equivalents, 0.0);
        assert!(b.is_consistent(1e-9));
    }
}
