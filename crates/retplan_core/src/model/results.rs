//! Output model: per-year cash-flow traces, per-scenario outcomes, and the
//! aggregated batch result.

use serde::{Deserialize, Serialize};

use crate::model::params::CareType;
use crate::model::regime::MarketRegime;
use crate::stats::PercentileSeries;

/// Spending adjustment applied in a given year, for explainability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    None,
    GuardrailCut,
    GuardrailRaise,
    InflationAdjustment,
    InflationSkipped,
    RegimeSpendingCut,
    RegimeSpendingBoost,
}

/// LTC status of the household in a given year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LtcState {
    None,
    Active,
    Resolved,
}

/// Per-year tax detail carried on the cash-flow trace.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub federal: f64,
    pub state: f64,
    pub capital_gains: f64,
    pub niit: f64,
    pub additional_medicare: f64,
    pub amt: f64,
    pub irmaa_surcharge: f64,
    pub total: f64,
}

/// Where the year's gross withdrawal was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalSources {
    pub cash: f64,
    pub capital_gains: f64,
    pub tax_deferred: f64,
    pub tax_free: f64,
}

impl WithdrawalSources {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.cash + self.capital_gains + self.tax_deferred + self.tax_free
    }
}

/// Expense/income decomposition attached to each simulated year so a trace
/// can be audited without re-running the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowExplain {
    pub essential_expenses: f64,
    pub discretionary_expenses: f64,
    pub healthcare_expenses: f64,
    pub social_security: f64,
    pub pension: f64,
    pub part_time: f64,
    pub annuity: f64,
    pub required_rmd: f64,
    pub sources: WithdrawalSources,
    pub effective_tax_rate: f64,
    pub funding_ratio: f64,
}

/// One simulated year of one scenario. Produced exactly once per year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyCashFlow {
    pub year: i32,
    pub age: u8,
    pub spouse_age: Option<u8>,
    pub portfolio_balance: f64,
    pub guaranteed_income: f64,
    pub withdrawal: f64,
    pub net_cash_flow: f64,
    pub investment_return: f64,
    pub adjustment_type: AdjustmentType,
    pub adjustment_reason: Option<String>,
    pub ltc_cost: f64,
    pub ltc_care_type: Option<CareType>,
    pub ltc_state: LtcState,
    pub market_regime: MarketRegime,
    pub taxes: TaxBreakdown,
    pub explain: CashFlowExplain,
}

/// Shortfall accounting over a scenario's decumulation years.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortfallMetrics {
    pub total_shortfall: f64,
    pub shortfall_years: u32,
    pub max_consecutive_shortfall_years: u32,
    pub worst_annual_shortfall: f64,
}

/// The competing success definitions, all reported side by side. The
/// default user-facing metric is `no_depletion`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessMetrics {
    /// Portfolio never depleted before the horizon.
    pub no_depletion: bool,
    /// No depletion and no substantial cumulative shortfall.
    pub legacy: bool,
    /// CRRA-flavored score in [0, 1] penalizing deep spending cuts.
    pub utility_adjusted_score: f64,
    /// No depletion after charging all LTC costs.
    pub health_adjusted: bool,
}

/// Summary of the scenario's (at most one per person) LTC episodes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LtcEventSummary {
    pub occurred: bool,
    pub onset_age: Option<u8>,
    pub duration_years: f64,
    pub care_type: Option<CareType>,
    pub total_lifetime_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeYearCounts {
    pub bull: u32,
    pub normal: u32,
    pub bear: u32,
    pub crisis: u32,
}

impl RegimeYearCounts {
    pub fn record(&mut self, regime: MarketRegime) {
        match regime {
            MarketRegime::Bull => self.bull += 1,
            MarketRegime::Normal => self.normal += 1,
            MarketRegime::Bear => self.bear += 1,
            MarketRegime::Crisis => self.crisis += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.bull + self.normal + self.bear + self.crisis
    }
}

/// Outcome of a single scenario walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutcome {
    pub success: bool,
    pub ending_balance: f64,
    pub years_until_depletion: Option<u32>,
    pub guyton_klinger_adjustments: u32,
    pub ltc_event: LtcEventSummary,
    pub shortfall: ShortfallMetrics,
    pub success_metrics: SuccessMetrics,
    pub regime_years: RegimeYearCounts,
    pub yearly_cash_flows: Vec<YearlyCashFlow>,
}

/// Care-type composition of LTC episodes across the batch (fractions).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareTypeMix {
    pub home: f64,
    pub assisted: f64,
    pub nursing: f64,
    pub memory: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LtcBatchAnalysis {
    pub event_probability: f64,
    pub avg_lifetime_cost: f64,
    pub avg_duration_years: f64,
    pub care_type_mix: CareTypeMix,
    pub success_rate_with_ltc: f64,
    pub success_rate_without_ltc: f64,
}

/// Window of years-since-retirement where failures cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DangerZone {
    pub start_offset_years: u32,
    pub end_offset_years: u32,
    pub failure_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedRiskMetrics {
    pub cvar_95: f64,
    pub cvar_99: f64,
    pub max_drawdown: f64,
    pub ulcer_index: f64,
    /// Fraction of failing scenarios with two or more negative real-return
    /// years in the first five years of retirement.
    pub sequence_risk_score: f64,
    pub utility_adjusted_success: f64,
    /// Composite 0-100 score of guaranteed-income coverage and liquidity.
    pub retirement_flexibility: f64,
    pub danger_zones: Vec<DangerZone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortfallSummary {
    pub mean_total_shortfall: f64,
    pub mean_shortfall_years: f64,
    pub worst_total_shortfall: f64,
    pub scenarios_with_shortfall: u32,
}

/// Representative full traces picked by ending-balance rank.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepresentativeTraces {
    pub p10: Vec<YearlyCashFlow>,
    pub median: Vec<YearlyCashFlow>,
    pub p90: Vec<YearlyCashFlow>,
}

/// Aggregated result of a Monte Carlo batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub iterations: usize,
    /// Default metric: fraction of scenarios with no depletion.
    pub probability_of_success: f64,
    pub legacy_success_rate: f64,
    pub utility_adjusted_success: f64,
    pub health_adjusted_success_rate: f64,
    /// Exact percentiles over ending balances (source of truth).
    pub ending_balance_percentiles: PercentileSeries<f64>,
    /// P-Square streaming estimates, kept for memory-constrained callers
    /// and cross-checked against the exact array in tests.
    pub streaming_percentiles: PercentileSeries<f64>,
    pub mean_years_until_depletion: Option<f64>,
    pub mean_regime_years: RegimeYearCounts,
    pub ltc_analysis: LtcBatchAnalysis,
    pub shortfall: ShortfallSummary,
    pub risk: AdvancedRiskMetrics,
    pub representative_traces: RepresentativeTraces,
    /// Per-year portfolio-balance bands across retained scenarios.
    pub yearly_balance_bands: PercentileSeries<Vec<f64>>,
    /// Applied control-variate correction, when enabled.
    pub control_variate_adjustment: Option<f64>,
    pub warnings: Vec<String>,
}
