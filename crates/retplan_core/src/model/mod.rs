//! Type definitions: simulation inputs, regime process, capital-market
//! assumptions, RMD tables, and result records.

pub mod cma;
pub mod params;
pub mod regime;
pub mod results;
pub mod rmd;

pub use cma::{AssetAssumption, AssetClass, CapitalMarketAssumptions};
pub use params::{
    AcaEnrollment, Allocation, AnnuityIncome, AssetBuckets, BucketKind, CareType, CashFlows,
    ContributionSplit, Demographics, FilingStatus, Gender, GlidepathStrategy, HealthStatus,
    ItemizationOptions, LtcInsurancePolicy, MarketAssumptions, MortalityMode, PartTimeIncome,
    PensionIncome, PersonIncome, ReturnBasis, SimulationParams, SocialSecurityIncome, Strategy,
    VarianceReduction, WithdrawalTiming,
};
pub use regime::{
    AssetAdjustment, InflationCorrelations, MarketRegime, RegimeAssetAdjustments, RegimeParameters,
};
pub use results::{
    AdjustmentType, AdvancedRiskMetrics, BatchResult, CareTypeMix, CashFlowExplain, DangerZone,
    LtcBatchAnalysis, LtcEventSummary, LtcState, RegimeYearCounts, RepresentativeTraces,
    ScenarioOutcome, ShortfallMetrics, ShortfallSummary, SuccessMetrics, TaxBreakdown,
    WithdrawalSources, YearlyCashFlow,
};
pub use rmd::{
    joint_life_divisor, required_minimum_distribution, rmd_start_age, uniform_lifetime_divisor,
};
