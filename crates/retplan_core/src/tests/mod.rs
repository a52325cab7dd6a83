//! Cross-module scenario and batch tests.
//!
//! Shared household fixtures live here; individual test files cover the
//! scenario walk, batch aggregation, and determinism/variance-reduction
//! guarantees.

mod batch;
mod determinism;
mod scenario;

use crate::model::params::{
    Allocation, AssetBuckets, CashFlows, Demographics, FilingStatus, Gender, GlidepathStrategy,
    HealthStatus, MarketAssumptions, MortalityMode, PersonIncome, ReturnBasis, SimulationParams,
    SocialSecurityIncome, Strategy, VarianceReduction, WithdrawalTiming,
};

pub(crate) const START_YEAR: i32 = 2025;

fn base_strategy(mode: MortalityMode) -> Strategy {
    Strategy {
        withdrawal_rate: 0.04,
        use_guardrails: false,
        essential_share: 0.70,
        withdrawal_timing: WithdrawalTiming::End,
        glidepath: GlidepathStrategy::Traditional,
        mortality_mode: mode,
        model_ltc: false,
        ltc_insurance: None,
        itemization: None,
        aca: None,
        real_dollars: false,
        spending_smile: false,
        discretionary_bear_only: false,
        social_security_haircut: 0.0,
        qcd_annual_target: 0.0,
        continue_past_death: false,
    }
}

/// Degenerate household: single 30-year-old, "retired" immediately, no
/// expenses, 100k all cash. Nothing can deplete.
pub(crate) fn single_young_no_spending() -> SimulationParams {
    SimulationParams {
        demographics: Demographics {
            current_age: 30,
            spouse_age: None,
            retirement_age: 30,
            spouse_retirement_age: None,
            life_expectancy: 30,
            spouse_life_expectancy: None,
            gender: Gender::Female,
            spouse_gender: None,
            health: HealthStatus::Good,
            spouse_health: None,
            filing_status: FilingStatus::Single,
            birth_year: START_YEAR - 30,
            spouse_birth_year: None,
            state: "TX".to_string(),
        },
        assets: AssetBuckets::new(0.0, 0.0, 0.0, 100_000.0),
        owner_buckets: None,
        taxable_basis: None,
        cash_flows: CashFlows {
            annual_retirement_expenses: 0.0,
            annual_healthcare_costs: 0.0,
            annual_savings: 0.0,
            spouse_annual_savings: None,
            user_income: PersonIncome::default(),
            spouse_income: None,
            annuities: Vec::new(),
            legacy_goal: 0.0,
            contribution_split: None,
        },
        market: MarketAssumptions {
            expected_return: 0.025,
            return_basis: ReturnBasis::Cagr,
            return_volatility: 0.01,
            inflation_rate: 0.025,
            allocation: Allocation {
                stocks: 0.0,
                intl_stocks: 0.0,
                bonds: 0.0,
                reits: 0.0,
                cash: 1.0,
            },
        },
        strategy: base_strategy(MortalityMode::Stochastic),
        random_seed: 1,
        variance_reduction: VarianceReduction::default(),
        start_year: START_YEAR,
    }
}

/// Married 65/65 high earners in New York. 2M split
/// 60/30/10 tax-deferred/Roth/taxable, household SS 40k at 67, 100k
/// expenses, 4% withdrawals.
pub(crate) fn high_earner_couple() -> SimulationParams {
    let ss = SocialSecurityIncome {
        annual_benefit: 20_000.0,
        claim_age: 67,
    };
    SimulationParams {
        demographics: Demographics {
            current_age: 65,
            spouse_age: Some(65),
            retirement_age: 65,
            spouse_retirement_age: Some(65),
            life_expectancy: 88,
            spouse_life_expectancy: Some(90),
            gender: Gender::Male,
            spouse_gender: Some(Gender::Female),
            health: HealthStatus::Good,
            spouse_health: Some(HealthStatus::Good),
            filing_status: FilingStatus::Married,
            birth_year: START_YEAR - 65,
            spouse_birth_year: Some(START_YEAR - 65),
            state: "NY".to_string(),
        },
        assets: AssetBuckets::new(1_200_000.0, 600_000.0, 200_000.0, 0.0),
        owner_buckets: None,
        taxable_basis: None,
        cash_flows: CashFlows {
            annual_retirement_expenses: 100_000.0,
            annual_healthcare_costs: 0.0,
            annual_savings: 0.0,
            spouse_annual_savings: None,
            user_income: PersonIncome {
                social_security: Some(ss),
                pension: None,
                part_time: None,
            },
            spouse_income: Some(PersonIncome {
                social_security: Some(ss),
                pension: None,
                part_time: None,
            }),
            annuities: Vec::new(),
            legacy_goal: 0.0,
            contribution_split: None,
        },
        market: MarketAssumptions {
            expected_return: 0.07,
            return_basis: ReturnBasis::Cagr,
            return_volatility: 0.11,
            inflation_rate: 0.025,
            allocation: Allocation {
                stocks: 0.45,
                intl_stocks: 0.10,
                bonds: 0.35,
                reits: 0.05,
                cash: 0.05,
            },
        },
        strategy: base_strategy(MortalityMode::Stochastic),
        random_seed: 42,
        variance_reduction: VarianceReduction::default(),
        start_year: START_YEAR,
    }
}

/// Fixed-horizon-93 couple used for the simplified-LTC aggregate checks.
pub(crate) fn fixed_horizon_couple() -> SimulationParams {
    let mut params = high_earner_couple();
    params.demographics.current_age = 70;
    params.demographics.spouse_age = Some(70);
    params.demographics.retirement_age = 70;
    params.demographics.spouse_retirement_age = Some(70);
    params.demographics.birth_year = START_YEAR - 70;
    params.demographics.spouse_birth_year = Some(START_YEAR - 70);
    params.demographics.life_expectancy = 93;
    params.demographics.spouse_life_expectancy = Some(93);
    params.strategy = base_strategy(MortalityMode::FixedHorizon93);
    params.strategy.real_dollars = true;
    params.random_seed = 7;
    params
}
