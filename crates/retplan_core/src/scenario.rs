//! Single-iteration life-cycle walk.
//!
//! One scenario advances a household year by year through an accumulation
//! phase (contributions, limits, growth) and a decumulation phase
//! (inflation, healthcare, LTC, guaranteed income, the withdrawal solver,
//! guardrails, mortality), producing an outcome record and a full yearly
//! cash-flow trace.

use crate::context::EngineContext;
use crate::guardrails::{GuardrailInput, apply_guardrails, initial_withdrawal};
use crate::ltc::{self, LtcEpisode};
use crate::model::params::{
    Allocation, AssetBuckets, BucketKind, ContributionSplit, FilingStatus, GlidepathStrategy,
    HealthStatus, MortalityMode, PersonIncome, ReturnBasis, SimulationParams, WithdrawalTiming,
};
use crate::model::regime::MarketRegime;
use crate::model::results::{
    AdjustmentType, CashFlowExplain, LtcEventSummary, LtcState, RegimeYearCounts, ScenarioOutcome,
    ShortfallMetrics, SuccessMetrics, TaxBreakdown, WithdrawalSources, YearlyCashFlow,
};
use crate::mortality;
use crate::rng::ScenarioRng;
use crate::sampler::{SampledReturns, UserReturnOverrides, cagr_to_aagr, sample_returns};
use crate::taxes::aca::{applicable_percentage, federal_poverty_level};
use crate::withdrawal::{SolverCache, WithdrawalRequest, solve_withdrawal};
use rustc_hash::FxHashMap;

// Medicare cost stack at 65, in first-simulated-year dollars.
const MEDICARE_PART_B_ANNUAL: f64 = 2_220.0;
const MEDIGAP_ANNUAL: f64 = 2_400.0;

const GENERAL_INFLATION_MEAN: f64 = 0.025;
const GENERAL_INFLATION_VOL: f64 = 0.010;
const HEALTHCARE_INFLATION_MEAN: f64 = 0.0269;
const HEALTHCARE_INFLATION_VOL: f64 = 0.012;
const INFLATION_DRAW_MIN: f64 = -0.01;
const INFLATION_DRAW_MAX: f64 = 0.08;
const HEALTHCARE_DRAW_MIN: f64 = 0.0;
const HEALTHCARE_DRAW_MAX: f64 = 0.10;

/// Social Security trust-fund depletion year for the haircut scenario.
const SS_HAIRCUT_YEAR: i32 = 2033;

const WAGE_GROWTH: f64 = 0.03;
const CONTRIBUTION_COLA: f64 = 0.02;
const EMPLOYEE_DEFERRAL_LIMIT: f64 = 23_500.0;
const DEFERRAL_CATCH_UP: f64 = 7_500.0;
const IRA_LIMIT: f64 = 7_000.0;
const IRA_CATCH_UP: f64 = 1_000.0;

const FIXED_HORIZON_AGE: u8 = 93;
const MAX_AGE: u8 = 105;

/// Legacy success tolerates at most this much cumulative shortfall.
const SUBSTANTIAL_SHORTFALL: f64 = 10_000.0;

#[derive(Debug, Clone)]
struct Person {
    age: u8,
    alive: bool,
    health: HealthStatus,
    birth_year: i32,
    life_expectancy: u8,
    income: PersonIncome,
    ltc: LtcEpisode,
    /// Fixed-horizon mode: simplified LTC shock drawn for ages 91-92.
    simple_ltc: bool,
}

fn income_growth_rate(age: u8) -> f64 {
    match age {
        0..=34 => 0.05,
        35..=49 => 0.04,
        _ => 0.03,
    }
}

/// Glidepath-adjusted allocation for a year relative to retirement.
fn allocation_for_year(params: &SimulationParams, years_from_retirement: i32) -> Allocation {
    let base = params.market.allocation;
    let shift = match params.strategy.glidepath {
        GlidepathStrategy::Traditional => 0.0,
        GlidepathStrategy::BondTent => {
            // Bond allocation peaks at retirement, tapering over +/-10y.
            let distance = years_from_retirement.abs() as f64;
            (0.15 * (1.0 - distance / 10.0)).max(0.0)
        }
        GlidepathStrategy::RisingEquity => {
            if years_from_retirement < 0 {
                0.0
            } else {
                (0.20 - 0.01 * years_from_retirement as f64).max(0.0)
            }
        }
    };
    let moved = shift.min(base.stocks);
    Allocation {
        stocks: base.stocks - moved,
        bonds: base.bonds + moved,
        ..base
    }
}

fn bounded_inflation_draw<R: ScenarioRng + ?Sized>(
    rng: &mut R,
    mean: f64,
    vol: f64,
    lo: f64,
    hi: f64,
) -> f64 {
    (mean + vol * rng.normal()).clamp(lo, hi)
}

/// Net marketplace premium for pre-Medicare enrollees, using the prior
/// year's MAGI for the credit.
fn aca_net_premium(
    params: &SimulationParams,
    prior_magi: f64,
    under_65_alive: u8,
    total_persons: u8,
) -> f64 {
    let Some(aca) = &params.strategy.aca else {
        return 0.0;
    };
    if under_65_alive == 0 {
        return 0.0;
    }
    let fpl = federal_poverty_level(aca.household_size, &params.demographics.state);
    let ratio = if fpl > 0.0 { prior_magi / fpl } else { f64::INFINITY };
    let months = f64::from(aca.coverage_months.min(12)) / 12.0;
    let gross = aca.benchmark_annual_premium * months;
    let allowed_ptc = (gross - applicable_percentage(ratio) * prior_magi.max(0.0)).max(0.0);
    let net = (gross - allowed_ptc).max(0.0);
    net * f64::from(under_65_alive) / f64::from(total_persons.max(1))
}

/// Debit combined sources from the owner decomposition pro-rata.
fn debit_owner_buckets(
    owner_buckets: &mut Option<(AssetBuckets, AssetBuckets)>,
    combined: &AssetBuckets,
    sources: &WithdrawalSources,
) {
    let Some((user, spouse)) = owner_buckets else {
        return;
    };
    let split = |total: f64, user_part: f64, amount: f64| -> (f64, f64) {
        if total <= 0.0 {
            (0.0, 0.0)
        } else {
            let user_share = user_part / total;
            (amount * user_share, amount * (1.0 - user_share))
        }
    };
    let (u, s) = split(combined.tax_deferred, user.tax_deferred, sources.tax_deferred);
    user.debit(BucketKind::TaxDeferred, u);
    spouse.debit(BucketKind::TaxDeferred, s);
    let (u, s) = split(combined.tax_free, user.tax_free, sources.tax_free);
    user.debit(BucketKind::TaxFree, u);
    spouse.debit(BucketKind::TaxFree, s);
    let (u, s) = split(combined.capital_gains, user.capital_gains, sources.capital_gains);
    user.debit(BucketKind::CapitalGains, u);
    spouse.debit(BucketKind::CapitalGains, s);
    let (u, s) = split(combined.cash_equivalents, user.cash_equivalents, sources.cash);
    user.debit(BucketKind::CashEquivalents, u);
    spouse.debit(BucketKind::CashEquivalents, s);
}

/// Walk one scenario. The RNG carries whatever overlay chain the caller
/// composed (recording, replay, injection); sub-streams for mortality and
/// LTC are derived by label so they never perturb market draws.
pub fn run_scenario<R: ScenarioRng + ?Sized>(
    params: &SimulationParams,
    ctx: &EngineContext,
    rng: &mut R,
) -> ScenarioOutcome {
    let d = &params.demographics;
    let strategy = &params.strategy;

    let mut user = Person {
        age: d.current_age,
        alive: true,
        health: d.health,
        birth_year: d.birth_year,
        life_expectancy: d.life_expectancy,
        income: params.cash_flows.user_income,
        ltc: LtcEpisode::none(),
        simple_ltc: false,
    };
    let mut spouse: Option<Person> = d.spouse_age.map(|age| Person {
        age,
        alive: true,
        health: d.spouse_health.unwrap_or(HealthStatus::Good),
        birth_year: d
            .spouse_birth_year
            .unwrap_or(d.birth_year + i32::from(d.current_age) - i32::from(age)),
        life_expectancy: d.spouse_life_expectancy.unwrap_or(d.life_expectancy),
        income: params.cash_flows.spouse_income.unwrap_or_default(),
        ltc: LtcEpisode::none(),
        simple_ltc: false,
    });
    let initial_persons: u8 = 1 + u8::from(spouse.is_some());

    // Horizon and LTC pre-modelling, all on derived sub-streams.
    match strategy.mortality_mode {
        MortalityMode::Stochastic => {
            let mut mort_rng = rng.derive("mortality", 0);
            if let Some(sp) = spouse.as_mut() {
                let (le_user, le_spouse) = mortality::sample_couple_life_expectancy(
                    user.life_expectancy,
                    user.age,
                    sp.life_expectancy,
                    sp.age,
                    &mut mort_rng,
                );
                user.life_expectancy = le_user;
                sp.life_expectancy = le_spouse;
            } else {
                user.life_expectancy =
                    mortality::sample_life_expectancy(user.life_expectancy, user.age, &mut mort_rng);
            }
            if strategy.model_ltc {
                let mut ltc_rng = rng.derive("ltc", 0);
                user.ltc = ltc::generate_episode(
                    user.age,
                    user.life_expectancy,
                    &d.state,
                    true,
                    &mut ltc_rng,
                );
                if let Some(sp) = spouse.as_mut() {
                    let mut ltc_rng = rng.derive("ltc", 1);
                    sp.ltc = ltc::generate_episode(
                        sp.age,
                        sp.life_expectancy,
                        &d.state,
                        true,
                        &mut ltc_rng,
                    );
                }
            }
        }
        MortalityMode::FixedHorizon93 => {
            user.life_expectancy = FIXED_HORIZON_AGE;
            let mut ltc_rng = rng.derive("ltc-simple", 0);
            user.simple_ltc = ltc_rng.next_uniform() < ltc::SIMPLE_LTC_PROBABILITY;
            if let Some(sp) = spouse.as_mut() {
                sp.life_expectancy = FIXED_HORIZON_AGE;
                let mut ltc_rng = rng.derive("ltc-simple", 1);
                sp.simple_ltc = ltc_rng.next_uniform() < ltc::SIMPLE_LTC_PROBABILITY;
            }
        }
    }

    let savings_total = params.cash_flows.annual_savings
        + params.cash_flows.spouse_annual_savings.unwrap_or(0.0);
    let estimated_wages =
        (savings_total * 4.0).max(params.cash_flows.annual_retirement_expenses * 1.25);

    // MAGI by calendar year, seeded two years back so the IRMAA lookback
    // resolves from the first simulated year.
    let mut magi_history: FxHashMap<i32, f64> = FxHashMap::default();
    magi_history.insert(
        params.start_year - 2,
        estimated_wages / (1.0 + WAGE_GROWTH).powi(2),
    );
    magi_history.insert(params.start_year - 1, estimated_wages / (1.0 + WAGE_GROWTH));

    let user_overrides = Some(UserReturnOverrides {
        mean: Some(match params.market.return_basis {
            ReturnBasis::Cagr => {
                cagr_to_aagr(params.market.expected_return, params.market.return_volatility)
            }
            ReturnBasis::Aagr => params.market.expected_return,
        }),
        volatility: Some(params.market.return_volatility),
        blending_weight: 0.5,
    });
    let sampler_cfg = ctx.sampler_config(
        params.market.inflation_rate,
        GENERAL_INFLATION_VOL,
        user_overrides,
    );

    let mut buckets = params.assets;
    let mut owner_buckets = params.owner_buckets;
    let mut regime = MarketRegime::sample_initial(rng);
    let mut prev_returns: Option<[f64; 5]> = None;
    let mut regime_years = RegimeYearCounts::default();
    let mut trace: Vec<YearlyCashFlow> = Vec::new();
    let mut year_index: i32 = 0;

    let mut baseline_spending = params.cash_flows.annual_retirement_expenses;
    let mut healthcare_base = params.cash_flows.annual_healthcare_costs;
    let mut medicare_stack = MEDICARE_PART_B_ANNUAL + MEDIGAP_ANNUAL;
    let mut wages = estimated_wages;
    let mut savings = savings_total;
    let mut cache = SolverCache::default();

    // ------------------------------------------------------------------
    // Accumulation
    // ------------------------------------------------------------------
    let years_to_retirement = d.retirement_age.saturating_sub(d.current_age);
    for step in 0..years_to_retirement {
        let year = params.start_year + year_index;
        if step > 0 {
            savings *= 1.0 + income_growth_rate(user.age);
            wages *= 1.0 + WAGE_GROWTH;
        }

        // Contribution limits with cost-of-living projection.
        let cola = (1.0 + CONTRIBUTION_COLA).powi(year_index);
        let mut deferred_cap = 0.0;
        let mut roth_cap = 0.0;
        for age in std::iter::once(user.age).chain(spouse.as_ref().map(|s| s.age)) {
            let catch_up = age >= 50;
            deferred_cap +=
                (EMPLOYEE_DEFERRAL_LIMIT + if catch_up { DEFERRAL_CATCH_UP } else { 0.0 }) * cola;
            roth_cap += (IRA_LIMIT + if catch_up { IRA_CATCH_UP } else { 0.0 }) * cola;
        }

        let split = params.cash_flows.contribution_split.unwrap_or(ContributionSplit {
            tax_deferred: 0.70,
            tax_free: 0.20,
            taxable: 0.10,
        });
        let to_deferred = (savings * split.tax_deferred).min(deferred_cap);
        let to_roth = (savings * split.tax_free).min(roth_cap);
        let to_taxable = (savings - to_deferred - to_roth).max(0.0);
        buckets.credit(BucketKind::TaxDeferred, to_deferred);
        buckets.credit(BucketKind::TaxFree, to_roth);
        buckets.credit(BucketKind::CapitalGains, to_taxable);

        let allocation =
            allocation_for_year(params, year_index - i32::from(years_to_retirement));
        let sampled = sample_returns(&allocation, regime, 1.0, rng, &sampler_cfg, prev_returns.as_ref());
        let cash_return = cash_return_for(&sampled, &allocation, ctx);
        buckets.grow(sampled.portfolio_return, cash_return);
        if let Some((u, s)) = owner_buckets.as_mut() {
            u.grow(sampled.portfolio_return, cash_return);
            s.grow(sampled.portfolio_return, cash_return);
        }
        prev_returns = Some(sampled.asset_returns);

        if !strategy.real_dollars {
            baseline_spending *= 1.0 + params.market.inflation_rate;
            healthcare_base *= 1.0 + params.market.inflation_rate;
            medicare_stack *= 1.0 + params.market.inflation_rate;
        }

        magi_history.insert(year, wages);
        regime_years.record(regime);

        trace.push(YearlyCashFlow {
            year,
            age: user.age,
            spouse_age: spouse.as_ref().map(|s| s.age),
            portfolio_balance: buckets.total_assets,
            guaranteed_income: 0.0,
            withdrawal: 0.0,
            net_cash_flow: savings,
            investment_return: sampled.portfolio_return,
            adjustment_type: AdjustmentType::None,
            adjustment_reason: None,
            ltc_cost: 0.0,
            ltc_care_type: None,
            ltc_state: LtcState::None,
            market_regime: regime,
            taxes: TaxBreakdown::default(),
            explain: CashFlowExplain {
                funding_ratio: funding_ratio(buckets.total_assets, baseline_spending, strategy.withdrawal_rate),
                ..CashFlowExplain::default()
            },
        });

        regime = regime.transition(rng);
        user.age += 1;
        if let Some(sp) = spouse.as_mut() {
            sp.age += 1;
        }
        year_index += 1;
    }

    // ------------------------------------------------------------------
    // Decumulation
    // ------------------------------------------------------------------
    let portfolio_at_retirement = buckets.total_assets.max(1.0);
    let mut mort_rng = rng.derive("mortality", 1);
    let mut initial_rate = strategy.withdrawal_rate.max(1e-6);
    let mut prior_real_return = 0.0;
    let mut depletion_year: Option<u32> = None;
    let mut gk_adjustments: u32 = 0;
    let mut shortfall = ShortfallMetrics::default();
    let mut consecutive_shortfall: u32 = 0;
    let mut irmaa_carry = 0.0;
    let mut peak_portfolio = portfolio_at_retirement;
    let mut desired_spending = 0.0;
    let mut achieved_spending = 0.0;
    let mut total_ltc_net_cost = 0.0;
    let mut years_since_retirement: u32 = 0;

    loop {
        let anyone_alive = user.alive || spouse.as_ref().is_some_and(|s| s.alive);
        if !anyone_alive && !strategy.continue_past_death {
            break;
        }
        let horizon_reached = match strategy.mortality_mode {
            MortalityMode::FixedHorizon93 => user.age > FIXED_HORIZON_AGE,
            MortalityMode::Stochastic => user.age > MAX_AGE,
        };
        if horizon_reached {
            break;
        }
        if strategy.continue_past_death && !anyone_alive && buckets.total_assets <= 0.0 {
            break;
        }

        let year = params.start_year + year_index;
        let first_year = years_since_retirement == 0;
        let pre_withdrawal_balance = buckets.total_assets;
        if !anyone_alive {
            // Continuing past the second death: assets ride, nobody spends.
            baseline_spending = 0.0;
        }

        // Market and inflation draws.
        let allocation = allocation_for_year(params, years_since_retirement as i32);
        let sampled =
            sample_returns(&allocation, regime, 1.0, rng, &sampler_cfg, prev_returns.as_ref());
        let cash_return = cash_return_for(&sampled, &allocation, ctx);
        prev_returns = Some(sampled.asset_returns);
        let (inflation, healthcare_inflation) = if strategy.real_dollars {
            (0.0, 0.0)
        } else {
            let general = sampled.inflation.unwrap_or_else(|| {
                bounded_inflation_draw(
                    rng,
                    GENERAL_INFLATION_MEAN,
                    GENERAL_INFLATION_VOL,
                    INFLATION_DRAW_MIN,
                    INFLATION_DRAW_MAX,
                )
            });
            let healthcare = bounded_inflation_draw(
                rng,
                HEALTHCARE_INFLATION_MEAN,
                HEALTHCARE_INFLATION_VOL,
                HEALTHCARE_DRAW_MIN,
                HEALTHCARE_DRAW_MAX,
            );
            (general, healthcare)
        };

        // Spending policy: guardrails (or plain inflation) on the baseline.
        let mut adjustment = AdjustmentType::None;
        let mut adjustment_reason = None;
        if !first_year {
            if strategy.use_guardrails {
                let remaining = remaining_horizon(&user, spouse.as_ref());
                let decision = apply_guardrails(&GuardrailInput {
                    initial_withdrawal_rate: initial_rate,
                    current_withdrawal_rate: baseline_spending / pre_withdrawal_balance.max(1.0),
                    previous_withdrawal: baseline_spending,
                    portfolio_value: pre_withdrawal_balance,
                    inflation,
                    years_since_retirement,
                    remaining_horizon_years: remaining,
                    is_first_year: false,
                    prior_year_real_return: prior_real_return,
                    essential_share: strategy.essential_share,
                });
                if matches!(
                    decision.adjustment,
                    AdjustmentType::GuardrailCut | AdjustmentType::GuardrailRaise
                ) {
                    gk_adjustments += 1;
                }
                adjustment = decision.adjustment;
                adjustment_reason = decision.reason;
                baseline_spending = decision.withdrawal;
            } else {
                baseline_spending *= 1.0 + inflation;
                adjustment = AdjustmentType::InflationAdjustment;
            }
        }
        if strategy.spending_smile && !first_year {
            baseline_spending *= if years_since_retirement < 20 { 0.99 } else { 1.01 };
        }

        let essential = baseline_spending * strategy.essential_share;
        let mut discretionary = baseline_spending - essential;

        // Regime / funding-ratio discretionary adjustment.
        let funding = funding_ratio(pre_withdrawal_balance, baseline_spending, initial_rate);
        let drawdown = 1.0 - pre_withdrawal_balance / peak_portfolio.max(1.0);
        let current_rate = baseline_spending / pre_withdrawal_balance.max(1.0);
        let regime_factor = discretionary_factor(
            regime,
            funding,
            drawdown,
            current_rate,
            strategy.discretionary_bear_only,
        );
        if (regime_factor - 1.0).abs() > f64::EPSILON {
            discretionary *= regime_factor;
            if adjustment == AdjustmentType::None {
                adjustment = if regime_factor < 1.0 {
                    AdjustmentType::RegimeSpendingCut
                } else {
                    AdjustmentType::RegimeSpendingBoost
                };
            }
        }

        // Healthcare: Medicare stack at 65+, marketplace before.
        let alive_65_plus = count_alive(&user, spouse.as_ref(), |p| p.age >= 65);
        let alive_under_65 = count_alive(&user, spouse.as_ref(), |p| p.age < 65);
        let prior_magi = magi_history.get(&(year - 1)).copied().unwrap_or(0.0);
        let mut healthcare = f64::from(alive_65_plus)
            * (medicare_stack + healthcare_base / f64::from(initial_persons));
        healthcare += aca_net_premium(params, prior_magi, alive_under_65, initial_persons);
        healthcare += irmaa_carry;
        irmaa_carry = 0.0;

        // LTC costs, insurance, premiums, and expense replacement.
        let mut ltc_net = 0.0;
        let mut ltc_premiums = 0.0;
        let mut ltc_state = LtcState::None;
        let mut active_care_type = None;
        let mut replacement = 0.0;
        {
            let persons: Vec<&Person> = match spouse.as_ref() {
                Some(sp) => vec![&user, sp],
                None => vec![&user],
            };
            for person in persons {
                if !person.alive {
                    continue;
                }
                match strategy.mortality_mode {
                    MortalityMode::FixedHorizon93 => {
                        if person.simple_ltc
                            && person.age >= ltc::SIMPLE_LTC_ONSET_AGE
                            && person.age
                                < ltc::SIMPLE_LTC_ONSET_AGE + ltc::SIMPLE_LTC_DURATION_YEARS
                        {
                            ltc_net += ltc::SIMPLE_LTC_ANNUAL_COST;
                            ltc_state = LtcState::Active;
                        }
                    }
                    MortalityMode::Stochastic => {
                        if person.ltc.is_active(person.age) {
                            let gross = person.ltc.annual_cost(person.age);
                            let benefit = strategy.ltc_insurance.as_ref().map_or(0.0, |policy| {
                                ltc::insurance_benefit(
                                    policy,
                                    &person.ltc,
                                    person.age,
                                    f64::from(years_since_retirement),
                                    gross,
                                )
                            });
                            ltc_net += gross - benefit;
                            ltc_state = LtcState::Active;
                            if let Some(care) = person.ltc.care_type {
                                active_care_type = Some(care);
                                replacement += (essential + discretionary)
                                    / f64::from(initial_persons)
                                    * ltc::care_replacement_fraction(care);
                            }
                        } else if person.ltc.has_episode
                            && person.ltc.onset_age.is_some_and(|o| person.age > o)
                            && ltc_state == LtcState::None
                        {
                            ltc_state = LtcState::Resolved;
                        }
                        if let Some(policy) = &strategy.ltc_insurance {
                            ltc_premiums += ltc::premium_due(policy, &person.ltc, person.age);
                        }
                    }
                }
            }
        }
        let living_expense_total = (essential + discretionary - replacement).max(0.0);
        total_ltc_net_cost += ltc_net;

        // Guaranteed income.
        let effective_filing = effective_filing_status(params, &user, spouse.as_ref());
        let income = guaranteed_income(params, &user, spouse.as_ref(), year);

        let total_expenses = living_expense_total + healthcare + ltc_net + ltc_premiums;
        let net_need = (total_expenses - income.total()).max(0.0);
        let surplus = (income.total() - total_expenses).max(0.0);

        if first_year {
            let anchor = initial_withdrawal(
                strategy.withdrawal_rate,
                portfolio_at_retirement,
                net_need,
            );
            initial_rate = (anchor / portfolio_at_retirement).max(1e-6);
        }

        // Timing policy: when growth lands relative to the withdrawal.
        let (pre_growth, post_growth) = match strategy.withdrawal_timing {
            WithdrawalTiming::Start => (0.0, sampled.portfolio_return),
            WithdrawalTiming::End => (sampled.portfolio_return, 0.0),
            WithdrawalTiming::Mid => {
                let half = (1.0 + sampled.portfolio_return).max(0.0).sqrt() - 1.0;
                (half, half)
            }
        };
        let (pre_cash, post_cash) = match strategy.withdrawal_timing {
            WithdrawalTiming::Start => (0.0, cash_return),
            WithdrawalTiming::End => (cash_return, 0.0),
            WithdrawalTiming::Mid => {
                let half = (1.0 + cash_return).max(0.0).sqrt() - 1.0;
                (half, half)
            }
        };
        grow_all(&mut buckets, &mut owner_buckets, pre_growth, pre_cash);

        // Withdrawal solve.
        let request = WithdrawalRequest {
            net_needed: net_need,
            buckets,
            owner_buckets,
            total_social_security: income.social_security,
            age: user.age,
            spouse_age: spouse.as_ref().filter(|s| s.alive).map(|s| s.age),
            state: &d.state,
            filing_status: effective_filing,
            itemization: strategy.itemization.as_ref(),
            pension_income: income.pension,
            earned_income: income.part_time,
            magi_two_years_prior: magi_history.get(&(year - 2)).copied(),
            birth_year: user.birth_year,
            spouse_birth_year: spouse.as_ref().filter(|s| s.alive).map(|s| s.birth_year),
            simulation_year: year,
            aca: aca_payload(params, alive_under_65),
            qcd_target: strategy.qcd_annual_target,
            rmd_override: None,
            taxable_basis_ratio: params
                .taxable_basis
                .map(|basis| (basis / params.assets.capital_gains.max(1.0)).clamp(0.0, 1.0)),
            years_into_retirement: years_since_retirement,
        };
        let cache_key = SolverCache::key(&request);
        let result = match cache.get(&cache_key) {
            Some(hit) => hit.clone(),
            None => {
                let solved = solve_withdrawal(&request);
                cache.insert(cache_key, solved.clone());
                solved
            }
        };

        buckets.debit(BucketKind::CashEquivalents, result.sources.cash);
        buckets.debit(BucketKind::CapitalGains, result.sources.capital_gains);
        buckets.debit(BucketKind::TaxDeferred, result.sources.tax_deferred);
        buckets.debit(BucketKind::TaxFree, result.sources.tax_free);
        debit_owner_buckets(&mut owner_buckets, &request.buckets, &result.sources);
        let reinvested = result.rmd_excess_reinvested + surplus;
        if reinvested > 0.0 {
            buckets.credit(BucketKind::CapitalGains, reinvested);
            if let Some((u, _)) = owner_buckets.as_mut() {
                u.credit(BucketKind::CapitalGains, reinvested);
            }
        }

        grow_all(&mut buckets, &mut owner_buckets, post_growth, post_cash);

        // Shortfall accounting: what the household needed but could not
        // source from income or portfolio. Reinvested RMD excess is not
        // spendable, so it is backed out of the solver's net.
        let spendable = result.net_after_taxes - result.rmd_excess_reinvested;
        let funded = (income.total() + spendable).min(total_expenses);
        let year_shortfall = (total_expenses - income.total() - spendable).max(0.0);
        let year_shortfall = if net_need <= 0.0 { 0.0 } else { year_shortfall };
        if year_shortfall > 1.0 {
            shortfall.total_shortfall += year_shortfall;
            shortfall.shortfall_years += 1;
            consecutive_shortfall += 1;
            shortfall.max_consecutive_shortfall_years =
                shortfall.max_consecutive_shortfall_years.max(consecutive_shortfall);
            shortfall.worst_annual_shortfall = shortfall.worst_annual_shortfall.max(year_shortfall);
        } else {
            consecutive_shortfall = 0;
        }
        desired_spending += total_expenses;
        achieved_spending += funded.max(0.0);

        if buckets.total_assets <= 1.0 && depletion_year.is_none() {
            depletion_year = Some(years_since_retirement);
        }

        // MAGI history and IRMAA carry into next year's healthcare.
        magi_history.insert(year, result.modified_agi);
        if alive_65_plus > 0 {
            irmaa_carry = result.irmaa.annual_per_person() * f64::from(alive_65_plus);
        }

        // Healthcare cost bases inflate at the healthcare rate.
        healthcare_base *= 1.0 + healthcare_inflation;
        medicare_stack *= 1.0 + healthcare_inflation;

        regime_years.record(regime);
        trace.push(YearlyCashFlow {
            year,
            age: user.age,
            spouse_age: spouse.as_ref().map(|s| s.age),
            portfolio_balance: buckets.total_assets,
            guaranteed_income: income.total(),
            withdrawal: result.gross_withdrawal,
            net_cash_flow: income.total() + result.net_after_taxes - total_expenses,
            investment_return: sampled.portfolio_return,
            adjustment_type: adjustment,
            adjustment_reason,
            ltc_cost: ltc_net,
            ltc_care_type: active_care_type,
            ltc_state,
            market_regime: regime,
            taxes: TaxBreakdown {
                federal: result.federal_tax,
                state: result.state_tax,
                capital_gains: result.capital_gains_tax,
                niit: result.total_taxes
                    - result.federal_tax
                    - result.state_tax
                    - result.capital_gains_tax,
                additional_medicare: 0.0,
                amt: 0.0,
                irmaa_surcharge: result.irmaa.annual_per_person() * f64::from(alive_65_plus),
                total: result.total_taxes,
            },
            explain: CashFlowExplain {
                essential_expenses: essential,
                discretionary_expenses: discretionary,
                healthcare_expenses: healthcare,
                social_security: income.social_security,
                pension: income.pension,
                part_time: income.part_time,
                annuity: income.annuity,
                required_rmd: result.required_rmd,
                sources: result.sources,
                effective_tax_rate: result.effective_tax_rate,
                funding_ratio: funding,
            },
        });

        peak_portfolio = peak_portfolio.max(buckets.total_assets);
        prior_real_return = (1.0 + sampled.portfolio_return) / (1.0 + inflation) - 1.0;

        // Mortality transitions.
        if strategy.mortality_mode == MortalityMode::Stochastic {
            let was_couple = user.alive && spouse.as_ref().is_some_and(|s| s.alive);
            if user.alive && !mortality::survives_year(user.age, user.health, &mut mort_rng) {
                user.alive = false;
            }
            if let Some(sp) = spouse.as_mut()
                && sp.alive
                && !mortality::survives_year(sp.age, sp.health, &mut mort_rng)
            {
                sp.alive = false;
            }
            let now_couple = user.alive && spouse.as_ref().is_some_and(|s| s.alive);
            if was_couple && !now_couple {
                // Survivor transition: household spending steps down.
                baseline_spending *= mortality::SURVIVOR_EXPENSE_FRACTION;
            }
        } else if user.age >= FIXED_HORIZON_AGE {
            user.alive = false;
            if let Some(sp) = spouse.as_mut() {
                sp.alive = false;
            }
        }

        regime = regime.transition(rng);
        user.age = user.age.saturating_add(1);
        if let Some(sp) = spouse.as_mut() {
            sp.age = sp.age.saturating_add(1);
        }
        year_index += 1;
        years_since_retirement += 1;
    }

    let ending_balance = buckets.total_assets;
    let no_depletion = depletion_year.is_none();
    let legacy = no_depletion
        && shortfall.total_shortfall < SUBSTANTIAL_SHORTFALL
        && ending_balance >= params.cash_flows.legacy_goal;
    let utility_adjusted_score = if desired_spending > 0.0 {
        (achieved_spending / desired_spending).clamp(0.0, 1.0).sqrt()
    } else {
        1.0
    };
    let health_adjusted =
        no_depletion && total_ltc_net_cost < 0.25 * portfolio_at_retirement.max(1.0);

    ScenarioOutcome {
        success: no_depletion,
        ending_balance,
        years_until_depletion: depletion_year,
        guyton_klinger_adjustments: gk_adjustments,
        ltc_event: summarize_ltc(&user, spouse.as_ref(), total_ltc_net_cost),
        shortfall,
        success_metrics: SuccessMetrics {
            no_depletion,
            legacy,
            utility_adjusted_score,
            health_adjusted,
        },
        regime_years,
        yearly_cash_flows: trace,
    }
}

/// Cash-equivalent return: the sampled cash asset when allocated, else the
/// CMA's cash expectation as a deterministic yield.
fn cash_return_for(sampled: &SampledReturns, allocation: &Allocation, ctx: &EngineContext) -> f64 {
    if allocation.cash > 0.0 {
        sampled.asset_returns[4]
    } else {
        ctx.cma.cash.expected_return_cagr
    }
}

fn grow_all(
    buckets: &mut AssetBuckets,
    owner_buckets: &mut Option<(AssetBuckets, AssetBuckets)>,
    rate: f64,
    cash_rate: f64,
) {
    if rate == 0.0 && cash_rate == 0.0 {
        return;
    }
    buckets.grow(rate, cash_rate);
    if let Some((u, s)) = owner_buckets {
        u.grow(rate, cash_rate);
        s.grow(rate, cash_rate);
    }
}

fn funding_ratio(portfolio: f64, baseline_spending: f64, withdrawal_rate: f64) -> f64 {
    let target = baseline_spending / withdrawal_rate.max(1e-6);
    if target <= 0.0 { 1.0 } else { portfolio / target }
}

/// Discretionary spending multiplier from market conditions.
fn discretionary_factor(
    regime: MarketRegime,
    funding: f64,
    drawdown: f64,
    current_rate: f64,
    bear_only: bool,
) -> f64 {
    match regime {
        MarketRegime::Crisis => 0.5,
        MarketRegime::Bear => 0.7,
        _ if bear_only => 1.0,
        _ if drawdown > 0.20 && current_rate > 0.05 => 0.6,
        _ if drawdown > 0.10 => 0.8,
        MarketRegime::Bull if funding > 1.15 => 1.1,
        _ => 1.0,
    }
}

fn count_alive(user: &Person, spouse: Option<&Person>, pred: impl Fn(&Person) -> bool) -> u8 {
    let mut count = 0;
    if user.alive && pred(user) {
        count += 1;
    }
    if let Some(sp) = spouse
        && sp.alive
        && pred(sp)
    {
        count += 1;
    }
    count
}

fn remaining_horizon(user: &Person, spouse: Option<&Person>) -> u32 {
    let user_left = i32::from(user.life_expectancy) - i32::from(user.age);
    let spouse_left = spouse
        .filter(|s| s.alive)
        .map(|s| i32::from(s.life_expectancy) - i32::from(s.age))
        .unwrap_or(0);
    user_left.max(spouse_left).max(0) as u32
}

fn effective_filing_status(
    params: &SimulationParams,
    user: &Person,
    spouse: Option<&Person>,
) -> FilingStatus {
    let filing = params.demographics.filing_status;
    if filing.is_married() {
        let both_alive = user.alive && spouse.is_some_and(|s| s.alive);
        if both_alive { FilingStatus::Married } else { FilingStatus::Single }
    } else {
        filing
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GuaranteedIncome {
    social_security: f64,
    pension: f64,
    part_time: f64,
    annuity: f64,
}

impl GuaranteedIncome {
    fn total(&self) -> f64 {
        self.social_security + self.pension + self.part_time + self.annuity
    }
}

fn guaranteed_income(
    params: &SimulationParams,
    user: &Person,
    spouse: Option<&Person>,
    year: i32,
) -> GuaranteedIncome {
    let strategy = &params.strategy;
    let haircut = if year >= SS_HAIRCUT_YEAR {
        1.0 - strategy.social_security_haircut.clamp(0.0, 1.0)
    } else {
        1.0
    };

    let mut income = GuaranteedIncome::default();

    // Social Security: sum while both alive, survivor takes the larger of
    // the two individual benefits.
    let user_ss = user
        .income
        .social_security
        .filter(|ss| user.age >= ss.claim_age)
        .map_or(0.0, |ss| ss.annual_benefit);
    let spouse_ss = spouse
        .and_then(|s| {
            s.income
                .social_security
                .filter(|ss| s.age >= ss.claim_age)
                .map(|ss| ss.annual_benefit)
        })
        .unwrap_or(0.0);
    let both_alive = user.alive && spouse.is_some_and(|s| s.alive);
    income.social_security = if both_alive {
        user_ss + spouse_ss
    } else if user.alive || spouse.is_some_and(|s| s.alive) {
        user_ss.max(spouse_ss)
    } else {
        0.0
    } * haircut;

    // Pensions: survivor fraction continues to the surviving spouse.
    for (person, other_alive) in [
        (Some(user), spouse.is_some_and(|s| s.alive)),
        (spouse, user.alive),
    ] {
        let Some(person) = person else { continue };
        let Some(pension) = person.income.pension else {
            continue;
        };
        if person.age < pension.start_age {
            continue;
        }
        if person.alive {
            income.pension += pension.annual_amount;
        } else if other_alive {
            income.pension += pension.annual_amount * pension.survivor_fraction;
        }
    }

    // Part-time work while alive and in the window.
    for person in std::iter::once(user).chain(spouse) {
        if !person.alive {
            continue;
        }
        if let Some(pt) = person.income.part_time
            && person.age >= pt.start_age
            && person.age <= pt.end_age
        {
            income.part_time += pt.annual_amount;
        }
    }

    // Annuities are household-level, keyed to the primary person's age.
    for annuity in &params.cash_flows.annuities {
        if user.age >= annuity.start_age && (user.alive || spouse.is_some_and(|s| s.alive)) {
            income.annuity += annuity.annual_amount;
        }
    }

    income
}

fn aca_payload(
    params: &SimulationParams,
    alive_under_65: u8,
) -> Option<crate::taxes::AcaReconInput> {
    let aca = params.strategy.aca.as_ref()?;
    if alive_under_65 == 0 {
        return None;
    }
    Some(crate::taxes::AcaReconInput {
        household_size: aca.household_size,
        benchmark_annual_premium: aca.benchmark_annual_premium,
        aptc_applied: aca.aptc_applied,
        coverage_months: aca.coverage_months,
    })
}

fn summarize_ltc(user: &Person, spouse: Option<&Person>, total_net_cost: f64) -> LtcEventSummary {
    let primary = if user.ltc.has_episode {
        Some(&user.ltc)
    } else {
        spouse.filter(|s| s.ltc.has_episode).map(|s| &s.ltc)
    };
    let simple = user.simple_ltc || spouse.is_some_and(|s| s.simple_ltc);
    match primary {
        Some(episode) => LtcEventSummary {
            occurred: true,
            onset_age: episode.onset_age,
            duration_years: episode.duration_years
                + spouse
                    .filter(|s| s.ltc.has_episode && user.ltc.has_episode)
                    .map_or(0.0, |s| s.ltc.duration_years),
            care_type: episode.care_type,
            total_lifetime_cost: total_net_cost,
        },
        None if simple => LtcEventSummary {
            occurred: total_net_cost > 0.0,
            onset_age: Some(ltc::SIMPLE_LTC_ONSET_AGE),
            duration_years: f64::from(ltc::SIMPLE_LTC_DURATION_YEARS),
            care_type: None,
            total_lifetime_cost: total_net_cost,
        },
        None => LtcEventSummary::default(),
    }
}
