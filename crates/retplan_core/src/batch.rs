//! Batch orchestrator: runs N scenarios with variance reduction and
//! collapses them into distributional statistics.
//!
//! Determinism contract: the per-iteration seed is a pure function of
//! `(batch_seed, global_iteration_index)`, and aggregation is performed in
//! global-iteration order, so the merged parallel result is identical to
//! the sequential one regardless of worker count.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::context::{EngineContext, ReturnConfig};
use crate::error::{EngineError, Result};
use crate::model::params::{SimulationParams, VarianceReduction};
use crate::model::results::{
    AdvancedRiskMetrics, BatchResult, CareTypeMix, DangerZone, LtcBatchAnalysis, RegimeYearCounts,
    RepresentativeTraces, ScenarioOutcome, ShortfallSummary, YearlyCashFlow,
};
use crate::rng::{InjectedNormals, RecordingRng, ReplayRng, Xorshift32};
use crate::sampler::{ReturnDistribution, cagr_to_aagr};
use crate::scenario::run_scenario;
use crate::stats::{
    PercentileSeries, StreamingPercentiles, cvar, inverse_normal_cdf, max_drawdown, normal_cdf,
    percentile, summarize, ulcer_index,
};
use crate::taxes::state::state_config;

/// Seed stride between consecutive global iterations.
const SEED_STRIDE: u32 = 100_007;
/// Control-variate damping factor.
const CONTROL_VARIATE_DAMPING: f64 = 0.5;
/// Danger-zone window width in years since retirement.
const DANGER_ZONE_WINDOW: u32 = 5;
/// Windows with at least this failure fraction are reported.
const DANGER_ZONE_THRESHOLD: f64 = 0.05;

/// Shared progress/cancellation handle, pollable from another thread.
#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    inner: Arc<ProgressInner>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    completed: AtomicUsize,
    cancelled: AtomicBool,
}

impl BatchProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    fn increment(&self, by: usize) {
        self.inner.completed.fetch_add(by, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.inner.completed.store(0, Ordering::Relaxed);
    }
}

/// Run a batch with a throwaway progress handle.
pub fn run_batch(
    params: &SimulationParams,
    iterations: usize,
    config: &ReturnConfig,
) -> Result<BatchResult> {
    run_batch_with_progress(params, iterations, config, &BatchProgress::new())
}

/// Run a batch, reporting progress and honouring cancellation between
/// iteration steps.
pub fn run_batch_with_progress(
    params: &SimulationParams,
    iterations: usize,
    config: &ReturnConfig,
    progress: &BatchProgress,
) -> Result<BatchResult> {
    let report = params.validate();
    if report.is_fatal() {
        return Err(EngineError::InvalidParameters(report));
    }
    let mut warnings = report.warnings;

    let ctx = EngineContext::new(config);
    if ctx.cma_fallback_used {
        warn!("no CMA snapshot supplied; using the built-in default table");
        warnings.push("capital-market assumptions defaulted to the built-in table".to_string());
    }
    if state_config(&params.demographics.state).is_none() {
        warn!(state = %params.demographics.state, "no state tax configuration; state tax degraded to zero");
        warnings.push(format!(
            "no state tax configuration for {}; state tax treated as zero",
            params.demographics.state
        ));
    }
    if matches!(ctx.distribution, ReturnDistribution::BlockBootstrap) && ctx.monthly_history.is_none()
    {
        warnings
            .push("block bootstrap selected without history; falling back to parametric".to_string());
    }

    progress.reset();
    if progress.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let vr = params.variance_reduction;
    let antithetic = vr.use_antithetic_variates;
    let stride = if antithetic { 2 } else { 1 };
    let total_steps = iterations.div_ceil(stride);

    let lhs_rows = if vr.use_stratified_sampling {
        let dims = vr
            .lhs_dimensions
            .unwrap_or(VarianceReduction::DEFAULT_LHS_DIMENSIONS);
        Some(latin_hypercube_normals(params.random_seed, total_steps, dims))
    } else {
        None
    };

    debug!(
        iterations,
        total_steps, antithetic, "starting Monte Carlo batch"
    );

    #[cfg(feature = "parallel")]
    let outcomes: Vec<ScenarioOutcome> = {
        let step_results: Vec<Vec<ScenarioOutcome>> = (0..total_steps)
            .into_par_iter()
            .map(|step| {
                if progress.is_cancelled() {
                    return Vec::new();
                }
                let result = run_step(params, &ctx, step, antithetic, lhs_rows.as_deref());
                progress.increment(result.len());
                result
            })
            .collect();
        step_results.into_iter().flatten().collect()
    };

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<ScenarioOutcome> = {
        let mut all = Vec::with_capacity(total_steps * stride);
        for step in 0..total_steps {
            if progress.is_cancelled() {
                break;
            }
            let result = run_step(params, &ctx, step, antithetic, lhs_rows.as_deref());
            progress.increment(result.len());
            all.extend(result);
        }
        all
    };

    if progress.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let mut result = aggregate(params, outcomes, warnings);

    if vr.use_control_variates {
        let analytic = analytic_success_probability(params, &ctx);
        let empirical = result.probability_of_success;
        let beta: f64 = 1.0; // capped at 1 by construction
        let adjustment = CONTROL_VARIATE_DAMPING * beta * (analytic - empirical);
        result.probability_of_success = (empirical + adjustment).clamp(0.0, 1.0);
        result.control_variate_adjustment = Some(adjustment);
        debug!(analytic, empirical, adjustment, "applied control variate");
    }

    debug!(
        iterations = result.iterations,
        success = result.probability_of_success,
        "batch complete"
    );
    Ok(result)
}

/// Run one iteration step: a single scenario, or an antithetic pair.
fn run_step(
    params: &SimulationParams,
    ctx: &EngineContext,
    step: usize,
    antithetic: bool,
    lhs_rows: Option<&[Vec<f64>]>,
) -> Vec<ScenarioOutcome> {
    let stride: u32 = if antithetic { 2 } else { 1 };
    let global_index = (step as u32).wrapping_mul(stride);
    let seed = params
        .random_seed
        .wrapping_add(global_index.wrapping_mul(SEED_STRIDE));
    let base = Xorshift32::new(seed);
    let row = lhs_rows.map(|rows| rows[step].clone());

    if antithetic {
        // Record the primary run, then replay the tape mirrored.
        let (primary, tape) = match row {
            Some(values) => {
                let mut rng = RecordingRng::new(InjectedNormals::new(base, values));
                let outcome = run_scenario(params, ctx, &mut rng);
                (outcome, rng.into_tape())
            }
            None => {
                let mut rng = RecordingRng::new(base);
                let outcome = run_scenario(params, ctx, &mut rng);
                (outcome, rng.into_tape())
            }
        };
        let mut mirrored_rng = ReplayRng::new(tape, true, seed);
        let mirrored = run_scenario(params, ctx, &mut mirrored_rng);
        vec![primary, mirrored]
    } else {
        match row {
            Some(values) => {
                let mut rng = InjectedNormals::new(base, values);
                vec![run_scenario(params, ctx, &mut rng)]
            }
            None => {
                let mut rng = base;
                vec![run_scenario(params, ctx, &mut rng)]
            }
        }
    }
}

/// Stratified normals for the first `dims` early-retirement shock
/// dimensions: one stratified, shuffled column per dimension, inverted
/// through the normal CDF.
fn latin_hypercube_normals(seed: u32, rows: usize, dims: usize) -> Vec<Vec<f64>> {
    let mut rng = SmallRng::seed_from_u64(u64::from(seed) ^ 0x4c48_5321);
    let mut result = vec![vec![0.0; dims]; rows];
    if rows == 0 {
        return result;
    }
    for dim in 0..dims {
        let mut strata: Vec<f64> = (0..rows)
            .map(|i| (i as f64 + rng.random::<f64>()) / rows as f64)
            .collect();
        strata.shuffle(&mut rng);
        for (row, u) in strata.into_iter().enumerate() {
            result[row][dim] = inverse_normal_cdf(u);
        }
    }
    result
}

/// Analytic success approximation under a lognormal portfolio model:
/// probability that the annualized portfolio return clears the rate at
/// which the planned withdrawals exactly deplete the portfolio over the
/// horizon.
fn analytic_success_probability(params: &SimulationParams, ctx: &EngineContext) -> f64 {
    let d = &params.demographics;
    let horizon = f64::from(d.life_expectancy.saturating_sub(d.retirement_age).max(1));
    let weights = params.market.allocation.as_array();

    let mut mean = 0.0;
    for class in crate::model::cma::AssetClass::ALL {
        let a = ctx.cma.assumption(class);
        mean += weights[class.index()] * cagr_to_aagr(a.expected_return_cagr, a.volatility);
    }
    let mut variance = 0.0;
    for i in crate::model::cma::AssetClass::ALL {
        for j in crate::model::cma::AssetClass::ALL {
            let vi = ctx.cma.assumption(i).volatility;
            let vj = ctx.cma.assumption(j).volatility;
            variance += weights[i.index()] * weights[j.index()] * vi * vj * ctx.cma.correlation(i, j);
        }
    }
    let sigma = variance.max(0.0).sqrt();

    let rate = params.strategy.withdrawal_rate.max(1e-4);
    let breakeven = breakeven_return(rate, horizon);
    if sigma < 1e-9 {
        return if mean >= breakeven { 1.0 } else { 0.0 };
    }
    // Annualized mean return over the horizon concentrates at sigma/sqrt(T).
    1.0 - normal_cdf((breakeven - mean) / (sigma / horizon.sqrt()))
}

/// Rate r solving `w = r / (1 - (1+r)^-T)`: the return at which a constant
/// withdrawal fraction exactly exhausts the portfolio at the horizon.
fn breakeven_return(withdrawal_fraction: f64, horizon: f64) -> f64 {
    let annuity_rate = |r: f64| -> f64 {
        if r.abs() < 1e-9 {
            1.0 / horizon
        } else {
            r / (1.0 - (1.0 + r).powf(-horizon))
        }
    };
    let mut lo = -0.20;
    let mut hi = 0.20;
    for _ in 0..60 {
        let mid = (lo + hi) / 2.0;
        if annuity_rate(mid) < withdrawal_fraction {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

fn aggregate(
    params: &SimulationParams,
    outcomes: Vec<ScenarioOutcome>,
    warnings: Vec<String>,
) -> BatchResult {
    let n = outcomes.len().max(1) as f64;

    let mut streaming = StreamingPercentiles::new();
    for outcome in &outcomes {
        streaming.push(outcome.ending_balance);
    }

    let mut ending: Vec<f64> = outcomes.iter().map(|o| o.ending_balance).collect();
    ending.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let successes = outcomes.iter().filter(|o| o.success).count() as f64;
    let legacy = outcomes.iter().filter(|o| o.success_metrics.legacy).count() as f64;
    let health = outcomes
        .iter()
        .filter(|o| o.success_metrics.health_adjusted)
        .count() as f64;
    let utility: f64 = outcomes
        .iter()
        .map(|o| o.success_metrics.utility_adjusted_score)
        .sum::<f64>()
        / n;

    let failures: Vec<&ScenarioOutcome> =
        outcomes.iter().filter(|o| !o.success).collect();
    let mean_years_until_depletion = if failures.is_empty() {
        None
    } else {
        Some(
            failures
                .iter()
                .filter_map(|o| o.years_until_depletion)
                .map(f64::from)
                .sum::<f64>()
                / failures.len() as f64,
        )
    };

    let mean_regime_years = mean_regimes(&outcomes);
    let ltc_analysis = ltc_breakdown(&outcomes);
    let shortfall = shortfall_summary(&outcomes);
    let representative_traces = representative_traces(&outcomes, &ending);
    let yearly_balance_bands = balance_bands(&outcomes);
    let risk = risk_metrics(params, &outcomes, &ending, &representative_traces.median, utility);

    BatchResult {
        iterations: outcomes.len(),
        probability_of_success: successes / n,
        legacy_success_rate: legacy / n,
        utility_adjusted_success: utility,
        health_adjusted_success_rate: health / n,
        ending_balance_percentiles: PercentileSeries {
            p10: percentile(&ending, 0.10),
            p25: percentile(&ending, 0.25),
            p50: percentile(&ending, 0.50),
            p75: percentile(&ending, 0.75),
            p90: percentile(&ending, 0.90),
        },
        streaming_percentiles: streaming.estimates(),
        mean_years_until_depletion,
        mean_regime_years,
        ltc_analysis,
        shortfall,
        risk,
        representative_traces,
        yearly_balance_bands,
        control_variate_adjustment: None,
        warnings,
    }
}

fn mean_regimes(outcomes: &[ScenarioOutcome]) -> RegimeYearCounts {
    let n = outcomes.len().max(1) as f64;
    let sum = |f: fn(&RegimeYearCounts) -> u32| -> u32 {
        (outcomes.iter().map(|o| f(&o.regime_years)).sum::<u32>() as f64 / n).round() as u32
    };
    RegimeYearCounts {
        bull: sum(|r| r.bull),
        normal: sum(|r| r.normal),
        bear: sum(|r| r.bear),
        crisis: sum(|r| r.crisis),
    }
}

fn ltc_breakdown(outcomes: &[ScenarioOutcome]) -> LtcBatchAnalysis {
    let n = outcomes.len().max(1) as f64;
    let with_ltc: Vec<&ScenarioOutcome> =
        outcomes.iter().filter(|o| o.ltc_event.occurred).collect();
    let without: Vec<&ScenarioOutcome> =
        outcomes.iter().filter(|o| !o.ltc_event.occurred).collect();

    let mut mix = CareTypeMix::default();
    for outcome in &with_ltc {
        use crate::model::params::CareType;
        match outcome.ltc_event.care_type {
            Some(CareType::Home) => mix.home += 1.0,
            Some(CareType::Assisted) => mix.assisted += 1.0,
            Some(CareType::Nursing) => mix.nursing += 1.0,
            Some(CareType::Memory) => mix.memory += 1.0,
            None => {}
        }
    }
    let ltc_n = with_ltc.len().max(1) as f64;
    mix.home /= ltc_n;
    mix.assisted /= ltc_n;
    mix.nursing /= ltc_n;
    mix.memory /= ltc_n;

    let success_rate = |subset: &[&ScenarioOutcome]| -> f64 {
        if subset.is_empty() {
            0.0
        } else {
            subset.iter().filter(|o| o.success).count() as f64 / subset.len() as f64
        }
    };

    LtcBatchAnalysis {
        event_probability: with_ltc.len() as f64 / n,
        avg_lifetime_cost: with_ltc
            .iter()
            .map(|o| o.ltc_event.total_lifetime_cost)
            .sum::<f64>()
            / ltc_n,
        avg_duration_years: with_ltc
            .iter()
            .map(|o| o.ltc_event.duration_years)
            .sum::<f64>()
            / ltc_n,
        care_type_mix: mix,
        success_rate_with_ltc: success_rate(&with_ltc),
        success_rate_without_ltc: success_rate(&without),
    }
}

fn shortfall_summary(outcomes: &[ScenarioOutcome]) -> ShortfallSummary {
    let n = outcomes.len().max(1) as f64;
    ShortfallSummary {
        mean_total_shortfall: outcomes
            .iter()
            .map(|o| o.shortfall.total_shortfall)
            .sum::<f64>()
            / n,
        mean_shortfall_years: outcomes
            .iter()
            .map(|o| f64::from(o.shortfall.shortfall_years))
            .sum::<f64>()
            / n,
        worst_total_shortfall: outcomes
            .iter()
            .map(|o| o.shortfall.total_shortfall)
            .fold(0.0, f64::max),
        scenarios_with_shortfall: outcomes
            .iter()
            .filter(|o| o.shortfall.shortfall_years > 0)
            .count() as u32,
    }
}

/// Traces at the 10th/50th/90th ending-balance ranks.
fn representative_traces(
    outcomes: &[ScenarioOutcome],
    sorted_endings: &[f64],
) -> RepresentativeTraces {
    let find_trace = |target: f64| -> Vec<YearlyCashFlow> {
        outcomes
            .iter()
            .min_by(|a, b| {
                let da = (a.ending_balance - target).abs();
                let db = (b.ending_balance - target).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|o| o.yearly_cash_flows.clone())
            .unwrap_or_default()
    };
    RepresentativeTraces {
        p10: find_trace(percentile(sorted_endings, 0.10)),
        median: find_trace(percentile(sorted_endings, 0.50)),
        p90: find_trace(percentile(sorted_endings, 0.90)),
    }
}

/// Column-wise exact percentile bands over per-year balances.
fn balance_bands(outcomes: &[ScenarioOutcome]) -> PercentileSeries<Vec<f64>> {
    let max_len = outcomes
        .iter()
        .map(|o| o.yearly_cash_flows.len())
        .max()
        .unwrap_or(0);
    let mut bands = PercentileSeries {
        p10: Vec::with_capacity(max_len),
        p25: Vec::with_capacity(max_len),
        p50: Vec::with_capacity(max_len),
        p75: Vec::with_capacity(max_len),
        p90: Vec::with_capacity(max_len),
    };
    let mut column = Vec::with_capacity(outcomes.len());
    for year in 0..max_len {
        column.clear();
        for outcome in outcomes {
            // Shorter paths contribute their terminal balance.
            let balance = outcome
                .yearly_cash_flows
                .get(year)
                .map(|row| row.portfolio_balance)
                .unwrap_or(outcome.ending_balance);
            column.push(balance);
        }
        let series = summarize(&column);
        bands.p10.push(series.p10);
        bands.p25.push(series.p25);
        bands.p50.push(series.p50);
        bands.p75.push(series.p75);
        bands.p90.push(series.p90);
    }
    bands
}

fn risk_metrics(
    params: &SimulationParams,
    outcomes: &[ScenarioOutcome],
    sorted_endings: &[f64],
    median_trace: &[YearlyCashFlow],
    utility: f64,
) -> AdvancedRiskMetrics {
    let n = outcomes.len().max(1) as f64;
    let retirement_age = params.demographics.retirement_age;

    let median_balances: Vec<f64> = median_trace.iter().map(|r| r.portfolio_balance).collect();

    // Sequence risk: failures with two or more negative return years in
    // the first five years of retirement.
    let failures: Vec<&ScenarioOutcome> = outcomes.iter().filter(|o| !o.success).collect();
    let sequence_risk_score = if failures.is_empty() {
        0.0
    } else {
        failures
            .iter()
            .filter(|o| {
                o.yearly_cash_flows
                    .iter()
                    .filter(|row| row.age >= retirement_age)
                    .take(5)
                    .filter(|row| row.investment_return < 0.0)
                    .count()
                    >= 2
            })
            .count() as f64
            / failures.len() as f64
    };

    // Flexibility: guaranteed-income coverage, liquid reserves, success.
    let coverage: f64 = {
        let mut ratios: Vec<f64> = outcomes
            .iter()
            .filter_map(|o| {
                o.yearly_cash_flows
                    .iter()
                    .find(|row| row.age >= retirement_age && row.withdrawal >= 0.0)
                    .map(|row| {
                        let spend = row.explain.essential_expenses
                            + row.explain.discretionary_expenses
                            + row.explain.healthcare_expenses;
                        if spend > 0.0 {
                            (row.guaranteed_income / spend).min(1.0)
                        } else {
                            1.0
                        }
                    })
            })
            .collect();
        ratios.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        percentile(&ratios, 0.5)
    };
    let liquidity = ((params.assets.cash_equivalents + params.assets.capital_gains)
        / params.assets.total_assets.max(1.0))
    .min(1.0);
    let success = outcomes.iter().filter(|o| o.success).count() as f64 / n;
    let retirement_flexibility =
        (100.0 * (0.5 * coverage + 0.3 * liquidity + 0.2 * success)).clamp(0.0, 100.0);

    // Danger zones: five-year windows where failures cluster.
    let mut danger_zones = Vec::new();
    let max_offset = outcomes
        .iter()
        .filter_map(|o| o.years_until_depletion)
        .max()
        .unwrap_or(0);
    let mut window_start = 0;
    while window_start <= max_offset {
        let window_end = window_start + DANGER_ZONE_WINDOW;
        let count = outcomes
            .iter()
            .filter_map(|o| o.years_until_depletion)
            .filter(|y| *y >= window_start && *y < window_end)
            .count();
        let fraction = count as f64 / n;
        if fraction >= DANGER_ZONE_THRESHOLD {
            danger_zones.push(DangerZone {
                start_offset_years: window_start,
                end_offset_years: window_end,
                failure_fraction: fraction,
            });
        }
        window_start = window_end;
    }

    AdvancedRiskMetrics {
        cvar_95: cvar(sorted_endings, 0.95),
        cvar_99: cvar(sorted_endings, 0.99),
        max_drawdown: max_drawdown(&median_balances),
        ulcer_index: ulcer_index(&median_balances),
        sequence_risk_score,
        utility_adjusted_success: utility,
        retirement_flexibility,
        danger_zones,
    }
}
