//! Batch orchestration tests: validation gating, aggregation sanity, the
//! seeded end-to-end scenarios, and progress/cancellation.

use crate::batch::{BatchProgress, run_batch, run_batch_with_progress};
use crate::context::ReturnConfig;
use crate::error::EngineError;
use crate::tests::{high_earner_couple, single_young_no_spending};

#[test]
fn invalid_allocation_fails_before_simulating() {
    let mut params = high_earner_couple();
    params.market.allocation.stocks = 0.95; // pushes the sum to 1.5
    let result = run_batch(&params, 10, &ReturnConfig::default());
    match result {
        Err(EngineError::InvalidParameters(report)) => {
            assert!(report.is_fatal());
            assert!(report.errors.iter().any(|e| e.contains("allocation")));
        }
        other => panic!("expected InvalidParameters, got {other:?}"),
    }
}

#[test]
fn retirement_before_current_age_is_fatal() {
    let mut params = high_earner_couple();
    params.demographics.retirement_age = 60; // current age is 65
    let result = run_batch(&params, 10, &ReturnConfig::default());
    assert!(matches!(result, Err(EngineError::InvalidParameters(_))));
}

#[test]
fn withdrawal_rate_out_of_range_is_fatal() {
    let mut params = high_earner_couple();
    params.strategy.withdrawal_rate = 0.30;
    assert!(matches!(
        run_batch(&params, 10, &ReturnConfig::default()),
        Err(EngineError::InvalidParameters(_))
    ));
}

#[test]
fn cma_fallback_is_reported_as_warning() {
    let params = single_young_no_spending();
    let result = run_batch(&params, 20, &ReturnConfig::default()).unwrap();
    assert!(
        result
            .warnings
            .iter()
            .any(|w| w.contains("capital-market assumptions"))
    );
}

#[test]
fn no_spending_batch_always_succeeds() {
    let params = single_young_no_spending();
    let result = run_batch(&params, 300, &ReturnConfig::default()).unwrap();
    assert_eq!(result.iterations, 300);
    assert!((result.probability_of_success - 1.0).abs() < 1e-9);
    assert!(result.mean_years_until_depletion.is_none());
    assert!(result.ending_balance_percentiles.p50 > 100_000.0);
    assert!(result.shortfall.scenarios_with_shortfall == 0);
}

#[test]
fn high_earner_couple_batch_mostly_succeeds() {
    // Seed-42 couple, 1000 iterations: well funded but not bulletproof,
    // so the success probability has to land strictly inside [0.85, 0.99].
    let params = high_earner_couple();
    let result = run_batch(&params, 1_000, &ReturnConfig::default()).unwrap();
    assert!(
        (0.85..=0.99).contains(&result.probability_of_success),
        "success probability {} outside [0.85, 0.99]",
        result.probability_of_success
    );
    assert!(result.ending_balance_percentiles.p50 > 0.0);
    // Percentiles come out ordered.
    let p = &result.ending_balance_percentiles;
    assert!(p.p10 <= p.p25 && p.p25 <= p.p50 && p.p50 <= p.p75 && p.p75 <= p.p90);
    // Streaming estimates land near the exact percentiles.
    let rel = |a: f64, b: f64| (a - b).abs() / b.abs().max(1.0);
    assert!(rel(result.streaming_percentiles.p50, p.p50) < 0.15);
}

#[test]
fn irmaa_never_appears_before_65_and_traces_are_complete() {
    let params = high_earner_couple();
    let result = run_batch(&params, 200, &ReturnConfig::default()).unwrap();
    for trace in [
        &result.representative_traces.p10,
        &result.representative_traces.median,
        &result.representative_traces.p90,
    ] {
        assert!(!trace.is_empty());
        for row in trace.iter() {
            if row.taxes.irmaa_surcharge > 0.0 {
                assert!(row.age >= 65, "IRMAA at age {}", row.age);
            }
        }
    }
    // Balance bands cover the longest trace.
    assert_eq!(
        result.yearly_balance_bands.p50.len(),
        result.yearly_balance_bands.p10.len()
    );
    assert!(!result.yearly_balance_bands.p50.is_empty());
}

#[test]
fn legacy_success_is_never_above_default_success() {
    let mut params = high_earner_couple();
    params.cash_flows.legacy_goal = 250_000.0;
    let result = run_batch(&params, 400, &ReturnConfig::default()).unwrap();
    assert!(result.legacy_success_rate <= result.probability_of_success + 1e-9);
    assert!(result.utility_adjusted_success <= 1.0);
    assert!(result.risk.retirement_flexibility >= 0.0);
    assert!(result.risk.retirement_flexibility <= 100.0);
}

#[test]
fn control_variate_adjustment_is_bounded() {
    let mut params = high_earner_couple();
    params.variance_reduction.use_control_variates = true;
    let result = run_batch(&params, 300, &ReturnConfig::default()).unwrap();
    let adjustment = result
        .control_variate_adjustment
        .expect("control variate requested");
    assert!(adjustment.abs() <= 0.5, "damped beta must bound the shift");
    assert!((0.0..=1.0).contains(&result.probability_of_success));
}

#[test]
fn cancellation_before_start_returns_cancelled() {
    let params = high_earner_couple();
    let progress = BatchProgress::new();
    progress.cancel();
    let result = run_batch_with_progress(&params, 100, &ReturnConfig::default(), &progress);
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

#[test]
fn progress_counts_completed_iterations() {
    let params = single_young_no_spending();
    let progress = BatchProgress::new();
    let result =
        run_batch_with_progress(&params, 50, &ReturnConfig::default(), &progress).unwrap();
    assert_eq!(progress.completed(), result.iterations);
}

#[test]
fn ltc_breakdown_populates_when_modelling_enabled() {
    let mut params = high_earner_couple();
    params.strategy.model_ltc = true;
    let result = run_batch(&params, 800, &ReturnConfig::default()).unwrap();
    let ltc = &result.ltc_analysis;
    assert!(
        (0.15..=0.60).contains(&ltc.event_probability),
        "LTC probability {} implausible",
        ltc.event_probability
    );
    assert!(ltc.avg_lifetime_cost > 0.0);
    assert!(ltc.avg_duration_years > 0.0);
    let mix_total = ltc.care_type_mix.home
        + ltc.care_type_mix.assisted
        + ltc.care_type_mix.nursing
        + ltc.care_type_mix.memory;
    assert!((mix_total - 1.0).abs() < 0.05);
    assert!(ltc.success_rate_with_ltc <= ltc.success_rate_without_ltc + 0.05);
}

#[test]
fn results_serialize_with_camel_case_keys() {
    // The upstream profile format is camelCase JSON; the result payload
    // has to round-trip for embedding callers.
    let params = single_young_no_spending();
    let result = run_batch(&params, 20, &ReturnConfig::default()).unwrap();
    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("probabilityOfSuccess"));
    assert!(json.contains("endingBalancePercentiles"));
    assert!(json.contains("yearlyBalanceBands"));
    let back: crate::model::results::BatchResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back.iterations, result.iterations);
    assert_eq!(back.probability_of_success, result.probability_of_success);
}

#[test]
fn disabling_ltc_zeroes_every_ltc_cost() {
    let mut params = high_earner_couple();
    params.strategy.model_ltc = false;
    let result = run_batch(&params, 100, &ReturnConfig::default()).unwrap();
    assert_eq!(result.ltc_analysis.event_probability, 0.0);
    for row in &result.representative_traces.median {
        assert_eq!(row.ltc_cost, 0.0);
    }
}
