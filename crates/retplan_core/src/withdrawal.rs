//! Iterative gross-withdrawal solver.
//!
//! Given a net after-tax cash need and the household's bucket balances,
//! choose a gross withdrawal and per-bucket sourcing that satisfies RMDs
//! and converges on net-after-tax within $50 of the target. Sourcing order
//! is deterministic: RMD -> cash -> capital gains -> tax-deferred ->
//! tax-free.

use rustc_hash::FxHashMap;

use crate::model::params::{AssetBuckets, FilingStatus, ItemizationOptions};
use crate::model::results::WithdrawalSources;
use crate::model::rmd::required_minimum_distribution;
use crate::taxes::{AcaReconInput, IrmaaResult, TaxYearInput, compute_taxes};

/// Annual QCD cap per owner (2024 indexed amount).
const QCD_ANNUAL_CAP: f64 = 105_000.0;
/// Convergence tolerance on |net - target| in dollars.
const NET_TOLERANCE: f64 = 50.0;
const MAX_ITERATIONS: u32 = 20;
const MAX_OSCILLATIONS: u32 = 5;
/// Conservative effective rate reported on non-convergence.
const FALLBACK_EFFECTIVE_RATE: f64 = 0.22;

#[derive(Debug, Clone)]
pub struct WithdrawalRequest<'a> {
    pub net_needed: f64,
    pub buckets: AssetBuckets,
    /// (user, spouse) decomposition when tracked; RMDs draw per owner.
    pub owner_buckets: Option<(AssetBuckets, AssetBuckets)>,
    pub total_social_security: f64,
    pub age: u8,
    pub spouse_age: Option<u8>,
    pub state: &'a str,
    pub filing_status: FilingStatus,
    pub itemization: Option<&'a ItemizationOptions>,
    pub pension_income: f64,
    pub earned_income: f64,
    pub magi_two_years_prior: Option<f64>,
    pub birth_year: i32,
    pub spouse_birth_year: Option<i32>,
    pub simulation_year: i32,
    pub aca: Option<AcaReconInput>,
    /// Annual qualified charitable distribution target (0 = none).
    pub qcd_target: f64,
    /// Override the computed RMD (used by tests and what-if flows).
    pub rmd_override: Option<f64>,
    /// Basis fraction of the taxable account, when tracked.
    pub taxable_basis_ratio: Option<f64>,
    /// Holding-period proxy for the basis heuristic.
    pub years_into_retirement: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalResult {
    pub gross_withdrawal: f64,
    pub net_after_taxes: f64,
    pub federal_tax: f64,
    pub state_tax: f64,
    pub capital_gains_tax: f64,
    pub total_taxes: f64,
    pub effective_tax_rate: f64,
    pub marginal_tax_rate: f64,
    pub modified_agi: f64,
    pub taxable_ss_benefit: f64,
    pub irmaa: IrmaaResult,
    pub required_rmd: f64,
    pub actual_rmd_withdrawn: f64,
    pub sources: WithdrawalSources,
    /// Net-of-tax RMD excess over the need, to be reinvested taxable.
    pub rmd_excess_reinvested: f64,
    pub converged: bool,
    pub iterations: u32,
}

/// Taxable fraction of a capital-gains-account withdrawal.
fn gain_fraction(request: &WithdrawalRequest<'_>) -> f64 {
    let basis_ratio = request
        .taxable_basis_ratio
        .unwrap_or_else(|| (1.0 - f64::from(request.years_into_retirement) * 0.07).max(0.3));
    (1.0 - basis_ratio.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Total required RMD across owners.
fn total_required_rmd(request: &WithdrawalRequest<'_>) -> f64 {
    if let Some(rmd) = request.rmd_override {
        return rmd.max(0.0);
    }
    match &request.owner_buckets {
        Some((user, spouse)) => {
            let mut rmd = required_minimum_distribution(
                user.tax_deferred,
                request.age,
                request.spouse_age,
                request.birth_year,
            );
            if let (Some(spouse_age), Some(spouse_birth)) =
                (request.spouse_age, request.spouse_birth_year)
            {
                rmd += required_minimum_distribution(
                    spouse.tax_deferred,
                    spouse_age,
                    Some(request.age),
                    spouse_birth,
                );
            }
            rmd
        }
        None => required_minimum_distribution(
            request.buckets.tax_deferred,
            request.age,
            request.spouse_age,
            request.birth_year,
        ),
    }
}

/// QCD available this year: capped per owner, only once past age 70.5.
fn qcd_applied(request: &WithdrawalRequest<'_>, rmd_from_deferred: f64) -> f64 {
    if request.qcd_target <= 0.0 {
        return 0.0;
    }
    let mut cap = 0.0;
    if f64::from(request.age) >= 70.5 {
        cap += QCD_ANNUAL_CAP;
    }
    if request.spouse_age.is_some_and(|a| f64::from(a) >= 70.5) {
        cap += QCD_ANNUAL_CAP;
    }
    request.qcd_target.min(cap).min(rmd_from_deferred)
}

/// Deterministic sourcing of a gross amount across buckets.
fn source_gross(buckets: &AssetBuckets, gross: f64, required_rmd: f64) -> WithdrawalSources {
    let mut remaining = gross.max(0.0);
    let mut sources = WithdrawalSources::default();

    // RMD comes out of tax-deferred first; it is not avoidable.
    sources.tax_deferred = required_rmd.min(buckets.tax_deferred).min(remaining);
    remaining -= sources.tax_deferred;

    sources.cash = buckets.cash_equivalents.min(remaining);
    remaining -= sources.cash;

    sources.capital_gains = buckets.capital_gains.min(remaining);
    remaining -= sources.capital_gains;

    let deferred_left = buckets.tax_deferred - sources.tax_deferred;
    let extra_deferred = deferred_left.min(remaining);
    sources.tax_deferred += extra_deferred;
    remaining -= extra_deferred;

    sources.tax_free = buckets.tax_free.min(remaining);

    sources
}

/// Solve for the gross withdrawal that nets the requested amount.
#[must_use]
pub fn solve_withdrawal(request: &WithdrawalRequest<'_>) -> WithdrawalResult {
    let required_rmd = total_required_rmd(request);
    let expected_rate = if request.filing_status.is_married() {
        0.18
    } else {
        0.22
    };

    let floor = required_rmd.min(request.buckets.tax_deferred);
    let mut gross =
        (request.net_needed.max(floor) / (1.0 - expected_rate)).max(floor);
    gross = gross.min(request.buckets.total_assets);

    let gain_fraction = gain_fraction(request);

    let mut best: Option<(WithdrawalSources, crate::taxes::TaxComputation, f64)> = None;
    let mut converged = false;
    let mut iterations = 0;
    let mut oscillations = 0;
    let mut damping = 1.0;
    let mut last_shortfall_sign = 0i8;

    for iteration in 1..=MAX_ITERATIONS {
        iterations = iteration;
        let sources = source_gross(&request.buckets, gross, floor);

        let rmd_from_deferred = sources.tax_deferred.min(floor);
        let qcd = qcd_applied(request, rmd_from_deferred);
        let ordinary = (sources.tax_deferred - qcd).max(0.0)
            + request.pension_income
            + request.earned_income;
        let realized_gains = sources.capital_gains * gain_fraction;

        let tax_input = TaxYearInput {
            year: request.simulation_year,
            filing_status: request.filing_status,
            state: request.state,
            ordinary_income: ordinary,
            capital_gains: realized_gains,
            social_security_gross: request.total_social_security,
            pension_income: request.pension_income,
            earned_income: request.earned_income,
            age: request.age,
            spouse_age: request.spouse_age,
            itemization: request.itemization,
            magi_two_years_prior: request.magi_two_years_prior,
            aca: request.aca,
        };
        let taxes = compute_taxes(&tax_input);

        let actual_gross = sources.total();
        let net = actual_gross - taxes.total_tax;
        let shortfall = request.net_needed - net;
        best = Some((sources, taxes.clone(), actual_gross));

        // Pinned iterates are terminal: at the RMD floor the excess is
        // reinvested rather than chased, and a depleted portfolio cannot
        // source more gross.
        let pinned_at_rmd_floor = (gross - floor).abs() < 1e-6 && shortfall < 0.0;
        let pinned_at_depletion =
            actual_gross >= request.buckets.total_assets - 1e-6 && shortfall > 0.0;
        if shortfall.abs() < NET_TOLERANCE || pinned_at_rmd_floor || pinned_at_depletion {
            converged = true;
            break;
        }

        let sign = if shortfall > 0.0 { 1 } else { -1 };
        if last_shortfall_sign != 0 && sign != last_shortfall_sign {
            oscillations += 1;
            damping *= 0.5;
            if oscillations > MAX_OSCILLATIONS {
                break;
            }
        }
        last_shortfall_sign = sign;

        let marginal = taxes.marginal_rate.min(0.50);
        gross = (gross + shortfall / (1.0 - marginal) * damping)
            .max(floor)
            .min(request.buckets.total_assets);
    }

    let Some((sources, taxes, actual_gross)) = best else {
        // MAX_ITERATIONS >= 1, so the loop always produced an iterate;
        // this arm only keeps the function total.
        return WithdrawalResult {
            gross_withdrawal: 0.0,
            net_after_taxes: 0.0,
            federal_tax: 0.0,
            state_tax: 0.0,
            capital_gains_tax: 0.0,
            total_taxes: 0.0,
            effective_tax_rate: 0.0,
            marginal_tax_rate: 0.0,
            modified_agi: 0.0,
            taxable_ss_benefit: 0.0,
            irmaa: IrmaaResult::default(),
            required_rmd,
            actual_rmd_withdrawn: 0.0,
            sources: WithdrawalSources::default(),
            rmd_excess_reinvested: 0.0,
            converged: false,
            iterations,
        };
    };

    let mut net_after_taxes = actual_gross - taxes.total_tax;
    let mut effective_tax_rate = if actual_gross > 0.0 {
        taxes.total_tax / actual_gross
    } else {
        0.0
    };
    if !converged {
        // Last iterate with a conservative rate; the scenario continues.
        effective_tax_rate = effective_tax_rate.max(FALLBACK_EFFECTIVE_RATE);
        net_after_taxes = actual_gross * (1.0 - effective_tax_rate);
    }

    // A required distribution larger than the need is not consumed; its
    // net-of-tax excess goes back into the taxable account.
    let rmd_excess_reinvested = if request.net_needed < net_after_taxes {
        net_after_taxes - request.net_needed
    } else {
        0.0
    };

    WithdrawalResult {
        gross_withdrawal: actual_gross,
        net_after_taxes,
        federal_tax: taxes.federal_tax,
        state_tax: taxes.state_tax,
        capital_gains_tax: taxes.capital_gains_tax,
        total_taxes: taxes.total_tax,
        effective_tax_rate,
        marginal_tax_rate: taxes.marginal_rate,
        modified_agi: taxes.modified_agi,
        taxable_ss_benefit: taxes.taxable_social_security,
        irmaa: taxes.irmaa,
        required_rmd,
        actual_rmd_withdrawn: sources.tax_deferred.min(floor),
        sources,
        rmd_excess_reinvested,
        converged,
        iterations,
    }
}

/// Bounded memo cache for solver outputs, keyed by quantized inputs. Owned
/// by the batch orchestrator for the lifetime of one call; never global.
#[derive(Debug, Default)]
pub struct SolverCache {
    entries: FxHashMap<SolverCacheKey, WithdrawalResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SolverCacheKey {
    net_needed: i64,
    tax_deferred: i64,
    tax_free: i64,
    capital_gains: i64,
    cash: i64,
    social_security: i64,
    magi_lookback: i64,
    age: u8,
    spouse_age: u8,
    year: i32,
}

impl SolverCache {
    const CAPACITY: usize = 1000;
    /// Quantization step in dollars.
    const STEP: f64 = 100.0;

    #[must_use]
    pub fn key(request: &WithdrawalRequest<'_>) -> SolverCacheKey {
        let q = |v: f64| (v / Self::STEP).round() as i64;
        SolverCacheKey {
            net_needed: q(request.net_needed),
            tax_deferred: q(request.buckets.tax_deferred),
            tax_free: q(request.buckets.tax_free),
            capital_gains: q(request.buckets.capital_gains),
            cash: q(request.buckets.cash_equivalents),
            social_security: q(request.total_social_security),
            magi_lookback: q(request.magi_two_years_prior.unwrap_or(0.0)),
            age: request.age,
            spouse_age: request.spouse_age.unwrap_or(0),
            year: request.simulation_year,
        }
    }

    #[must_use]
    pub fn get(&self, key: &SolverCacheKey) -> Option<&WithdrawalResult> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: SolverCacheKey, result: WithdrawalResult) {
        if self.entries.len() >= Self::CAPACITY {
            self.entries.clear();
        }
        self.entries.insert(key, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(net: f64, buckets: AssetBuckets) -> WithdrawalRequest<'static> {
        WithdrawalRequest {
            net_needed: net,
            buckets,
            owner_buckets: None,
            total_social_security: 0.0,
            age: 68,
            spouse_age: None,
            state: "TX",
            filing_status: FilingStatus::Single,
            itemization: None,
            pension_income: 0.0,
            earned_income: 0.0,
            magi_two_years_prior: None,
            birth_year: 1957,
            spouse_birth_year: None,
            simulation_year: 2025,
            aca: None,
            qcd_target: 0.0,
            rmd_override: None,
            taxable_basis_ratio: None,
            years_into_retirement: 3,
        }
    }

    #[test]
    fn converges_within_tolerance() {
        let buckets = AssetBuckets::new(800_000.0, 200_000.0, 150_000.0, 50_000.0);
        let result = solve_withdrawal(&request(60_000.0, buckets));
        assert!(result.converged, "iterations = {}", result.iterations);
        assert!(
            (result.net_after_taxes - 60_000.0).abs() < NET_TOLERANCE,
            "net = {}",
            result.net_after_taxes
        );
        assert!(result.gross_withdrawal >= result.required_rmd);
    }

    #[test]
    fn sourcing_order_is_cash_then_gains_then_deferred_then_roth() {
        let buckets = AssetBuckets::new(500_000.0, 100_000.0, 80_000.0, 30_000.0);
        let mut req = request(50_000.0, buckets);
        req.age = 65; // pre-RMD
        let result = solve_withdrawal(&req);
        // Cash and gains exhaust before tax-deferred; Roth stays untouched.
        assert_eq!(result.sources.cash, 30_000.0);
        assert!(result.sources.capital_gains > 0.0);
        assert_eq!(result.sources.tax_free, 0.0);
        assert_eq!(result.required_rmd, 0.0);
    }

    #[test]
    fn rmd_floor_forces_gross_above_need() {
        // Age 80, large deferred balance: RMD dwarfs a small need.
        let buckets = AssetBuckets::new(2_000_000.0, 0.0, 0.0, 0.0);
        let mut req = request(10_000.0, buckets);
        req.age = 80;
        req.birth_year = 1945;
        let result = solve_withdrawal(&req);
        let expected_rmd = 2_000_000.0 / 20.2;
        assert!((result.required_rmd - expected_rmd).abs() < 1.0);
        assert!(result.gross_withdrawal >= result.required_rmd - 1e-6);
        assert!(result.rmd_excess_reinvested > 0.0);
    }

    #[test]
    fn qcd_reduces_taxes_not_gross() {
        let buckets = AssetBuckets::new(1_000_000.0, 0.0, 0.0, 0.0);
        let mut base = request(40_000.0, buckets);
        base.age = 75;
        base.birth_year = 1950;
        let without = solve_withdrawal(&base);

        let mut with_qcd = base.clone();
        with_qcd.qcd_target = 20_000.0;
        let with_qcd = solve_withdrawal(&with_qcd);

        assert!(with_qcd.required_rmd > 0.0);
        // Same required distribution, lower tax bill with the QCD.
        assert!((with_qcd.required_rmd - without.required_rmd).abs() < 1e-6);
        assert!(with_qcd.total_taxes < without.total_taxes);
    }

    #[test]
    fn depleted_portfolio_returns_what_it_can() {
        let buckets = AssetBuckets::new(5_000.0, 2_000.0, 1_000.0, 500.0);
        let result = solve_withdrawal(&request(100_000.0, buckets));
        assert!(result.gross_withdrawal <= 8_500.0 + 1e-9);
        assert!(result.net_after_taxes < 100_000.0);
    }

    #[test]
    fn roth_only_withdrawals_are_tax_free() {
        let buckets = AssetBuckets::new(0.0, 500_000.0, 0.0, 0.0);
        let mut req = request(40_000.0, buckets);
        req.age = 66;
        let result = solve_withdrawal(&req);
        assert!(result.converged);
        assert!(result.total_taxes < 1.0);
        assert!((result.net_after_taxes - 40_000.0).abs() < NET_TOLERANCE);
        assert_eq!(result.sources.tax_free, result.gross_withdrawal);
    }

    #[test]
    fn cache_key_quantizes_nearby_requests() {
        let buckets = AssetBuckets::new(800_000.0, 200_000.0, 150_000.0, 50_000.0);
        let a = SolverCache::key(&request(60_000.0, buckets));
        let b = SolverCache::key(&request(60_020.0, buckets));
        let c = SolverCache::key(&request(61_000.0, buckets));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
