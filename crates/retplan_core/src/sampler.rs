//! Distribution sampler: one draw of random variates becomes a vector of
//! per-asset annual returns plus a portfolio return, honouring cross-asset
//! correlations, regime adjustments, and the configured distribution
//! family.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::model::cma::{AssetClass, CapitalMarketAssumptions};
use crate::model::params::Allocation;
use crate::model::regime::MarketRegime;
use crate::rng::ScenarioRng;

/// Default per-asset annual drawdown floor.
pub const DEFAULT_DRAWDOWN_FLOOR: f64 = -0.30;

/// Inflation draw bounds.
const INFLATION_MIN: f64 = -0.05;
const INFLATION_MAX: f64 = 0.15;

/// Distribution family for per-asset shocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReturnDistribution {
    Normal,
    /// Fat tails; the variate is rescaled by sqrt((df-2)/df) so its
    /// variance matches the standard normal.
    StudentT { df: f64 },
    /// Systemic Poisson-gated jump shared by the risky assets.
    JumpDiffusion {
        intensity: f64,
        jump_mean: f64,
        jump_volatility: f64,
    },
    /// Ornstein-Uhlenbeck step around the asset's long-term mean.
    MeanReverting { reversion_speed: f64 },
    /// Compound twelve sampled monthly returns; falls back to the normal
    /// family per asset when history is insufficient.
    BlockBootstrap,
}

/// Blend of user-specified portfolio mean/vol with the model values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReturnOverrides {
    pub mean: Option<f64>,
    pub volatility: Option<f64>,
    pub blending_weight: f64,
}

impl Default for UserReturnOverrides {
    fn default() -> Self {
        Self {
            mean: None,
            volatility: None,
            blending_weight: 0.5,
        }
    }
}

/// Sampler configuration shared across a scenario.
#[derive(Debug, Clone)]
pub struct SamplerConfig<'a> {
    pub distribution: ReturnDistribution,
    pub cma: &'a CapitalMarketAssumptions,
    /// Monthly return history per asset class, required only for
    /// `BlockBootstrap`.
    pub monthly_history: Option<&'a FxHashMap<AssetClass, Vec<f64>>>,
    /// `None` disables the per-asset floor (stress mode).
    pub drawdown_floor: Option<f64>,
    /// Draw a correlated inflation pseudo-asset alongside returns.
    pub correlate_inflation: bool,
    pub base_inflation: f64,
    pub inflation_volatility: f64,
    pub overrides: Option<UserReturnOverrides>,
}

/// One year's correlated draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledReturns {
    pub portfolio_return: f64,
    /// Per-class returns in [`AssetClass::ALL`] order.
    pub asset_returns: [f64; 5],
    pub inflation: Option<f64>,
}

/// Geometric-to-arithmetic mean conversion for Monte Carlo drift.
#[must_use]
pub fn cagr_to_aagr(cagr: f64, volatility: f64) -> f64 {
    cagr + volatility * volatility / 2.0
}

/// Arithmetic-to-geometric, for deterministic projection side-channels.
#[must_use]
pub fn aagr_to_cagr(aagr: f64, volatility: f64) -> f64 {
    aagr - volatility * volatility / 2.0
}

/// Cholesky factor of a symmetric positive semi-definite matrix. Diagonal
/// terms driven negative by round-off are clamped to zero, which zeroes
/// that row's off-diagonal contribution rather than failing the draw.
#[must_use]
pub fn cholesky(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                l[i][j] = sum.max(0.0).sqrt();
            } else if l[j][j] > 0.0 {
                l[i][j] = sum / l[j][j];
            }
        }
    }
    l
}

struct ActiveAsset {
    class: Option<AssetClass>,
    weight: f64,
    mean_aagr: f64,
    volatility: f64,
}

/// Draw one year (or fraction `dt` of a year) of correlated returns.
pub fn sample_returns<R: ScenarioRng + ?Sized>(
    allocation: &Allocation,
    regime: MarketRegime,
    dt: f64,
    rng: &mut R,
    config: &SamplerConfig<'_>,
    prev_returns: Option<&[f64; 5]>,
) -> SampledReturns {
    let mut active = active_assets(allocation, regime, config);
    if config.correlate_inflation {
        // Inflation rides along with weight zero so it shares the
        // correlated draw without contributing to the portfolio return.
        active.push(ActiveAsset {
            class: None,
            weight: 0.0,
            mean_aagr: config.base_inflation,
            volatility: config.inflation_volatility,
        });
    }

    let variates = draw_variates(&active, rng, config, dt);
    let correlated = correlate(&active, regime, config, &variates);

    let mut asset_returns = [0.0_f64; 5];
    let mut portfolio_return = 0.0;
    let mut inflation = None;

    for (i, asset) in active.iter().enumerate() {
        let z = correlated[i];
        match asset.class {
            Some(class) => {
                let r = asset_return(asset, class, z, dt, rng, config, prev_returns);
                let r = match config.drawdown_floor {
                    Some(floor) => r.max(floor),
                    None => r,
                };
                asset_returns[class.index()] = r;
                portfolio_return += asset.weight * r;
            }
            None => {
                let draw = config.base_inflation + config.inflation_volatility * dt.sqrt() * z;
                inflation = Some(draw.clamp(INFLATION_MIN, INFLATION_MAX));
            }
        }
    }

    SampledReturns {
        portfolio_return,
        asset_returns,
        inflation,
    }
}

fn active_assets(
    allocation: &Allocation,
    regime: MarketRegime,
    config: &SamplerConfig<'_>,
) -> Vec<ActiveAsset> {
    let adjustments = regime.parameters().assets;
    let weights = allocation.as_array();
    let mut model_portfolio_mean = 0.0;
    let mut total_weight = 0.0;
    for class in AssetClass::ALL {
        let w = weights[class.index()];
        if w > 0.0 {
            let a = config.cma.assumption(class);
            model_portfolio_mean += w * cagr_to_aagr(a.expected_return_cagr, a.volatility);
            total_weight += w;
        }
    }
    let (mean_scale, vol_scale) = override_scales(config, model_portfolio_mean, total_weight);

    AssetClass::ALL
        .iter()
        .filter(|class| weights[class.index()] > 0.0)
        .map(|&class| {
            let assumption = config.cma.assumption(class);
            let (return_mult, vol_mult) = match class {
                AssetClass::UsStocks => {
                    (adjustments.stocks.return_multiplier, adjustments.stocks.vol_multiplier)
                }
                AssetClass::IntlStocks => (
                    adjustments.intl_stocks.return_multiplier,
                    adjustments.intl_stocks.vol_multiplier,
                ),
                AssetClass::Bonds => {
                    (adjustments.bonds.return_multiplier, adjustments.bonds.vol_multiplier)
                }
                AssetClass::Reits => {
                    (adjustments.reits.return_multiplier, adjustments.reits.vol_multiplier)
                }
                AssetClass::Cash => (1.0, 1.0),
            };
            let volatility = assumption.volatility * vol_mult * vol_scale;
            let base_aagr = cagr_to_aagr(assumption.expected_return_cagr, assumption.volatility);
            ActiveAsset {
                class: Some(class),
                weight: weights[class.index()],
                mean_aagr: base_aagr * return_mult * mean_scale,
                volatility,
            }
        })
        .collect()
}

/// Blend factors from user overrides: the user's portfolio-level mean/vol
/// is mixed with the model value at `blending_weight`, then spread across
/// assets proportionally to their model values.
fn override_scales(
    config: &SamplerConfig<'_>,
    model_portfolio_mean: f64,
    total_weight: f64,
) -> (f64, f64) {
    let Some(overrides) = config.overrides else {
        return (1.0, 1.0);
    };
    let w = overrides.blending_weight.clamp(0.0, 1.0);
    let mean_scale = match overrides.mean {
        Some(user_mean) if model_portfolio_mean.abs() > 1e-9 && total_weight > 0.0 => {
            let blended =
                (1.0 - w) * model_portfolio_mean + w * user_mean;
            blended / model_portfolio_mean
        }
        _ => 1.0,
    };
    let vol_scale = match overrides.volatility {
        Some(user_vol) if user_vol > 0.0 => {
            // Approximate: treat the model's weighted average vol as the
            // portfolio vol when rescaling toward the user's number.
            let model_vol = average_model_vol(config);
            if model_vol > 1e-9 {
                ((1.0 - w) * model_vol + w * user_vol) / model_vol
            } else {
                1.0
            }
        }
        _ => 1.0,
    };
    (mean_scale, vol_scale)
}

fn average_model_vol(config: &SamplerConfig<'_>) -> f64 {
    AssetClass::ALL
        .iter()
        .map(|&c| config.cma.assumption(c).volatility)
        .sum::<f64>()
        / AssetClass::ALL.len() as f64
}

fn draw_variates<R: ScenarioRng + ?Sized>(
    active: &[ActiveAsset],
    rng: &mut R,
    config: &SamplerConfig<'_>,
    dt: f64,
) -> Vec<f64> {
    match config.distribution {
        ReturnDistribution::StudentT { df } => {
            let scale = if df > 2.0 { ((df - 2.0) / df).sqrt() } else { 1.0 };
            active
                .iter()
                .map(|_| rng.student_t(df.max(3.0) as u32) * scale)
                .collect()
        }
        ReturnDistribution::JumpDiffusion {
            intensity,
            jump_mean,
            jump_volatility,
        } => {
            let gated = rng.next_uniform() < 1.0 - (-intensity * dt).exp();
            let jump = if gated {
                jump_mean + jump_volatility * rng.normal()
            } else {
                0.0
            };
            active
                .iter()
                .map(|asset| {
                    let z = rng.normal();
                    // The systemic jump lands in return space; convert it
                    // into variate units per asset so the later sigma
                    // scaling reproduces it.
                    if asset.class.is_some() && asset.volatility > 1e-9 {
                        z + jump / asset.volatility
                    } else {
                        z
                    }
                })
                .collect()
        }
        _ => active.iter().map(|_| rng.normal()).collect(),
    }
}

fn correlate(
    active: &[ActiveAsset],
    regime: MarketRegime,
    config: &SamplerConfig<'_>,
    variates: &[f64],
) -> Vec<f64> {
    let n = active.len();
    if n == 1 {
        return variates.to_vec();
    }

    let inflation_corr = regime.inflation_correlations();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            matrix[i][j] = match (active[i].class, active[j].class) {
                (Some(a), Some(b)) => config.cma.correlation(a, b),
                (Some(a), None) | (None, Some(a)) => match a {
                    AssetClass::UsStocks => inflation_corr.stocks,
                    AssetClass::IntlStocks => inflation_corr.intl_stocks,
                    AssetClass::Bonds => inflation_corr.bonds,
                    AssetClass::Reits => inflation_corr.reits,
                    AssetClass::Cash => inflation_corr.cash,
                },
                (None, None) => 1.0,
            };
        }
    }

    let l = cholesky(&matrix);
    (0..n)
        .map(|i| (0..=i).map(|k| l[i][k] * variates[k]).sum())
        .collect()
}

fn asset_return<R: ScenarioRng + ?Sized>(
    asset: &ActiveAsset,
    class: AssetClass,
    z: f64,
    dt: f64,
    rng: &mut R,
    config: &SamplerConfig<'_>,
    prev_returns: Option<&[f64; 5]>,
) -> f64 {
    match config.distribution {
        ReturnDistribution::MeanReverting { reversion_speed } => {
            let prev = prev_returns
                .map(|p| p[class.index()])
                .unwrap_or(asset.mean_aagr);
            prev + reversion_speed * (asset.mean_aagr - prev) * dt
                + asset.volatility * dt.sqrt() * z
        }
        ReturnDistribution::BlockBootstrap => {
            match bootstrap_year(class, dt, rng, config) {
                Some(r) => r,
                None => lognormal_return(asset, z, dt),
            }
        }
        _ => lognormal_return(asset, z, dt),
    }
}

fn lognormal_return(asset: &ActiveAsset, z: f64, dt: f64) -> f64 {
    let sigma = asset.volatility;
    let drift = (1.0 + asset.mean_aagr).max(1e-9).ln() - sigma * sigma / 2.0;
    (drift * dt + sigma * dt.sqrt() * z).exp() - 1.0
}

/// Compound a random 12-month block from the asset's monthly history.
/// Returns `None` when fewer than two years of history are available.
fn bootstrap_year<R: ScenarioRng + ?Sized>(
    class: AssetClass,
    dt: f64,
    rng: &mut R,
    config: &SamplerConfig<'_>,
) -> Option<f64> {
    let history = config.monthly_history?.get(&class)?;
    if history.len() < 24 {
        return None;
    }
    let months = ((12.0 * dt).round() as usize).max(1);
    let start = (rng.next_uniform() * history.len() as f64) as usize;
    let mut compounded = 1.0;
    for m in 0..months {
        compounded *= 1.0 + history[(start + m) % history.len()];
    }
    Some(compounded - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Xorshift32;
    use approx::assert_relative_eq;

    fn config(cma: &CapitalMarketAssumptions) -> SamplerConfig<'_> {
        SamplerConfig {
            distribution: ReturnDistribution::Normal,
            cma,
            monthly_history: None,
            drawdown_floor: Some(DEFAULT_DRAWDOWN_FLOOR),
            correlate_inflation: false,
            base_inflation: 0.025,
            inflation_volatility: 0.012,
            overrides: None,
        }
    }

    fn balanced_allocation() -> Allocation {
        Allocation {
            stocks: 0.40,
            intl_stocks: 0.10,
            bonds: 0.35,
            reits: 0.05,
            cash: 0.10,
        }
    }

    #[test]
    fn zero_volatility_returns_weighted_expected_return() {
        let mut cma = CapitalMarketAssumptions::builtin_default();
        for a in [
            &mut cma.us_stocks,
            &mut cma.intl_stocks,
            &mut cma.bonds,
            &mut cma.reits,
            &mut cma.cash,
        ] {
            a.volatility = 0.0;
        }
        let cfg = config(&cma);
        let alloc = balanced_allocation();
        let mut rng = Xorshift32::new(1);
        let sampled =
            sample_returns(&alloc, MarketRegime::Normal, 1.0, &mut rng, &cfg, None);

        let mut expected = 0.0;
        for class in AssetClass::ALL {
            let w = alloc.as_array()[class.index()];
            if w > 0.0 {
                // With sigma = 0: AAGR = CAGR and exp(ln(1+r)) - 1 = r.
                expected += w * cma.assumption(class).expected_return_cagr;
            }
        }
        assert_relative_eq!(sampled.portfolio_return, expected, epsilon = 1e-12);
    }

    #[test]
    fn cagr_aagr_round_trip() {
        let aagr = cagr_to_aagr(0.07, 0.17);
        assert_relative_eq!(aagr, 0.07 + 0.17_f64.powi(2) / 2.0);
        assert_relative_eq!(aagr_to_cagr(aagr, 0.17), 0.07, epsilon = 1e-12);
    }

    #[test]
    fn cholesky_reproduces_matrix() {
        let m = vec![
            vec![1.0, 0.8, 0.1],
            vec![0.8, 1.0, 0.2],
            vec![0.1, 0.2, 1.0],
        ];
        let l = cholesky(&m);
        for i in 0..3 {
            for j in 0..3 {
                let reconstructed: f64 = (0..3).map(|k| l[i][k] * l[j][k]).sum();
                assert_relative_eq!(reconstructed, m[i][j], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn cholesky_clamps_non_psd_diagonal() {
        // Correlation 1.0 with an extra row makes the trailing diagonal hit
        // zero; the factorization must not produce NaNs.
        let m = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        let l = cholesky(&m);
        assert!(l.iter().flatten().all(|v| v.is_finite()));
        assert_relative_eq!(l[1][1], 0.0);
    }

    #[test]
    fn single_asset_skips_correlation() {
        let cma = CapitalMarketAssumptions::builtin_default();
        let cfg = config(&cma);
        let alloc = Allocation {
            stocks: 1.0,
            intl_stocks: 0.0,
            bonds: 0.0,
            reits: 0.0,
            cash: 0.0,
        };
        let mut rng = Xorshift32::new(9);
        let sampled = sample_returns(&alloc, MarketRegime::Normal, 1.0, &mut rng, &cfg, None);
        assert_relative_eq!(sampled.portfolio_return, sampled.asset_returns[0]);
    }

    #[test]
    fn drawdown_floor_caps_losses() {
        let cma = CapitalMarketAssumptions::builtin_default();
        let cfg = config(&cma);
        let alloc = balanced_allocation();
        let mut rng = Xorshift32::new(77);
        for _ in 0..2000 {
            let sampled =
                sample_returns(&alloc, MarketRegime::Crisis, 1.0, &mut rng, &cfg, None);
            for r in sampled.asset_returns {
                assert!(r >= DEFAULT_DRAWDOWN_FLOOR - 1e-12);
            }
        }
    }

    #[test]
    fn inflation_draw_is_bounded() {
        let cma = CapitalMarketAssumptions::builtin_default();
        let mut cfg = config(&cma);
        cfg.correlate_inflation = true;
        cfg.inflation_volatility = 0.10;
        let alloc = balanced_allocation();
        let mut rng = Xorshift32::new(55);
        for _ in 0..2000 {
            let sampled =
                sample_returns(&alloc, MarketRegime::Crisis, 1.0, &mut rng, &cfg, None);
            let infl = sampled.inflation.expect("inflation requested");
            assert!((INFLATION_MIN..=INFLATION_MAX).contains(&infl));
        }
    }

    #[test]
    fn student_t_variance_matches_normal_family() {
        let cma = CapitalMarketAssumptions::builtin_default();
        let mut cfg = config(&cma);
        cfg.distribution = ReturnDistribution::StudentT { df: 6.0 };
        cfg.drawdown_floor = None;
        let alloc = Allocation {
            stocks: 1.0,
            intl_stocks: 0.0,
            bonds: 0.0,
            reits: 0.0,
            cash: 0.0,
        };
        let mut rng = Xorshift32::new(2);
        let n = 30_000;
        let mut stats = crate::stats::StreamingStats::default();
        for _ in 0..n {
            let s = sample_returns(&alloc, MarketRegime::Normal, 1.0, &mut rng, &cfg, None);
            stats.push((1.0 + s.portfolio_return).ln());
        }
        // Log-return std should land near the configured 17% vol.
        assert!((stats.std_dev() - 0.17).abs() < 0.02);
    }

    #[test]
    fn bootstrap_falls_back_without_history() {
        let cma = CapitalMarketAssumptions::builtin_default();
        let mut cfg = config(&cma);
        cfg.distribution = ReturnDistribution::BlockBootstrap;
        let alloc = balanced_allocation();
        let mut rng = Xorshift32::new(13);
        let sampled = sample_returns(&alloc, MarketRegime::Normal, 1.0, &mut rng, &cfg, None);
        assert!(sampled.portfolio_return.is_finite());
    }
}
