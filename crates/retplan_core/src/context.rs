//! Immutable engine context threaded through a batch call.
//!
//! CMA snapshots, historical tables, and distribution choice are resolved
//! once at construction; the per-year hot path never touches loaders or
//! process-wide mutable state.

use rustc_hash::FxHashMap;

use crate::model::cma::{AssetClass, CapitalMarketAssumptions};
use crate::sampler::{DEFAULT_DRAWDOWN_FLOOR, ReturnDistribution, SamplerConfig, UserReturnOverrides};

/// Caller-facing return/market configuration for a batch.
#[derive(Debug, Clone)]
pub struct ReturnConfig {
    /// CMA snapshot from the loader; `None` falls back to the built-in
    /// table (recorded as a warning).
    pub cma: Option<CapitalMarketAssumptions>,
    pub distribution: ReturnDistribution,
    /// Monthly returns per asset class, required for block bootstrap.
    pub monthly_history: Option<FxHashMap<AssetClass, Vec<f64>>>,
    /// Disable the per-asset drawdown floor (stress testing).
    pub stress_mode: bool,
    /// Draw inflation jointly with asset returns.
    pub correlate_inflation: bool,
}

impl Default for ReturnConfig {
    fn default() -> Self {
        Self {
            cma: None,
            distribution: ReturnDistribution::Normal,
            monthly_history: None,
            stress_mode: false,
            correlate_inflation: false,
        }
    }
}

/// Resolved, immutable context for one batch call.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub cma: CapitalMarketAssumptions,
    pub distribution: ReturnDistribution,
    pub monthly_history: Option<FxHashMap<AssetClass, Vec<f64>>>,
    pub drawdown_floor: Option<f64>,
    pub correlate_inflation: bool,
    /// The built-in CMA table was substituted for a missing snapshot.
    pub cma_fallback_used: bool,
}

impl EngineContext {
    #[must_use]
    pub fn new(config: &ReturnConfig) -> Self {
        let cma_fallback_used = config.cma.is_none();
        Self {
            cma: config
                .cma
                .clone()
                .unwrap_or_else(CapitalMarketAssumptions::builtin_default),
            distribution: config.distribution,
            monthly_history: config.monthly_history.clone(),
            drawdown_floor: if config.stress_mode {
                None
            } else {
                Some(DEFAULT_DRAWDOWN_FLOOR)
            },
            correlate_inflation: config.correlate_inflation,
            cma_fallback_used,
        }
    }

    #[must_use]
    pub fn sampler_config(
        &self,
        base_inflation: f64,
        inflation_volatility: f64,
        overrides: Option<UserReturnOverrides>,
    ) -> SamplerConfig<'_> {
        SamplerConfig {
            distribution: self.distribution,
            cma: &self.cma,
            monthly_history: self.monthly_history.as_ref(),
            drawdown_floor: self.drawdown_floor,
            correlate_inflation: self.correlate_inflation,
            base_inflation,
            inflation_volatility,
            overrides,
        }
    }
}
