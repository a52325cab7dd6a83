//! Markov market-regime process.
//!
//! Four regimes with per-regime return moments, per-asset-class
//! adjustments, and a transition matrix. The initial regime is drawn from
//! the unconditional historical distribution; it is deliberately NOT a
//! function of years-to-retirement, so sequence risk emerges from the
//! simulated path rather than from initial conditions.

use serde::{Deserialize, Serialize};

use crate::rng::ScenarioRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Bull,
    Normal,
    Bear,
    Crisis,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 4] = [
        MarketRegime::Bull,
        MarketRegime::Normal,
        MarketRegime::Bear,
        MarketRegime::Crisis,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            MarketRegime::Bull => 0,
            MarketRegime::Normal => 1,
            MarketRegime::Bear => 2,
            MarketRegime::Crisis => 3,
        }
    }

    #[must_use]
    pub fn is_downturn(self) -> bool {
        matches!(self, MarketRegime::Bear | MarketRegime::Crisis)
    }
}

/// Return/volatility multipliers for one asset class in one regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAdjustment {
    pub return_multiplier: f64,
    pub vol_multiplier: f64,
}

/// Per-asset-class adjustments. Cash is not regime-adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeAssetAdjustments {
    pub stocks: AssetAdjustment,
    pub intl_stocks: AssetAdjustment,
    pub bonds: AssetAdjustment,
    pub reits: AssetAdjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeParameters {
    pub mean_return: f64,
    pub volatility: f64,
    pub avg_duration_years: f64,
    /// Row of the transition matrix: probability of moving to
    /// [bull, normal, bear, crisis] at the next year boundary.
    pub transition: [f64; 4],
    pub assets: RegimeAssetAdjustments,
}

/// Unconditional historical regime distribution used for the initial draw.
pub const INITIAL_DISTRIBUTION: [f64; 4] = [0.30, 0.50, 0.15, 0.05];

// Per-asset return multipliers are calibrated so that their average under
// the unconditional regime distribution stays at ~1.0: regimes move returns
// between states (and drive sequence risk) without dragging the long-run
// mean away from the capital-market assumptions.

const BULL: RegimeParameters = RegimeParameters {
    mean_return: 0.15,
    volatility: 0.12,
    avg_duration_years: 3.0,
    transition: [0.60, 0.30, 0.08, 0.02],
    assets: RegimeAssetAdjustments {
        stocks: AssetAdjustment {
            return_multiplier: 2.20,
            vol_multiplier: 0.90,
        },
        intl_stocks: AssetAdjustment {
            return_multiplier: 2.30,
            vol_multiplier: 0.95,
        },
        bonds: AssetAdjustment {
            return_multiplier: 0.90,
            vol_multiplier: 1.00,
        },
        reits: AssetAdjustment {
            return_multiplier: 2.15,
            vol_multiplier: 0.95,
        },
    },
};

const NORMAL: RegimeParameters = RegimeParameters {
    mean_return: 0.08,
    volatility: 0.15,
    avg_duration_years: 4.0,
    transition: [0.20, 0.60, 0.15, 0.05],
    assets: RegimeAssetAdjustments {
        stocks: AssetAdjustment {
            return_multiplier: 1.00,
            vol_multiplier: 1.00,
        },
        intl_stocks: AssetAdjustment {
            return_multiplier: 1.00,
            vol_multiplier: 1.00,
        },
        bonds: AssetAdjustment {
            return_multiplier: 1.00,
            vol_multiplier: 1.00,
        },
        reits: AssetAdjustment {
            return_multiplier: 1.00,
            vol_multiplier: 1.00,
        },
    },
};

const BEAR: RegimeParameters = RegimeParameters {
    mean_return: -0.10,
    volatility: 0.22,
    avg_duration_years: 1.5,
    transition: [0.15, 0.45, 0.30, 0.10],
    assets: RegimeAssetAdjustments {
        stocks: AssetAdjustment {
            return_multiplier: -0.60,
            vol_multiplier: 1.80,
        },
        intl_stocks: AssetAdjustment {
            return_multiplier: -0.70,
            vol_multiplier: 1.90,
        },
        bonds: AssetAdjustment {
            return_multiplier: 1.20,
            vol_multiplier: 1.10,
        },
        reits: AssetAdjustment {
            return_multiplier: -0.50,
            vol_multiplier: 1.70,
        },
    },
};

const CRISIS: RegimeParameters = RegimeParameters {
    mean_return: -0.25,
    volatility: 0.35,
    avg_duration_years: 1.0,
    transition: [0.10, 0.40, 0.30, 0.20],
    assets: RegimeAssetAdjustments {
        stocks: AssetAdjustment {
            return_multiplier: -1.50,
            vol_multiplier: 2.50,
        },
        intl_stocks: AssetAdjustment {
            return_multiplier: -1.70,
            vol_multiplier: 2.60,
        },
        bonds: AssetAdjustment {
            return_multiplier: 1.40,
            vol_multiplier: 1.30,
        },
        reits: AssetAdjustment {
            return_multiplier: -1.40,
            vol_multiplier: 2.20,
        },
    },
};

impl MarketRegime {
    #[must_use]
    pub fn parameters(self) -> &'static RegimeParameters {
        match self {
            MarketRegime::Bull => &BULL,
            MarketRegime::Normal => &NORMAL,
            MarketRegime::Bear => &BEAR,
            MarketRegime::Crisis => &CRISIS,
        }
    }

    /// Draw the scenario's starting regime from the unconditional
    /// distribution.
    pub fn sample_initial<R: ScenarioRng + ?Sized>(rng: &mut R) -> MarketRegime {
        pick(&INITIAL_DISTRIBUTION, rng.next_uniform())
    }

    /// Sample next year's regime from this regime's transition row.
    pub fn transition<R: ScenarioRng + ?Sized>(self, rng: &mut R) -> MarketRegime {
        pick(&self.parameters().transition, rng.next_uniform())
    }
}

fn pick(weights: &[f64; 4], u: f64) -> MarketRegime {
    let mut cumulative = 0.0;
    for (regime, weight) in MarketRegime::ALL.iter().zip(weights.iter()) {
        cumulative += weight;
        if u < cumulative {
            return *regime;
        }
    }
    MarketRegime::Crisis
}

/// Regime-dependent correlation between inflation and each asset class,
/// used when the sampler appends the inflation pseudo-asset.
#[derive(Debug, Clone, Copy)]
pub struct InflationCorrelations {
    pub stocks: f64,
    pub intl_stocks: f64,
    pub bonds: f64,
    pub reits: f64,
    pub cash: f64,
}

impl MarketRegime {
    #[must_use]
    pub fn inflation_correlations(self) -> InflationCorrelations {
        match self {
            MarketRegime::Bull => InflationCorrelations {
                stocks: 0.10,
                intl_stocks: 0.08,
                bonds: -0.20,
                reits: 0.15,
                cash: 0.30,
            },
            MarketRegime::Normal => InflationCorrelations {
                stocks: 0.00,
                intl_stocks: 0.00,
                bonds: -0.25,
                reits: 0.10,
                cash: 0.35,
            },
            MarketRegime::Bear => InflationCorrelations {
                stocks: -0.15,
                intl_stocks: -0.12,
                bonds: -0.30,
                reits: -0.05,
                cash: 0.40,
            },
            MarketRegime::Crisis => InflationCorrelations {
                stocks: -0.30,
                intl_stocks: -0.25,
                bonds: -0.35,
                reits: -0.20,
                cash: 0.45,
            },
        }
    }
}
