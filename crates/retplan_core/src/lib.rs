//! Retirement Monte Carlo simulation engine
//!
//! This crate evaluates a household retirement plan by walking thousands of
//! stochastic scenarios through a year-by-year life-cycle model. It
//! supports:
//! - Correlated multi-asset returns with fat-tailed, regime-switching,
//!   jump-diffusion, mean-reverting, and block-bootstrap families
//! - A Markov market-regime process with per-regime asset adjustments
//! - Stochastic mortality, couple-correlated longevity, and LTC episodes
//! - A detailed tax kernel (federal brackets, LTCG stacking, NIIT, AMT,
//!   IRMAA with its two-year lookback, state overlays, ACA reconciliation)
//! - SECURE 2.0 RMDs and an iterative net-to-gross withdrawal solver
//! - Guyton-Klinger guardrails on discretionary spending
//! - Deterministic, replayable randomness with antithetic, Latin-Hypercube,
//!   and control-variate variance reduction
//!
//! The engine is pure and re-entrant: collaborators (profile providers,
//! CMA and historical-return loaders) hand it value structs, and the two
//! public operations do all the work:
//!
//! ```ignore
//! use retplan_core::{run_batch, ReturnConfig};
//!
//! let result = run_batch(&params, 1_000, &ReturnConfig::default())?;
//! println!("P(success) = {:.2}", result.probability_of_success);
//! ```

#![warn(clippy::all)]

// ============================================================================
// Core modules
// ============================================================================

pub mod batch;
pub mod context;
pub mod error;
pub mod guardrails;
pub mod ltc;
pub mod mortality;
pub mod rng;
pub mod sampler;
pub mod scenario;
pub mod stats;
pub mod taxes;
pub mod withdrawal;

// ============================================================================
// Type definition modules
// ============================================================================

pub mod model;

// ============================================================================
// Test modules
// ============================================================================

#[cfg(test)]
mod tests;

// ============================================================================
// Public re-exports for convenience
// ============================================================================

pub use batch::{BatchProgress, run_batch, run_batch_with_progress};
pub use context::{EngineContext, ReturnConfig};
pub use error::{EngineError, Result, ValidationReport};
pub use model::{BatchResult, ScenarioOutcome, SimulationParams};
pub use sampler::ReturnDistribution;
pub use scenario::run_scenario;
