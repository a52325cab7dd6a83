use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Fatal engine errors. Everything recoverable (solver non-convergence,
/// Cholesky round-off, missing historical data) is handled locally and
/// reported through `BatchResult::warnings` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(ValidationReport),

    #[error("simulation cancelled")]
    Cancelled,
}

/// Outcome of structural parameter validation.
///
/// Fatal errors abort the batch before any simulation runs; warnings are
/// carried into the batch result for observability.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors.join("; "))
    }
}
