use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while scoring, simulating or summarising forecast evaluations.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("negative rate {0}")]
    NegativeRate(f64),

    /// Two forecasts (or a forecast and its mask) disagree on shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A result vector does not match the length already accumulated for it.
    #[error("vector '{name}' has length {actual}, cumulative record holds {expected}")]
    VectorLengthMismatch { name: String, expected: usize, actual: usize },

    #[error("random seed unavailable for {key}: {path}")]
    SeedUnavailable { key: String, path: PathBuf },

    #[error("random table for {key} holds {available} values, {requested} requested")]
    SeedExhausted { key: String, available: usize, requested: usize },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("no catalog available for {0}")]
    MissingCatalog(String),

    /// Fewer events than the test needs; the run is skipped, not failed.
    #[error("{test} needs at least {required} events, catalog has {actual}")]
    InsufficientEvents { test: String, required: usize, actual: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// Conditions under which a test run is skipped rather than treated as fatal.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::MissingCatalog(_) | Self::InsufficientEvents { .. })
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
