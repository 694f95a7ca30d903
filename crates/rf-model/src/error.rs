//! Error types for model assembly and update.

use rf_core::CoreError;
use rf_props::PropsError;
use thiserror::Error;

/// Errors that can occur while building or driving the model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Unsupported option combinations; fatal at construction or first use.
    #[error("Configuration error: {what}")]
    Config { what: String },

    #[error("Property evaluation error: {0}")]
    Props(#[from] PropsError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Reported to the caller, never retried internally.
    #[error("Linear solve failed: {what}")]
    LinearSolve { what: String },

    #[error("Numeric error: {what}")]
    Numeric { what: String },
}

pub type ModelResult<T> = Result<T, ModelError>;
