//! Property-evaluation errors.

use rf_core::Phase;
use thiserror::Error;

/// Result type for property operations.
pub type PropsResult<T> = Result<T, PropsError>;

/// Errors that can occur during property evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropsError {
    /// A phase was requested that this model does not carry. This is a
    /// configuration error and aborts assembly.
    #[error("Unknown phase index for this model: {phase:?}")]
    UnknownPhase { phase: Phase },

    /// Malformed table data (non-monotone abscissae, length mismatch).
    #[error("Invalid table: {what}")]
    InvalidTable { what: &'static str },

    /// Non-physical values (negative viscosity, zero surface density, ...).
    #[error("Non-physical value for {what}")]
    NonPhysical { what: &'static str },

    /// Invalid argument.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },
}
