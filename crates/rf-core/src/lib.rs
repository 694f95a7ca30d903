//! rf-core: stable foundation for resflow.
//!
//! Contains:
//! - numeric (Real + tolerances + float helpers)
//! - phase (phase enumeration, per-model phase index set, phase conditions)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod phase;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use numeric::*;
pub use phase::*;
