//! Vectorized forward-mode automatic differentiation for residual assembly.
//!
//! The central type is [`AdVector`]: one value per grid cell (or well
//! quantity) plus a Jacobian split into blocks, one block per primary
//! variable group. Residuals are built by composing `AdVector`s with
//! elementwise arithmetic; the chain rule propagates exact derivatives
//! through every operation, so the assembled Jacobian needs no finite
//! differencing.
//!
//! Division by quantities that can be exactly zero (saturation sums and
//! differences) must go through [`guarded_divide`], which removes the zero
//! rows *before* dividing. Selecting after an unguarded division would leave
//! NaN/Inf in the derivative rows.

pub mod linops;
pub mod select;
pub mod value;

pub use linops::{apply_linear, subset, superset};
pub use select::{Selector, guarded_divide};
pub use value::AdVector;
