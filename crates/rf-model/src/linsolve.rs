//! Linear-solver abstraction.
//!
//! The core hands the assembled system to a [`LinearSolver`] and consumes
//! the correction; a failure is reported to the caller, never retried here.

use crate::error::{ModelError, ModelResult};
use nalgebra::{DMatrix, DVector};
use rf_core::Real;

/// Solves `J * dx = r` for the Newton correction.
pub trait LinearSolver {
    fn solve(&self, jacobian: &DMatrix<Real>, residual: &DVector<Real>) -> ModelResult<DVector<Real>>;
}

/// Dense LU reference implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn solve(
        &self,
        jacobian: &DMatrix<Real>,
        residual: &DVector<Real>,
    ) -> ModelResult<DVector<Real>> {
        if jacobian.nrows() != residual.len() {
            return Err(ModelError::LinearSolve {
                what: format!(
                    "system shape mismatch: {} rows vs {} residuals",
                    jacobian.nrows(),
                    residual.len()
                ),
            });
        }
        jacobian
            .clone()
            .lu()
            .solve(residual)
            .ok_or_else(|| ModelError::LinearSolve {
                what: "LU factorization is singular".to_string(),
            })
    }
}
