//! Newton iteration driver.
//!
//! Convergence policy (retries, time-step cutting) belongs to the caller;
//! this is the minimal assemble → solve → update loop with a report value.
//! A linear-solver failure ends the loop and is flagged in the report.

use crate::assembler::BlackoilModel;
use crate::error::{ModelError, ModelResult};
use crate::linsolve::LinearSolver;
use crate::state::{ReservoirState, WellState};
use rf_core::{Real, Tolerances, ensure_finite};

/// Newton loop configuration.
#[derive(Clone, Copy, Debug)]
pub struct NewtonConfig {
    pub max_iterations: usize,
    /// Residual-norm tolerances; relative is against the initial norm
    pub tolerances: Tolerances,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            tolerances: Tolerances {
                abs: 1e-10,
                rel: 1e-8,
            },
        }
    }
}

/// Outcome of a Newton run, surfaced to the caller.
#[derive(Clone, Debug, Default)]
pub struct IterationReport {
    pub iterations: usize,
    /// Total residual norm after each assembly
    pub residual_norms: Vec<Real>,
    pub converged: bool,
    pub linear_solve_failed: bool,
}

fn total_norm(norms: &[Real]) -> Real {
    norms.iter().map(|n| n * n).sum::<Real>().sqrt()
}

/// Run Newton iterations until convergence or the iteration cap.
pub fn run_newton(
    model: &mut BlackoilModel<'_>,
    rstate: &mut ReservoirState,
    wstate: &mut WellState,
    solver: &dyn LinearSolver,
    cfg: &NewtonConfig,
) -> ModelResult<IterationReport> {
    let mut report = IterationReport::default();
    let mut first_norm = None;

    for iter in 0..cfg.max_iterations {
        model.assemble(rstate, wstate, iter == 0)?;
        let norm = ensure_finite(total_norm(&model.residual().norms()), "residual norm")?;
        report.residual_norms.push(norm);
        report.iterations = iter;

        let reference = *first_norm.get_or_insert(norm);
        if norm < cfg.tolerances.abs || norm < cfg.tolerances.rel * reference {
            report.converged = true;
            return Ok(report);
        }

        let (residual, jacobian) = model.linearized_system();
        let dx = match solver.solve(&jacobian, &residual) {
            Ok(dx) => dx,
            Err(ModelError::LinearSolve { what }) => {
                tracing::debug!(what, "linear solver failed; reporting to caller");
                report.linear_solve_failed = true;
                return Ok(report);
            }
            Err(other) => return Err(other),
        };
        model.update_state(&dx, rstate, wstate)?;
        report.iterations = iter + 1;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_norm_is_euclidean() {
        assert!((total_norm(&[3.0, 4.0]) - 5.0).abs() < 1e-15);
        assert_eq!(total_norm(&[]), 0.0);
    }
}
