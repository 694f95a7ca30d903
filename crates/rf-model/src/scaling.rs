//! Per-equation scaling factors and the cross-domain reduction hook.

use rf_core::Real;

/// The sole cross-instance synchronization point under domain decomposition.
///
/// Each per-equation scaling update invokes `sum` exactly once with the
/// locally accumulated scalar; the implementation must block until every
/// domain has reported and return the global sum.
pub trait GlobalReduce {
    fn sum(&self, local: Real) -> Real;

    /// Global cell count across domains.
    fn global_cell_count(&self, local: usize) -> usize;
}

/// Single-domain execution: the local values are already global.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReduce;

impl GlobalReduce for NoReduce {
    fn sum(&self, local: Real) -> Real {
        local
    }

    fn global_cell_count(&self, local: usize) -> usize {
        local
    }
}

/// Mean reciprocal FVF of one equation, reduced across domains.
pub fn mean_reciprocal_fvf(b: &[Real], reduce: &dyn GlobalReduce) -> Real {
    let local_sum: Real = b.iter().map(|&v| 1.0 / v).sum();
    let global_sum = reduce.sum(local_sum);
    let global_nc = reduce.global_cell_count(b.len());
    if global_nc == 0 {
        0.0
    } else {
        global_sum / global_nc as Real
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn local_mean_without_reduction() {
        let scale = mean_reciprocal_fvf(&[2.0, 4.0], &NoReduce);
        assert!((scale - (0.5 + 0.25) / 2.0).abs() < 1e-15);
    }

    struct CountingReduce {
        calls: Cell<usize>,
        domains: Real,
    }

    impl GlobalReduce for CountingReduce {
        fn sum(&self, local: Real) -> Real {
            self.calls.set(self.calls.get() + 1);
            local * self.domains
        }

        fn global_cell_count(&self, local: usize) -> usize {
            local * self.domains as usize
        }
    }

    #[test]
    fn reduction_hook_called_exactly_once_per_update() {
        let reduce = CountingReduce {
            calls: Cell::new(0),
            domains: 4.0,
        };
        let scale = mean_reciprocal_fvf(&[2.0, 2.0], &reduce);
        assert_eq!(reduce.calls.get(), 1);
        // identical domains: the mean is unchanged by the reduction
        assert!((scale - 0.5).abs() < 1e-15);
    }
}
