//! Linear operators and gather/scatter over AD values.
//!
//! Divergence, gradient and averaging over grid connections are all linear
//! maps; applying one to an AD value maps the value and every Jacobian block
//! by the same matrix. Gather (`subset`) and scatter (`superset`) move cell
//! quantities to well perforations and back.

use crate::value::AdVector;
use nalgebra::DMatrix;
use rf_core::Real;

/// Apply a linear operator `m` to an AD value: `m * x`.
pub fn apply_linear(m: &DMatrix<Real>, x: &AdVector) -> AdVector {
    debug_assert_eq!(m.ncols(), x.len());
    let val = m * x.value();
    let jac = (0..x.num_blocks())
        .map(|k| m * x.block(k).unwrap())
        .collect();
    AdVector::function(val, jac)
}

/// Gather the rows of `x` listed in `indices`.
pub fn subset(x: &AdVector, indices: &[usize]) -> AdVector {
    let mut val = nalgebra::DVector::zeros(indices.len());
    for (r, &i) in indices.iter().enumerate() {
        val[r] = x.value()[i];
    }
    let jac = (0..x.num_blocks())
        .map(|k| {
            let src = x.block(k).unwrap();
            let mut m = DMatrix::zeros(indices.len(), src.ncols());
            for (r, &i) in indices.iter().enumerate() {
                m.row_mut(r).copy_from(&src.row(i));
            }
            m
        })
        .collect();
    AdVector::function(val, jac)
}

/// Scatter the rows of `x` into a zero vector of length `n` at `indices`.
///
/// Rows scattered to the same index accumulate.
pub fn superset(x: &AdVector, indices: &[usize], n: usize) -> AdVector {
    debug_assert_eq!(x.len(), indices.len());
    let mut val = nalgebra::DVector::zeros(n);
    for (r, &i) in indices.iter().enumerate() {
        val[i] += x.value()[r];
    }
    let jac = (0..x.num_blocks())
        .map(|k| {
            let src = x.block(k).unwrap();
            let mut m = DMatrix::zeros(n, src.ncols());
            for (r, &i) in indices.iter().enumerate() {
                let combined = m.row(i) + src.row(r);
                m.row_mut(i).copy_from(&combined);
            }
            m
        })
        .collect();
    AdVector::function(val, jac)
}
