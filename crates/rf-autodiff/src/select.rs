//! Row-wise selection between AD values and the guarded-division combinator.

use crate::value::AdVector;
use nalgebra::{DMatrix, DVector};
use rf_core::Real;

/// Elementwise chooser between two AD values.
///
/// Built from a plain value vector and a criterion; `select(a, b)` takes the
/// row from `a` wherever the criterion held and from `b` elsewhere, for the
/// value and every Jacobian block alike.
#[derive(Clone, Debug)]
pub struct Selector {
    pick_first: Vec<bool>,
}

impl Selector {
    /// Criterion: the guarding value is exactly zero.
    pub fn zero(v: &DVector<Real>) -> Self {
        Self {
            pick_first: v.iter().map(|x| *x == 0.0).collect(),
        }
    }

    /// Arbitrary row mask; `true` rows come from the first argument.
    pub fn from_mask(mask: Vec<bool>) -> Self {
        Self { pick_first: mask }
    }

    pub fn len(&self) -> usize {
        self.pick_first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pick_first.is_empty()
    }

    /// Row-wise selection: `when` where the criterion held, `otherwise` else.
    pub fn select(&self, when: &AdVector, otherwise: &AdVector) -> AdVector {
        let n = self.pick_first.len();
        assert_eq!(when.len(), n);
        assert_eq!(otherwise.len(), n);

        let mut val = otherwise.value().clone();
        for (i, &first) in self.pick_first.iter().enumerate() {
            if first {
                val[i] = when.value()[i];
            }
        }

        if when.is_constant() && otherwise.is_constant() {
            return AdVector::constant(val);
        }

        let widths: Vec<usize> = if !when.is_constant() {
            (0..when.num_blocks())
                .map(|k| when.block(k).unwrap().ncols())
                .collect()
        } else {
            (0..otherwise.num_blocks())
                .map(|k| otherwise.block(k).unwrap().ncols())
                .collect()
        };

        let jac = widths
            .iter()
            .enumerate()
            .map(|(k, &w)| {
                let mut m = DMatrix::zeros(n, w);
                for (i, &first) in self.pick_first.iter().enumerate() {
                    let src = if first { when.block(k) } else { otherwise.block(k) };
                    if let Some(s) = src {
                        m.row_mut(i).copy_from(&s.row(i));
                    }
                }
                m
            })
            .collect();

        AdVector::function(val, jac)
    }
}

/// Division with an explicit fallback for exactly-zero denominators.
///
/// Zero denominator rows are replaced by one *before* the division, so
/// neither the value nor any derivative row ever sees a division by zero;
/// the fallback then overwrites those rows. With a constant fallback the
/// result has exactly zero derivative on the guarded rows.
pub fn guarded_divide(num: &AdVector, den: &AdVector, fallback: &AdVector) -> AdVector {
    let sel = Selector::zero(den.value());
    let safe_den = sel.select(&AdVector::constant_elem(1.0, den.len()), den);
    sel.select(fallback, &(num / &safe_den))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_picks_rows_from_both_sides() {
        let sizes = [3];
        let a = AdVector::variable(&sizes, 0, DVector::from_row_slice(&[1.0, 2.0, 3.0]));
        let b = &a * 10.0;
        let sel = Selector::from_mask(vec![true, false, true]);
        let c = sel.select(&a, &b);
        assert_eq!(c.value().as_slice(), &[1.0, 20.0, 3.0]);
        let j = c.block(0).unwrap();
        assert_eq!(j[(0, 0)], 1.0);
        assert_eq!(j[(1, 1)], 10.0);
        assert_eq!(j[(2, 2)], 1.0);
    }

    #[test]
    fn guarded_divide_handles_exact_zero() {
        let sizes = [3];
        let den = AdVector::variable(&sizes, 0, DVector::from_row_slice(&[2.0, 0.0, 4.0]));
        let num = AdVector::constant_elem(8.0, 3);
        let fallback = AdVector::constant_elem(0.0, 3);
        let q = guarded_divide(&num, &den, &fallback);

        assert_eq!(q.value().as_slice(), &[4.0, 0.0, 2.0]);
        let j = q.block(0).unwrap();
        // d(8/x)/dx = -8/x^2 on live rows, exactly zero on the guarded row
        assert!((j[(0, 0)] + 2.0).abs() < 1e-15);
        assert_eq!(j[(1, 1)], 0.0);
        assert!((j[(2, 2)] + 0.5).abs() < 1e-15);
        assert!(q.value().iter().all(|v| v.is_finite()));
        assert!(j.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn guarded_divide_keeps_fallback_derivative() {
        let sizes = [2];
        let x = AdVector::variable(&sizes, 0, DVector::from_row_slice(&[0.0, 3.0]));
        let num = AdVector::constant_elem(1.0, 2);
        // fallback is the variable itself: its derivative must survive
        let q = guarded_divide(&num, &x, &x);
        assert_eq!(q.value()[0], 0.0);
        assert_eq!(q.block(0).unwrap()[(0, 0)], 1.0);
    }
}
