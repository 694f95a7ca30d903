//! One-dimensional piecewise-linear property tables.

use crate::error::{PropsError, PropsResult};
use nalgebra::DVector;
use rf_autodiff::AdVector;
use rf_core::Real;

/// A piecewise-linear curve sampled at strictly increasing abscissae.
///
/// Evaluation extrapolates flat beyond the sampled range (slope zero), which
/// keeps derivative propagation well-behaved at table edges.
#[derive(Clone, Debug, PartialEq)]
pub struct Table1d {
    x: Vec<Real>,
    y: Vec<Real>,
}

impl Table1d {
    pub fn new(x: Vec<Real>, y: Vec<Real>) -> PropsResult<Self> {
        if x.len() != y.len() {
            return Err(PropsError::InvalidTable {
                what: "abscissa and ordinate lengths differ",
            });
        }
        if x.len() < 2 {
            return Err(PropsError::InvalidTable {
                what: "a table needs at least two points",
            });
        }
        if !x.windows(2).all(|w| w[0] < w[1]) {
            return Err(PropsError::InvalidTable {
                what: "abscissae must be strictly increasing",
            });
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(PropsError::InvalidTable {
                what: "table entries must be finite",
            });
        }
        Ok(Self { x, y })
    }

    /// A curve that is `y` everywhere.
    pub fn constant(y: Real) -> Self {
        Self {
            x: vec![0.0, 1.0],
            y: vec![y, y],
        }
    }

    /// A straight line through the two given points.
    pub fn line(x0: Real, y0: Real, x1: Real, y1: Real) -> PropsResult<Self> {
        Self::new(vec![x0, x1], vec![y0, y1])
    }

    /// Value and local slope at `x`.
    pub fn eval_with_slope(&self, x: Real) -> (Real, Real) {
        let n = self.x.len();
        if x <= self.x[0] {
            return (self.y[0], 0.0);
        }
        if x >= self.x[n - 1] {
            return (self.y[n - 1], 0.0);
        }
        let hi = self.x.partition_point(|&xi| xi < x).max(1);
        let (x0, x1) = (self.x[hi - 1], self.x[hi]);
        let (y0, y1) = (self.y[hi - 1], self.y[hi]);
        let slope = (y1 - y0) / (x1 - x0);
        (y0 + slope * (x - x0), slope)
    }

    pub fn eval(&self, x: Real) -> Real {
        self.eval_with_slope(x).0
    }

    /// AD evaluation: value plus chain-ruled slope through `x`'s Jacobian.
    pub fn eval_ad(&self, x: &AdVector) -> AdVector {
        let n = x.len();
        let mut val = DVector::zeros(n);
        let mut slope = DVector::zeros(n);
        for i in 0..n {
            let (v, s) = self.eval_with_slope(x.value()[i]);
            val[i] = v;
            slope[i] = s;
        }
        AdVector::compose(val, slope, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_tables() {
        assert!(Table1d::new(vec![0.0, 1.0], vec![1.0]).is_err());
        assert!(Table1d::new(vec![1.0, 1.0], vec![0.0, 0.0]).is_err());
        assert!(Table1d::new(vec![0.0], vec![1.0]).is_err());
    }

    #[test]
    fn interpolates_linearly() {
        let t = Table1d::new(vec![0.0, 1.0, 3.0], vec![0.0, 2.0, 4.0]).unwrap();
        assert_eq!(t.eval(0.5), 1.0);
        assert_eq!(t.eval(2.0), 3.0);
    }

    #[test]
    fn extrapolates_flat() {
        let t = Table1d::line(1.0, 5.0, 2.0, 7.0).unwrap();
        assert_eq!(t.eval(0.0), 5.0);
        assert_eq!(t.eval(10.0), 7.0);
        assert_eq!(t.eval_with_slope(10.0).1, 0.0);
    }

    #[test]
    fn ad_evaluation_carries_slope() {
        let t = Table1d::line(0.0, 1.0, 2.0, 5.0).unwrap();
        let x = AdVector::variable(&[2], 0, DVector::from_row_slice(&[0.5, 1.5]));
        let y = t.eval_ad(&x);
        assert_eq!(y.value().as_slice(), &[2.0, 4.0]);
        assert_eq!(y.block(0).unwrap()[(0, 0)], 2.0);
        assert_eq!(y.block(0).unwrap()[(1, 1)], 2.0);
    }
}
