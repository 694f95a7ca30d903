//! The block-Jacobian AD value type and its arithmetic.

use nalgebra::{DMatrix, DVector};
use rf_core::Real;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A vector of values together with its Jacobian w.r.t. the primary unknowns.
///
/// The Jacobian is kept as one dense block per primary-variable group; a
/// value with no blocks is a constant (zero derivative everywhere). All
/// arithmetic is elementwise and pure: operations return new values and
/// never mutate their inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct AdVector {
    pub(crate) val: DVector<Real>,
    pub(crate) jac: Vec<DMatrix<Real>>,
}

/// Multiply row `i` of `m` by `d[i]`.
pub(crate) fn scale_rows(d: &DVector<Real>, m: &DMatrix<Real>) -> DMatrix<Real> {
    let mut out = m.clone();
    for (i, mut row) in out.row_iter_mut().enumerate() {
        row *= d[i];
    }
    out
}

impl AdVector {
    /// A constant value: zero derivative w.r.t. everything.
    pub fn constant(val: DVector<Real>) -> Self {
        Self {
            val,
            jac: Vec::new(),
        }
    }

    /// A constant with every element equal to `v`.
    pub fn constant_elem(v: Real, len: usize) -> Self {
        Self::constant(DVector::from_element(len, v))
    }

    /// A primary unknown occupying block `block` of the given block layout:
    /// identity derivative in its own block, zero in all others.
    ///
    /// `block_sizes[block]` must equal `val.len()`.
    pub fn variable(block_sizes: &[usize], block: usize, val: DVector<Real>) -> Self {
        let n = val.len();
        assert_eq!(
            block_sizes[block], n,
            "variable length must match its block size"
        );
        let jac = block_sizes
            .iter()
            .enumerate()
            .map(|(k, &sz)| {
                if k == block {
                    DMatrix::identity(n, n)
                } else {
                    DMatrix::zeros(n, sz)
                }
            })
            .collect();
        Self { val, jac }
    }

    /// Build from an explicit value and Jacobian blocks.
    pub fn function(val: DVector<Real>, jac: Vec<DMatrix<Real>>) -> Self {
        debug_assert!(jac.iter().all(|m| m.nrows() == val.len()));
        Self { val, jac }
    }

    /// Chain-rule composition for a scalar function applied elementwise:
    /// given `f(x)` values and `f'(x)` values, produce `f(x)` as an AD value.
    pub fn compose(val: DVector<Real>, dvdx: DVector<Real>, x: &AdVector) -> Self {
        debug_assert_eq!(val.len(), x.len());
        let jac = x.jac.iter().map(|m| scale_rows(&dvdx, m)).collect();
        Self { val, jac }
    }

    pub fn value(&self) -> &DVector<Real> {
        &self.val
    }

    pub fn into_value(self) -> DVector<Real> {
        self.val
    }

    pub fn len(&self) -> usize {
        self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val.len() == 0
    }

    /// True if this value carries no derivative information.
    pub fn is_constant(&self) -> bool {
        self.jac.is_empty()
    }

    pub fn num_blocks(&self) -> usize {
        self.jac.len()
    }

    pub fn block(&self, k: usize) -> Option<&DMatrix<Real>> {
        self.jac.get(k)
    }

    /// Strip all derivative information, keeping the value.
    pub fn as_constant(&self) -> Self {
        Self::constant(self.val.clone())
    }

    /// Concatenate the Jacobian blocks into one dense matrix row group.
    ///
    /// Constants yield a zero matrix of the requested total width.
    pub fn full_jacobian(&self, block_sizes: &[usize]) -> DMatrix<Real> {
        let ncols: usize = block_sizes.iter().sum();
        let mut out = DMatrix::zeros(self.len(), ncols);
        if self.jac.is_empty() {
            return out;
        }
        debug_assert_eq!(self.jac.len(), block_sizes.len());
        let mut col = 0;
        for (m, &sz) in self.jac.iter().zip(block_sizes) {
            out.view_mut((0, col), (self.len(), sz)).copy_from(m);
            col += sz;
        }
        out
    }

    /// Elementwise power with a constant exponent.
    pub fn powf(&self, e: Real) -> Self {
        let val = self.val.map(|x| x.powf(e));
        let dvdx = self.val.map(|x| e * x.powf(e - 1.0));
        let jac = self.jac.iter().map(|m| scale_rows(&dvdx, m)).collect();
        Self { val, jac }
    }

    /// Stack several values vertically into one.
    ///
    /// All non-constant parts must share the same block layout; constants
    /// contribute zero derivative rows.
    pub fn vstack(parts: &[AdVector]) -> Self {
        let total: usize = parts.iter().map(AdVector::len).sum();
        let mut val = DVector::zeros(total);
        let template: Option<Vec<usize>> = parts
            .iter()
            .find(|p| !p.jac.is_empty())
            .map(|p| p.jac.iter().map(DMatrix::ncols).collect());

        let mut jac: Vec<DMatrix<Real>> = match &template {
            Some(widths) => widths.iter().map(|&w| DMatrix::zeros(total, w)).collect(),
            None => Vec::new(),
        };

        let mut row = 0;
        for p in parts {
            let n = p.len();
            val.rows_mut(row, n).copy_from(&p.val);
            if !p.jac.is_empty() {
                for (dst, src) in jac.iter_mut().zip(&p.jac) {
                    dst.view_mut((row, 0), (n, src.ncols())).copy_from(src);
                }
            }
            row += n;
        }
        Self { val, jac }
    }
}

/// Merge the Jacobian blocks of a binary operation.
///
/// `fa` maps a left-side block, `fb` a right-side block; blocks missing on
/// one side (constants) simply contribute nothing.
fn combine_jac<FA, FB>(a: &AdVector, b: &AdVector, fa: FA, fb: FB) -> Vec<DMatrix<Real>>
where
    FA: Fn(&DMatrix<Real>) -> DMatrix<Real>,
    FB: Fn(&DMatrix<Real>) -> DMatrix<Real>,
{
    match (a.jac.is_empty(), b.jac.is_empty()) {
        (true, true) => Vec::new(),
        (false, true) => a.jac.iter().map(fa).collect(),
        (true, false) => b.jac.iter().map(fb).collect(),
        (false, false) => {
            debug_assert_eq!(a.jac.len(), b.jac.len(), "mismatched block layouts");
            a.jac
                .iter()
                .zip(&b.jac)
                .map(|(x, y)| fa(x) + fb(y))
                .collect()
        }
    }
}

impl Add for &AdVector {
    type Output = AdVector;

    fn add(self, rhs: &AdVector) -> AdVector {
        debug_assert_eq!(self.len(), rhs.len());
        AdVector {
            val: &self.val + &rhs.val,
            jac: combine_jac(self, rhs, Clone::clone, Clone::clone),
        }
    }
}

impl Sub for &AdVector {
    type Output = AdVector;

    fn sub(self, rhs: &AdVector) -> AdVector {
        debug_assert_eq!(self.len(), rhs.len());
        AdVector {
            val: &self.val - &rhs.val,
            jac: combine_jac(self, rhs, Clone::clone, |m| -m),
        }
    }
}

impl Mul for &AdVector {
    type Output = AdVector;

    fn mul(self, rhs: &AdVector) -> AdVector {
        debug_assert_eq!(self.len(), rhs.len());
        AdVector {
            val: self.val.component_mul(&rhs.val),
            jac: combine_jac(
                self,
                rhs,
                |m| scale_rows(&rhs.val, m),
                |m| scale_rows(&self.val, m),
            ),
        }
    }
}

impl Div for &AdVector {
    type Output = AdVector;

    fn div(self, rhs: &AdVector) -> AdVector {
        debug_assert_eq!(self.len(), rhs.len());
        let inv = rhs.val.map(|x| 1.0 / x);
        let neg_a_over_b2 = self
            .val
            .zip_map(&rhs.val, |a, b| -a / (b * b));
        AdVector {
            val: self.val.component_mul(&inv),
            jac: combine_jac(
                self,
                rhs,
                |m| scale_rows(&inv, m),
                |m| scale_rows(&neg_a_over_b2, m),
            ),
        }
    }
}

impl Neg for &AdVector {
    type Output = AdVector;

    fn neg(self) -> AdVector {
        AdVector {
            val: -&self.val,
            jac: self.jac.iter().map(|m| -m).collect(),
        }
    }
}

// Owned-operand conveniences delegate to the reference implementations.
impl Add for AdVector {
    type Output = AdVector;
    fn add(self, rhs: AdVector) -> AdVector {
        &self + &rhs
    }
}
impl Sub for AdVector {
    type Output = AdVector;
    fn sub(self, rhs: AdVector) -> AdVector {
        &self - &rhs
    }
}
impl Mul for AdVector {
    type Output = AdVector;
    fn mul(self, rhs: AdVector) -> AdVector {
        &self * &rhs
    }
}
impl Div for AdVector {
    type Output = AdVector;
    fn div(self, rhs: AdVector) -> AdVector {
        &self / &rhs
    }
}
impl Neg for AdVector {
    type Output = AdVector;
    fn neg(self) -> AdVector {
        -&self
    }
}

impl Add<Real> for &AdVector {
    type Output = AdVector;
    fn add(self, rhs: Real) -> AdVector {
        AdVector {
            val: self.val.add_scalar(rhs),
            jac: self.jac.clone(),
        }
    }
}

impl Sub<Real> for &AdVector {
    type Output = AdVector;
    fn sub(self, rhs: Real) -> AdVector {
        self + (-rhs)
    }
}

impl Mul<Real> for &AdVector {
    type Output = AdVector;
    fn mul(self, rhs: Real) -> AdVector {
        AdVector {
            val: &self.val * rhs,
            jac: self.jac.iter().map(|m| m * rhs).collect(),
        }
    }
}

impl Div<Real> for &AdVector {
    type Output = AdVector;
    fn div(self, rhs: Real) -> AdVector {
        self * (1.0 / rhs)
    }
}

impl Add<&AdVector> for Real {
    type Output = AdVector;
    fn add(self, rhs: &AdVector) -> AdVector {
        rhs + self
    }
}

impl Sub<&AdVector> for Real {
    type Output = AdVector;
    fn sub(self, rhs: &AdVector) -> AdVector {
        &(-rhs) + self
    }
}

impl Mul<&AdVector> for Real {
    type Output = AdVector;
    fn mul(self, rhs: &AdVector) -> AdVector {
        rhs * self
    }
}
