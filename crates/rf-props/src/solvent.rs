//! Solvent pseudo-phase properties.
//!
//! All solvent tables are keyed by pressure only, plus the miscibility
//! machinery: the miscibility function of the solvent fraction, the rel-perm
//! multiplier curves, the miscible critical-saturation curves, and the two
//! Todd–Longstaff mixing parameters.

use crate::error::{PropsError, PropsResult};
use crate::table::Table1d;
use rf_autodiff::{AdVector, guarded_divide};
use rf_core::Real;

/// The two Todd–Longstaff mixing parameters, constant for a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixingParams {
    /// Viscosity mixing weight in [0, 1]; 0 = immiscible, 1 = fully mixed.
    pub viscosity: Real,
    /// Density mixing weight in [0, 1].
    pub density: Real,
}

impl MixingParams {
    pub fn new(viscosity: Real, density: Real) -> PropsResult<Self> {
        for (v, what) in [
            (viscosity, "viscosity mixing parameter"),
            (density, "density mixing parameter"),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(PropsError::InvalidArg { what });
            }
        }
        Ok(Self { viscosity, density })
    }

    /// No mixing at all: effective properties equal the immiscible ones.
    pub fn immiscible() -> Self {
        Self {
            viscosity: 0.0,
            density: 0.0,
        }
    }
}

/// Solvent property tables and miscibility curves.
#[derive(Clone, Debug)]
pub struct SolventPvt {
    /// Reciprocal formation volume factor vs. pressure
    pub b: Table1d,
    /// Viscosity vs. pressure
    pub mu: Table1d,
    pub surface_density: Real,
    pub mixing: MixingParams,
    /// Miscibility function of the solvent fraction F = ss/(ss+sg)
    pub misc: Table1d,
    /// Rel-perm multiplier for the solvent, function of F
    pub solvent_relperm_mult: Table1d,
    /// Rel-perm multiplier for hydrocarbon gas, function of 1-F
    pub gas_relperm_mult: Table1d,
    /// Miscible solvent+gas rel-perm multiplier, function of the total-gas fraction
    pub solvent_gas_krmult: Table1d,
    /// Miscible oil rel-perm multiplier, function of 1 - total-gas fraction
    pub oil_krmult: Table1d,
    /// Drainage rel-perm of the total hydrocarbon vs. water, function of sn
    pub hc_water_relperm: Table1d,
    /// Miscible residual oil saturation vs. water saturation
    pub sorwmis: Table1d,
    /// Miscible critical gas saturation vs. water saturation
    pub sgcwmis: Table1d,
}

impl SolventPvt {
    pub fn validate(&self) -> PropsResult<()> {
        if self.surface_density <= 0.0 || !self.surface_density.is_finite() {
            return Err(PropsError::NonPhysical {
                what: "solvent surface density",
            });
        }
        Ok(())
    }

    pub fn b_solvent(&self, p: &AdVector) -> AdVector {
        self.b.eval_ad(p)
    }

    pub fn mu_solvent(&self, p: &AdVector) -> AdVector {
        self.mu.eval_ad(p)
    }

    pub fn miscibility_fn(&self, f_solvent: &AdVector) -> AdVector {
        self.misc.eval_ad(f_solvent)
    }

    pub fn solvent_relperm_multiplier(&self, f_solvent: &AdVector) -> AdVector {
        self.solvent_relperm_mult.eval_ad(f_solvent)
    }

    pub fn gas_relperm_multiplier(&self, one_minus_f: &AdVector) -> AdVector {
        self.gas_relperm_mult.eval_ad(one_minus_f)
    }

    pub fn miscible_solvent_gas_relperm_multiplier(&self, f_total_gas: &AdVector) -> AdVector {
        self.solvent_gas_krmult.eval_ad(f_total_gas)
    }

    pub fn miscible_oil_relperm_multiplier(&self, one_minus_f_total_gas: &AdVector) -> AdVector {
        self.oil_krmult.eval_ad(one_minus_f_total_gas)
    }

    pub fn miscible_hydrocarbon_water_relperm(&self, sn: &AdVector) -> AdVector {
        self.hc_water_relperm.eval_ad(sn)
    }

    pub fn miscible_residual_oil_saturation(&self, sw: &AdVector) -> AdVector {
        self.sorwmis.eval_ad(sw)
    }

    pub fn miscible_critical_gas_saturation(&self, sw: &AdVector) -> AdVector {
        self.sgcwmis.eval_ad(sw)
    }

    /// A solvent that behaves like its gas tables with inert miscibility
    /// curves. Handy baseline for tests and immiscible runs.
    pub fn with_inert_miscibility(
        b: Table1d,
        mu: Table1d,
        surface_density: Real,
        mixing: MixingParams,
    ) -> Self {
        Self {
            b,
            mu,
            surface_density,
            mixing,
            misc: Table1d::constant(1.0),
            solvent_relperm_mult: Table1d::line(0.0, 0.0, 1.0, 1.0).expect("valid line"),
            gas_relperm_mult: Table1d::line(0.0, 0.0, 1.0, 1.0).expect("valid line"),
            solvent_gas_krmult: Table1d::line(0.0, 0.0, 1.0, 1.0).expect("valid line"),
            oil_krmult: Table1d::line(0.0, 0.0, 1.0, 1.0).expect("valid line"),
            hc_water_relperm: Table1d::line(0.0, 0.0, 1.0, 1.0).expect("valid line"),
            sorwmis: Table1d::constant(0.0),
            sgcwmis: Table1d::constant(0.0),
        }
    }
}

/// Solvent fraction of the total free gas, `F = ss / (ss + sg)`.
///
/// Both the value and the derivative are exactly zero wherever
/// `ss + sg == 0`.
pub fn solvent_fraction(ss: &AdVector, sg: &AdVector) -> AdVector {
    let zero = AdVector::constant_elem(0.0, ss.len());
    guarded_divide(ss, &(ss + sg), &zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn mixing_params_validated() {
        assert!(MixingParams::new(0.5, 0.5).is_ok());
        assert!(MixingParams::new(-0.1, 0.5).is_err());
        assert!(MixingParams::new(0.0, 1.5).is_err());
    }

    #[test]
    fn solvent_fraction_is_zero_with_zero_derivative_at_empty_gas() {
        let sizes = [3];
        let ss = AdVector::variable(&sizes, 0, DVector::from_row_slice(&[0.0, 0.2, 0.0]));
        let sg = AdVector::constant(DVector::from_row_slice(&[0.0, 0.2, 0.3]));
        let f = solvent_fraction(&ss, &sg);

        // first row: ss + sg == 0 -> F and dF both exactly zero
        assert_eq!(f.value()[0], 0.0);
        for j in 0..3 {
            assert_eq!(f.block(0).unwrap()[(0, j)], 0.0);
        }
        // second row: plain ratio
        assert!((f.value()[1] - 0.5).abs() < 1e-15);
        // third row: no solvent
        assert_eq!(f.value()[2], 0.0);
        assert!(f.block(0).unwrap().iter().all(|v| v.is_finite()));
    }
}
