//! Relative permeability: base drainage curves and the miscible adjustment.

use crate::error::PropsResult;
use crate::solvent::{SolventPvt, solvent_fraction};
use rf_autodiff::{AdVector, Selector, guarded_divide};
use rf_core::Real;

/// Corey-form drainage curves with critical-saturation endpoints.
///
/// Endpoints are uniform across cells; the miscible adjustment rescales the
/// gas/oil endpoints per cell through the miscibility function.
#[derive(Clone, Debug)]
pub struct RelPermModel {
    /// Critical water saturation
    pub swcr: Real,
    /// Residual oil (to water) saturation
    pub sowcr: Real,
    /// Critical gas saturation
    pub sgcr: Real,
    /// Residual oil-in-gas saturation
    pub sogcr: Real,
    pub krw_max: Real,
    pub kro_max: Real,
    pub krg_max: Real,
    /// Corey exponents
    pub nw: Real,
    pub no: Real,
    pub ng: Real,
}

impl Default for RelPermModel {
    fn default() -> Self {
        Self {
            swcr: 0.1,
            sowcr: 0.2,
            sgcr: 0.05,
            sogcr: 0.1,
            krw_max: 0.8,
            kro_max: 1.0,
            krg_max: 0.9,
            nw: 2.0,
            no: 2.0,
            ng: 2.0,
        }
    }
}

/// Clamp elementwise to [0, 1] without losing derivative information on the
/// interior rows.
fn clamp01(x: &AdVector) -> AdVector {
    let n = x.len();
    let below = Selector::from_mask(x.value().iter().map(|v| *v < 0.0).collect());
    let x = below.select(&AdVector::constant_elem(0.0, n), x);
    let above = Selector::from_mask(x.value().iter().map(|v| *v > 1.0).collect());
    above.select(&AdVector::constant_elem(1.0, n), &x)
}

impl RelPermModel {
    fn corey(&self, s: &AdVector, scrit: Real, span: Real, kmax: Real, exponent: Real) -> AdVector {
        let normalized = clamp01(&(&(s - scrit) / span));
        &normalized.powf(exponent) * kmax
    }

    /// Base drainage curves for water, oil and gas.
    ///
    /// For miscible runs the gas argument is the total free gas (hydrocarbon
    /// gas plus solvent).
    pub fn relperm(&self, sw: &AdVector, so: &AdVector, sg: &AdVector) -> [AdVector; 3] {
        let water_span = 1.0 - self.swcr - self.sowcr;
        let gas_span = 1.0 - self.sgcr - self.sogcr;
        [
            self.corey(sw, self.swcr, water_span, self.krw_max, self.nw),
            self.corey(so, self.sowcr, water_span, self.kro_max, self.no),
            self.corey(sg, self.sgcr, gas_span, self.krg_max, self.ng),
        ]
    }

    /// Scaled critical gas saturation endpoint.
    pub fn scaled_critical_gas(&self) -> Real {
        self.sgcr
    }

    /// Scaled residual oil-in-gas saturation endpoint.
    pub fn scaled_residual_oil_in_gas(&self) -> Real {
        self.sogcr
    }
}

/// Miscibility-adjusted relative permeabilities.
///
/// Returns `[krw, kro, kr_total_gas]` where the last entry is the combined
/// hydrocarbon-gas + solvent curve; the assembler splits it with the
/// solvent/gas multiplier curves.
pub fn miscible_relperm(
    base: &RelPermModel,
    solvent: &SolventPvt,
    sw: &AdVector,
    so: &AdVector,
    sg: &AdVector,
    ss: &AdVector,
) -> PropsResult<[AdVector; 3]> {
    let n = sw.len();
    let zero = AdVector::constant_elem(0.0, n);

    let total_gas = sg + ss;
    let [krw, kro_imm, krg_imm] = base.relperm(sw, so, &total_gas);

    let f_solvent = solvent_fraction(ss, sg);
    let misc = solvent.miscibility_fn(&f_solvent);

    // Endpoint blend between the solvent-driven and water-driven values.
    let sorwmis = solvent.miscible_residual_oil_saturation(sw);
    let sgcwmis = solvent.miscible_critical_gas_saturation(sw);
    let sor = &(&misc * &sorwmis) + &(&(1.0 - &misc) * base.scaled_residual_oil_in_gas());
    let sgc = &(&misc * &sgcwmis) + &(&(1.0 - &misc) * base.scaled_critical_gas());

    let sn = &(so + sg) + ss;
    let ssg = &total_gas - &sgc;
    let sn_eff = &(&sn - &sor) - &sgc;

    let f_total_gas = guarded_divide(&ssg, &sn_eff, &zero);

    let hc_kr = solvent.miscible_hydrocarbon_water_relperm(&sn);
    let mkrgt = &solvent.miscible_solvent_gas_relperm_multiplier(&f_total_gas) * &hc_kr;
    let mkro = &solvent.miscible_oil_relperm_multiplier(&(1.0 - &f_total_gas)) * &hc_kr;

    let krg = &(&(1.0 - &misc) * &krg_imm) + &(&misc * &mkrgt);
    let kro = &(&(1.0 - &misc) * &kro_imm) + &(&misc * &mkro);

    Ok([krw, kro, krg])
}
