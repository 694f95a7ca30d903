//! Blackoil PVT property evaluation.
//!
//! The [`PvtModel`] trait is the seam the assembler talks to; [`DeckPvt`]
//! is the table-backed implementation. Oil is a live-oil model: below the
//! bubble point properties come from the saturated tables, above it from a
//! compressibility expansion around the bubble point selected per cell by
//! the phase-condition flags. Gas is dry (the vaporized-oil ratio is carried
//! through signatures but does not alter dry-gas properties).

use crate::error::{PropsError, PropsResult};
use crate::table::Table1d;
use rf_autodiff::{AdVector, Selector};
use rf_core::{Phase, PhaseCondition, PhaseIndexSet, Real};

/// Property-evaluation interface consumed by the residual assembler.
pub trait PvtModel {
    /// Phase activity and canonical positions of this model.
    fn phases(&self) -> &PhaseIndexSet;

    /// Reciprocal formation volume factor `b` for a real phase.
    fn reciprocal_fvf(
        &self,
        phase: Phase,
        p: &AdVector,
        temperature: &AdVector,
        rs: &AdVector,
        rv: &AdVector,
        cond: &[PhaseCondition],
    ) -> PropsResult<AdVector>;

    /// Phase viscosity.
    fn viscosity(
        &self,
        phase: Phase,
        p: &AdVector,
        temperature: &AdVector,
        rs: &AdVector,
        rv: &AdVector,
        cond: &[PhaseCondition],
    ) -> PropsResult<AdVector>;

    /// Surface (standard-condition) density of a phase.
    fn surface_density(&self, phase: Phase) -> PropsResult<Real>;

    /// Saturated (maximum) dissolved-gas ratio at the given pressure.
    fn rs_sat(&self, p: &AdVector) -> AdVector;

    /// Bubble-point pressure for a given dissolved-gas ratio.
    fn bubble_point_pressure(&self, rs: &AdVector) -> AdVector;

    /// Reservoir-condition phase density from `b` and the miscibility ratios.
    ///
    /// Oil carries its dissolved gas, gas its vaporized oil.
    fn density(
        &self,
        phase: Phase,
        b: &AdVector,
        rs: &AdVector,
        rv: &AdVector,
    ) -> PropsResult<AdVector> {
        let mut rho = b * self.surface_density(phase)?;
        if phase == Phase::Oil && self.phases().is_active(Phase::Gas) {
            rho = &rho + &(&(rs * b) * self.surface_density(Phase::Gas)?);
        }
        if phase == Phase::Gas && self.phases().is_active(Phase::Oil) {
            rho = &rho + &(&(rv * b) * self.surface_density(Phase::Oil)?);
        }
        Ok(rho)
    }
}

/// Water PVT: compressibility expansion around a reference pressure.
#[derive(Clone, Debug)]
pub struct WaterPvt {
    /// Reciprocal FVF at the reference pressure
    pub ref_reciprocal_fvf: Real,
    pub ref_pressure: Real,
    pub compressibility: Real,
    pub viscosity: Real,
}

/// Live-oil PVT: saturated tables in pressure plus an undersaturated
/// compressibility branch around the bubble point.
#[derive(Clone, Debug)]
pub struct OilPvt {
    pub b_sat: Table1d,
    pub mu_sat: Table1d,
    pub rs_sat: Table1d,
    /// Inverse of `rs_sat`: bubble-point pressure as a function of rs
    pub bubble_point: Table1d,
    pub compressibility: Real,
    /// Relative viscosity increase per unit pressure above the bubble point
    pub visc_pressure_factor: Real,
}

/// Dry-gas PVT: pressure tables only.
#[derive(Clone, Debug)]
pub struct GasPvt {
    pub b: Table1d,
    pub mu: Table1d,
}

/// Table-backed blackoil PVT model.
#[derive(Clone, Debug)]
pub struct DeckPvt {
    phases: PhaseIndexSet,
    water: Option<WaterPvt>,
    oil: OilPvt,
    gas: Option<GasPvt>,
    /// Surface densities for water, oil, gas (canonical real-phase order)
    surface_density: [Real; 3],
}

impl DeckPvt {
    pub fn new(
        phases: PhaseIndexSet,
        water: Option<WaterPvt>,
        oil: OilPvt,
        gas: Option<GasPvt>,
        surface_density: [Real; 3],
    ) -> PropsResult<Self> {
        if phases.is_active(Phase::Water) != water.is_some() {
            return Err(PropsError::InvalidArg {
                what: "water activity and water PVT data disagree",
            });
        }
        if phases.is_active(Phase::Gas) != gas.is_some() {
            return Err(PropsError::InvalidArg {
                what: "gas activity and gas PVT data disagree",
            });
        }
        if surface_density.iter().any(|&d| d <= 0.0 || !d.is_finite()) {
            return Err(PropsError::NonPhysical {
                what: "surface density",
            });
        }
        Ok(Self {
            phases,
            water,
            oil,
            gas,
            surface_density,
        })
    }

    fn water(&self) -> PropsResult<&WaterPvt> {
        self.water.as_ref().ok_or(PropsError::UnknownPhase {
            phase: Phase::Water,
        })
    }

    fn gas(&self) -> PropsResult<&GasPvt> {
        self.gas
            .as_ref()
            .ok_or(PropsError::UnknownPhase { phase: Phase::Gas })
    }

    fn b_water(&self, p: &AdVector) -> PropsResult<AdVector> {
        let w = self.water()?;
        let x = &(p - w.ref_pressure) * w.compressibility;
        let expansion = &(&(&x * &x) * 0.5) + &(&x + 1.0);
        Ok(&expansion * w.ref_reciprocal_fvf)
    }

    /// Saturated-or-undersaturated branch selection for the oil columns.
    fn oil_branch(
        &self,
        p: &AdVector,
        rs: &AdVector,
        cond: &[PhaseCondition],
        saturated: impl Fn(&AdVector) -> AdVector,
        undersaturated: impl Fn(&AdVector, &AdVector) -> AdVector,
    ) -> AdVector {
        let sat_mask: Vec<bool> = cond.iter().map(PhaseCondition::has_free_gas).collect();
        debug_assert_eq!(sat_mask.len(), p.len());
        let pb = self.oil.bubble_point.eval_ad(rs);
        let sel = Selector::from_mask(sat_mask);
        sel.select(&saturated(p), &undersaturated(p, &pb))
    }

    fn b_oil(&self, p: &AdVector, rs: &AdVector, cond: &[PhaseCondition]) -> AdVector {
        let c = self.oil.compressibility;
        self.oil_branch(
            p,
            rs,
            cond,
            |p| self.oil.b_sat.eval_ad(p),
            |p, pb| {
                let x = &(p - pb) * c;
                let expansion = &(&(&x * &x) * 0.5) + &(&x + 1.0);
                &self.oil.b_sat.eval_ad(pb) * &expansion
            },
        )
    }

    fn mu_oil(&self, p: &AdVector, rs: &AdVector, cond: &[PhaseCondition]) -> AdVector {
        let f = self.oil.visc_pressure_factor;
        self.oil_branch(
            p,
            rs,
            cond,
            |p| self.oil.mu_sat.eval_ad(p),
            |p, pb| {
                let growth = &(&(p - pb) * f) + 1.0;
                &self.oil.mu_sat.eval_ad(pb) * &growth
            },
        )
    }
}

impl PvtModel for DeckPvt {
    fn phases(&self) -> &PhaseIndexSet {
        &self.phases
    }

    fn reciprocal_fvf(
        &self,
        phase: Phase,
        p: &AdVector,
        _temperature: &AdVector,
        rs: &AdVector,
        _rv: &AdVector,
        cond: &[PhaseCondition],
    ) -> PropsResult<AdVector> {
        match phase {
            Phase::Water => self.b_water(p),
            Phase::Oil => Ok(self.b_oil(p, rs, cond)),
            Phase::Gas => Ok(self.gas()?.b.eval_ad(p)),
            Phase::Solvent => Err(PropsError::UnknownPhase { phase }),
        }
    }

    fn viscosity(
        &self,
        phase: Phase,
        p: &AdVector,
        _temperature: &AdVector,
        rs: &AdVector,
        _rv: &AdVector,
        cond: &[PhaseCondition],
    ) -> PropsResult<AdVector> {
        match phase {
            Phase::Water => Ok(AdVector::constant_elem(self.water()?.viscosity, p.len())),
            Phase::Oil => Ok(self.mu_oil(p, rs, cond)),
            Phase::Gas => Ok(self.gas()?.mu.eval_ad(p)),
            Phase::Solvent => Err(PropsError::UnknownPhase { phase }),
        }
    }

    fn surface_density(&self, phase: Phase) -> PropsResult<Real> {
        let pos = match phase {
            Phase::Water => 0,
            Phase::Oil => 1,
            Phase::Gas => 2,
            Phase::Solvent => return Err(PropsError::UnknownPhase { phase }),
        };
        if !self.phases.is_active(phase) {
            return Err(PropsError::UnknownPhase { phase });
        }
        Ok(self.surface_density[pos])
    }

    fn rs_sat(&self, p: &AdVector) -> AdVector {
        self.oil.rs_sat.eval_ad(p)
    }

    fn bubble_point_pressure(&self, rs: &AdVector) -> AdVector {
        self.oil.bubble_point.eval_ad(rs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn test_pvt() -> DeckPvt {
        DeckPvt::new(
            PhaseIndexSet::blackoil(),
            Some(WaterPvt {
                ref_reciprocal_fvf: 1.0,
                ref_pressure: 200e5,
                compressibility: 4e-10,
                viscosity: 5e-4,
            }),
            OilPvt {
                b_sat: Table1d::line(100e5, 0.95, 300e5, 0.80).unwrap(),
                mu_sat: Table1d::line(100e5, 1.5e-3, 300e5, 1.0e-3).unwrap(),
                rs_sat: Table1d::line(100e5, 50.0, 300e5, 150.0).unwrap(),
                bubble_point: Table1d::line(50.0, 100e5, 150.0, 300e5).unwrap(),
                compressibility: 1e-9,
                visc_pressure_factor: 2e-9,
            },
            Some(GasPvt {
                b: Table1d::line(100e5, 80.0, 300e5, 250.0).unwrap(),
                mu: Table1d::line(100e5, 1.5e-5, 300e5, 3.0e-5).unwrap(),
            }),
            [1000.0, 850.0, 1.0],
        )
        .unwrap()
    }

    fn consts(n: usize, v: Real) -> AdVector {
        AdVector::constant_elem(v, n)
    }

    #[test]
    fn saturated_oil_follows_table() {
        let pvt = test_pvt();
        let p = consts(1, 200e5);
        let rs = consts(1, 100.0);
        let mut cond = PhaseCondition::default();
        cond.set_free_gas(true);
        let b = pvt
            .reciprocal_fvf(Phase::Oil, &p, &consts(1, 350.0), &rs, &consts(1, 0.0), &[cond])
            .unwrap();
        assert!((b.value()[0] - 0.875).abs() < 1e-12);
    }

    #[test]
    fn undersaturated_oil_expands_around_bubble_point() {
        let pvt = test_pvt();
        // rs = 100 -> bubble point 200 bar; evaluate 50 bar above it
        let p = consts(1, 250e5);
        let rs = consts(1, 100.0);
        let cond = PhaseCondition::default();
        let b = pvt
            .reciprocal_fvf(Phase::Oil, &p, &consts(1, 350.0), &rs, &consts(1, 0.0), &[cond])
            .unwrap();
        let x = 1e-9 * 50e5;
        let expected = 0.875 * (1.0 + x + 0.5 * x * x);
        assert!((b.value()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn gas_is_dry() {
        let pvt = test_pvt();
        let p = consts(1, 200e5);
        let b1 = pvt
            .reciprocal_fvf(
                Phase::Gas,
                &p,
                &consts(1, 350.0),
                &consts(1, 0.0),
                &consts(1, 0.0),
                &[PhaseCondition::default()],
            )
            .unwrap();
        let b2 = pvt
            .reciprocal_fvf(
                Phase::Gas,
                &p,
                &consts(1, 350.0),
                &consts(1, 0.0),
                &consts(1, 123.0),
                &[PhaseCondition::default()],
            )
            .unwrap();
        assert_eq!(b1.value(), b2.value());
    }

    #[test]
    fn solvent_is_not_a_pvt_phase() {
        let pvt = test_pvt();
        let p = consts(1, 200e5);
        let err = pvt
            .reciprocal_fvf(
                Phase::Solvent,
                &p,
                &consts(1, 350.0),
                &consts(1, 0.0),
                &consts(1, 0.0),
                &[PhaseCondition::default()],
            )
            .unwrap_err();
        assert!(matches!(err, PropsError::UnknownPhase { .. }));
    }

    #[test]
    fn oil_density_carries_dissolved_gas() {
        let pvt = test_pvt();
        let b = consts(1, 0.9);
        let rs = consts(1, 100.0);
        let rv = consts(1, 0.0);
        let rho = pvt.density(Phase::Oil, &b, &rs, &rv).unwrap();
        assert!((rho.value()[0] - (0.9 * 850.0 + 100.0 * 0.9 * 1.0)).abs() < 1e-9);
    }

    #[test]
    fn variable_pressure_propagates_derivative() {
        let pvt = test_pvt();
        let p = AdVector::variable(&[1], 0, DVector::from_element(1, 200e5));
        let b = pvt
            .reciprocal_fvf(
                Phase::Gas,
                &p,
                &consts(1, 350.0),
                &consts(1, 0.0),
                &consts(1, 0.0),
                &[PhaseCondition::default()],
            )
            .unwrap();
        // table slope: (250 - 80) / 200e5
        let slope = (250.0 - 80.0) / 200e5;
        assert!((b.block(0).unwrap()[(0, 0)] - slope).abs() < 1e-15);
    }
}
