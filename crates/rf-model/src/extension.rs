//! The solvent extra-phase strategy.
//!
//! The generic assembler is parameterized by this capability object instead
//! of a derived-model hierarchy: it supplies the extra phase's accumulation
//! term, its share of the mass-flux stage, the well-source redistribution
//! and the state-update step, and is selected once at model construction.

use crate::error::{ModelError, ModelResult};
use crate::state::ReservoirState;
use nalgebra::DVector;
use rf_autodiff::AdVector;
use rf_core::{Phase, PhaseIndexSet, Real};
use rf_props::SolventPvt;

/// Solvent pseudo-phase behavior plugged into the assembler.
#[derive(Clone, Debug)]
pub struct SolventExtension {
    pvt: SolventPvt,
    miscible: bool,
}

impl SolventExtension {
    /// The solvent option only works with dead gas: combining it with a
    /// vaporized-oil configuration is rejected up front.
    pub fn new(pvt: SolventPvt, miscible: bool, has_vapoil: bool) -> ModelResult<Self> {
        if has_vapoil {
            return Err(ModelError::Config {
                what: "solvent option requires dead gas (no vaporized oil)".to_string(),
            });
        }
        pvt.validate()?;
        Ok(Self { pvt, miscible })
    }

    pub fn name(&self) -> &'static str {
        "Solvent"
    }

    pub fn pvt(&self) -> &SolventPvt {
        &self.pvt
    }

    pub fn is_miscible(&self) -> bool {
        self.miscible
    }

    /// Accumulation term of the solvent equation: `pv_mult * b * ss`.
    pub fn accumulation_term(
        &self,
        pv_mult: &AdVector,
        b_solvent: &AdVector,
        ss: &AdVector,
    ) -> AdVector {
        &(pv_mult * b_solvent) * ss
    }

    /// Mass-flux term: split the total-gas relative permeability into the
    /// solvent part and the remaining hydrocarbon-gas part using the
    /// tabulated multipliers of the solvent fraction.
    pub fn flux_relperm_split(
        &self,
        f_solvent: &AdVector,
        kr_total_gas: &AdVector,
    ) -> (AdVector, AdVector) {
        let kr_solvent = &self.pvt.solvent_relperm_multiplier(f_solvent) * kr_total_gas;
        let kr_gas = &self.pvt.gas_relperm_multiplier(&(1.0 - f_solvent)) * kr_total_gas;
        (kr_solvent, kr_gas)
    }

    /// Well-source term: the solvent share of the combined gas-slot rate,
    /// with the dissolved-gas contribution removed once so redistribution
    /// between the gas and solvent equations does not double count.
    pub fn well_source_term(
        &self,
        f_solvent_perf: &AdVector,
        cq_gas: &AdVector,
        cq_oil: &AdVector,
        rs_perf: &AdVector,
    ) -> AdVector {
        f_solvent_perf * &(cq_gas - &(rs_perf * cq_oil))
    }

    /// State-update term: apply the solvent correction with a positivity
    /// floor. Saturation closure is re-established by the caller.
    pub fn update_state_term(
        &self,
        dss: &DVector<Real>,
        rstate: &mut ReservoirState,
        phases: &PhaseIndexSet,
    ) {
        debug_assert!(phases.is_active(Phase::Solvent));
        for (c, ss) in rstate.solvent_saturation.iter_mut().enumerate() {
            *ss = (*ss - dss[c]).max(0.0);
        }
    }
}
