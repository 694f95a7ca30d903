//! The fully-implicit residual assembler.
//!
//! One [`BlackoilModel::assemble`] call runs the per-iteration state
//! machine: initial accumulation (first assembly only), effective-property
//! recomputation when miscible, mass-balance assembly, and well equations
//! (skipped without active wells). The result is one residual/Jacobian pair
//! per governing equation plus the per-equation scaling factors.
//!
//! The solvent pseudo-phase enters through the [`SolventExtension`]
//! capability object selected at construction; hydrocarbon gas and solvent
//! share the gas slot of the well equations and are redistributed between
//! their mass-balance equations afterwards.

use crate::error::{ModelError, ModelResult};
use crate::extension::SolventExtension;
use crate::grid::Grid;
use crate::scaling::{GlobalReduce, NoReduce, mean_reciprocal_fvf};
use crate::state::{ReservoirState, SolutionState, VariableLayout, WellState};
use crate::update;
use crate::wells::{
    ConnectionPressureInputs, ConnectionPressures, GravitySegments, TrapezoidSegments, Wells,
    compute_connection_pressures,
};
use nalgebra::{DMatrix, DVector};
use rf_autodiff::{AdVector, apply_linear, subset, superset};
use rf_core::{Phase, PhaseCondition, PhaseIndexSet, Real};
use rf_props::{
    PropsError, PvtModel, RelPermModel, ToddLongstaffInputs, miscible_relperm, solvent_fraction,
    todd_longstaff,
};

/// Run-constant model configuration.
#[derive(Clone, Copy, Debug)]
pub struct ModelConfig {
    /// Time step length
    pub dt: Real,
    pub gravity: Real,
    /// Rock compressibility for the pore-volume multiplier
    pub rock_compressibility: Real,
    /// Reference pressure of the pore-volume multiplier
    pub ref_pressure: Real,
    /// Reservoir temperature (isothermal)
    pub temperature: Real,
    /// Seed value for the per-equation scaling factors
    pub default_equation_scale: Real,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dt: 86_400.0,
            gravity: 9.80665,
            rock_compressibility: 0.0,
            ref_pressure: 200e5,
            temperature: 350.0,
            default_equation_scale: 0.0031,
        }
    }
}

/// Per-equation working data of one assembly pass.
#[derive(Clone, Debug, Default)]
struct EqData {
    b: Option<AdVector>,
    mobility: Option<AdVector>,
    flux: Option<AdVector>,
    upwind: Option<DMatrix<Real>>,
    accum1: Option<AdVector>,
}

/// Effective (Todd–Longstaff mixed) properties, indexed by equation slot.
#[derive(Clone, Debug)]
pub struct EffectiveState {
    pub b: Vec<AdVector>,
    pub mu: Vec<AdVector>,
}

/// Assembled residuals: one AD value per governing equation.
#[derive(Clone, Debug, Default)]
pub struct ResidualEquations {
    /// Mass balance per equation slot (real phases, then solvent)
    pub mass_balance: Vec<AdVector>,
    /// Well flux equations, well-major `[well * np + pos]`
    pub well_flux: Option<AdVector>,
    /// Well control equations, one per well
    pub well_control: Option<AdVector>,
    /// Per-equation scaling factors for linear-solver preconditioning
    pub scale: Vec<Real>,
}

impl ResidualEquations {
    /// Stack every equation into one dense residual vector and Jacobian.
    pub fn stack(&self, block_sizes: &[usize]) -> (DVector<Real>, DMatrix<Real>) {
        let mut parts: Vec<AdVector> = self.mass_balance.clone();
        if let Some(wf) = &self.well_flux {
            parts.push(wf.clone());
        }
        if let Some(wc) = &self.well_control {
            parts.push(wc.clone());
        }
        let stacked = AdVector::vstack(&parts);
        let jac = stacked.full_jacobian(block_sizes);
        (stacked.into_value(), jac)
    }

    /// Euclidean norm per equation group.
    pub fn norms(&self) -> Vec<Real> {
        let mut norms: Vec<Real> = self.mass_balance.iter().map(|r| r.value().norm()).collect();
        if let Some(wf) = &self.well_flux {
            norms.push(wf.value().norm());
        }
        if let Some(wc) = &self.well_control {
            norms.push(wc.value().norm());
        }
        norms
    }
}

/// The generic fully-implicit assembler with an optional extra-phase
/// strategy.
pub struct BlackoilModel<'a> {
    grid: &'a Grid,
    pvt: &'a dyn PvtModel,
    relperm: &'a RelPermModel,
    wells: Option<&'a Wells>,
    extension: Option<SolventExtension>,
    cfg: ModelConfig,
    has_disgas: bool,
    has_vapoil: bool,

    phases: PhaseIndexSet,
    layout: VariableLayout,
    conditions: Vec<PhaseCondition>,

    grad: DMatrix<Real>,
    div: DMatrix<Real>,
    caver: DMatrix<Real>,
    gravity_dz: DVector<Real>,

    rq: Vec<EqData>,
    accum0: Vec<AdVector>,
    effective: Option<EffectiveState>,
    connection_pressures: Option<ConnectionPressures>,
    residual: ResidualEquations,

    reduce: Box<dyn GlobalReduce>,
    segments: Box<dyn GravitySegments>,
}

impl<'a> core::fmt::Debug for BlackoilModel<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlackoilModel")
            .field("has_disgas", &self.has_disgas)
            .field("has_vapoil", &self.has_vapoil)
            .finish_non_exhaustive()
    }
}

impl<'a> BlackoilModel<'a> {
    /// Build the model; unsupported option combinations fail here, before
    /// any residual assembly.
    pub fn new(
        grid: &'a Grid,
        pvt: &'a dyn PvtModel,
        relperm: &'a RelPermModel,
        wells: Option<&'a Wells>,
        extension: Option<SolventExtension>,
        cfg: ModelConfig,
        has_disgas: bool,
        has_vapoil: bool,
    ) -> ModelResult<Self> {
        if extension.is_some() && has_vapoil {
            return Err(ModelError::Config {
                what: "solvent option requires dead gas (no vaporized oil)".to_string(),
            });
        }
        let base = pvt.phases();
        let phases = PhaseIndexSet::new(
            base.is_active(Phase::Water),
            true,
            base.is_active(Phase::Gas),
            extension.is_some(),
        )?;
        let num_wells = wells.map_or(0, Wells::num_wells);
        let layout = VariableLayout::new(&phases, grid.num_cells(), num_wells);
        if let Some(wells) = wells {
            let nc = grid.num_cells();
            if wells.well_cells().iter().any(|&c| c >= nc) {
                return Err(ModelError::Config {
                    what: "well perforation outside the grid".to_string(),
                });
            }
        }

        if let Some(ext) = &extension {
            tracing::debug!(
                extra_phase = ext.name(),
                miscible = ext.is_miscible(),
                "extra-phase strategy selected"
            );
        }

        let num_eq = phases.num_equations();
        let residual = ResidualEquations {
            mass_balance: Vec::new(),
            well_flux: None,
            well_control: None,
            scale: vec![cfg.default_equation_scale; num_eq],
        };

        Ok(Self {
            grad: grid.grad_matrix(),
            div: grid.div_matrix(),
            caver: grid.caver_matrix(),
            gravity_dz: grid.depth_gradient() * cfg.gravity,
            grid,
            pvt,
            relperm,
            wells,
            extension,
            cfg,
            has_disgas,
            has_vapoil,
            conditions: vec![PhaseCondition::default(); grid.num_cells()],
            rq: vec![EqData::default(); num_eq],
            accum0: Vec::new(),
            effective: None,
            connection_pressures: None,
            residual,
            phases,
            layout,
            reduce: Box::new(NoReduce),
            segments: Box::new(TrapezoidSegments),
        })
    }

    pub fn phases(&self) -> &PhaseIndexSet {
        &self.phases
    }

    pub fn layout(&self) -> &VariableLayout {
        &self.layout
    }

    pub fn residual(&self) -> &ResidualEquations {
        &self.residual
    }

    pub fn effective(&self) -> Option<&EffectiveState> {
        self.effective.as_ref()
    }

    pub fn connection_pressures(&self) -> Option<&ConnectionPressures> {
        self.connection_pressures.as_ref()
    }

    /// Install the cross-domain reduction hook (single-domain by default).
    pub fn set_global_reduce(&mut self, reduce: Box<dyn GlobalReduce>) {
        self.reduce = reduce;
    }

    /// Install the gravity-segment integration routine.
    pub fn set_gravity_segments(&mut self, segments: Box<dyn GravitySegments>) {
        self.segments = segments;
    }

    fn is_miscible(&self) -> bool {
        self.extension.as_ref().is_some_and(SolventExtension::is_miscible)
    }

    fn num_equations(&self) -> usize {
        self.phases.num_equations()
    }

    fn solvent_pos(&self) -> Option<usize> {
        self.phases.pos(Phase::Solvent)
    }

    /// The assembled residual and Jacobian as one dense system.
    pub fn linearized_system(&self) -> (DVector<Real>, DMatrix<Real>) {
        self.residual.stack(&self.layout.block_sizes())
    }

    /// One full nonlinear-residual evaluation.
    pub fn assemble(
        &mut self,
        rstate: &ReservoirState,
        wstate: &mut WellState,
        initial_assembly: bool,
    ) -> ModelResult<()> {
        self.update_phase_conditions(rstate);
        let state = SolutionState::variable(
            &self.layout,
            &self.phases,
            rstate,
            wstate,
            self.cfg.temperature,
        )?;

        if initial_assembly {
            let state0 = state.as_constant();
            if self.is_miscible() {
                self.effective = Some(self.calculate_effective_properties(&state0)?);
            }
            self.compute_accum(&state0, 0)?;
            self.compute_well_connection_pressures(rstate, wstate)?;
        } else if self.accum0.is_empty() {
            return Err(ModelError::Numeric {
                what: "initial accumulation missing; run an initial assembly first".to_string(),
            });
        }

        if self.is_miscible() {
            self.effective = Some(self.calculate_effective_properties(&state)?);
        }

        self.assemble_mass_balance(&state)?;

        if self.wells.is_some_and(|w| w.num_wells() > 0) {
            self.assemble_well_equations(&state, wstate)?;
        } else {
            self.residual.well_flux = None;
            self.residual.well_control = None;
        }

        self.update_equations_scaling();
        tracing::debug!(norms = ?self.residual.norms(), "residual assembled");
        Ok(())
    }

    /// Map a Newton correction back onto the physical state. This is the
    /// single mutation entry point for the primary state.
    pub fn update_state(
        &self,
        dx: &DVector<Real>,
        rstate: &mut ReservoirState,
        wstate: &mut WellState,
    ) -> ModelResult<()> {
        update::update_state(
            &self.layout,
            &self.phases,
            self.extension.as_ref(),
            dx,
            rstate,
            wstate,
        )
    }

    fn update_phase_conditions(&mut self, rstate: &ReservoirState) {
        let np = self.phases.num_phases();
        for c in 0..rstate.num_cells() {
            let mut cond = PhaseCondition::default();
            if let Some(pos) = self.phases.pos(Phase::Water) {
                cond.set_free_water(rstate.sat(c, pos, np) > 0.0);
            }
            if let Some(pos) = self.phases.pos(Phase::Oil) {
                cond.set_free_oil(rstate.sat(c, pos, np) > 0.0);
            }
            if let Some(pos) = self.phases.pos(Phase::Gas) {
                cond.set_free_gas(rstate.sat(c, pos, np) > 0.0);
            }
            self.conditions[c] = cond;
        }
    }

    fn pv_mult(&self, p: &AdVector) -> AdVector {
        &(&(p - self.cfg.ref_pressure) * self.cfg.rock_compressibility) + 1.0
    }

    /// Reciprocal FVF of any phase, redirected to the pre-mixed effective
    /// values when the model is miscible.
    pub fn fluid_reciprocal_fvf(
        &self,
        phase: Phase,
        p: &AdVector,
        state: &SolutionState,
    ) -> ModelResult<AdVector> {
        if self.is_miscible() && matches!(phase, Phase::Oil | Phase::Gas | Phase::Solvent) {
            let eff = self.effective.as_ref().ok_or_else(|| ModelError::Numeric {
                what: "effective properties queried before they were computed".to_string(),
            })?;
            let pos = self
                .phases
                .pos(phase)
                .ok_or(PropsError::UnknownPhase { phase })?;
            return Ok(eff.b[pos].clone());
        }
        match phase {
            Phase::Water | Phase::Oil | Phase::Gas => Ok(self.pvt.reciprocal_fvf(
                phase,
                p,
                &state.temperature,
                &state.rs,
                &state.rv,
                &self.conditions,
            )?),
            Phase::Solvent => {
                let ext = self
                    .extension
                    .as_ref()
                    .ok_or(PropsError::UnknownPhase { phase })?;
                Ok(ext.pvt().b_solvent(p))
            }
        }
    }

    /// Phase viscosity with the same miscible redirection.
    pub fn fluid_viscosity(
        &self,
        phase: Phase,
        p: &AdVector,
        state: &SolutionState,
    ) -> ModelResult<AdVector> {
        if self.is_miscible() && matches!(phase, Phase::Oil | Phase::Gas | Phase::Solvent) {
            let eff = self.effective.as_ref().ok_or_else(|| ModelError::Numeric {
                what: "effective properties queried before they were computed".to_string(),
            })?;
            let pos = self
                .phases
                .pos(phase)
                .ok_or(PropsError::UnknownPhase { phase })?;
            return Ok(eff.mu[pos].clone());
        }
        match phase {
            Phase::Water | Phase::Oil | Phase::Gas => Ok(self.pvt.viscosity(
                phase,
                p,
                &state.temperature,
                &state.rs,
                &state.rv,
                &self.conditions,
            )?),
            Phase::Solvent => {
                let ext = self
                    .extension
                    .as_ref()
                    .ok_or(PropsError::UnknownPhase { phase })?;
                Ok(ext.pvt().mu_solvent(p))
            }
        }
    }

    /// Reservoir-condition density from the (possibly effective) `b`.
    pub fn fluid_density(
        &self,
        phase: Phase,
        b: &AdVector,
        state: &SolutionState,
    ) -> ModelResult<AdVector> {
        match phase {
            Phase::Solvent => {
                let ext = self
                    .extension
                    .as_ref()
                    .ok_or(PropsError::UnknownPhase { phase })?;
                Ok(b * ext.pvt().surface_density)
            }
            _ => Ok(self.pvt.density(phase, b, &state.rs, &state.rv)?),
        }
    }

    fn sat_or_zero(&self, state: &SolutionState, phase: Phase) -> AdVector {
        match self.phases.pos(phase) {
            Some(pos) if phase != Phase::Solvent => state.saturation[pos].clone(),
            _ => AdVector::constant_elem(0.0, self.grid.num_cells()),
        }
    }

    /// Raw properties, endpoint-shifted saturations and the mixing rule:
    /// the miscible effective viscosities and reciprocal FVFs.
    fn calculate_effective_properties(
        &self,
        state: &SolutionState,
    ) -> ModelResult<EffectiveState> {
        let ext = self.extension.as_ref().ok_or_else(|| ModelError::Config {
            what: "effective properties need the solvent extension".to_string(),
        })?;
        let solvent = ext.pvt();
        let p = &state.pressure;
        let nc = self.grid.num_cells();
        let num_eq = self.num_equations();

        let sw = self.sat_or_zero(state, Phase::Water);
        let so = self.sat_or_zero(state, Phase::Oil);
        let sg = self.sat_or_zero(state, Phase::Gas);
        let ss = state
            .solvent_saturation
            .clone()
            .unwrap_or_else(|| AdVector::constant_elem(0.0, nc));

        // Raw properties straight from the tables; the dispatcher would
        // redirect to the previous iteration's effective values.
        let mu_o = self.pvt.viscosity(
            Phase::Oil,
            p,
            &state.temperature,
            &state.rs,
            &state.rv,
            &self.conditions,
        )?;
        let mu_g = self.pvt.viscosity(
            Phase::Gas,
            p,
            &state.temperature,
            &state.rs,
            &state.rv,
            &self.conditions,
        )?;
        let mu_s = solvent.mu_solvent(p);

        let b_o = self.pvt.reciprocal_fvf(
            Phase::Oil,
            p,
            &state.temperature,
            &state.rs,
            &state.rv,
            &self.conditions,
        )?;
        let b_g = self.pvt.reciprocal_fvf(
            Phase::Gas,
            p,
            &state.temperature,
            &state.rs,
            &state.rv,
            &self.conditions,
        )?;
        let b_s = solvent.b_solvent(p);

        let rho_o_surf = self.pvt.surface_density(Phase::Oil)?;
        let rho_g_surf = self.pvt.surface_density(Phase::Gas)?;
        let rho_s_surf = solvent.surface_density;

        let rho_o = &b_o * rho_o_surf;
        let rho_g = &b_g * rho_g_surf;
        let rho_s = &b_s * rho_s_surf;

        // Endpoint-shifted effective saturations.
        let sorwmis = solvent.miscible_residual_oil_saturation(&sw);
        let sgcwmis = solvent.miscible_critical_gas_saturation(&sw);
        let inputs = ToddLongstaffInputs {
            mu_oil: mu_o,
            mu_gas: mu_g,
            mu_solvent: mu_s,
            rho_oil: rho_o,
            rho_gas: rho_g,
            rho_solvent: rho_s,
            so_eff: &so - &sorwmis,
            sg_eff: &sg - &sgcwmis,
            ss_eff: &ss - &sgcwmis,
        };
        let out = todd_longstaff(&inputs, &solvent.mixing);

        let mut b_eff = vec![AdVector::constant_elem(0.0, nc); num_eq];
        let mut mu_eff = vec![AdVector::constant_elem(0.0, nc); num_eq];

        if let Some(pos) = self.phases.pos(Phase::Water) {
            b_eff[pos] = self.pvt.reciprocal_fvf(
                Phase::Water,
                p,
                &state.temperature,
                &state.rs,
                &state.rv,
                &self.conditions,
            )?;
            mu_eff[pos] = self.pvt.viscosity(
                Phase::Water,
                p,
                &state.temperature,
                &state.rs,
                &state.rv,
                &self.conditions,
            )?;
        }
        let oil_pos = self.phases.pos(Phase::Oil).expect("oil is active");
        b_eff[oil_pos] = &out.rho_oil / rho_o_surf;
        mu_eff[oil_pos] = out.mu_oil;
        if let Some(pos) = self.phases.pos(Phase::Gas) {
            b_eff[pos] = &out.rho_gas / rho_g_surf;
            mu_eff[pos] = out.mu_gas;
        }
        let solvent_pos = self.solvent_pos().expect("extension implies solvent slot");
        b_eff[solvent_pos] = &out.rho_solvent / rho_s_surf;
        mu_eff[solvent_pos] = out.mu_solvent;

        Ok(EffectiveState {
            b: b_eff,
            mu: mu_eff,
        })
    }

    /// Accumulation terms `pv_mult * b * s` for all equations at one time
    /// level; level 0 is kept across iterations for the time derivative.
    fn compute_accum(&mut self, state: &SolutionState, level: usize) -> ModelResult<()> {
        let p = &state.pressure;
        let pv_mult = self.pv_mult(p);
        let num_eq = self.num_equations();

        let mut base: Vec<Option<AdVector>> = vec![None; num_eq];
        let mut b_store: Vec<Option<AdVector>> = vec![None; num_eq];
        for phase in self.phases.active_real() {
            let pos = self.phases.pos(phase).expect("active phase");
            let b = self.fluid_reciprocal_fvf(phase, p, state)?;
            base[pos] = Some(&b * &state.saturation[pos]);
            b_store[pos] = Some(b);
        }

        // Dissolved gas lives in the oil phase, vaporized oil in the gas
        // phase; both move between the two accumulation terms.
        if let (Some(oil), Some(gas)) = (self.phases.pos(Phase::Oil), self.phases.pos(Phase::Gas))
        {
            let oil_base = base[oil].clone().expect("oil accumulation");
            let gas_base = base[gas].clone().expect("gas accumulation");
            if self.has_disgas {
                base[gas] = Some(&gas_base + &(&state.rs * &oil_base));
            }
            if self.has_vapoil {
                base[oil] = Some(&oil_base + &(&state.rv * &gas_base));
            }
        }

        let mut accum: Vec<Option<AdVector>> =
            base.into_iter().map(|a| a.map(|a| &pv_mult * &a)).collect();

        if let Some(ext) = &self.extension {
            let pos = self.solvent_pos().expect("solvent slot");
            let ss = state
                .solvent_saturation
                .as_ref()
                .ok_or_else(|| ModelError::Config {
                    what: "solvent extension active but state has no solvent".to_string(),
                })?;
            let b_s = self.fluid_reciprocal_fvf(Phase::Solvent, p, state)?;
            accum[pos] = Some(ext.accumulation_term(&pv_mult, &b_s, ss));
            b_store[pos] = Some(b_s);
        }

        let accum: Vec<AdVector> = accum
            .into_iter()
            .map(|a| a.expect("every equation has an accumulation term"))
            .collect();

        if level == 0 {
            self.accum0 = accum;
        } else {
            for (eq, a) in accum.into_iter().enumerate() {
                self.rq[eq].accum1 = Some(a);
                self.rq[eq].b = b_store[eq].take();
            }
        }
        Ok(())
    }

    /// Upwinded surface-volume flux of one equation slot.
    fn compute_mass_flux(
        &mut self,
        eq: usize,
        kr: &AdVector,
        mu: &AdVector,
        rho: &AdVector,
        p: &AdVector,
    ) -> ModelResult<()> {
        let mob = kr / mu;
        let rhoavg = apply_linear(&self.caver, rho);
        let head = &apply_linear(&self.grad, p)
            - &(&rhoavg * &AdVector::constant(self.gravity_dz.clone()));
        let upwind = self.grid.upwind_matrix(head.value());
        let b = self.rq[eq].b.clone().ok_or_else(|| ModelError::Numeric {
            what: "flux computed before accumulation".to_string(),
        })?;
        let b_mob_up = apply_linear(&upwind, &(&b * &mob));
        let trans = AdVector::constant(self.grid.trans());
        let flux = &b_mob_up * &(&trans * &head);

        let rq = &mut self.rq[eq];
        rq.mobility = Some(mob);
        rq.flux = Some(flux);
        rq.upwind = Some(upwind);
        Ok(())
    }

    fn assemble_mass_balance(&mut self, state: &SolutionState) -> ModelResult<()> {
        let nc = self.grid.num_cells();
        let num_eq = self.num_equations();
        self.rq = vec![EqData::default(); num_eq];
        self.compute_accum(state, 1)?;

        let p = &state.pressure;
        let sw = self.sat_or_zero(state, Phase::Water);
        let so = self.sat_or_zero(state, Phase::Oil);
        let sg = self.sat_or_zero(state, Phase::Gas);
        let ss = state
            .solvent_saturation
            .clone()
            .unwrap_or_else(|| AdVector::constant_elem(0.0, nc));

        let kr3 = match &self.extension {
            Some(ext) if ext.is_miscible() => {
                miscible_relperm(self.relperm, ext.pvt(), &sw, &so, &sg, &ss)?
            }
            Some(_) => self.relperm.relperm(&sw, &so, &(&sg + &ss)),
            None => self.relperm.relperm(&sw, &so, &sg),
        };

        let active: Vec<Phase> = self.phases.active_real().collect();
        for phase in active {
            let pos = self.phases.pos(phase).expect("active phase");
            let canonical = match phase {
                Phase::Water => 0,
                Phase::Oil => 1,
                Phase::Gas => 2,
                Phase::Solvent => unreachable!("solvent handled with the gas slot"),
            };
            let mut kr = kr3[canonical].clone();

            if phase == Phase::Gas {
                if let Some(ext) = self.extension.clone() {
                    // Solvent rides the total-gas curve: split it, assemble
                    // the solvent flux, and keep the reduced gas curve.
                    let f_solvent = solvent_fraction(&ss, &sg);
                    let (kr_s, kr_g) = ext.flux_relperm_split(&f_solvent, &kr);
                    let mu_s = self.fluid_viscosity(Phase::Solvent, p, state)?;
                    let b_s =
                        self.rq[self.solvent_pos().expect("solvent slot")]
                            .b
                            .clone()
                            .ok_or_else(|| ModelError::Numeric {
                                what: "solvent b missing".to_string(),
                            })?;
                    let rho_s = self.fluid_density(Phase::Solvent, &b_s, state)?;
                    let spos = self.solvent_pos().expect("solvent slot");
                    self.compute_mass_flux(spos, &kr_s, &mu_s, &rho_s, p)?;
                    kr = kr_g;
                }
            }

            let mu = self.fluid_viscosity(phase, p, state)?;
            let b = self.rq[pos].b.clone().ok_or_else(|| ModelError::Numeric {
                what: "phase b missing".to_string(),
            })?;
            let rho = self.fluid_density(phase, &b, state)?;
            self.compute_mass_flux(pos, &kr, &mu, &rho, p)?;
        }

        // R = pv/dt * (accum - accum0) + div(flux)
        let pvdt = AdVector::constant(
            DVector::from_column_slice(self.grid.pore_volume()) / self.cfg.dt,
        );
        let mut mass_balance = Vec::with_capacity(num_eq);
        for eq in 0..num_eq {
            let accum1 = self.rq[eq].accum1.as_ref().expect("accumulation computed");
            let flux = self.rq[eq].flux.as_ref().expect("flux computed");
            let r = &(&pvdt * &(accum1 - &self.accum0[eq])) + &apply_linear(&self.div, flux);
            mass_balance.push(r);
        }

        // Dissolved gas travels with the oil flux, vaporized oil with gas.
        if let (Some(oil), Some(gas)) = (self.phases.pos(Phase::Oil), self.phases.pos(Phase::Gas))
        {
            if self.has_disgas {
                let upwind = self.rq[oil].upwind.as_ref().expect("oil upwind");
                let rs_face = apply_linear(upwind, &state.rs);
                let oil_flux = self.rq[oil].flux.as_ref().expect("oil flux");
                mass_balance[gas] = &mass_balance[gas]
                    + &apply_linear(&self.div, &(&rs_face * oil_flux));
            }
            if self.has_vapoil {
                let upwind = self.rq[gas].upwind.as_ref().expect("gas upwind");
                let rv_face = apply_linear(upwind, &state.rv);
                let gas_flux = self.rq[gas].flux.as_ref().expect("gas flux");
                mass_balance[oil] = &mass_balance[oil]
                    + &apply_linear(&self.div, &(&rv_face * gas_flux));
            }
        }

        self.residual.mass_balance = mass_balance;
        Ok(())
    }

    fn assemble_well_equations(
        &mut self,
        state: &SolutionState,
        wstate: &mut WellState,
    ) -> ModelResult<()> {
        let wells = self.wells.expect("wells checked by caller");
        let cells = wells.well_cells().to_vec();
        let nperf = wells.num_perfs();
        let nc = self.grid.num_cells();
        let np = self.phases.num_phases();

        let mut mob_perf: Vec<AdVector> = Vec::with_capacity(np);
        let mut b_perf: Vec<AdVector> = Vec::with_capacity(np);
        for pos in 0..np {
            let mob = self.rq[pos].mobility.as_ref().ok_or_else(|| ModelError::Numeric {
                what: "well equations assembled before fluxes".to_string(),
            })?;
            let b = self.rq[pos].b.as_ref().expect("b computed with accumulation");
            mob_perf.push(subset(mob, &cells));
            b_perf.push(subset(b, &cells));
        }

        let rs_perf = subset(&state.rs, &cells);
        let is_prod = AdVector::constant(DVector::from_column_slice(&wells.producer_mask()));
        let not_prod = &AdVector::constant_elem(1.0, nperf) - &is_prod;

        // Gas and solvent are combined and solved together in the gas slot:
        // total mobility is the sum, and the b-factor is the
        // solvent-fraction weighted blend.
        let mut f_mix = None;
        if self.extension.is_some() {
            let gas_pos = self.phases.pos(Phase::Gas).expect("solvent implies gas");
            let spos = self.solvent_pos().expect("solvent slot");
            let ss = state.solvent_saturation.as_ref().expect("solvent state");
            let sg = self.sat_or_zero(state, Phase::Gas);
            let f_cells = solvent_fraction(ss, &sg);
            let f_perf = subset(&f_cells, &cells);
            let injected =
                AdVector::constant(DVector::from_column_slice(&wstate.solvent_fraction));
            let f = &(&is_prod * &f_perf) + &(&not_prod * &injected);

            let mob_s = self.rq[spos].mobility.as_ref().expect("solvent mobility");
            let b_s = self.rq[spos].b.as_ref().expect("solvent b");
            mob_perf[gas_pos] = &mob_perf[gas_pos] + &subset(mob_s, &cells);
            b_perf[gas_pos] = &(&(1.0 - &f) * &b_perf[gas_pos]) + &(&f * &subset(b_s, &cells));
            f_mix = Some(f);
        }

        let cdp_values = self
            .connection_pressures
            .as_ref()
            .ok_or_else(|| ModelError::Numeric {
                what: "well connection pressures missing; run an initial assembly".to_string(),
            })?
            .pressure_diffs
            .clone();
        let cdp = AdVector::constant(DVector::from_column_slice(&cdp_values));

        let p_perf = subset(&state.pressure, &cells);
        let bhp_perf = apply_linear(&wells.perf_expand_matrix(), &state.bhp);
        let drawdown = &(&p_perf - &bhp_perf) - &cdp;

        let mut mob_total = mob_perf[0].clone();
        for mob in mob_perf.iter().skip(1) {
            mob_total = &mob_total + mob;
        }

        let wi = DVector::from_column_slice(wells.well_index());
        let neg_wi = AdVector::constant(-wi);
        let perf_owner = wells.perf_wells();

        // Surface-volume rates into the cells: producers drain with the
        // in-place phase mobilities, injectors push their surface
        // composition with the total mobility.
        let mut cq_s: Vec<AdVector> = Vec::with_capacity(np);
        for phase in self.phases.active_real() {
            let pos = self.phases.pos(phase).expect("active phase");
            let canonical = match phase {
                Phase::Water => 0,
                Phase::Oil => 1,
                Phase::Gas => 2,
                Phase::Solvent => unreachable!("solvent is not a well slot"),
            };
            let comp = AdVector::constant(DVector::from_iterator(
                nperf,
                perf_owner
                    .iter()
                    .map(|&w| wells.well(w).injection_composition[canonical]),
            ));
            let cq_prod = &mob_perf[pos] * &drawdown;
            let cq_inj = &(&comp * &mob_total) * &drawdown;
            let cq_r = &(&is_prod * &cq_prod) + &(&not_prod * &cq_inj);
            cq_s.push(&b_perf[pos] * &(&neg_wi * &cq_r));
        }

        if let (Some(oil), Some(gas)) = (self.phases.pos(Phase::Oil), self.phases.pos(Phase::Gas))
        {
            let oil_base = cq_s[oil].clone();
            let gas_base = cq_s[gas].clone();
            if self.has_disgas {
                cq_s[gas] = &gas_base + &(&(&is_prod * &rs_perf) * &oil_base);
            }
            if self.has_vapoil {
                let rv_perf = subset(&state.rv, &cells);
                cq_s[oil] = &oil_base + &(&(&is_prod * &rv_perf) * &gas_base);
            }
        }

        // Expose rates and pressures to the caller's well state.
        for perf in 0..nperf {
            for pos in 0..np {
                wstate.perf_phase_rates[perf * np + pos] = cq_s[pos].value()[perf];
            }
            wstate.perf_pressure[perf] = bhp_perf.value()[perf] + cdp_values[perf];
        }

        // Solvent share of the gas-slot rate, with the dissolved-gas part
        // removed once, moves from the gas equation to the solvent equation.
        if let (Some(ext), Some(f)) = (&self.extension, &f_mix) {
            let gas = self.phases.pos(Phase::Gas).expect("gas active");
            let oil = self.phases.pos(Phase::Oil).expect("oil active");
            let spos = self.solvent_pos().expect("solvent slot");
            let cq_solvent = ext.well_source_term(f, &cq_s[gas], &cq_s[oil], &rs_perf);
            let scattered = superset(&cq_solvent, &cells, nc);
            self.residual.mass_balance[spos] = &self.residual.mass_balance[spos] - &scattered;
            self.residual.mass_balance[gas] = &self.residual.mass_balance[gas] + &scattered;
        }

        for pos in 0..np {
            self.residual.mass_balance[pos] =
                &self.residual.mass_balance[pos] - &superset(&cq_s[pos], &cells, nc);
        }

        // Well flux equations: the primary rate variables minus the summed
        // perforation rates.
        let mut summed = AdVector::constant_elem(0.0, np * wells.num_wells());
        for pos in 0..np {
            summed = &summed + &apply_linear(&wells.perf_sum_matrix(np, pos), &cq_s[pos]);
        }
        self.residual.well_flux = Some(&state.qs - &summed);

        let targets = AdVector::constant(DVector::from_column_slice(&wells.bhp_targets()));
        self.residual.well_control = Some(&state.bhp - &targets);
        Ok(())
    }

    fn compute_well_connection_pressures(
        &mut self,
        rstate: &ReservoirState,
        wstate: &WellState,
    ) -> ModelResult<()> {
        let Some(wells) = self.wells else {
            self.connection_pressures = Some(ConnectionPressures::default());
            return Ok(());
        };
        let inputs = ConnectionPressureInputs {
            grid: self.grid,
            wells,
            pvt: self.pvt,
            solvent: self.extension.as_ref().map(SolventExtension::pvt),
            phases: &self.phases,
            conditions: &self.conditions,
            gravity: self.cfg.gravity,
            temperature: self.cfg.temperature,
        };
        self.connection_pressures = Some(compute_connection_pressures(
            &inputs,
            rstate,
            wstate,
            self.segments.as_ref(),
        )?);
        Ok(())
    }

    /// Per-equation scale = mean reciprocal FVF, cross-domain reduced when a
    /// hook is installed. One hook invocation per equation update.
    fn update_equations_scaling(&mut self) {
        for eq in 0..self.num_equations() {
            if let Some(b) = &self.rq[eq].b {
                let values: Vec<Real> = b.value().iter().copied().collect();
                self.residual.scale[eq] = mean_reciprocal_fvf(&values, self.reduce.as_ref());
            }
        }
    }
}
