//! Well description and well-connection pressure computation.
//!
//! The connection-pressure stage evaluates per-perforation fluid densities
//! at averaged well-bore pressures and turns them into hydrostatic pressure
//! differentials through a pluggable gravity-segment integration routine.

use crate::error::{ModelError, ModelResult};
use crate::grid::Grid;
use crate::state::{ReservoirState, WellState};
use nalgebra::DMatrix;
use rf_autodiff::AdVector;
use rf_core::{Phase, PhaseCondition, PhaseIndexSet, Real};
use rf_props::{PvtModel, SolventPvt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WellKind {
    Producer,
    Injector,
}

/// One well: control target, datum and injected composition.
#[derive(Clone, Debug)]
pub struct Well {
    pub name: String,
    pub kind: WellKind,
    pub bhp_target: Real,
    /// Depth of the bottom-hole datum
    pub ref_depth: Real,
    /// Injected surface-volume fractions (water, oil, gas slots); only
    /// meaningful for injectors
    pub injection_composition: [Real; 3],
}

/// All wells of a run with CSR-style perforation ranges.
#[derive(Clone, Debug)]
pub struct Wells {
    wells: Vec<Well>,
    conn_pos: Vec<usize>,
    well_cells: Vec<usize>,
    well_index: Vec<Real>,
}

impl Wells {
    pub fn new(
        wells: Vec<Well>,
        conn_pos: Vec<usize>,
        well_cells: Vec<usize>,
        well_index: Vec<Real>,
    ) -> ModelResult<Self> {
        if conn_pos.len() != wells.len() + 1 {
            return Err(ModelError::Config {
                what: "conn_pos must have one entry per well plus one".to_string(),
            });
        }
        if !conn_pos.windows(2).all(|w| w[0] <= w[1]) {
            return Err(ModelError::Config {
                what: "conn_pos must be non-decreasing".to_string(),
            });
        }
        let nperf = *conn_pos.last().unwrap_or(&0);
        if well_cells.len() != nperf || well_index.len() != nperf {
            return Err(ModelError::Config {
                what: "perforation arrays do not match conn_pos".to_string(),
            });
        }
        Ok(Self {
            wells,
            conn_pos,
            well_cells,
            well_index,
        })
    }

    pub fn num_wells(&self) -> usize {
        self.wells.len()
    }

    pub fn num_perfs(&self) -> usize {
        *self.conn_pos.last().unwrap_or(&0)
    }

    pub fn well(&self, w: usize) -> &Well {
        &self.wells[w]
    }

    pub fn perf_range(&self, w: usize) -> std::ops::Range<usize> {
        self.conn_pos[w]..self.conn_pos[w + 1]
    }

    pub fn well_cells(&self) -> &[usize] {
        &self.well_cells
    }

    pub fn well_index(&self) -> &[Real] {
        &self.well_index
    }

    pub fn bhp_targets(&self) -> Vec<Real> {
        self.wells.iter().map(|w| w.bhp_target).collect()
    }

    pub fn is_producer(&self, w: usize) -> bool {
        self.wells[w].kind == WellKind::Producer
    }

    /// 1.0 on producer perforations, 0.0 on injector perforations.
    pub fn producer_mask(&self) -> Vec<Real> {
        let mut mask = vec![0.0; self.num_perfs()];
        for w in 0..self.num_wells() {
            if self.is_producer(w) {
                for perf in self.perf_range(w) {
                    mask[perf] = 1.0;
                }
            }
        }
        mask
    }

    /// Owning well of each perforation.
    pub fn perf_wells(&self) -> Vec<usize> {
        let mut owner = vec![0; self.num_perfs()];
        for w in 0..self.num_wells() {
            for perf in self.perf_range(w) {
                owner[perf] = w;
            }
        }
        owner
    }

    /// Expand a per-well vector onto perforations.
    pub fn perf_expand_matrix(&self) -> DMatrix<Real> {
        let mut m = DMatrix::zeros(self.num_perfs(), self.num_wells());
        for (perf, &w) in self.perf_wells().iter().enumerate() {
            m[(perf, w)] = 1.0;
        }
        m
    }

    /// Sum a per-perforation phase vector into the well-major flat rate
    /// layout `[well * np + pos]`.
    pub fn perf_sum_matrix(&self, np: usize, pos: usize) -> DMatrix<Real> {
        let mut m = DMatrix::zeros(self.num_wells() * np, self.num_perfs());
        for (perf, &w) in self.perf_wells().iter().enumerate() {
            m[(w * np + pos, perf)] = 1.0;
        }
        m
    }
}

/// Per-perforation densities and hydrostatic pressure differentials.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionPressures {
    pub densities: Vec<Real>,
    pub pressure_diffs: Vec<Real>,
}

/// Integration of perforation densities and depths into pressure deltas.
///
/// Supplied by the caller; the core ships a trapezoidal default.
pub trait GravitySegments {
    fn pressure_deltas(
        &self,
        wells: &Wells,
        perf_depths: &[Real],
        perf_densities: &[Real],
        gravity: Real,
    ) -> Vec<Real>;
}

/// Trapezoidal hydrostatic integration from the well datum downwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrapezoidSegments;

impl GravitySegments for TrapezoidSegments {
    fn pressure_deltas(
        &self,
        wells: &Wells,
        perf_depths: &[Real],
        perf_densities: &[Real],
        gravity: Real,
    ) -> Vec<Real> {
        let mut dp = vec![0.0; perf_depths.len()];
        for w in 0..wells.num_wells() {
            let range = wells.perf_range(w);
            let mut prev: Option<usize> = None;
            for perf in range {
                dp[perf] = match prev {
                    None => {
                        perf_densities[perf] * gravity * (perf_depths[perf] - wells.well(w).ref_depth)
                    }
                    Some(p) => {
                        dp[p]
                            + 0.5
                                * (perf_densities[perf] + perf_densities[p])
                                * gravity
                                * (perf_depths[perf] - perf_depths[p])
                    }
                };
                prev = Some(perf);
            }
        }
        dp
    }
}

/// Inputs for the well-connection pressure stage.
pub struct ConnectionPressureInputs<'a> {
    pub grid: &'a Grid,
    pub wells: &'a Wells,
    pub pvt: &'a dyn PvtModel,
    pub solvent: Option<&'a SolventPvt>,
    pub phases: &'a PhaseIndexSet,
    pub conditions: &'a [PhaseCondition],
    pub gravity: Real,
    pub temperature: Real,
}

/// Compute per-perforation densities and pressure differentials.
///
/// Properties are evaluated at the average of each perforation's pressure
/// and the pressure above it (bottom-hole pressure for the first
/// perforation). With the solvent extension active the gas-slot `b` and
/// surface density are the solvent-fraction weighted blends, using the
/// producer/injector fraction split.
pub fn compute_connection_pressures(
    inp: &ConnectionPressureInputs<'_>,
    rstate: &ReservoirState,
    wstate: &WellState,
    segments: &dyn GravitySegments,
) -> ModelResult<ConnectionPressures> {
    let wells = inp.wells;
    let nperf = wells.num_perfs();
    let np = inp.phases.num_phases();

    // Average pressure per perforation.
    let mut avg_press = vec![0.0; nperf];
    for w in 0..wells.num_wells() {
        let range = wells.perf_range(w);
        let first = range.start;
        for perf in range {
            let p_above = if perf == first {
                wstate.bhp[w]
            } else {
                wstate.perf_pressure[perf - 1]
            };
            avg_press[perf] = 0.5 * (wstate.perf_pressure[perf] + p_above);
        }
    }

    let p_ad = AdVector::constant(nalgebra::DVector::from_column_slice(&avg_press));
    let temp = AdVector::constant_elem(inp.temperature, nperf);
    let perf_cond: Vec<PhaseCondition> = wells
        .well_cells()
        .iter()
        .map(|&c| inp.conditions[c])
        .collect();
    // Cell rs capped at the saturated value for the averaged pressure.
    let rs_max = inp.pvt.rs_sat(&p_ad);
    let perf_rs = AdVector::constant(nalgebra::DVector::from_iterator(
        nperf,
        wells
            .well_cells()
            .iter()
            .enumerate()
            .map(|(perf, &c)| rstate.rs[c].min(rs_max.value()[perf])),
    ));
    let perf_rv = AdVector::constant(nalgebra::DVector::from_iterator(
        nperf,
        wells.well_cells().iter().map(|&c| rstate.rv[c]),
    ));

    // Per-perforation b and surface density per phase slot.
    let mut b_perf = vec![vec![0.0; nperf]; np];
    let mut rho_surf = vec![vec![0.0; nperf]; np];
    for phase in inp.phases.active_real() {
        let pos = inp.phases.pos(phase).expect("active phase");
        let b = inp
            .pvt
            .reciprocal_fvf(phase, &p_ad, &temp, &perf_rs, &perf_rv, &perf_cond)?;
        let rho = inp.pvt.surface_density(phase)?;
        for perf in 0..nperf {
            b_perf[pos][perf] = b.value()[perf];
            rho_surf[pos][perf] = rho;
        }
    }

    // Gas slot: blend with solvent using the producer/injector split.
    if let Some(solvent) = inp.solvent {
        let gas_pos = inp.phases.pos(Phase::Gas).ok_or_else(|| ModelError::Config {
            what: "solvent requires an active gas phase".to_string(),
        })?;
        let bs = solvent.b_solvent(&p_ad);
        let rho_s = solvent.surface_density;
        let producer = wells.producer_mask();
        for (perf, &cell) in wells.well_cells().iter().enumerate() {
            let ss = rstate.solvent_saturation[cell];
            let sg = rstate.sat(cell, gas_pos, np);
            let in_place = if ss + sg == 0.0 { 0.0 } else { ss / (ss + sg) };
            let f = producer[perf] * in_place
                + (1.0 - producer[perf]) * wstate.solvent_fraction[perf];
            b_perf[gas_pos][perf] = (1.0 - f) * b_perf[gas_pos][perf] + f * bs.value()[perf];
            rho_surf[gas_pos][perf] = (1.0 - f) * rho_surf[gas_pos][perf] + f * rho_s;
        }
    }

    // Mixture density per perforation from well surface-rate fractions.
    let perf_owner = wells.perf_wells();
    let mut densities = vec![0.0; nperf];
    for perf in 0..nperf {
        let w = perf_owner[perf];
        let cell = wells.well_cells()[perf];

        let mut fractions = vec![0.0; np];
        let total: Real = (0..np)
            .map(|pos| wstate.surface_rates[w * np + pos].abs())
            .sum();
        if total > 0.0 {
            for (pos, frac) in fractions.iter_mut().enumerate() {
                *frac = wstate.surface_rates[w * np + pos].abs() / total;
            }
        } else if wells.is_producer(w) {
            // no rates yet: weight by what the perforated cell holds
            for phase in inp.phases.active_real() {
                let pos = inp.phases.pos(phase).expect("active phase");
                fractions[pos] = rstate.sat(cell, pos, np);
            }
            if inp.solvent.is_some() {
                if let Some(gas_pos) = inp.phases.pos(Phase::Gas) {
                    fractions[gas_pos] += rstate.solvent_saturation[cell];
                }
            }
        } else {
            let comp = &wells.well(w).injection_composition;
            for phase in inp.phases.active_real() {
                let pos = inp.phases.pos(phase).expect("active phase");
                let canonical = match phase {
                    Phase::Water => 0,
                    Phase::Oil => 1,
                    Phase::Gas => 2,
                    Phase::Solvent => unreachable!("solvent is not a real phase"),
                };
                fractions[pos] = comp[canonical];
            }
        }

        let fsum: Real = fractions.iter().sum();
        if fsum > 0.0 {
            for frac in &mut fractions {
                *frac /= fsum;
            }
        }

        let mut mass = 0.0;
        let mut volume = 0.0;
        for pos in 0..np {
            mass += fractions[pos] * rho_surf[pos][perf];
            if b_perf[pos][perf] > 0.0 {
                volume += fractions[pos] / b_perf[pos][perf];
            }
        }
        densities[perf] = if volume > 0.0 { mass / volume } else { 0.0 };
    }

    let perf_depths: Vec<Real> = wells
        .well_cells()
        .iter()
        .map(|&c| inp.grid.depth()[c])
        .collect();
    let pressure_diffs = segments.pressure_deltas(wells, &perf_depths, &densities, inp.gravity);

    Ok(ConnectionPressures {
        densities,
        pressure_diffs,
    })
}
