//! Primary state containers and the AD solution state.
//!
//! The caller owns [`ReservoirState`] and [`WellState`]; the model reads
//! them to build the AD [`SolutionState`] once per Newton iteration and
//! rewrites them through the state updater. The primary-variable ordering is
//! fixed by [`VariableLayout`]:
//! `[pressure | sw | sg | solvent | well rates | bhp]`
//! with oil saturation always derived by closure, never a primary variable.

use crate::error::{ModelError, ModelResult};
use crate::wells::Wells;
use nalgebra::DVector;
use rf_autodiff::AdVector;
use rf_core::{Phase, PhaseIndexSet, Real};

/// Block layout of the primary unknowns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableLayout {
    nc: usize,
    nw: usize,
    np: usize,
    has_water: bool,
    has_gas: bool,
    has_solvent: bool,
}

impl VariableLayout {
    pub fn new(phases: &PhaseIndexSet, num_cells: usize, num_wells: usize) -> Self {
        Self {
            nc: num_cells,
            nw: num_wells,
            np: phases.num_phases(),
            has_water: phases.is_active(Phase::Water),
            has_gas: phases.is_active(Phase::Gas),
            has_solvent: phases.has_solvent(),
        }
    }

    pub fn num_cells(&self) -> usize {
        self.nc
    }

    pub fn num_wells(&self) -> usize {
        self.nw
    }

    /// Sizes of all blocks in order.
    pub fn block_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![self.nc];
        if self.has_water {
            sizes.push(self.nc);
        }
        if self.has_gas {
            sizes.push(self.nc);
        }
        if self.has_solvent {
            sizes.push(self.nc);
        }
        sizes.push(self.np * self.nw);
        sizes.push(self.nw);
        sizes
    }

    pub fn pressure_block(&self) -> usize {
        0
    }

    pub fn sw_block(&self) -> Option<usize> {
        self.has_water.then_some(1)
    }

    pub fn sg_block(&self) -> Option<usize> {
        self.has_gas.then(|| 1 + usize::from(self.has_water))
    }

    /// The solvent block sits after the reservoir variables, before the
    /// well variables.
    pub fn solvent_block(&self) -> Option<usize> {
        self.has_solvent
            .then(|| 1 + usize::from(self.has_water) + usize::from(self.has_gas))
    }

    pub fn qs_block(&self) -> usize {
        1 + usize::from(self.has_water) + usize::from(self.has_gas) + usize::from(self.has_solvent)
    }

    pub fn bhp_block(&self) -> usize {
        self.qs_block() + 1
    }

    pub fn num_blocks(&self) -> usize {
        self.bhp_block() + 1
    }

    pub fn total_unknowns(&self) -> usize {
        self.block_sizes().iter().sum()
    }

    /// Offset of block `k` in the flat correction vector.
    pub fn block_offset(&self, k: usize) -> usize {
        self.block_sizes()[..k].iter().sum()
    }
}

/// Per-cell primary state, owned by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct ReservoirState {
    /// Cell pressures
    pub pressure: Vec<Real>,
    /// Saturations, cell-major: `saturation[cell * np + pos]`
    pub saturation: Vec<Real>,
    /// Dissolved gas-in-oil ratio
    pub rs: Vec<Real>,
    /// Vaporized oil-in-gas ratio
    pub rv: Vec<Real>,
    /// Solvent saturation; empty unless the solvent extension is active
    pub solvent_saturation: Vec<Real>,
}

impl ReservoirState {
    pub fn new(num_cells: usize, phases: &PhaseIndexSet) -> Self {
        let np = phases.num_phases();
        let mut state = Self {
            pressure: vec![0.0; num_cells],
            saturation: vec![0.0; num_cells * np],
            rs: vec![0.0; num_cells],
            rv: vec![0.0; num_cells],
            solvent_saturation: if phases.has_solvent() {
                vec![0.0; num_cells]
            } else {
                Vec::new()
            },
        };
        // start from pure oil so the closure holds
        if let Some(oil) = phases.pos(Phase::Oil) {
            for c in 0..num_cells {
                state.saturation[c * np + oil] = 1.0;
            }
        }
        state
    }

    pub fn num_cells(&self) -> usize {
        self.pressure.len()
    }

    pub fn sat(&self, cell: usize, pos: usize, np: usize) -> Real {
        self.saturation[cell * np + pos]
    }

    pub fn set_sat(&mut self, cell: usize, pos: usize, np: usize, value: Real) {
        self.saturation[cell * np + pos] = value;
    }

    /// One saturation column as a vector.
    pub fn sat_column(&self, pos: usize, np: usize) -> DVector<Real> {
        DVector::from_iterator(
            self.num_cells(),
            (0..self.num_cells()).map(|c| self.saturation[c * np + pos]),
        )
    }
}

/// Per-well primary state, owned by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct WellState {
    /// Bottom-hole pressures
    pub bhp: Vec<Real>,
    /// Perforation pressures
    pub perf_pressure: Vec<Real>,
    /// Surface-volume phase rates per well, well-major: `[well * np + pos]`
    pub surface_rates: Vec<Real>,
    /// Surface-volume phase rates per perforation, perf-major
    pub perf_phase_rates: Vec<Real>,
    /// Injected solvent fraction per perforation
    pub solvent_fraction: Vec<Real>,
}

impl WellState {
    pub fn new(wells: &Wells, phases: &PhaseIndexSet) -> Self {
        let np = phases.num_phases();
        let nperf = wells.num_perfs();
        Self {
            bhp: wells.bhp_targets().to_vec(),
            perf_pressure: vec![0.0; nperf],
            surface_rates: vec![0.0; wells.num_wells() * np],
            perf_phase_rates: vec![0.0; nperf * np],
            solvent_fraction: vec![0.0; nperf],
        }
    }

    /// Empty state for a run without wells.
    pub fn empty() -> Self {
        Self {
            bhp: Vec::new(),
            perf_pressure: Vec::new(),
            surface_rates: Vec::new(),
            perf_phase_rates: Vec::new(),
            solvent_fraction: Vec::new(),
        }
    }
}

/// AD view of the primary state for one assembly pass.
#[derive(Clone, Debug)]
pub struct SolutionState {
    pub pressure: AdVector,
    pub temperature: AdVector,
    /// Per active real phase, canonical positions; oil is derived by closure
    pub saturation: Vec<AdVector>,
    pub rs: AdVector,
    pub rv: AdVector,
    pub solvent_saturation: Option<AdVector>,
    /// Well surface rates, well-major
    pub qs: AdVector,
    pub bhp: AdVector,
}

impl SolutionState {
    /// Build the AD state with identity derivative blocks on the primary
    /// unknowns. Oil saturation is `1 - sw - sg - ss`.
    pub fn variable(
        layout: &VariableLayout,
        phases: &PhaseIndexSet,
        rstate: &ReservoirState,
        wstate: &WellState,
        temperature: Real,
    ) -> ModelResult<Self> {
        let nc = layout.num_cells();
        if rstate.num_cells() != nc {
            return Err(ModelError::Config {
                what: "reservoir state size does not match layout".to_string(),
            });
        }
        let np = phases.num_phases();
        let sizes = layout.block_sizes();

        let pressure = AdVector::variable(
            &sizes,
            layout.pressure_block(),
            DVector::from_column_slice(&rstate.pressure),
        );

        let mut so = AdVector::constant_elem(1.0, nc);
        let mut saturation = vec![AdVector::constant_elem(0.0, nc); np];

        if let (Some(block), Some(pos)) = (layout.sw_block(), phases.pos(Phase::Water)) {
            let sw = AdVector::variable(&sizes, block, rstate.sat_column(pos, np));
            so = &so - &sw;
            saturation[pos] = sw;
        }
        if let (Some(block), Some(pos)) = (layout.sg_block(), phases.pos(Phase::Gas)) {
            let sg = AdVector::variable(&sizes, block, rstate.sat_column(pos, np));
            so = &so - &sg;
            saturation[pos] = sg;
        }

        let solvent_saturation = match layout.solvent_block() {
            Some(block) => {
                if rstate.solvent_saturation.len() != nc {
                    return Err(ModelError::Config {
                        what: "solvent model needs a solvent saturation per cell".to_string(),
                    });
                }
                let ss = AdVector::variable(
                    &sizes,
                    block,
                    DVector::from_column_slice(&rstate.solvent_saturation),
                );
                so = &so - &ss;
                Some(ss)
            }
            None => None,
        };

        let oil_pos = phases.pos(Phase::Oil).expect("oil is always active");
        saturation[oil_pos] = so;

        let qs = AdVector::variable(
            &sizes,
            layout.qs_block(),
            DVector::from_column_slice(&wstate.surface_rates),
        );
        let bhp = AdVector::variable(
            &sizes,
            layout.bhp_block(),
            DVector::from_column_slice(&wstate.bhp),
        );

        Ok(Self {
            pressure,
            temperature: AdVector::constant_elem(temperature, nc),
            saturation,
            rs: AdVector::constant(DVector::from_column_slice(&rstate.rs)),
            rv: AdVector::constant(DVector::from_column_slice(&rstate.rv)),
            solvent_saturation,
            qs,
            bhp,
        })
    }

    /// Derivative-free copy used for the time-level-0 accumulation.
    pub fn as_constant(&self) -> Self {
        Self {
            pressure: self.pressure.as_constant(),
            temperature: self.temperature.as_constant(),
            saturation: self.saturation.iter().map(AdVector::as_constant).collect(),
            rs: self.rs.as_constant(),
            rv: self.rv.as_constant(),
            solvent_saturation: self.solvent_saturation.as_ref().map(AdVector::as_constant),
            qs: self.qs.as_constant(),
            bhp: self.bhp.as_constant(),
        }
    }
}
