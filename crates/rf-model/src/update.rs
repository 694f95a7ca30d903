//! Mapping Newton corrections back onto the physical state.
//!
//! The correction vector is ordered like the primary-variable blocks:
//! `[dp | dsw | dsg | dss | dqs | dbhp]`. The solvent sub-block is split
//! out and handled by the extension; oil saturation is never corrected
//! directly, it is re-derived so the saturations close to one in every
//! cell after every update.

use crate::error::{ModelError, ModelResult};
use crate::extension::SolventExtension;
use crate::state::{ReservoirState, VariableLayout, WellState};
use nalgebra::DVector;
use rf_core::{Phase, PhaseIndexSet, Real};

pub fn update_state(
    layout: &VariableLayout,
    phases: &PhaseIndexSet,
    extension: Option<&SolventExtension>,
    dx: &DVector<Real>,
    rstate: &mut ReservoirState,
    wstate: &mut WellState,
) -> ModelResult<()> {
    if dx.len() != layout.total_unknowns() {
        return Err(ModelError::Numeric {
            what: format!(
                "correction length {} does not match {} unknowns",
                dx.len(),
                layout.total_unknowns()
            ),
        });
    }
    let nc = layout.num_cells();
    let np = phases.num_phases();

    // Pressure block.
    let off = layout.block_offset(layout.pressure_block());
    for c in 0..nc {
        rstate.pressure[c] -= dx[off + c];
    }

    // Saturation blocks, clamped to physical bounds.
    if let (Some(block), Some(pos)) = (layout.sw_block(), phases.pos(Phase::Water)) {
        let off = layout.block_offset(block);
        for c in 0..nc {
            let s = (rstate.sat(c, pos, np) - dx[off + c]).clamp(0.0, 1.0);
            rstate.set_sat(c, pos, np, s);
        }
    }
    if let (Some(block), Some(pos)) = (layout.sg_block(), phases.pos(Phase::Gas)) {
        let off = layout.block_offset(block);
        for c in 0..nc {
            let s = (rstate.sat(c, pos, np) - dx[off + c]).clamp(0.0, 1.0);
            rstate.set_sat(c, pos, np, s);
        }
    }

    // Well blocks.
    let off = layout.block_offset(layout.qs_block());
    for (i, q) in wstate.surface_rates.iter_mut().enumerate() {
        *q -= dx[off + i];
    }
    let off = layout.block_offset(layout.bhp_block());
    for (w, bhp) in wstate.bhp.iter_mut().enumerate() {
        *bhp -= dx[off + w];
    }

    // Solvent sub-block through the extension's capability.
    if let (Some(ext), Some(block)) = (extension, layout.solvent_block()) {
        let off = layout.block_offset(block);
        let dss = DVector::from_iterator(nc, (0..nc).map(|c| dx[off + c]));
        ext.update_state_term(&dss, rstate, phases);
    }

    close_saturations(phases, rstate);
    Ok(())
}

/// Re-establish `sum(saturations) == 1` with oil as the derived phase.
fn close_saturations(phases: &PhaseIndexSet, rstate: &mut ReservoirState) {
    let np = phases.num_phases();
    let oil = phases.pos(Phase::Oil).expect("oil is always active");
    let water = phases.pos(Phase::Water);
    let gas = phases.pos(Phase::Gas);
    let has_solvent = phases.has_solvent();

    for c in 0..rstate.num_cells() {
        let mut others = 0.0;
        if let Some(pos) = water {
            others += rstate.sat(c, pos, np);
        }
        if let Some(pos) = gas {
            others += rstate.sat(c, pos, np);
        }
        if has_solvent {
            others += rstate.solvent_saturation[c];
        }

        if others > 1.0 {
            let scale = 1.0 / others;
            if let Some(pos) = water {
                let s = rstate.sat(c, pos, np) * scale;
                rstate.set_sat(c, pos, np, s);
            }
            if let Some(pos) = gas {
                let s = rstate.sat(c, pos, np) * scale;
                rstate.set_sat(c, pos, np, s);
            }
            if has_solvent {
                rstate.solvent_saturation[c] *= scale;
            }
            others = water.map_or(0.0, |pos| rstate.sat(c, pos, np))
                + gas.map_or(0.0, |pos| rstate.sat(c, pos, np))
                + if has_solvent {
                    rstate.solvent_saturation[c]
                } else {
                    0.0
                };
        }

        rstate.set_sat(c, oil, np, (1.0 - others).max(0.0));
    }
}
