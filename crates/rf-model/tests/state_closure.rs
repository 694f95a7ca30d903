//! Property tests for the state updater's feasibility invariants.

use nalgebra::DVector;
use proptest::prelude::*;
use rf_core::{Phase, PhaseIndexSet};
use rf_model::update::update_state;
use rf_model::{ReservoirState, SolventExtension, VariableLayout, WellState};
use rf_props::{MixingParams, SolventPvt, Table1d};

fn solvent_extension() -> SolventExtension {
    SolventExtension::new(
        SolventPvt::with_inert_miscibility(
            Table1d::constant(100.0),
            Table1d::constant(1.5e-5),
            90.0,
            MixingParams::immiscible(),
        ),
        false,
        false,
    )
    .unwrap()
}

proptest! {
    /// After any update, saturations close to one and stay non-negative in
    /// every cell.
    #[test]
    fn saturations_stay_feasible(
        corrections in prop::collection::vec(-2.0f64..2.0, 8),
        start_sw in 0.0f64..0.5,
        start_sg in 0.0f64..0.3,
        start_ss in 0.0f64..0.2,
    ) {
        let phases = PhaseIndexSet::all_with_solvent();
        let layout = VariableLayout::new(&phases, 2, 0);
        let ext = solvent_extension();
        let np = phases.num_phases();

        let mut rstate = ReservoirState::new(2, &phases);
        for c in 0..2 {
            rstate.pressure[c] = 200e5;
            rstate.set_sat(c, phases.pos(Phase::Water).unwrap(), np, start_sw);
            rstate.set_sat(c, phases.pos(Phase::Gas).unwrap(), np, start_sg);
            rstate.solvent_saturation[c] = start_ss;
            let so = 1.0 - start_sw - start_sg - start_ss;
            rstate.set_sat(c, phases.pos(Phase::Oil).unwrap(), np, so);
        }
        let mut wstate = WellState::empty();

        // layout: [dp(2) | dsw(2) | dsg(2) | dss(2)]
        let dx = DVector::from_vec(corrections);
        update_state(&layout, &phases, Some(&ext), &dx, &mut rstate, &mut wstate).unwrap();

        for c in 0..2 {
            let mut sum = 0.0;
            for pos in 0..np {
                let s = rstate.sat(c, pos, np);
                prop_assert!(s >= 0.0, "negative saturation {s} in cell {c}");
                sum += s;
            }
            let ss = rstate.solvent_saturation[c];
            prop_assert!(ss >= 0.0, "negative solvent saturation {ss}");
            sum += ss;
            prop_assert!((sum - 1.0).abs() < 1e-12, "closure violated: {sum}");
        }
    }

    /// Oil saturation is always the derived closure value, never corrected
    /// directly: it equals one minus everything else bit-for-bit.
    #[test]
    fn oil_is_exactly_the_complement(
        corrections in prop::collection::vec(-0.5f64..0.5, 8),
    ) {
        let phases = PhaseIndexSet::all_with_solvent();
        let layout = VariableLayout::new(&phases, 2, 0);
        let ext = solvent_extension();
        let np = phases.num_phases();

        let mut rstate = ReservoirState::new(2, &phases);
        for c in 0..2 {
            rstate.set_sat(c, phases.pos(Phase::Water).unwrap(), np, 0.2);
            rstate.set_sat(c, phases.pos(Phase::Oil).unwrap(), np, 0.7);
            rstate.set_sat(c, phases.pos(Phase::Gas).unwrap(), np, 0.1);
        }
        let mut wstate = WellState::empty();

        let dx = DVector::from_vec(corrections);
        update_state(&layout, &phases, Some(&ext), &dx, &mut rstate, &mut wstate).unwrap();

        for c in 0..2 {
            let sw = rstate.sat(c, phases.pos(Phase::Water).unwrap(), np);
            let sg = rstate.sat(c, phases.pos(Phase::Gas).unwrap(), np);
            let ss = rstate.solvent_saturation[c];
            let so = rstate.sat(c, phases.pos(Phase::Oil).unwrap(), np);
            let others = sw + sg + ss;
            prop_assert_eq!(so, (1.0 - others).max(0.0));
        }
    }
}
