//! Integration scenarios for the solvent-extended assembler.

use rf_autodiff::AdVector;
use rf_core::{Phase, PhaseIndexSet};
use rf_model::{
    BlackoilModel, DenseLu, Grid, ModelConfig, ModelError, NewtonConfig, ReservoirState,
    SolventExtension, Well, WellKind, WellState, Wells, run_newton,
};
use rf_props::{
    DeckPvt, GasPvt, MixingParams, OilPvt, PvtModel, RelPermModel, SolventPvt, Table1d, WaterPvt,
};

fn deck_pvt() -> DeckPvt {
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

fn solvent_pvt(mixing: MixingParams) -> SolventPvt {
    SolventPvt::with_inert_miscibility(
        Table1d::line(100e5, 90.0, 300e5, 260.0).unwrap(),
        Table1d::line(100e5, 1.2e-5, 300e5, 2.4e-5).unwrap(),
        0.8,
        mixing,
    )
}

fn two_cell_wells() -> Wells {
    Wells::new(
        vec![
            Well {
                name: "inj".to_string(),
                kind: WellKind::Injector,
                bhp_target: 250e5,
                ref_depth: 0.0,
                injection_composition: [0.0, 0.0, 1.0],
            },
            Well {
                name: "prod".to_string(),
                kind: WellKind::Producer,
                bhp_target: 150e5,
                ref_depth: 0.0,
                injection_composition: [0.0, 0.0, 0.0],
            },
        ],
        vec![0, 1, 2],
        vec![0, 1],
        vec![1e-11, 1e-11],
    )
    .unwrap()
}

fn reservoir_state(phases: &PhaseIndexSet, nc: usize) -> ReservoirState {
    let np = phases.num_phases();
    let mut rstate = ReservoirState::new(nc, phases);
    for c in 0..nc {
        rstate.pressure[c] = 200e5;
        rstate.rs[c] = 80.0;
        rstate.set_sat(c, phases.pos(Phase::Water).unwrap(), np, 0.2);
        rstate.set_sat(c, phases.pos(Phase::Gas).unwrap(), np, 0.1);
        rstate.set_sat(c, phases.pos(Phase::Oil).unwrap(), np, 0.6);
        if phases.has_solvent() {
            rstate.solvent_saturation[c] = 0.1;
        }
    }
    rstate
}

#[test]
fn solvent_with_vapoil_fails_at_construction() {
    let grid = Grid::column(2, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let ext = SolventExtension::new(solvent_pvt(MixingParams::immiscible()), false, false).unwrap();

    let err = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        None,
        Some(ext),
        ModelConfig::default(),
        true,
        true,
    )
    .unwrap_err();
    assert!(matches!(err, ModelError::Config { .. }));
}

#[test]
fn unknown_phase_is_a_fatal_error() {
    let grid = Grid::column(1, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        None,
        None,
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let rstate = reservoir_state(&PhaseIndexSet::blackoil(), 1);
    let wstate = WellState::empty();
    let state = rf_model::SolutionState::variable(
        model.layout(),
        model.phases(),
        &rstate,
        &wstate,
        350.0,
    )
    .unwrap();

    let err = model
        .fluid_reciprocal_fvf(Phase::Solvent, &state.pressure, &state)
        .unwrap_err();
    assert!(matches!(err, ModelError::Props(_)));
}

#[test]
fn double_assembly_is_bit_identical() {
    let grid = Grid::column(2, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let wells = two_cell_wells();
    let ext = SolventExtension::new(solvent_pvt(MixingParams::new(0.6, 0.4).unwrap()), true, false)
        .unwrap();

    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        Some(&wells),
        Some(ext),
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let rstate = reservoir_state(model.phases(), 2);
    let mut wstate = WellState::new(&wells, model.phases());
    wstate.solvent_fraction = vec![1.0, 0.0];

    model.assemble(&rstate, &mut wstate, true).unwrap();
    let (r1, j1) = model.linearized_system();
    model.assemble(&rstate, &mut wstate, false).unwrap();
    let (r2, j2) = model.linearized_system();

    assert_eq!(r1, r2);
    assert_eq!(j1, j2);
}

#[test]
fn zero_gas_and_solvent_assembly_is_nan_free() {
    let grid = Grid::column(2, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let wells = two_cell_wells();
    let ext = SolventExtension::new(solvent_pvt(MixingParams::new(0.8, 0.5).unwrap()), true, false)
        .unwrap();

    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        Some(&wells),
        Some(ext),
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let phases = model.phases().clone();
    let np = phases.num_phases();
    let mut rstate = reservoir_state(&phases, 2);
    for c in 0..2 {
        // the zero-saturation corner: no free gas, no solvent anywhere
        rstate.set_sat(c, phases.pos(Phase::Gas).unwrap(), np, 0.0);
        rstate.set_sat(c, phases.pos(Phase::Oil).unwrap(), np, 0.8);
        rstate.solvent_saturation[c] = 0.0;
    }
    let mut wstate = WellState::new(&wells, &phases);

    model.assemble(&rstate, &mut wstate, true).unwrap();
    let (r, j) = model.linearized_system();
    assert!(r.iter().all(|v| v.is_finite()), "residual contains NaN/Inf");
    assert!(j.iter().all(|v| v.is_finite()), "jacobian contains NaN/Inf");
}

#[test]
fn no_mixing_effective_properties_equal_raw() {
    let grid = Grid::column(1, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let ext = SolventExtension::new(solvent_pvt(MixingParams::immiscible()), true, false).unwrap();

    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        None,
        Some(ext),
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    // single-cell two-phase oil + solvent system
    let phases = model.phases().clone();
    let np = phases.num_phases();
    let mut rstate = reservoir_state(&phases, 1);
    rstate.set_sat(0, phases.pos(Phase::Water).unwrap(), np, 0.0);
    rstate.set_sat(0, phases.pos(Phase::Gas).unwrap(), np, 0.0);
    rstate.set_sat(0, phases.pos(Phase::Oil).unwrap(), np, 0.6);
    rstate.solvent_saturation[0] = 0.4;

    let mut wstate = WellState::empty();
    model.assemble(&rstate, &mut wstate, true).unwrap();

    let eff = model.effective().expect("miscible model has effective properties");
    let p = AdVector::constant_elem(rstate.pressure[0], 1);
    let zero = AdVector::constant_elem(0.0, 1);
    let temp = AdVector::constant_elem(350.0, 1);
    let cond = {
        let mut c = rf_core::PhaseCondition::default();
        c.set_free_oil(true);
        [c]
    };

    let oil = phases.pos(Phase::Oil).unwrap();
    let rs = AdVector::constant_elem(rstate.rs[0], 1);
    let mu_raw = pvt
        .viscosity(Phase::Oil, &p, &temp, &rs, &zero, &cond)
        .unwrap();
    assert!((eff.mu[oil].value()[0] - mu_raw.value()[0]).abs() < 1e-15);

    let b_raw = pvt
        .reciprocal_fvf(Phase::Oil, &p, &temp, &rs, &zero, &cond)
        .unwrap();
    let rel = ((eff.b[oil].value()[0] - b_raw.value()[0]) / b_raw.value()[0]).abs();
    assert!(rel < 1e-12, "effective b deviates from raw: {rel}");
}

#[test]
fn full_mixing_equalizes_oil_and_solvent_viscosity() {
    let grid = Grid::column(1, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let ext = SolventExtension::new(solvent_pvt(MixingParams::new(1.0, 1.0).unwrap()), true, false)
        .unwrap();

    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        None,
        Some(ext),
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let phases = model.phases().clone();
    let np = phases.num_phases();
    let mut rstate = reservoir_state(&phases, 1);
    rstate.set_sat(0, phases.pos(Phase::Water).unwrap(), np, 0.0);
    rstate.set_sat(0, phases.pos(Phase::Gas).unwrap(), np, 0.0);
    rstate.set_sat(0, phases.pos(Phase::Oil).unwrap(), np, 0.6);
    rstate.solvent_saturation[0] = 0.4;

    let mut wstate = WellState::empty();
    model.assemble(&rstate, &mut wstate, true).unwrap();

    let eff = model.effective().unwrap();
    let oil = phases.pos(Phase::Oil).unwrap();
    let solvent = phases.pos(Phase::Solvent).unwrap();
    let a = eff.mu[oil].value()[0];
    let b = eff.mu[solvent].value()[0];
    assert!(
        (a - b).abs() < 1e-12 * a.abs(),
        "fully mixed viscosities differ: {a} vs {b}"
    );
}

#[test]
fn injector_and_producer_split_solvent_differently() {
    let grid = Grid::column(2, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let ext = SolventExtension::new(solvent_pvt(MixingParams::immiscible()), false, false).unwrap();
    let wells = two_cell_wells();

    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        Some(&wells),
        Some(ext),
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let phases = model.phases().clone();
    let np = phases.num_phases();
    let mut rstate = reservoir_state(&phases, 2);
    for c in 0..2 {
        // cells hold no solvent: the producer sees F = 0 in place
        rstate.solvent_saturation[c] = 0.0;
        rstate.set_sat(c, phases.pos(Phase::Oil).unwrap(), np, 0.7);
    }
    let mut wstate = WellState::new(&wells, &phases);
    // pure solvent injection on the injector perforation
    wstate.solvent_fraction = vec![1.0, 0.0];

    model.assemble(&rstate, &mut wstate, true).unwrap();
    let cp = model.connection_pressures().unwrap();

    // same cells and pressures, but the injector's gas slot is pure solvent
    // while the producer's is in-place hydrocarbon gas
    assert!(cp.densities.iter().all(|d| d.is_finite() && *d > 0.0));
    assert_ne!(cp.densities[0], cp.densities[1]);
}

#[test]
fn pressure_diffs_accumulate_down_the_wellbore() {
    let grid = Grid::column(3, 50.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let wells = Wells::new(
        vec![Well {
            name: "prod".to_string(),
            kind: WellKind::Producer,
            bhp_target: 150e5,
            ref_depth: 0.0,
            injection_composition: [0.0, 0.0, 0.0],
        }],
        vec![0, 3],
        vec![0, 1, 2],
        vec![1e-11; 3],
    )
    .unwrap();

    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        Some(&wells),
        None,
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let rstate = reservoir_state(model.phases(), 3);
    let mut wstate = WellState::new(&wells, model.phases());
    model.assemble(&rstate, &mut wstate, true).unwrap();

    let cp = model.connection_pressures().unwrap();
    assert_eq!(cp.pressure_diffs.len(), 3);
    assert!(cp.pressure_diffs[0] > 0.0);
    assert!(cp.pressure_diffs[1] > cp.pressure_diffs[0]);
    assert!(cp.pressure_diffs[2] > cp.pressure_diffs[1]);
}

#[test]
fn equation_scaling_uses_mean_reciprocal_fvf_via_hook() {
    use rf_model::GlobalReduce;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingReduce {
        calls: Rc<Cell<usize>>,
    }

    impl GlobalReduce for CountingReduce {
        fn sum(&self, local: f64) -> f64 {
            self.calls.set(self.calls.get() + 1);
            local
        }

        fn global_cell_count(&self, local: usize) -> usize {
            local
        }
    }

    let grid = Grid::column(1, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        None,
        None,
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let calls = Rc::new(Cell::new(0));
    model.set_global_reduce(Box::new(CountingReduce {
        calls: calls.clone(),
    }));

    let rstate = reservoir_state(model.phases(), 1);
    let mut wstate = WellState::empty();
    model.assemble(&rstate, &mut wstate, true).unwrap();

    // one hook invocation per equation-scale update
    assert_eq!(calls.get(), model.phases().num_equations());

    // water b is a closed form: check the scale is its reciprocal mean
    let water = model.phases().pos(Phase::Water).unwrap();
    let p = AdVector::constant_elem(rstate.pressure[0], 1);
    let zero = AdVector::constant_elem(0.0, 1);
    let temp = AdVector::constant_elem(350.0, 1);
    let b_w = pvt
        .reciprocal_fvf(Phase::Water, &p, &temp, &zero, &zero, &[Default::default()])
        .unwrap();
    let expected = 1.0 / b_w.value()[0];
    assert!((model.residual().scale[water] - expected).abs() < 1e-12);
}

#[test]
fn equilibrium_single_cell_converges_immediately() {
    let grid = Grid::column(1, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        None,
        None,
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let mut rstate = reservoir_state(model.phases(), 1);
    let mut wstate = WellState::empty();
    let report = run_newton(
        &mut model,
        &mut rstate,
        &mut wstate,
        &DenseLu,
        &NewtonConfig::default(),
    )
    .unwrap();

    assert!(report.converged);
    assert_eq!(report.iterations, 0);
    assert!(report.residual_norms[0].abs() < 1e-12);
}

#[test]
fn producer_drives_newton_iterations_with_finite_norms() {
    let grid = Grid::column(2, 10.0, 1000.0, 1e-12).unwrap();
    let pvt = deck_pvt();
    let relperm = RelPermModel::default();
    let wells = two_cell_wells();
    let ext = SolventExtension::new(solvent_pvt(MixingParams::immiscible()), false, false).unwrap();

    let mut model = BlackoilModel::new(
        &grid,
        &pvt,
        &relperm,
        Some(&wells),
        Some(ext),
        ModelConfig::default(),
        true,
        false,
    )
    .unwrap();

    let mut rstate = reservoir_state(model.phases(), 2);
    let mut wstate = WellState::new(&wells, model.phases());
    wstate.solvent_fraction = vec![1.0, 0.0];

    let report = run_newton(
        &mut model,
        &mut rstate,
        &mut wstate,
        &DenseLu,
        &NewtonConfig {
            max_iterations: 5,
            ..NewtonConfig::default()
        },
    )
    .unwrap();

    assert!(report.iterations > 0 || report.converged);
    assert!(report.residual_norms.iter().all(|n| n.is_finite()));

    // the state update kept the saturations closed
    let np = model.phases().num_phases();
    for c in 0..2 {
        let mut sum: f64 = (0..np).map(|pos| rstate.sat(c, pos, np)).sum();
        sum += rstate.solvent_saturation[c];
        assert!((sum - 1.0).abs() < 1e-9, "closure violated: {sum}");
        assert!((0..np).all(|pos| rstate.sat(c, pos, np) >= 0.0));
        assert!(rstate.solvent_saturation[c] >= 0.0);
    }
}

#[test]
fn restart_extras_feed_the_run_setup() {
    let _ = tracing_subscriber::fmt::try_init();

    // the restart blob is read once at initialization; a missing key is a
    // warning plus the documented default, never an error
    let mut extras = rf_model::RestartExtras::new();
    extras.insert(rf_model::SUGGESTED_STEP_KEY, vec![43_200.0]);
    let blob = extras.to_json().unwrap();

    let loaded = rf_model::RestartExtras::from_json(&blob).unwrap();
    let mut cfg = ModelConfig::default();
    let suggested = loaded.suggested_step_size();
    if suggested > 0.0 {
        cfg.dt = suggested;
    }
    assert_eq!(cfg.dt, 43_200.0);

    let bare = rf_model::RestartExtras::new();
    assert_eq!(bare.suggested_step_size(), rf_model::SUGGESTED_STEP_DEFAULT);
}
