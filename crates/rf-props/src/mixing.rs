//! Todd–Longstaff partial-miscibility mixing model.
//!
//! Blends immiscible and fully-mixed oil/gas/solvent viscosities and
//! densities. The fully-mixed viscosities follow the quarter-power rule;
//! zero total saturation in a mixing pair falls back to the unmixed
//! viscosity of the dominant phase. The effective density uses a
//! dual-branch rule: a bulk-mixture weighted average where the raw solvent
//! viscosity equals the raw gas (or oil) viscosity, and a
//! saturation-fraction interpolation against the solvent density otherwise.
//! The solvent's own density checks both degeneracies before falling back
//! to the generic formula.

use crate::solvent::MixingParams;
use rf_autodiff::{AdVector, Selector, guarded_divide};

/// Raw (immiscible) properties and effective saturations entering the model.
///
/// Saturations are the endpoint-shifted "effective" ones: oil minus the
/// miscible residual oil, gas and solvent minus the miscible critical gas.
#[derive(Clone, Debug)]
pub struct ToddLongstaffInputs {
    pub mu_oil: AdVector,
    pub mu_gas: AdVector,
    pub mu_solvent: AdVector,
    pub rho_oil: AdVector,
    pub rho_gas: AdVector,
    pub rho_solvent: AdVector,
    pub so_eff: AdVector,
    pub sg_eff: AdVector,
    pub ss_eff: AdVector,
}

/// Effective (partially mixed) viscosities and densities.
#[derive(Clone, Debug)]
pub struct ToddLongstaffOutputs {
    pub mu_oil: AdVector,
    pub mu_gas: AdVector,
    pub mu_solvent: AdVector,
    pub rho_oil: AdVector,
    pub rho_gas: AdVector,
    pub rho_solvent: AdVector,
}

/// Evaluate the mixing model for one assembly pass.
pub fn todd_longstaff(inp: &ToddLongstaffInputs, mix: &MixingParams) -> ToddLongstaffOutputs {
    let n = inp.mu_oil.len();
    let zero = AdVector::constant_elem(0.0, n);

    let mu_o = &inp.mu_oil;
    let mu_g = &inp.mu_gas;
    let mu_s = &inp.mu_solvent;
    let so = &inp.so_eff;
    let sg = &inp.sg_eff;
    let ss = &inp.ss_eff;

    let mu_s_pow = mu_s.powf(0.25);
    let mu_o_pow = mu_o.powf(0.25);
    let mu_g_pow = mu_g.powf(0.25);

    let sos = so + ss;
    let ssg = ss + sg;
    let sn = &(so + sg) + ss;

    // Pairwise and ternary quarter-power mixtures. The saturation fractions
    // and the final ratios are zero-guarded so empty pairs land on the
    // dominant phase's unmixed viscosity.
    let so_frac = guarded_divide(so, &sos, &zero);
    let ss_frac_os = guarded_divide(ss, &sos, &zero);
    let den_mos = (&(&so_frac * &mu_s_pow) + &(&ss_frac_os * &mu_o_pow)).powf(4.0);
    let mu_mos = guarded_divide(&(mu_o * mu_s), &den_mos, mu_o);

    let sg_frac = guarded_divide(sg, &ssg, &zero);
    let ss_frac_sg = guarded_divide(ss, &ssg, &zero);
    let den_msg = (&(&sg_frac * &mu_s_pow) + &(&ss_frac_sg * &mu_g_pow)).powf(4.0);
    let mu_msg = guarded_divide(&(mu_g * mu_s), &den_msg, mu_g);

    let so_frac_n = guarded_divide(so, &sn, &zero);
    let ss_frac_n = guarded_divide(ss, &sn, &zero);
    let sg_frac_n = guarded_divide(sg, &sn, &zero);
    let den_m = (&(&(&so_frac_n * &mu_s_pow) * &mu_g_pow)
        + &(&(&(&ss_frac_n * &mu_o_pow) * &mu_g_pow) + &(&(&sg_frac_n * &mu_s_pow) * &mu_o_pow)))
        .powf(4.0);
    let mu_m = guarded_divide(&(&(mu_o * mu_s) * mu_g), &den_m, mu_s);

    // Effective viscosities: mu_raw^(1-w) * mu_mixed^w.
    let w = mix.viscosity;
    let mu_o_eff = &mu_o.powf(1.0 - w) * &mu_mos.powf(w);
    let mu_g_eff = &mu_g.powf(1.0 - w) * &mu_msg.powf(w);
    let mu_s_eff = &mu_s.powf(1.0 - w) * &mu_m.powf(w);

    // The density route re-weights the effective viscosities with the
    // density mixing parameter before extracting saturation fractions.
    let wr = mix.density;
    let mu_o_r = &mu_o_eff.powf(1.0 - wr) * &mu_mos.powf(wr);
    let mu_g_r = &mu_g_eff.powf(1.0 - wr) * &mu_msg.powf(wr);
    let mu_s_r = &mu_s_eff.powf(1.0 - wr) * &mu_m.powf(wr);

    let sog = so + sg;
    let sof = guarded_divide(so, &sog, &zero);
    let sgf = guarded_divide(sg, &sog, &zero);

    // Degenerate mobility ratios are detected on the raw viscosities.
    let gas_solvent_degenerate = Selector::zero(&(mu_s.value() - mu_g.value()));
    let oil_solvent_degenerate = Selector::zero(&(mu_s.value() - mu_o.value()));

    let mu_o_r_pow = mu_o_r.powf(0.25);
    let mu_g_r_pow = mu_g_r.powf(0.25);
    let mu_s_r_pow = mu_s_r.powf(0.25);

    let sfr_oe = guarded_divide(
        &(&mu_o_pow * &(&mu_o_r_pow - &mu_s_pow)),
        &(&mu_o_r_pow * &(&mu_o_pow - &mu_s_pow)),
        &zero,
    );
    let sfr_ge = guarded_divide(
        &(&mu_s_pow * &(&mu_g_pow - &mu_g_r_pow)),
        &(&mu_g_r_pow * &(&mu_s_pow - &mu_g_pow)),
        &zero,
    );
    let tmp = &mu_s_pow * &(&(&sgf * &mu_o_pow) + &(&sof * &mu_g_pow));
    let og_pow = &mu_o_pow * &mu_g_pow;
    let sfr_se = guarded_divide(
        &(&tmp - &(&og_pow * &(&mu_s_pow / &mu_s_r_pow))),
        &(&tmp - &og_pow),
        &zero,
    );

    let rho_o = &inp.rho_oil;
    let rho_g = &inp.rho_gas;
    let rho_s = &inp.rho_solvent;

    // Bulk mixture density, solvent-dominated where nothing is mobile.
    let rho_m_num = &(&(rho_o * so) + &(rho_g * sg)) + &(rho_s * ss);
    let rho_m = guarded_divide(&rho_m_num, &sn, rho_s);

    let bulk = |rho: &AdVector| &(rho * (1.0 - wr)) + &(&rho_m * wr);

    let rho_o_gen = &(rho_o * &sfr_oe) + &(rho_s * &(1.0 - &sfr_oe));
    let rho_g_gen = &(rho_g * &sfr_ge) + &(rho_s * &(1.0 - &sfr_ge));
    let one_minus_se = 1.0 - &sfr_se;
    let rho_s_gen = &(&(rho_s * &sfr_se) + &(&(rho_g * &sgf) * &one_minus_se))
        + &(&(rho_o * &sof) * &one_minus_se);

    let rho_oil = oil_solvent_degenerate.select(&bulk(rho_o), &rho_o_gen);
    let rho_gas = gas_solvent_degenerate.select(&bulk(rho_g), &rho_g_gen);
    let rho_solvent = gas_solvent_degenerate.select(
        &bulk(rho_s),
        &oil_solvent_degenerate.select(&bulk(rho_s), &rho_s_gen),
    );

    ToddLongstaffOutputs {
        mu_oil: mu_o_eff,
        mu_gas: mu_g_eff,
        mu_solvent: mu_s_eff,
        rho_oil,
        rho_gas,
        rho_solvent,
    }
}
