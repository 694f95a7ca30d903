//! Phase enumeration and per-model phase bookkeeping.
//!
//! Every component receives an explicit [`PhaseIndexSet`] value instead of
//! reading global phase constants. The index set decides which equations and
//! primary variables exist and where each phase lives in per-cell storage.

use crate::error::{CoreError, CoreResult};

/// Fluid phases known to the solver core.
///
/// `Solvent` is a pseudo-phase: it only exists when the solvent extension is
/// active, and it always occupies the slot after the active real phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Water,
    Oil,
    Gas,
    Solvent,
}

impl Phase {
    /// The real (non-pseudo) phases in canonical order.
    pub const REAL: [Phase; 3] = [Phase::Water, Phase::Oil, Phase::Gas];
}

/// Activity flags and canonical positions for the phases of one model run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseIndexSet {
    active: [bool; 3],
    pos: [usize; 3],
    num_real: usize,
    has_solvent: bool,
}

impl PhaseIndexSet {
    /// Build an index set from activity flags.
    ///
    /// Oil must be active: its saturation is the closure variable and is
    /// never solved for directly.
    pub fn new(water: bool, oil: bool, gas: bool, solvent: bool) -> CoreResult<Self> {
        if !oil {
            return Err(CoreError::InvalidArg {
                what: "oil phase must be active",
            });
        }
        if solvent && !gas {
            return Err(CoreError::InvalidArg {
                what: "solvent pseudo-phase requires an active gas phase",
            });
        }
        let active = [water, oil, gas];
        let mut pos = [usize::MAX; 3];
        let mut next = 0;
        for (i, &a) in active.iter().enumerate() {
            if a {
                pos[i] = next;
                next += 1;
            }
        }
        Ok(Self {
            active,
            pos,
            num_real: next,
            has_solvent: solvent,
        })
    }

    /// All three real phases plus the solvent pseudo-phase.
    pub fn all_with_solvent() -> Self {
        Self::new(true, true, true, true).expect("oil and gas are active")
    }

    /// The standard three-phase blackoil set.
    pub fn blackoil() -> Self {
        Self::new(true, true, true, false).expect("oil is active")
    }

    pub fn is_active(&self, phase: Phase) -> bool {
        match phase {
            Phase::Water => self.active[0],
            Phase::Oil => self.active[1],
            Phase::Gas => self.active[2],
            Phase::Solvent => self.has_solvent,
        }
    }

    /// Canonical position of a phase among the active phases.
    ///
    /// The solvent position always equals the number of active real phases.
    pub fn pos(&self, phase: Phase) -> Option<usize> {
        match phase {
            Phase::Water if self.active[0] => Some(self.pos[0]),
            Phase::Oil if self.active[1] => Some(self.pos[1]),
            Phase::Gas if self.active[2] => Some(self.pos[2]),
            Phase::Solvent if self.has_solvent => Some(self.num_real),
            _ => None,
        }
    }

    /// Number of active real phases.
    pub fn num_phases(&self) -> usize {
        self.num_real
    }

    /// Number of mass-balance equations (real phases plus solvent).
    pub fn num_equations(&self) -> usize {
        self.num_real + usize::from(self.has_solvent)
    }

    pub fn has_solvent(&self) -> bool {
        self.has_solvent
    }

    /// Active real phases in canonical order.
    pub fn active_real(&self) -> impl Iterator<Item = Phase> + '_ {
        Phase::REAL.iter().copied().filter(|p| self.is_active(*p))
    }
}

/// Per-cell record of which hydrocarbon phases are present.
///
/// Recomputed once per Newton iteration from the current state; read-only
/// during residual assembly. Property evaluation uses it to pick the
/// saturated or undersaturated branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseCondition {
    free_water: bool,
    free_oil: bool,
    free_gas: bool,
}

impl PhaseCondition {
    pub fn set_free_water(&mut self, yes: bool) {
        self.free_water = yes;
    }
    pub fn set_free_oil(&mut self, yes: bool) {
        self.free_oil = yes;
    }
    pub fn set_free_gas(&mut self, yes: bool) {
        self.free_gas = yes;
    }

    pub fn has_free_water(&self) -> bool {
        self.free_water
    }
    pub fn has_free_oil(&self) -> bool {
        self.free_oil
    }
    pub fn has_free_gas(&self) -> bool {
        self.free_gas
    }
}
