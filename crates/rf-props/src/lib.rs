//! Fluid and rock property evaluation for the solver core.
//!
//! Covers the blackoil PVT evaluator (reciprocal formation volume factors,
//! viscosities, surface densities), the pressure-keyed solvent pseudo-phase
//! tables, the Todd–Longstaff partial-miscibility mixing model, and the
//! relative-permeability model with its miscible adjustment.

pub mod error;
pub mod mixing;
pub mod pvt;
pub mod relperm;
pub mod solvent;
pub mod table;

pub use error::{PropsError, PropsResult};
pub use mixing::{ToddLongstaffInputs, ToddLongstaffOutputs, todd_longstaff};
pub use pvt::{DeckPvt, GasPvt, OilPvt, PvtModel, WaterPvt};
pub use relperm::{RelPermModel, miscible_relperm};
pub use solvent::{MixingParams, SolventPvt, solvent_fraction};
pub use table::Table1d;
