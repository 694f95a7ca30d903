//! Restart extras: a flat store of named arrays read once at initialization.
//!
//! Serde replaces the original's hand-written per-type pack/unpack glue:
//! the record is field-list-driven through the derive, and the JSON blob is
//! the exchange format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use rf_core::Real;

/// Key under which the suggested next time-step size is stored.
pub const SUGGESTED_STEP_KEY: &str = "suggested_step_size";

/// Default when the restart blob does not carry a suggested step.
pub const SUGGESTED_STEP_DEFAULT: Real = -1.0;

/// Flat key/value store of named restart arrays.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartExtras {
    arrays: BTreeMap<String, Vec<Real>>,
}

impl RestartExtras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Real>) {
        self.arrays.insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<&[Real]> {
        self.arrays.get(name).map(Vec::as_slice)
    }

    pub fn from_json(blob: &str) -> serde_json::Result<Self> {
        serde_json::from_str(blob)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Suggested next time-step size from the blob.
    ///
    /// A missing or empty entry degrades to the documented default with a
    /// logged warning; a restart without it may deviate from the original
    /// run but is not an error.
    pub fn suggested_step_size(&self) -> Real {
        match self.get(SUGGESTED_STEP_KEY) {
            Some([step, ..]) => *step,
            _ => {
                tracing::warn!(
                    key = SUGGESTED_STEP_KEY,
                    "restart data is missing the suggested step size; using the default"
                );
                SUGGESTED_STEP_DEFAULT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut extras = RestartExtras::new();
        extras.insert(SUGGESTED_STEP_KEY, vec![43_200.0]);
        extras.insert("equation_scales", vec![0.0031, 0.0031]);

        let blob = extras.to_json().unwrap();
        let back = RestartExtras::from_json(&blob).unwrap();
        assert_eq!(back, extras);
        assert_eq!(back.suggested_step_size(), 43_200.0);
    }

    #[test]
    fn missing_step_size_degrades_to_default() {
        let extras = RestartExtras::new();
        assert_eq!(extras.suggested_step_size(), SUGGESTED_STEP_DEFAULT);
    }

    #[test]
    fn empty_array_degrades_to_default() {
        let mut extras = RestartExtras::new();
        extras.insert(SUGGESTED_STEP_KEY, Vec::new());
        assert_eq!(extras.suggested_step_size(), SUGGESTED_STEP_DEFAULT);
    }
}
