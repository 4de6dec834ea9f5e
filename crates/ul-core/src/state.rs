//! Parameter-state snapshots.
//!
//! A search mutates the live engine's parameter vector as a side channel, so
//! every top-level call captures a [`LikelihoodState`] first and restores it
//! on every exit path, success or failure.

use crate::traits::LikelihoodEngine;
use serde::{Deserialize, Serialize};

/// Shadow of one engine parameter at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamState {
    /// Parameter value.
    pub value: f64,
    /// Hard bounds (min, max).
    pub bounds: (f64, f64),
    /// Free flag.
    pub free: bool,
    /// Scale factor.
    pub scale: f64,
    /// Error estimate.
    pub error: f64,
}

/// Immutable capture of every parameter's state plus the NLL at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikelihoodState {
    /// Per-parameter shadows, in engine parameter order.
    pub params: Vec<ParamState>,
    /// Negative log-likelihood at capture time, if it was evaluable.
    pub nll: Option<f64>,
}

impl LikelihoodState {
    /// Capture the full parameter state of `engine`.
    pub fn capture(engine: &impl LikelihoodEngine) -> Self {
        let params = (0..engine.n_params())
            .map(|i| ParamState {
                value: engine.value(i),
                bounds: engine.bounds(i),
                free: engine.is_free(i),
                scale: engine.scale(i),
                error: engine.error(i),
            })
            .collect();
        Self { params, nll: engine.nll().ok() }
    }

    /// Write the captured state back into `engine`, exactly.
    ///
    /// Bounds are restored before values so a value outside temporarily
    /// narrowed bounds is never rejected by a bounds-checking engine.
    pub fn restore(&self, engine: &mut impl LikelihoodEngine) {
        for (i, p) in self.params.iter().enumerate() {
            engine.set_bounds(i, p.bounds.0, p.bounds.1);
            engine.set_value(i, p.value);
            engine.set_free(i, p.free);
            engine.set_scale(i, p.scale);
            engine.set_error(i, p.error);
        }
    }
}
