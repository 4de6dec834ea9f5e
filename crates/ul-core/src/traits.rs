//! Core traits for uplim
//!
//! This module defines the contract with the likelihood/optimizer
//! collaborator: the upper-limit machinery never depends on a concrete
//! fitting backend, only on this trait.

use crate::Result;

/// Stateful likelihood engine: a fitted model whose parameter vector lives
/// inside the engine and is mutated in place.
///
/// All parameter access is by index in a stable order. The engine is treated
/// as arbitrarily expensive: `optimize` calls are minimized via caching and
/// warm starts, never parallelized. Callers that mutate parameters must
/// snapshot/restore state around the mutation (see [`crate::state`]).
pub trait LikelihoodEngine {
    /// Number of parameters.
    fn n_params(&self) -> usize;

    /// Parameter names (stable order).
    fn parameter_names(&self) -> Vec<String>;

    /// Index of a parameter by name.
    fn param_index(&self, name: &str) -> Option<usize>;

    /// Current value of parameter `idx`.
    fn value(&self, idx: usize) -> f64;

    /// Set the value of parameter `idx`.
    fn set_value(&mut self, idx: usize, value: f64);

    /// Hard bounds (min, max) of parameter `idx`.
    fn bounds(&self, idx: usize) -> (f64, f64);

    /// Set the hard bounds of parameter `idx`.
    fn set_bounds(&mut self, idx: usize, lo: f64, hi: f64);

    /// Whether parameter `idx` is free (re-optimized by `optimize`).
    fn is_free(&self, idx: usize) -> bool;

    /// Free or freeze parameter `idx`.
    fn set_free(&mut self, idx: usize, free: bool);

    /// Scale factor of parameter `idx`.
    fn scale(&self, idx: usize) -> f64;

    /// Set the scale factor of parameter `idx`.
    fn set_scale(&mut self, idx: usize, scale: f64);

    /// Error estimate of parameter `idx` from the last fit (0 if unknown).
    fn error(&self, idx: usize) -> f64;

    /// Set the error estimate of parameter `idx`.
    fn set_error(&mut self, idx: usize, error: f64);

    /// Negative log-likelihood of the full model, parameters as currently set.
    fn nll(&self) -> Result<f64>;

    /// Re-optimize all free parameters in place, starting from the current
    /// parameter values. May fail on non-convergence.
    fn optimize(&mut self, verbosity: u32) -> Result<()>;

    /// Name of the optimizer currently in use.
    fn optimizer(&self) -> String {
        String::new()
    }

    /// Switch to a different optimizer (used for the profile phase only).
    ///
    /// Engines with a single optimizer may ignore this.
    fn set_optimizer(&mut self, _name: &str) {}

    /// Derived reporting quantity (e.g. integral photon flux) over
    /// `[emin, emax]` at the current parameter values.
    fn flux(&self, emin: f64, emax: f64) -> Result<f64>;
}
