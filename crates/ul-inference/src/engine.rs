//! Reference likelihood engine over a caller-supplied NLL function.
//!
//! [`FnEngine`] implements [`LikelihoodEngine`] for any closed-form negative
//! log-likelihood `f(params) -> Result<f64>`: parameter metadata lives in the
//! engine, `optimize` minimizes over the free subspace with the bundled
//! L-BFGS, and call counters expose how much work a search actually did.

use crate::optimizer::{self, ObjectiveFunction, OptimizerConfig};
use std::cell::Cell;
use ul_core::{Error, LikelihoodEngine, Result};

type NllFn = Box<dyn Fn(&[f64]) -> Result<f64> + Send + Sync>;
type FluxFn = Box<dyn Fn(&[f64], f64, f64) -> Result<f64> + Send + Sync>;

#[derive(Debug, Clone)]
struct EngineParam {
    name: String,
    value: f64,
    bounds: (f64, f64),
    free: bool,
    scale: f64,
    error: f64,
}

/// Function-backed likelihood engine.
pub struct FnEngine {
    params: Vec<EngineParam>,
    nll_fn: NllFn,
    flux_fn: Option<FluxFn>,
    optimizer_name: String,
    config: OptimizerConfig,
    n_nll_calls: Cell<u64>,
    n_optimize_calls: Cell<u64>,
}

impl FnEngine {
    /// Start building an engine.
    pub fn builder() -> FnEngineBuilder {
        FnEngineBuilder::default()
    }

    /// Total NLL evaluations so far (including those made by `optimize`).
    pub fn n_nll_calls(&self) -> u64 {
        self.n_nll_calls.get()
    }

    /// Total `optimize` calls so far.
    pub fn n_optimize_calls(&self) -> u64 {
        self.n_optimize_calls.get()
    }

    /// Reset both call counters.
    pub fn reset_counters(&self) {
        self.n_nll_calls.set(0);
        self.n_optimize_calls.set(0);
    }

    fn eval_vec(&self, values: &[f64]) -> Result<f64> {
        self.n_nll_calls.set(self.n_nll_calls.get() + 1);
        (self.nll_fn)(values)
    }

    fn free_indices(&self) -> Vec<usize> {
        (0..self.params.len()).filter(|&i| self.params[i].free).collect()
    }

    fn current_values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    /// Curvature-based error estimate for one free parameter, from the
    /// diagonal second difference of the NLL. No covariance matrix is
    /// computed here.
    fn diagonal_error(&self, idx: usize) -> Result<f64> {
        let mut values = self.current_values();
        let v = values[idx];
        let eps = 1e-4 * v.abs().max(1.0);

        let f0 = self.eval_vec(&values)?;
        values[idx] = v + eps;
        let f_plus = self.eval_vec(&values)?;
        values[idx] = v - eps;
        let f_minus = self.eval_vec(&values)?;

        let d2 = (f_plus - 2.0 * f0 + f_minus) / (eps * eps);
        if d2 > 0.0 {
            Ok(1.0 / d2.sqrt())
        } else {
            Ok(0.0)
        }
    }
}

impl LikelihoodEngine for FnEngine {
    fn n_params(&self) -> usize {
        self.params.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    fn value(&self, idx: usize) -> f64 {
        self.params[idx].value
    }

    fn set_value(&mut self, idx: usize, value: f64) {
        self.params[idx].value = value;
    }

    fn bounds(&self, idx: usize) -> (f64, f64) {
        self.params[idx].bounds
    }

    fn set_bounds(&mut self, idx: usize, lo: f64, hi: f64) {
        self.params[idx].bounds = (lo, hi);
    }

    fn is_free(&self, idx: usize) -> bool {
        self.params[idx].free
    }

    fn set_free(&mut self, idx: usize, free: bool) {
        self.params[idx].free = free;
    }

    fn scale(&self, idx: usize) -> f64 {
        self.params[idx].scale
    }

    fn set_scale(&mut self, idx: usize, scale: f64) {
        self.params[idx].scale = scale;
    }

    fn error(&self, idx: usize) -> f64 {
        self.params[idx].error
    }

    fn set_error(&mut self, idx: usize, error: f64) {
        self.params[idx].error = error;
    }

    fn nll(&self) -> Result<f64> {
        self.eval_vec(&self.current_values())
    }

    fn optimize(&mut self, verbosity: u32) -> Result<()> {
        self.n_optimize_calls.set(self.n_optimize_calls.get() + 1);

        let free = self.free_indices();
        if free.is_empty() {
            return Ok(());
        }

        struct MaskedNll<'a> {
            engine: &'a FnEngine,
            template: Vec<f64>,
            free: &'a [usize],
        }

        impl ObjectiveFunction for MaskedNll<'_> {
            fn eval(&self, sub: &[f64]) -> Result<f64> {
                let mut values = self.template.clone();
                for (k, &idx) in self.free.iter().enumerate() {
                    values[idx] = sub[k];
                }
                self.engine.eval_vec(&values)
            }
        }

        let init: Vec<f64> = free.iter().map(|&i| self.params[i].value).collect();
        let bounds: Vec<(f64, f64)> = free.iter().map(|&i| self.params[i].bounds).collect();
        let objective = MaskedNll { engine: self, template: self.current_values(), free: &free };

        let result = optimizer::minimize(&objective, &init, &bounds, &self.config)?;
        if !result.converged {
            return Err(Error::Optimizer(format!(
                "fit did not converge after {} iterations: {}",
                result.n_iter, result.message
            )));
        }
        if verbosity > 0 {
            log::debug!(
                "optimize: fval={:.6} n_iter={} [{}]",
                result.fval,
                result.n_iter,
                result.message
            );
        }

        for (k, &idx) in free.iter().enumerate() {
            self.params[idx].value = result.parameters[k];
        }
        for &idx in &free {
            let err = self.diagonal_error(idx)?;
            self.params[idx].error = err;
        }
        Ok(())
    }

    fn optimizer(&self) -> String {
        self.optimizer_name.clone()
    }

    fn set_optimizer(&mut self, name: &str) {
        self.optimizer_name = name.to_string();
    }

    fn flux(&self, emin: f64, emax: f64) -> Result<f64> {
        match &self.flux_fn {
            Some(f) => f(&self.current_values(), emin, emax),
            None => Err(Error::Validation(
                "flux: no derived-quantity function configured for this engine".to_string(),
            )),
        }
    }
}

/// Builder for [`FnEngine`].
#[derive(Default)]
pub struct FnEngineBuilder {
    params: Vec<EngineParam>,
    nll_fn: Option<NllFn>,
    flux_fn: Option<FluxFn>,
    config: Option<OptimizerConfig>,
}

impl FnEngineBuilder {
    /// Add a free parameter with unit scale and no error estimate.
    pub fn param(mut self, name: &str, value: f64, bounds: (f64, f64)) -> Self {
        self.params.push(EngineParam {
            name: name.to_string(),
            value,
            bounds,
            free: true,
            scale: 1.0,
            error: 0.0,
        });
        self
    }

    /// Add a frozen parameter.
    pub fn fixed_param(mut self, name: &str, value: f64, bounds: (f64, f64)) -> Self {
        self.params.push(EngineParam {
            name: name.to_string(),
            value,
            bounds,
            free: false,
            scale: 1.0,
            error: 0.0,
        });
        self
    }

    /// Set the negative log-likelihood function (required).
    pub fn nll<F>(mut self, f: F) -> Self
    where
        F: Fn(&[f64]) -> Result<f64> + Send + Sync + 'static,
    {
        self.nll_fn = Some(Box::new(f));
        self
    }

    /// Set the derived-quantity (flux) function.
    pub fn flux<F>(mut self, f: F) -> Self
    where
        F: Fn(&[f64], f64, f64) -> Result<f64> + Send + Sync + 'static,
    {
        self.flux_fn = Some(Box::new(f));
        self
    }

    /// Override the optimizer configuration.
    pub fn optimizer_config(mut self, config: OptimizerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<FnEngine> {
        let nll_fn = self
            .nll_fn
            .ok_or_else(|| Error::Validation("FnEngine: missing NLL function".to_string()))?;
        if self.params.is_empty() {
            return Err(Error::Validation("FnEngine: no parameters defined".to_string()));
        }
        for (i, p) in self.params.iter().enumerate() {
            if p.bounds.0 >= p.bounds.1 {
                return Err(Error::Validation(format!(
                    "FnEngine: parameter '{}' has invalid bounds ({}, {})",
                    p.name, p.bounds.0, p.bounds.1
                )));
            }
            if self.params.iter().skip(i + 1).any(|q| q.name == p.name) {
                return Err(Error::Validation(format!(
                    "FnEngine: duplicate parameter name '{}'",
                    p.name
                )));
            }
        }
        Ok(FnEngine {
            params: self.params,
            nll_fn,
            flux_fn: self.flux_fn,
            optimizer_name: "lbfgs".to_string(),
            config: self.config.unwrap_or_default(),
            n_nll_calls: Cell::new(0),
            n_optimize_calls: Cell::new(0),
        })
    }
}
