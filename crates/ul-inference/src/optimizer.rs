//! Bounded quasi-Newton minimization for the reference engine.
//!
//! Thin wrapper around argmin's L-BFGS with box constraints handled by
//! clamping plus a projected-gradient heuristic at active bounds.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ul_core::{Error, Result};

/// L-BFGS configuration.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations.
    pub max_iter: u64,
    /// Convergence tolerance on the gradient norm.
    pub tol: f64,
    /// Number of corrections kept for the inverse-Hessian approximation.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-8, m: 10 }
    }
}

/// Result of one minimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found (clamped to bounds).
    pub parameters: Vec<f64>,
    /// Objective value at the minimum.
    pub fval: f64,
    /// Iterations used.
    pub n_iter: u64,
    /// Whether the solver reported convergence.
    pub converged: bool,
    /// Termination message.
    pub message: String,
}

/// Objective to minimize.
pub trait ObjectiveFunction {
    /// Evaluate the objective at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`; central differences unless overridden.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        for i in 0..params.len() {
            let eps = 1e-8 * params[i].abs().max(1.0);
            let mut p = params.to_vec();
            p[i] += eps;
            let f_plus = self.eval(&p)?;
            p[i] = params[i] - eps;
            let f_minus = self.eval(&p)?;
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

struct Problem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
}

impl CostFunction for Problem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for Problem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // At an active bound, zero any gradient component that points
        // further outside so the line search cannot stall in the clamped
        // region.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }
        Ok(g)
    }
}

/// Minimize `objective` inside `bounds`, starting from `init_params`.
pub fn minimize(
    objective: &dyn ObjectiveFunction,
    init_params: &[f64],
    bounds: &[(f64, f64)],
    config: &OptimizerConfig,
) -> Result<OptimizationResult> {
    if init_params.len() != bounds.len() {
        return Err(Error::Validation(format!(
            "minimize: params length {} != bounds length {}",
            init_params.len(),
            bounds.len()
        )));
    }

    let init = clamp_params(init_params, bounds);
    let problem = Problem { objective, bounds };

    let linesearch = MoreThuenteLineSearch::new();
    // The argmin default cost tolerance (~machine epsilon) is too strict for
    // NLL scales and produces spurious max-iter terminations.
    let tol_cost = if config.tol == 0.0 { 0.0 } else { (0.1 * config.tol).max(1e-12) };
    let solver = LBFGS::new(linesearch, config.m)
        .with_tolerance_grad(config.tol)
        .map_err(|e| Error::Validation(format!("invalid optimizer tolerance: {e}")))?
        .with_tolerance_cost(tol_cost)
        .map_err(|e| Error::Validation(format!("invalid optimizer cost tolerance: {e}")))?;

    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(config.max_iter))
        .run()
        .map_err(|e| Error::Optimizer(format!("minimization failed: {e}")))?;

    let state = res.state();
    let best = state
        .get_best_param()
        .ok_or_else(|| Error::Optimizer("no best parameters found".to_string()))?;
    let parameters = clamp_params(best, bounds);
    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );

    Ok(OptimizationResult {
        parameters,
        fval: state.get_best_cost(),
        n_iter: state.get_iter(),
        converged,
        message: termination.to_string(),
    })
}
