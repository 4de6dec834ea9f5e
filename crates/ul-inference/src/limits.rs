//! Top-level upper-limit entry points.
//!
//! `bayesian_upper_limit` integrates the profile likelihood between the
//! interval bounds and inverts the cumulative at the confidence level.
//! `profile_upper_limit` is the frequentist sibling: a single high-side
//! threshold crossing of the profiled cost, no integration. Both capture
//! the engine state on entry and restore it on every exit path.

use serde::{Deserialize, Serialize};
use ul_core::{Error, LikelihoodEngine, LikelihoodState, Result};

use crate::bounds::{BoundResult, IntervalBoundSearch};
use crate::cache::EvaluationCache;
use crate::cost::ProfileCost;
use crate::extract::{
    chi2_cdf, chi2_equivalent, chi2_quantile, profile_crossings, Extraction, ProfileCrossCheck,
    UpperLimitExtractor,
};
use crate::quad::{AdaptiveIntegrator, ScanRecord};

/// Options shared by both entry points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpperLimitOptions {
    /// Target confidence level.
    pub cl: f64,
    /// Trust the caller that the model is already at its global optimum.
    pub skip_global_opt: bool,
    /// Freeze every nuisance parameter during the scan (fast, approximate).
    pub freeze_all: bool,
    /// Tighter integration tolerance and extra attention to the peak.
    pub be_very_careful: bool,
    /// Delta log-likelihood window defining the search region.
    pub delta_log_like: f64,
    /// Skip the low-side bound search and integrate from the best fit.
    pub no_lo_bound_search: bool,
    /// Optimizer to use for the profile refits only; the global fit keeps
    /// the engine's current one.
    pub profile_optimizer: Option<String>,
    /// Lower energy for the derived-flux conversion.
    pub emin: f64,
    /// Upper energy for the derived-flux conversion.
    pub emax: f64,
    /// Extra parameter values to report probabilities for.
    pub points_of_interest: Vec<f64>,
    /// Acceptance tolerance on `|cost - subval|` in the bound search.
    pub search_tol: f64,
    /// Relative spline/linear disagreement beyond which the profile
    /// cross-check keeps the linear result.
    pub profile_disagreement_tol: f64,
    /// Optimizer verbosity for the global fit; profile refits run one
    /// level quieter.
    pub verbosity: u32,
}

impl Default for UpperLimitOptions {
    fn default() -> Self {
        Self {
            cl: 0.95,
            skip_global_opt: false,
            freeze_all: false,
            be_very_careful: false,
            delta_log_like: 10.0,
            no_lo_bound_search: false,
            profile_optimizer: None,
            emin: 100.0,
            emax: 3e5,
            points_of_interest: Vec::new(),
            search_tol: 1e-2,
            profile_disagreement_tol: 0.05,
            verbosity: 0,
        }
    }
}

/// Probability report for one caller-supplied parameter value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointProbability {
    /// Parameter value.
    pub x: f64,
    /// Cumulative (Bayesian) or coverage (frequentist) probability.
    pub probability: f64,
    /// Equivalent 1-dof chi-squared.
    pub chi2: f64,
}

/// Result bundle of [`bayesian_upper_limit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpperLimitResult {
    /// Name of the scanned parameter.
    pub parameter: String,
    /// Parameter value at the requested confidence level.
    pub limit: f64,
    /// Derived flux at the limit, when the engine provides one.
    pub flux_limit: Option<f64>,
    /// Confidence level the limit was computed for.
    pub cl: f64,
    /// Low integration bound.
    pub xlo: f64,
    /// High integration bound.
    pub xhi: f64,
    /// Exact cost at the best fit.
    pub peak_cost: f64,
    /// Best-fit parameter value the scan was anchored at.
    pub peak_value: f64,
    /// Fitted error on the parameter at the best fit.
    pub peak_error: f64,
    /// True when every parameter was frozen during the scan, so the
    /// profile refits degenerated to plain evaluations.
    pub all_frozen: bool,
    /// Whether the low-side bound search converged.
    pub lo_converged: bool,
    /// Whether the high-side bound search converged.
    pub hi_converged: bool,
    /// Selected cumulative representation and its diagnostics.
    pub extraction: Extraction,
    /// Reference integral from the adaptive quadrature.
    pub quad_integral: f64,
    /// Error estimate of the reference integral.
    pub quad_error: f64,
    /// Profile cross-check at the one-sided threshold for `cl`.
    pub profile_cl: ProfileCrossCheck,
    /// Profile cross-check at the two-sided threshold for `2·cl - 1`.
    pub profile_two_sided: ProfileCrossCheck,
    /// Scan abscissas visited during integration.
    pub xs: Vec<f64>,
    /// Densities matching `xs`.
    pub ys: Vec<f64>,
    /// Probabilities for the requested points of interest.
    pub points_of_interest: Vec<PointProbability>,
}

impl UpperLimitResult {
    /// Post-hoc probability at `x` from the stored scan, using the same
    /// representation that produced the limit.
    pub fn point_probability(&self, x: f64) -> Result<PointProbability> {
        let ex = UpperLimitExtractor { xs: &self.xs, ys: &self.ys, quad_total: self.quad_integral };
        let probability = ex.probability_at(self.extraction.method, x)?;
        Ok(PointProbability { x, probability, chi2: chi2_equivalent(probability)? })
    }
}

/// Result bundle of [`profile_upper_limit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileLimitResult {
    /// Name of the scanned parameter.
    pub parameter: String,
    /// Parameter value at which the cost crosses the threshold.
    pub limit: f64,
    /// Derived flux at the limit, when the engine provides one.
    pub flux_limit: Option<f64>,
    /// Confidence level the limit was computed for.
    pub cl: f64,
    /// Cost threshold above the peak: `0.5·χ²⁻¹(2·cl - 1, 1)`.
    pub delta: f64,
    /// Exact cost at the best fit.
    pub peak_cost: f64,
    /// Best-fit parameter value the threshold was anchored at.
    pub peak_value: f64,
    /// Fitted error on the parameter at the best fit.
    pub peak_error: f64,
    /// True when every parameter was frozen during the search.
    pub all_frozen: bool,
    /// Whether the crossing search converged before the hard bound.
    pub converged: bool,
    /// Probabilities for the requested points of interest.
    pub points_of_interest: Vec<PointProbability>,
}

/// Bayesian integral upper limit on the named parameter.
///
/// Returns the limiting parameter value together with the full result
/// bundle. The engine is restored to its pre-call state whether the
/// computation succeeds or fails.
pub fn bayesian_upper_limit(
    engine: &mut impl LikelihoodEngine,
    par_name: &str,
    opts: &UpperLimitOptions,
) -> Result<(f64, UpperLimitResult)> {
    let snapshot = LikelihoodState::capture(engine);
    let out = bayesian_inner(engine, par_name, opts);
    snapshot.restore(engine);
    out
}

/// Frequentist profile (chi-squared) upper limit on the named parameter.
pub fn profile_upper_limit(
    engine: &mut impl LikelihoodEngine,
    par_name: &str,
    opts: &UpperLimitOptions,
) -> Result<(f64, ProfileLimitResult)> {
    let snapshot = LikelihoodState::capture(engine);
    let out = profile_inner(engine, par_name, opts);
    snapshot.restore(engine);
    out
}

fn bayesian_inner(
    engine: &mut impl LikelihoodEngine,
    par_name: &str,
    opts: &UpperLimitOptions,
) -> Result<(f64, UpperLimitResult)> {
    validate_cl(opts.cl)?;
    let dlogl_cl = 0.5 * chi2_quantile(opts.cl)?;
    let dlogl_two_sided = 0.5 * chi2_quantile(2.0 * opts.cl - 1.0)?;
    if opts.delta_log_like < dlogl_cl {
        return Err(Error::Validation(format!(
            "delta_log_like window {} is below the {} confidence threshold {:.4}",
            opts.delta_log_like, opts.cl, dlogl_cl
        )));
    }

    let setup = Setup::prepare(engine, par_name, opts)?;
    let saved_optimizer = engine.optimizer();
    if let Some(name) = &opts.profile_optimizer {
        engine.set_optimizer(name);
    }
    let out = bayesian_scan(engine, &setup, opts, dlogl_cl, dlogl_two_sided);
    if opts.profile_optimizer.is_some() {
        engine.set_optimizer(&saved_optimizer);
    }
    out
}

fn bayesian_scan(
    engine: &mut impl LikelihoodEngine,
    setup: &Setup,
    opts: &UpperLimitOptions,
    dlogl_cl: f64,
    dlogl_two_sided: f64,
) -> Result<(f64, UpperLimitResult)> {
    let cost = ProfileCost::new(
        engine,
        setup.poi,
        setup.reference_nll,
        setup.no_optimizer,
        opts.verbosity.saturating_sub(1),
    );
    let mut cache = EvaluationCache::new();
    let peak_cost = cost.exact(engine, setup.fitval, &mut cache)?;
    let subval = peak_cost + opts.delta_log_like;

    let hi = IntervalBoundSearch {
        subval,
        fitval: setup.fitval,
        hard_bound: setup.limhi,
        tol: opts.search_tol,
        xtol: setup.xtol,
    }
    .find(&cost, engine, &mut cache)?;

    // The window must actually be reached on the high side; otherwise the
    // requested confidence level cannot be covered.
    if hi.cost - peak_cost < dlogl_cl {
        return Err(Error::Validation(format!(
            "search window ends at cost delta {:.4}, below the {} confidence \
             threshold {:.4}; parameter bound too tight or window too small",
            hi.cost - peak_cost,
            opts.cl,
            dlogl_cl
        )));
    }
    if !hi.converged {
        log::warn!("high-side bound search did not converge; limit may be understated");
    }

    let lo = if opts.no_lo_bound_search {
        BoundResult { x: setup.fitval, cost: peak_cost, converged: true }
    } else {
        IntervalBoundSearch {
            subval,
            fitval: setup.fitval,
            hard_bound: setup.limlo,
            tol: opts.search_tol,
            xtol: setup.xtol,
        }
        .find(&cost, engine, &mut cache)?
    };

    let epsrel = if opts.be_very_careful {
        (1.0 - opts.cl) * 1e-8
    } else {
        (1.0 - opts.cl) * 1e-3
    };
    let integrator = AdaptiveIntegrator { epsabs: 1.0, epsrel };
    let mut splits = vec![setup.fitval];
    if opts.be_very_careful && setup.fit_error > 0.0 {
        splits.push(setup.fitval - setup.fit_error);
        splits.push(setup.fitval + setup.fit_error);
    }

    let mut record = ScanRecord::new();
    let quad = integrator.integrate(
        |x| Ok((peak_cost - cost.exact(engine, x, &mut cache)?).exp()),
        lo.x,
        hi.x,
        &splits,
        &mut record,
    )?;

    let xs = record.xs().to_vec();
    let ys = record.ys().to_vec();
    let extractor = UpperLimitExtractor { xs: &xs, ys: &ys, quad_total: quad.integral };
    let extraction = extractor.best_limit(opts.cl)?;

    let log_ys: Vec<f64> = ys.iter().map(|y| y.max(f64::MIN_POSITIVE).ln()).collect();
    let (profile_cl, profile_two_sided) = profile_crossings(
        &xs,
        &log_ys,
        setup.fitval,
        dlogl_cl,
        dlogl_two_sided,
        opts.profile_disagreement_tol,
    )?;

    let mut points = Vec::with_capacity(opts.points_of_interest.len());
    for &x in &opts.points_of_interest {
        let probability = extractor.probability_at(extraction.method, x)?;
        points.push(PointProbability { x, probability, chi2: chi2_equivalent(probability)? });
    }

    let flux_limit = derived_flux(engine, setup.poi, extraction.limit, opts);

    let result = UpperLimitResult {
        parameter: setup.name.clone(),
        limit: extraction.limit,
        flux_limit,
        cl: opts.cl,
        xlo: lo.x,
        xhi: hi.x,
        peak_cost,
        peak_value: setup.fitval,
        peak_error: setup.fit_error,
        all_frozen: setup.no_optimizer,
        lo_converged: lo.converged,
        hi_converged: hi.converged,
        extraction,
        quad_integral: quad.integral,
        quad_error: quad.error,
        profile_cl,
        profile_two_sided,
        xs,
        ys,
        points_of_interest: points,
    };
    Ok((extraction.limit, result))
}

fn profile_inner(
    engine: &mut impl LikelihoodEngine,
    par_name: &str,
    opts: &UpperLimitOptions,
) -> Result<(f64, ProfileLimitResult)> {
    validate_cl(opts.cl)?;
    let delta = 0.5 * chi2_quantile(2.0 * opts.cl - 1.0)?;

    let setup = Setup::prepare(engine, par_name, opts)?;
    let saved_optimizer = engine.optimizer();
    if let Some(name) = &opts.profile_optimizer {
        engine.set_optimizer(name);
    }
    let out = profile_scan(engine, &setup, opts, delta);
    if opts.profile_optimizer.is_some() {
        engine.set_optimizer(&saved_optimizer);
    }
    out
}

fn profile_scan(
    engine: &mut impl LikelihoodEngine,
    setup: &Setup,
    opts: &UpperLimitOptions,
    delta: f64,
) -> Result<(f64, ProfileLimitResult)> {
    let cost = ProfileCost::new(
        engine,
        setup.poi,
        setup.reference_nll,
        setup.no_optimizer,
        opts.verbosity.saturating_sub(1),
    );
    let mut cache = EvaluationCache::new();
    let peak_cost = cost.exact(engine, setup.fitval, &mut cache)?;

    let bound = IntervalBoundSearch {
        subval: peak_cost + delta,
        fitval: setup.fitval,
        hard_bound: setup.limhi,
        tol: opts.search_tol,
        xtol: setup.xtol,
    }
    .find(&cost, engine, &mut cache)?;
    if !bound.converged {
        log::warn!(
            "profile bound search stopped at the parameter bound {}; \
             the limit may understate the interval",
            bound.x
        );
    }

    let mut points = Vec::with_capacity(opts.points_of_interest.len());
    for &x in &opts.points_of_interest {
        let c = cost.exact(engine, x, &mut cache)?;
        let chi2 = (2.0 * (c - peak_cost)).max(0.0);
        let f = chi2_cdf(chi2)?;
        // One-sided above the best fit, two-sided complement below.
        let probability = if x >= setup.fitval { 0.5 * (1.0 + f) } else { 0.5 * (1.0 - f) };
        points.push(PointProbability { x, probability, chi2 });
    }

    let flux_limit = derived_flux(engine, setup.poi, bound.x, opts);

    let result = ProfileLimitResult {
        parameter: setup.name.clone(),
        limit: bound.x,
        flux_limit,
        cl: opts.cl,
        delta,
        peak_cost,
        peak_value: setup.fitval,
        peak_error: setup.fit_error,
        all_frozen: setup.no_optimizer,
        converged: bound.converged,
        points_of_interest: points,
    };
    Ok((bound.x, result))
}

/// Shared setup: global fit, reference NLL, parameter freezing.
struct Setup {
    name: String,
    poi: usize,
    fitval: f64,
    fit_error: f64,
    limlo: f64,
    limhi: f64,
    xtol: f64,
    reference_nll: f64,
    no_optimizer: bool,
}

impl Setup {
    fn prepare(
        engine: &mut impl LikelihoodEngine,
        par_name: &str,
        opts: &UpperLimitOptions,
    ) -> Result<Self> {
        let poi = engine
            .param_index(par_name)
            .ok_or_else(|| Error::Validation(format!("unknown parameter '{par_name}'")))?;

        // The scanned parameter must float in the global fit even if the
        // caller left it frozen; the entry-point snapshot restores it.
        engine.set_free(poi, true);
        if !opts.skip_global_opt {
            optimize_with_retry(engine, opts.verbosity)?;
        }
        let reference_nll = engine.nll()?;
        let fitval = engine.value(poi);
        let fit_error = engine.error(poi);
        let (limlo, limhi) = engine.bounds(poi);

        engine.set_free(poi, false);
        if opts.freeze_all {
            for i in 0..engine.n_params() {
                engine.set_free(i, false);
            }
        }
        let no_optimizer = (0..engine.n_params()).all(|i| !engine.is_free(i));

        // Floored so a zero lower bound does not force machine-level x
        // resolution on every exact root find.
        let xtol = (0.1 * limlo.abs()).max(1e-6 * (limhi - limlo).abs());

        Ok(Self {
            name: par_name.to_string(),
            poi,
            fitval,
            fit_error,
            limlo,
            limhi,
            xtol,
            reference_nll,
            no_optimizer,
        })
    }
}

fn validate_cl(cl: f64) -> Result<()> {
    if !(0.5..1.0).contains(&cl) {
        return Err(Error::Validation(format!(
            "confidence level must be in [0.5, 1), got {cl}"
        )));
    }
    Ok(())
}

fn optimize_with_retry(engine: &mut impl LikelihoodEngine, verbosity: u32) -> Result<()> {
    if let Err(e) = engine.optimize(verbosity) {
        log::warn!("global fit failed, retrying once: {e}");
        engine.optimize(verbosity)?;
    }
    Ok(())
}

fn derived_flux(
    engine: &mut impl LikelihoodEngine,
    poi: usize,
    limit: f64,
    opts: &UpperLimitOptions,
) -> Option<f64> {
    engine.set_value(poi, limit);
    match engine.flux(opts.emin, opts.emax) {
        Ok(f) => Some(f),
        Err(e) => {
            log::debug!("no derived flux at the limit: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cl_validation() {
        assert!(validate_cl(0.95).is_ok());
        assert!(validate_cl(0.5).is_ok());
        assert!(validate_cl(1.0).is_err());
        assert!(validate_cl(0.3).is_err());
        assert!(validate_cl(f64::NAN).is_err());
    }

    #[test]
    fn test_default_options() {
        let opts = UpperLimitOptions::default();
        assert_eq!(opts.cl, 0.95);
        assert_eq!(opts.delta_log_like, 10.0);
        assert_eq!(opts.emin, 100.0);
        assert_eq!(opts.emax, 3e5);
        assert!(!opts.freeze_all);
        assert!(opts.points_of_interest.is_empty());
    }
}
