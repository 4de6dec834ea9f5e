//! Fixed-step profile scan upper limit.
//!
//! A coarser, cheaper alternative to the integral limit: step the parameter
//! upward from the best fit in fractions of its fitted error, refit the
//! rest of the model at each step, and linearly interpolate the crossing of
//! the target delta log-likelihood in both parameter and flux space.

use serde::{Deserialize, Serialize};
use ul_core::{Error, LikelihoodEngine, LikelihoodState, Result};

/// Options for [`scan_upper_limit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Target delta log-likelihood; 2.71/2 is the one-sided 95% value.
    pub delta: f64,
    /// Scan reach in units of the parameter error.
    pub nsigmax: f64,
    /// Number of scan steps across that reach.
    pub npts: usize,
    /// Lower energy for the flux conversion.
    pub emin: f64,
    /// Upper energy for the flux conversion.
    pub emax: f64,
    /// Freeze every other free parameter during the scan. Helps when the
    /// normalization is strongly correlated with a shape parameter.
    pub fix_all: bool,
    /// Optimizer verbosity for the per-step refits.
    pub verbosity: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            delta: 2.71 / 2.0,
            nsigmax: 5.0,
            npts: 30,
            emin: 100.0,
            emax: 3e5,
            fix_all: false,
            verbosity: 0,
        }
    }
}

/// Result bundle of [`scan_upper_limit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Name of the scanned parameter.
    pub parameter: String,
    /// Parameter value interpolated to the target delta.
    pub limit: f64,
    /// Flux interpolated to the target delta, when the engine provides one.
    pub flux_limit: Option<f64>,
    /// Target delta the limit corresponds to.
    pub delta: f64,
    /// Visited parameter values.
    pub xs: Vec<f64>,
    /// Delta log-likelihood at each step.
    pub dnll: Vec<f64>,
    /// Fluxes at each step; empty when the engine has no flux.
    pub fluxes: Vec<f64>,
}

/// Step the named parameter up from its current value and interpolate the
/// crossing of `delta`. Assumes the model is already at its best fit; the
/// engine state is restored on every exit path.
pub fn scan_upper_limit(
    engine: &mut impl LikelihoodEngine,
    par_name: &str,
    opts: &ScanOptions,
) -> Result<ScanResult> {
    let snapshot = LikelihoodState::capture(engine);
    let out = scan_inner(engine, par_name, opts);
    snapshot.restore(engine);
    out
}

fn scan_inner(
    engine: &mut impl LikelihoodEngine,
    par_name: &str,
    opts: &ScanOptions,
) -> Result<ScanResult> {
    if opts.npts < 2 {
        return Err(Error::Validation(format!("npts must be at least 2, got {}", opts.npts)));
    }
    let poi = engine
        .param_index(par_name)
        .ok_or_else(|| Error::Validation(format!("unknown parameter '{par_name}'")))?;

    let reference_nll = engine.nll()?;
    let x0 = engine.value(poi);
    let mut dx = engine.error(poi);
    if dx == 0.0 {
        dx = x0;
    }
    if dx == 0.0 {
        return Err(Error::Validation(format!(
            "parameter '{par_name}' has zero error and zero value; no scan scale"
        )));
    }

    engine.set_free(poi, false);
    if opts.fix_all {
        for i in 0..engine.n_params() {
            engine.set_free(i, false);
        }
    }
    let refit = (0..engine.n_params()).any(|i| engine.is_free(i));

    let step = opts.nsigmax * dx / opts.npts as f64;
    let (_, limhi) = engine.bounds(poi);

    let mut xs = Vec::new();
    let mut dnll = Vec::new();
    let mut fluxes = Vec::new();
    let mut flux_ok = true;

    for i in 0..opts.npts {
        let x = x0 + i as f64 * step;
        if x > limhi {
            break;
        }
        xs.push(x);
        engine.set_value(poi, x);
        if refit {
            if let Err(e) = engine.optimize(opts.verbosity) {
                log::warn!("refit failed at x={x}, retrying once: {e}");
                if let Err(e) = engine.optimize(opts.verbosity) {
                    // Scan on with the parameters as they stand.
                    log::warn!("refit failed again at x={x}: {e}");
                }
            }
        }
        let d = engine.nll()? - reference_nll;
        dnll.push(d);
        if flux_ok {
            match engine.flux(opts.emin, opts.emax) {
                Ok(f) => fluxes.push(f),
                Err(_) => {
                    flux_ok = false;
                    fluxes.clear();
                }
            }
        }
        if d > opts.delta {
            break;
        }
        if dnll.len() > 2 && d < dnll[dnll.len() - 2] {
            // Likelihood noise: drop the decreasing point and stop.
            xs.pop();
            dnll.pop();
            if flux_ok {
                fluxes.pop();
            }
            break;
        }
    }

    let n = xs.len();
    if n < 2 {
        return Err(Error::Computation(format!(
            "scan of '{par_name}' produced {n} usable points; cannot interpolate"
        )));
    }
    let denom = dnll[n - 1] - dnll[n - 2];
    if denom == 0.0 {
        return Err(Error::Computation(format!(
            "scan of '{par_name}' is flat between its last two points; cannot interpolate"
        )));
    }
    let frac = (opts.delta - dnll[n - 2]) / denom;
    let limit = dnll_interp(frac, xs[n - 2], xs[n - 1]);
    let flux_limit =
        if flux_ok { Some(dnll_interp(frac, fluxes[n - 2], fluxes[n - 1])) } else { None };

    if dnll[n - 1] <= opts.delta {
        log::warn!(
            "scan of '{par_name}' never reached delta={}; limit {} is an extrapolation",
            opts.delta,
            limit
        );
    }

    Ok(ScanResult {
        parameter: par_name.to_string(),
        limit,
        flux_limit,
        delta: opts.delta,
        xs,
        dnll,
        fluxes,
    })
}

#[inline]
fn dnll_interp(frac: f64, a: f64, b: f64) -> f64 {
    a + frac * (b - a)
}
