//! Upper-limit extraction from recorded scan points.
//!
//! Two independent cumulative representations of the recorded density are
//! inverted at the target confidence fraction: a trapezoidal running sum
//! and an analytic integral of the monotone spline. Whichever total is
//! closer to the adaptive quadrature's reference total wins. A separate
//! profile-likelihood cross-check reads threshold crossings off the log
//! density with both a spline and a linear interpolant, falling back to
//! linear when the two disagree.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use ul_core::{Error, Result};

use crate::root::brentq;
use crate::spline::CubicHermite;

/// Which cumulative representation produced the reported limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    /// Trapezoidal running sum over the scan points.
    Trapezoid,
    /// Analytic integral of the monotone cubic spline.
    Spline,
}

/// Outcome of the dual-method extraction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Extraction {
    /// Parameter value at which the selected cumulative reaches `cl`.
    pub limit: f64,
    /// Selected representation.
    pub method: Representation,
    /// `|selected total - quad total| / quad total`.
    pub relative_deviation: f64,
    /// Trapezoidal total.
    pub trapz_total: f64,
    /// Spline total.
    pub spline_total: f64,
}

/// Profile-likelihood cross-check result for one threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProfileCrossCheck {
    /// Crossing position from the representation that was kept.
    pub x: f64,
    /// True when the crossings disagreed at either threshold and the
    /// linear results were kept for both.
    pub used_linear: bool,
    /// Symmetric relative disagreement `2|a - b| / |a + b|` between the
    /// spline and linear crossings at this threshold.
    pub disagreement: f64,
}

/// Inverts the recorded density scan at a confidence fraction.
pub struct UpperLimitExtractor<'a> {
    /// Scan abscissas, ascending.
    pub xs: &'a [f64],
    /// Densities matching `xs`.
    pub ys: &'a [f64],
    /// Reference total from the adaptive integrator.
    pub quad_total: f64,
}

impl UpperLimitExtractor<'_> {
    /// Invert both representations at `cl` and keep the one whose total is
    /// closer to the reference.
    pub fn best_limit(&self, cl: f64) -> Result<Extraction> {
        if self.xs.len() < 3 {
            return Err(Error::Computation(format!(
                "extraction needs at least 3 scan points, got {}",
                self.xs.len()
            )));
        }

        let cum = trapezoid_cumulative(self.xs, self.ys);
        let trapz_total = cum[cum.len() - 1];
        let trapz_limit = invert_piecewise_linear(self.xs, &cum, cl * trapz_total)?;

        let spline = CubicHermite::fit(self.xs, self.ys)?;
        let spline_total = spline.integral();
        let target = cl * spline_total;
        let spline_limit = brentq(
            |x| Ok(spline.integral_to(x) - target),
            self.xs[0],
            self.xs[self.xs.len() - 1],
            0.0,
        )?;

        let d_spline = (spline_total - self.quad_total).abs();
        let d_trapz = (trapz_total - self.quad_total).abs();
        let (limit, method, chosen_total) = if d_spline < d_trapz {
            (spline_limit, Representation::Spline, spline_total)
        } else {
            (trapz_limit, Representation::Trapezoid, trapz_total)
        };
        let relative_deviation = if self.quad_total != 0.0 {
            (chosen_total - self.quad_total).abs() / self.quad_total
        } else {
            f64::NAN
        };
        Ok(Extraction { limit, method, relative_deviation, trapz_total, spline_total })
    }

    /// Cumulative probability at `x` under the given representation.
    ///
    /// 0 below the first scan point, 1 beyond the last.
    pub fn probability_at(&self, method: Representation, x: f64) -> Result<f64> {
        let n = self.xs.len();
        if n < 2 {
            return Err(Error::Computation("too few scan points".into()));
        }
        if x < self.xs[0] {
            return Ok(0.0);
        }
        if x >= self.xs[n - 1] {
            return Ok(1.0);
        }
        let p = match method {
            Representation::Trapezoid => {
                let cum = trapezoid_cumulative(self.xs, self.ys);
                let total = cum[n - 1];
                linear_interp(self.xs, &cum, x) / total
            }
            Representation::Spline => {
                let spline = CubicHermite::fit(self.xs, self.ys)?;
                spline.integral_to(x) / spline.integral()
            }
        };
        Ok(p.clamp(0.0, 1.0))
    }
}

/// High-side crossings of `log density` dropping by `dlogl_first` and
/// `dlogl_second` below its value at `fitval`, each computed with both a
/// spline and a linear interpolant.
///
/// The two thresholds stand or fall together: when the symmetric relative
/// disagreement `2|a - b| / |a + b|` exceeds `tol` at either threshold,
/// both keep the linear crossing and the disagreement is logged.
pub fn profile_crossings(
    xs: &[f64],
    log_ys: &[f64],
    fitval: f64,
    dlogl_first: f64,
    dlogl_second: f64,
    tol: f64,
) -> Result<(ProfileCrossCheck, ProfileCrossCheck)> {
    let n = xs.len();
    if n < 2 {
        return Err(Error::Computation("too few scan points for profile crossing".into()));
    }
    let xhi = xs[n - 1];

    let spline = CubicHermite::fit(xs, log_ys)?;
    let peak_s = spline.eval(fitval);
    let peak_l = linear_interp(xs, log_ys, fitval);
    let crossing_pair = |dlogl: f64| -> Result<(f64, f64)> {
        let s = brentq(|x| Ok(peak_s - spline.eval(x) - dlogl), fitval, xhi, 0.0)?;
        let l = brentq(|x| Ok(peak_l - linear_interp(xs, log_ys, x) - dlogl), fitval, xhi, 0.0)?;
        Ok((s, l))
    };

    let (s1, l1) = crossing_pair(dlogl_first)?;
    let (s2, l2) = crossing_pair(dlogl_second)?;
    let d1 = symmetric_disagreement(s1, l1);
    let d2 = symmetric_disagreement(s2, l2);
    let used_linear = d1 > tol || d2 > tol;
    if used_linear {
        log::warn!(
            "profile crossings: spline ({s1}, {s2}) and linear ({l1}, {l2}) disagree \
             by ({d1:.3}, {d2:.3}); keeping linear for both"
        );
    }
    let (x1, x2) = if used_linear { (l1, l2) } else { (s1, s2) };
    Ok((
        ProfileCrossCheck { x: x1, used_linear, disagreement: d1 },
        ProfileCrossCheck { x: x2, used_linear, disagreement: d2 },
    ))
}

fn symmetric_disagreement(a: f64, b: f64) -> f64 {
    2.0 * (a - b).abs() / (a + b).abs().max(f64::MIN_POSITIVE)
}

/// Running trapezoidal cumulative, starting at 0.
pub fn trapezoid_cumulative(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let mut cum = Vec::with_capacity(xs.len());
    let mut acc = 0.0;
    cum.push(0.0);
    for i in 1..xs.len() {
        acc += 0.5 * (ys[i] + ys[i - 1]) * (xs[i] - xs[i - 1]);
        cum.push(acc);
    }
    cum
}

/// Piecewise-linear interpolation on sorted abscissas, clamped at the ends.
pub fn linear_interp(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len();
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let i = match xs.binary_search_by(|v| v.total_cmp(&x)) {
        Ok(i) => return ys[i],
        Err(i) => i - 1,
    };
    let t = (x - xs[i]) / (xs[i + 1] - xs[i]);
    ys[i] + t * (ys[i + 1] - ys[i])
}

fn invert_piecewise_linear(xs: &[f64], cum: &[f64], target: f64) -> Result<f64> {
    brentq(|x| Ok(linear_interp(xs, cum, x) - target), xs[0], xs[xs.len() - 1], 0.0)
}

/// `χ²` quantile at probability `p`, 1 degree of freedom.
pub fn chi2_quantile(p: f64) -> Result<f64> {
    let chi2 = ChiSquared::new(1.0)
        .map_err(|e| Error::Computation(format!("chi-squared distribution: {e}")))?;
    Ok(chi2.inverse_cdf(p))
}

/// `χ²` CDF at `x`, 1 degree of freedom.
pub fn chi2_cdf(x: f64) -> Result<f64> {
    let chi2 = ChiSquared::new(1.0)
        .map_err(|e| Error::Computation(format!("chi-squared distribution: {e}")))?;
    Ok(chi2.cdf(x))
}

/// 1-dof chi-squared equivalent of a cumulative probability: `Φ⁻¹(p)²`.
///
/// `p` is clamped away from 0 and 1 so the quantile stays finite.
pub fn chi2_equivalent(p: f64) -> Result<f64> {
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::Computation(format!("normal distribution: {e}")))?;
    let z = normal.inverse_cdf(p.clamp(1e-16, 1.0 - 1e-16));
    Ok(z * z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian_scan(sigma: f64) -> (Vec<f64>, Vec<f64>) {
        let xs: Vec<f64> = (0..=160).map(|i| 10.0 - 4.0 * sigma + i as f64 * sigma * 0.05).collect();
        let ys: Vec<f64> =
            xs.iter().map(|x| (-0.5 * (x - 10.0) * (x - 10.0) / (sigma * sigma)).exp()).collect();
        (xs, ys)
    }

    #[test]
    fn test_gaussian_95_percent_limit() {
        let (xs, ys) = gaussian_scan(1.0);
        let quad_total = (2.0 * std::f64::consts::PI).sqrt();
        // Truncated support [mu-4s, mu+4s]: the 95% point of the truncated
        // Gaussian is close to mu + 1.645s.
        let ex = UpperLimitExtractor { xs: &xs, ys: &ys, quad_total }.best_limit(0.95).unwrap();
        assert_relative_eq!(ex.limit, 11.645, max_relative = 0.01);
        assert!(ex.relative_deviation < 0.01);
    }

    #[test]
    fn test_both_totals_agree_on_smooth_density() {
        let (xs, ys) = gaussian_scan(1.0);
        let quad_total = (2.0 * std::f64::consts::PI).sqrt();
        let ex = UpperLimitExtractor { xs: &xs, ys: &ys, quad_total }.best_limit(0.9).unwrap();
        assert_relative_eq!(ex.trapz_total, ex.spline_total, max_relative = 1e-3);
    }

    #[test]
    fn test_probability_boundaries() {
        let (xs, ys) = gaussian_scan(1.0);
        let ex = UpperLimitExtractor { xs: &xs, ys: &ys, quad_total: 1.0 };
        for method in [Representation::Trapezoid, Representation::Spline] {
            assert_eq!(ex.probability_at(method, xs[0] - 1.0).unwrap(), 0.0);
            assert_eq!(ex.probability_at(method, xs[xs.len() - 1] + 1.0).unwrap(), 1.0);
            let p = ex.probability_at(method, 10.0).unwrap();
            assert_relative_eq!(p, 0.5, epsilon = 0.01);
        }
    }

    #[test]
    fn test_profile_crossings_on_quadratic_log_density() {
        // log density = -0.5 (x-10)^2: a drop of d sits at x = 10 + sqrt(2d).
        let xs: Vec<f64> = (0..=80).map(|i| 10.0 + 0.05 * i as f64).collect();
        let log_ys: Vec<f64> = xs.iter().map(|x| -0.5 * (x - 10.0) * (x - 10.0)).collect();
        let (a, b) = profile_crossings(&xs, &log_ys, 10.0, 1.92, 1.35, 0.05).unwrap();
        assert!(!a.used_linear);
        assert!(!b.used_linear);
        assert_relative_eq!(a.x, 10.0 + 3.84f64.sqrt(), max_relative = 0.01);
        assert_relative_eq!(b.x, 10.0 + 2.70f64.sqrt(), max_relative = 0.01);
    }

    #[test]
    fn test_crossing_disagreement_falls_back_to_linear_for_both_thresholds() {
        // A coarse, strongly curved scan: the spline and piecewise-linear
        // readings of the deep threshold differ well beyond 5%.
        let xs = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let log_ys: Vec<f64> = xs.iter().map(|x| -0.5 * (x - 10.0) * (x - 10.0)).collect();
        let (a, b) = profile_crossings(&xs, &log_ys, 10.0, 1.92, 1.35, 1e-4).unwrap();
        assert!(a.used_linear && b.used_linear);
        // The kept crossings are the linear ones at both thresholds.
        let l = |d: f64| {
            brentq(|x| Ok(-linear_interp(&xs, &log_ys, x) - d), 10.0, 15.0, 0.0).unwrap()
        };
        assert_relative_eq!(a.x, l(1.92), epsilon = 1e-9);
        assert_relative_eq!(b.x, l(1.35), epsilon = 1e-9);
    }

    #[test]
    fn test_chi2_helpers() {
        // 95% two-sided-equivalent threshold for 1 dof.
        assert_relative_eq!(chi2_quantile(0.95).unwrap(), 3.841, max_relative = 1e-3);
        assert_relative_eq!(chi2_quantile(0.9).unwrap(), 2.706, max_relative = 1e-3);
        assert_relative_eq!(chi2_cdf(3.841).unwrap(), 0.95, epsilon = 1e-3);
        // P = 0.95 corresponds to z = 1.645.
        assert_relative_eq!(chi2_equivalent(0.95).unwrap(), 1.645 * 1.645, max_relative = 1e-3);
        // Clamped extremes stay finite.
        assert!(chi2_equivalent(0.0).unwrap().is_finite());
        assert!(chi2_equivalent(1.0).unwrap().is_finite());
    }

    #[test]
    fn test_linear_interp_hits_knots_and_midpoints() {
        let xs = [0.0, 1.0, 3.0];
        let ys = [0.0, 2.0, 4.0];
        assert_eq!(linear_interp(&xs, &ys, 1.0), 2.0);
        assert_relative_eq!(linear_interp(&xs, &ys, 0.5), 1.0, epsilon = 1e-12);
        assert_relative_eq!(linear_interp(&xs, &ys, 2.0), 3.0, epsilon = 1e-12);
        assert_eq!(linear_interp(&xs, &ys, -1.0), 0.0);
        assert_eq!(linear_interp(&xs, &ys, 9.0), 4.0);
    }
}
