//! Bracketing scalar root finding.
//!
//! Brent's method over fallible evaluators. The evaluator is a plain
//! `FnMut(f64) -> Result<f64>` so callers pass a small context closure bound
//! to their cost function instead of capturing a live model.

use ul_core::{Error, Result};

/// Default iteration budget for [`brentq`].
pub const BRENT_MAX_ITER: usize = 100;

/// Find `x` in `[a, b]` with `f(x) = 0` using Brent's method.
///
/// Requires a sign change over the bracket. `xtol` is the absolute tolerance
/// on x; non-positive values fall back to a tiny floor scaled to the bracket,
/// which covers the `xtol = 0.1 * limlo` convention when the hard lower
/// bound is zero.
pub fn brentq<F>(mut f: F, a: f64, b: f64, xtol: f64) -> Result<f64>
where
    F: FnMut(f64) -> Result<f64>,
{
    if !(a.is_finite() && b.is_finite()) || a >= b {
        return Err(Error::Computation(format!("brentq: invalid bracket [{a}, {b}]")));
    }
    let xtol = if xtol > 0.0 { xtol } else { 1e-12 * (b - a).abs().max(1.0) };

    let mut xa = a;
    let mut xb = b;
    let mut fa = f(xa)?;
    let mut fb = f(xb)?;

    if fa == 0.0 {
        return Ok(xa);
    }
    if fb == 0.0 {
        return Ok(xb);
    }
    if fa.signum() == fb.signum() {
        return Err(Error::Computation(format!(
            "brentq: no sign change over [{xa}, {xb}] (f(a)={fa}, f(b)={fb})"
        )));
    }

    // xc carries the previous iterate; (xb, fb) is always the best estimate.
    let mut xc = xa;
    let mut fc = fa;
    let mut d = xb - xa;
    let mut e = d;

    for _ in 0..BRENT_MAX_ITER {
        if fb.signum() == fc.signum() {
            xc = xa;
            fc = fa;
            d = xb - xa;
            e = d;
        }
        if fc.abs() < fb.abs() {
            xa = xb;
            xb = xc;
            xc = xa;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * xb.abs() + 0.5 * xtol;
        let xm = 0.5 * (xc - xb);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Ok(xb);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when xa == xc.
            let s = fb / fa;
            let (mut p, mut q) = if xa == xc {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q * (q - r) - (xb - xa) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        xa = xb;
        fa = fb;
        if d.abs() > tol1 {
            xb += d;
        } else {
            xb += tol1.copysign(xm);
        }
        fb = f(xb)?;
    }

    Err(Error::Computation(format!(
        "brentq: no convergence in {BRENT_MAX_ITER} iterations (last x={xb}, f={fb})"
    )))
}
