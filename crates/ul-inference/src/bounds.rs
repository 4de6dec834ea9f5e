//! Threshold-crossing search along one side of the best fit.
//!
//! Finds the x at which the profiled cost rises to a target level `subval`,
//! using cheap nuisance-frozen evaluations to propose roots and expensive
//! exact evaluations only to confirm and re-anchor them. Each exact
//! evaluation leaves the nuisance parameters near the crossing, so the next
//! approximate pass is already close to the exact curve there.

use crate::cache::{ApproxCache, EvaluationCache};
use crate::cost::ProfileCost;
use crate::root::brentq;
use ul_core::{LikelihoodEngine, Result};

/// Iterations of the approximate/exact refinement loop.
pub const NLOOPMAX: usize = 5;

/// Geometric expansion steps allowed in the fallback bracket search.
const MAX_EXPANSIONS: usize = 50;

/// One side's crossing point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundResult {
    /// Parameter value at (or nearest to) the crossing.
    pub x: f64,
    /// Exact profiled cost at `x`.
    pub cost: f64,
    /// False when the search budget ran out or the hard bound was hit
    /// before the cost reached `subval`.
    pub converged: bool,
}

/// Configuration for one crossing search.
#[derive(Debug, Clone, Copy)]
pub struct IntervalBoundSearch {
    /// Target cost level.
    pub subval: f64,
    /// Best-fit parameter value; searches start here.
    pub fitval: f64,
    /// Hard parameter bound on the searched side.
    pub hard_bound: f64,
    /// Acceptance tolerance on `|exact cost - subval|`.
    pub tol: f64,
    /// x tolerance handed to the bracketing root finder.
    pub xtol: f64,
}

impl IntervalBoundSearch {
    /// Run the search. The side is implied by the sign of
    /// `hard_bound - fitval`.
    pub fn find(
        &self,
        cost: &ProfileCost,
        engine: &mut impl LikelihoodEngine,
        cache: &mut EvaluationCache,
    ) -> Result<BoundResult> {
        let increasing = self.hard_bound > self.fitval;
        let peak = cost.exact(engine, self.fitval, cache)?;

        // Shrinking bracket, kept as (inner, outer) relative to fitval.
        let mut inner = self.fitval;
        let mut outer = self.hard_bound;
        let mut last = (self.fitval, peak);

        for _ in 0..NLOOPMAX {
            if !self.ordered(inner, outer, increasing) {
                // Degenerate bracket: the last tested point stands.
                let converged = (last.1 - self.subval).abs() <= self.tol;
                if !converged {
                    log::warn!(
                        "bound search bracket collapsed at x={} (cost {} vs target {})",
                        last.0,
                        last.1,
                        self.subval
                    );
                }
                return Ok(BoundResult { x: last.0, cost: last.1, converged });
            }

            let mut acache = ApproxCache::seeded(last.0, last.1);
            let g_inner = cost.approx(engine, inner, &mut acache)? - self.subval;
            let g_outer = cost.approx(engine, outer, &mut acache)? - self.subval;
            if g_inner * g_outer > 0.0 {
                break;
            }

            let (bl, bh) = if increasing { (inner, outer) } else { (outer, inner) };
            let root = brentq(
                |x| Ok(cost.approx(engine, x, &mut acache)? - self.subval),
                bl,
                bh,
                self.xtol,
            )?;

            let exact = cost.exact(engine, root, cache)?;
            if (exact - self.subval).abs() <= self.tol {
                return Ok(BoundResult { x: root, cost: exact, converged: true });
            }
            if exact < self.subval {
                inner = root;
            } else {
                outer = root;
            }
            last = (root, exact);
        }

        self.fallback(cost, engine, cache, increasing)
    }

    /// Cache-implied bracket plus geometric expansion, then one exact
    /// bracketing root find.
    fn fallback(
        &self,
        cost: &ProfileCost,
        engine: &mut impl LikelihoodEngine,
        cache: &mut EvaluationCache,
        increasing: bool,
    ) -> Result<BoundResult> {
        let (inner, implied_outer) = cache.implied_bracket(self.fitval, self.subval, increasing);

        let outer = match implied_outer {
            Some(o) => o,
            None => {
                let mut offset = inner - self.fitval;
                if offset == 0.0 {
                    let span = (self.hard_bound - self.fitval).abs();
                    offset = if increasing { span * 1e-3 } else { -span * 1e-3 };
                }
                let mut found = None;
                for _ in 0..MAX_EXPANSIONS {
                    offset *= 10.0;
                    let mut x = self.fitval + offset;
                    let at_bound = if increasing {
                        x >= self.hard_bound
                    } else {
                        x <= self.hard_bound
                    };
                    if at_bound {
                        x = self.hard_bound;
                    }
                    let c = cost.exact(engine, x, cache)?;
                    if c >= self.subval {
                        found = Some(x);
                        break;
                    }
                    if at_bound {
                        // The likelihood never falls enough before the hard
                        // bound; the bound itself is the best answer.
                        log::warn!(
                            "cost at hard bound {} is {} (< target {}); \
                             returning the bound itself",
                            x,
                            c,
                            self.subval
                        );
                        return Ok(BoundResult { x, cost: c, converged: false });
                    }
                }
                match found {
                    Some(o) => o,
                    None => {
                        let c = cache.cost_at(inner).unwrap_or(f64::NAN);
                        log::warn!(
                            "bracket expansion exhausted on side toward {}; \
                             returning x={}",
                            self.hard_bound,
                            inner
                        );
                        return Ok(BoundResult { x: inner, cost: c, converged: false });
                    }
                }
            }
        };

        let (bl, bh) = if increasing { (inner, outer) } else { (outer, inner) };
        let root = brentq(
            |x| Ok(cost.exact(engine, x, cache)? - self.subval),
            bl,
            bh,
            self.xtol,
        )?;
        let exact = cost.exact(engine, root, cache)?;
        Ok(BoundResult { x: root, cost: exact, converged: true })
    }

    fn ordered(&self, inner: f64, outer: f64, increasing: bool) -> bool {
        if increasing {
            inner < outer
        } else {
            outer < inner
        }
    }
}
