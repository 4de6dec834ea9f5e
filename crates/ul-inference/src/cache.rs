//! Evaluation caches for the upper-limit search.
//!
//! All cache objects here are constructed fresh at the start of one top-level
//! call and threaded explicitly through every helper; nothing is module-level
//! or shared across calls.

use ul_core::LikelihoodEngine;

/// Memoized exact evaluations, keyed by the scanned parameter value `x`.
///
/// Two parallel mappings: `cost[x]` (delta-NLL relative to the global
/// optimum) and `nuisance[x]` (values of all other free parameters at the
/// optimum found when `x` was evaluated; `None` for evaluations that skipped
/// the optimizer). Entries are append-only within a call, kept sorted by `x`.
#[derive(Debug, Default)]
pub struct EvaluationCache {
    xs: Vec<f64>,
    costs: Vec<f64>,
    nuisances: Vec<Option<Vec<f64>>>,
}

impl EvaluationCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached x values.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Sorted cached x values.
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    fn position(&self, x: f64) -> Result<usize, usize> {
        self.xs.binary_search_by(|v| v.total_cmp(&x))
    }

    /// Cached cost at exactly `x`, if present.
    pub fn cost_at(&self, x: f64) -> Option<f64> {
        self.position(x).ok().map(|i| self.costs[i])
    }

    /// Cached nuisance vector at exactly `x`, if one was stored.
    pub fn nuisance_at(&self, x: f64) -> Option<&[f64]> {
        self.position(x).ok().and_then(|i| self.nuisances[i].as_deref())
    }

    /// Insert an evaluation. A repeated key overwrites cost and, when a
    /// nuisance vector is supplied, the nuisance entry; entries are never
    /// deleted within a call.
    pub fn insert(&mut self, x: f64, cost: f64, nuisance: Option<Vec<f64>>) {
        match self.position(x) {
            Ok(i) => {
                self.costs[i] = cost;
                if nuisance.is_some() {
                    self.nuisances[i] = nuisance;
                }
            }
            Err(i) => {
                self.xs.insert(i, x);
                self.costs.insert(i, cost);
                self.nuisances.insert(i, nuisance);
            }
        }
    }

    /// Warm-start guess for the free nuisance parameters at an untried `x`.
    ///
    /// With at least two cached points and `x` inside the cached range, each
    /// free nuisance parameter is linearly interpolated against `x` and
    /// clamped to its bounds (simple interpolation on purpose; splines are
    /// noise-prone here). Outside the cached range the nearest cached point's
    /// full nuisance vector is applied instead of extrapolating. Points
    /// cached without a nuisance vector are skipped.
    pub fn apply_nuisance_guess(
        &self,
        x: f64,
        engine: &mut impl LikelihoodEngine,
        free_indices: &[usize],
    ) {
        let known: Vec<(f64, &Vec<f64>)> = self
            .xs
            .iter()
            .zip(self.nuisances.iter())
            .filter_map(|(&xi, n)| n.as_ref().map(|v| (xi, v)))
            .collect();
        if known.is_empty() {
            return;
        }

        let lo = known[0].0;
        let hi = known[known.len() - 1].0;

        if known.len() < 2 || x <= lo || x >= hi {
            // Nearest cached point, applied verbatim.
            let nearest = if known.len() < 2 || (x - lo).abs() <= (x - hi).abs() {
                known[0].1
            } else {
                known[known.len() - 1].1
            };
            Self::apply_vector(nearest, engine, free_indices);
            return;
        }

        // Interval containing x; known is sorted because xs is.
        let seg = known.partition_point(|&(xi, _)| xi <= x).saturating_sub(1).min(known.len() - 2);
        let (x0, v0) = (known[seg].0, known[seg].1);
        let (x1, v1) = (known[seg + 1].0, known[seg + 1].1);
        let t = (x - x0) / (x1 - x0);

        for (k, &idx) in free_indices.iter().enumerate() {
            if k >= v0.len() || k >= v1.len() {
                break;
            }
            let p = v0[k] + t * (v1[k] - v0[k]);
            let (blo, bhi) = engine.bounds(idx);
            engine.set_value(idx, p.clamp(blo, bhi));
        }
    }

    fn apply_vector(values: &[f64], engine: &mut impl LikelihoodEngine, free_indices: &[usize]) {
        for (k, &idx) in free_indices.iter().enumerate() {
            if k >= values.len() {
                break;
            }
            let (blo, bhi) = engine.bounds(idx);
            engine.set_value(idx, values[k].clamp(blo, bhi));
        }
    }

    /// Tightest bracket around the threshold crossing already implied by
    /// cached exact points on one side of `fitval`.
    ///
    /// Returns `(inner, outer)` where the cost at `inner` is known to be
    /// below `subval` and the cost at `outer` (if any cached point is beyond
    /// the crossing) is at or above it. `increasing` selects the side.
    pub fn implied_bracket(&self, fitval: f64, subval: f64, increasing: bool) -> (f64, Option<f64>) {
        let mut inner = fitval;
        let mut outer: Option<f64> = None;
        for (&x, &c) in self.xs.iter().zip(self.costs.iter()) {
            let on_side = if increasing { x >= fitval } else { x <= fitval };
            if !on_side {
                continue;
            }
            if c < subval {
                let further = if increasing { x > inner } else { x < inner };
                if further {
                    inner = x;
                }
            } else {
                let tighter = match outer {
                    None => true,
                    Some(o) => {
                        if increasing {
                            x < o
                        } else {
                            x > o
                        }
                    }
                };
                if tighter {
                    outer = Some(x);
                }
            }
        }
        (inner, outer)
    }
}

/// Short-lived memo of approximate-cost evaluations.
///
/// One per bound-search iteration, seeded with the last exact result and
/// discarded at the end of the iteration. Distinct from [`EvaluationCache`]:
/// approximate costs are only valid for the nuisance values frozen at that
/// iteration.
#[derive(Debug, Default)]
pub struct ApproxCache {
    entries: Vec<(f64, f64)>,
}

impl ApproxCache {
    /// New cache seeded with one known exact point (approx == exact there).
    pub fn seeded(x: f64, cost: f64) -> Self {
        Self { entries: vec![(x, cost)] }
    }

    /// Lookup by exact key.
    pub fn get(&self, x: f64) -> Option<f64> {
        self.entries.iter().find(|(xi, _)| xi.total_cmp(&x).is_eq()).map(|&(_, c)| c)
    }

    /// Store an evaluation.
    pub fn insert(&mut self, x: f64, cost: f64) {
        if self.get(x).is_none() {
            self.entries.push((x, cost));
        }
    }
}
