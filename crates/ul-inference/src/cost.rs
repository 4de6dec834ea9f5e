//! Profile cost function: delta-NLL at a fixed parameter-of-interest value.
//!
//! `cost(x) = nll(x) - reference_nll`, with the parameter of interest held
//! fixed at `x` and (unless `no_optimizer`) every other free parameter
//! re-optimized first. The evaluation caches are threaded through every call
//! rather than captured, so the root finders below stay generic over plain
//! evaluator closures.

use crate::cache::{ApproxCache, EvaluationCache};
use ul_core::{LikelihoodEngine, Result};

/// Context for cost evaluations during one top-level call.
///
/// The parameter of interest must already be frozen in the engine; this
/// context only ever writes its value. Evaluations mutate the live
/// engine; callers snapshot and restore around the whole search.
#[derive(Debug, Clone)]
pub struct ProfileCost {
    /// Index of the parameter of interest.
    pub poi: usize,
    /// Indices of the free nuisance parameters, in cache-vector order.
    pub free_nuisance: Vec<usize>,
    /// NLL at the global optimum; subtracted from every evaluation.
    pub reference_nll: f64,
    /// Skip the optimizer entirely (all other parameters frozen).
    pub no_optimizer: bool,
    /// Verbosity handed to the engine's optimizer (one below the caller's).
    pub verbosity: u32,
}

impl ProfileCost {
    /// Build a context, collecting the free nuisance indices from the engine.
    pub fn new(
        engine: &impl LikelihoodEngine,
        poi: usize,
        reference_nll: f64,
        no_optimizer: bool,
        verbosity: u32,
    ) -> Self {
        let free_nuisance =
            (0..engine.n_params()).filter(|&i| i != poi && engine.is_free(i)).collect();
        Self { poi, free_nuisance, reference_nll, no_optimizer, verbosity }
    }

    fn harvest_nuisance(&self, engine: &impl LikelihoodEngine) -> Vec<f64> {
        self.free_nuisance.iter().map(|&i| engine.value(i)).collect()
    }

    /// Exact profiled cost at `x`.
    ///
    /// Cache hit returns with zero engine calls. Otherwise the nuisance
    /// warm-start guess is applied, the engine is re-optimized (one retry on
    /// failure, then the error propagates), and both cost and nuisance
    /// vector are written back into the cache.
    pub fn exact(
        &self,
        engine: &mut impl LikelihoodEngine,
        x: f64,
        cache: &mut EvaluationCache,
    ) -> Result<f64> {
        if let Some(c) = cache.cost_at(x) {
            return Ok(c);
        }

        engine.set_value(self.poi, x);

        if self.no_optimizer {
            let cost = engine.nll()? - self.reference_nll;
            cache.insert(x, cost, None);
            log::debug!("cost evaluation (no optimizer): x={x} cost={cost}");
            return Ok(cost);
        }

        cache.apply_nuisance_guess(x, engine, &self.free_nuisance);
        if let Err(e) = engine.optimize(self.verbosity) {
            log::warn!("optimizer failed at x={x}, retrying once: {e}");
            engine.optimize(self.verbosity)?;
        }

        let nuisance = self.harvest_nuisance(engine);
        let cost = engine.nll()? - self.reference_nll;
        cache.insert(x, cost, Some(nuisance));
        log::debug!("cost evaluation: x={x} cost={cost}");
        Ok(cost)
    }

    /// Approximate cost at `x`: nuisance parameters stay frozen at whatever
    /// they were last set to, no optimizer call. Memoized in `acache` only;
    /// approximate values never enter the exact cache.
    pub fn approx(
        &self,
        engine: &mut impl LikelihoodEngine,
        x: f64,
        acache: &mut ApproxCache,
    ) -> Result<f64> {
        if let Some(c) = acache.get(x) {
            return Ok(c);
        }
        engine.set_value(self.poi, x);
        let cost = engine.nll()? - self.reference_nll;
        acache.insert(x, cost);
        log::debug!("approx evaluation: x={x} cost={cost}");
        Ok(cost)
    }
}
