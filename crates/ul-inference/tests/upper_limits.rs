//! End-to-end checks of the Bayesian and profile upper limits on small
//! analytic likelihoods.

use std::sync::atomic::{AtomicU32, Ordering};

use approx::assert_relative_eq;
use ul_core::{Error, LikelihoodEngine};
use ul_inference::engine::FnEngine;
use ul_inference::{bayesian_upper_limit, profile_upper_limit, UpperLimitOptions};

/// Single free normalization with a unit-Gaussian log-likelihood:
/// nll = 0.5 (x - 10)^2, best fit 10, error 1.
fn gaussian_engine() -> FnEngine {
    FnEngine::builder()
        .param("norm", 10.0, (0.0, 1000.0))
        .nll(|p: &[f64]| {
            let u = p[0] - 10.0;
            Ok(0.5 * u * u)
        })
        .flux(|p: &[f64], _emin, _emax| Ok(3.0 * p[0]))
        .build()
        .unwrap()
}

/// Two correlated parameters: profiling `bkg` leaves a broadened cost
/// 3/8 (x - 10)^2 along `norm`.
fn correlated_engine() -> FnEngine {
    FnEngine::builder()
        .param("norm", 10.0, (0.0, 1000.0))
        .param("bkg", 3.0, (-100.0, 100.0))
        .nll(|p: &[f64]| {
            let u = p[0] - 10.0;
            let v = p[1] - 3.0;
            Ok(0.5 * (u * u + v * v + u * v))
        })
        .build()
        .unwrap()
}

fn snapshot(engine: &FnEngine) -> Vec<(f64, (f64, f64), bool, f64)> {
    (0..engine.n_params())
        .map(|i| (engine.value(i), engine.bounds(i), engine.is_free(i), engine.error(i)))
        .collect()
}

#[test]
fn test_gaussian_bayesian_limit_is_one_sided_95_quantile() {
    let mut eng = gaussian_engine();
    let (limit, result) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_relative_eq!(limit, 11.645, max_relative = 0.02);
    assert_eq!(result.limit, limit);
    assert!(result.hi_converged);
    assert!(result.lo_converged);
    // Flux conversion at the limiting parameter value.
    assert_relative_eq!(result.flux_limit.unwrap(), 3.0 * limit, max_relative = 1e-10);
    // The two cumulative representations agree on a smooth density.
    assert!(result.extraction.relative_deviation < 0.01);
}

#[test]
fn test_result_reports_the_peak_fit() {
    let mut eng = gaussian_engine();
    let (_, result) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_relative_eq!(result.peak_value, 10.0, epsilon = 1e-6);
    assert_relative_eq!(result.peak_error, 1.0, epsilon = 1e-4);
    // One parameter, frozen for the scan: nothing is left to refit.
    assert!(result.all_frozen);

    let mut eng = correlated_engine();
    let (_, result) = profile_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_relative_eq!(result.peak_value, 10.0, epsilon = 1e-4);
    assert!(result.peak_error > 0.0);
    // The nuisance stays free during the profile refits.
    assert!(!result.all_frozen);
}

#[test]
fn test_frozen_parameter_is_refit_before_the_threshold_search() {
    // The caller left the scan parameter frozen away from its optimum; the
    // global fit must still move it to the peak before anchoring the
    // threshold there.
    let mut eng = gaussian_engine();
    eng.set_value(0, 5.0);
    eng.set_free(0, false);
    let (p_limit, result) = profile_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_relative_eq!(result.peak_value, 10.0, epsilon = 1e-6);
    assert_relative_eq!(p_limit, 11.645, max_relative = 0.01);
    // The caller's frozen state comes back on exit.
    assert_eq!(eng.value(0), 5.0);
    assert!(!eng.is_free(0));

    let mut eng = gaussian_engine();
    eng.set_value(0, 5.0);
    eng.set_free(0, false);
    let (b_limit, _) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_relative_eq!(b_limit, 11.645, max_relative = 0.02);
}

#[test]
fn test_gaussian_profile_limit_matches_bayesian() {
    let mut eng = gaussian_engine();
    let (limit, result) = profile_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    // 0.5 (x-10)^2 = 0.5 chi2inv(0.90, 1) = 1.3528 at x = 10 + 1.6449.
    assert_relative_eq!(limit, 11.645, max_relative = 0.01);
    assert!(result.converged);
    assert_relative_eq!(result.delta, 1.3528, max_relative = 1e-3);
}

#[test]
fn test_profiled_nuisance_broadens_both_limits_identically() {
    let mut eng = correlated_engine();
    let (b_limit, _) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    let (p_limit, _) = profile_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    // Profiled cost 3/8 u^2: the 95% crossing sits at u = sqrt(1.3528/0.375).
    let expected = 10.0 + (1.3528f64 / 0.375).sqrt();
    assert_relative_eq!(p_limit, expected, max_relative = 0.02);
    assert_relative_eq!(b_limit, expected, max_relative = 0.03);
}

#[test]
fn test_freeze_all_makes_zero_optimizer_calls() {
    let mut eng = correlated_engine();
    let opts = UpperLimitOptions {
        freeze_all: true,
        skip_global_opt: true,
        ..UpperLimitOptions::default()
    };
    eng.reset_counters();
    let (limit, _) = bayesian_upper_limit(&mut eng, "norm", &opts).unwrap();
    assert_eq!(eng.n_optimize_calls(), 0);
    // Nuisance frozen at 3 (its conditional optimum at u = 0): the scan
    // still sees a clean quadratic and yields the unbroadened limit.
    assert_relative_eq!(limit, 11.645, max_relative = 0.02);
}

#[test]
fn test_too_small_window_is_reported_not_silently_clipped() {
    let mut eng = gaussian_engine();
    let before = snapshot(&eng);
    let opts = UpperLimitOptions { delta_log_like: 0.1, ..UpperLimitOptions::default() };
    let err = bayesian_upper_limit(&mut eng, "norm", &opts).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(snapshot(&eng), before);
}

#[test]
fn test_tight_parameter_bound_is_reported() {
    // Hard upper bound at 10.5: cost there is 0.125, far below the 95%
    // threshold, so the window cannot cover the confidence level.
    let mut eng = FnEngine::builder()
        .param("norm", 10.0, (0.0, 10.5))
        .nll(|p: &[f64]| {
            let u = p[0] - 10.0;
            Ok(0.5 * u * u)
        })
        .build()
        .unwrap();
    let err = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn test_points_of_interest_interior_and_beyond() {
    let mut eng = gaussian_engine();
    let opts = UpperLimitOptions {
        points_of_interest: vec![10.5, 1e3],
        ..UpperLimitOptions::default()
    };
    let (_, result) = bayesian_upper_limit(&mut eng, "norm", &opts).unwrap();
    let interior = result.points_of_interest[0];
    let beyond = result.points_of_interest[1];
    assert!(interior.probability > 0.0 && interior.probability < 1.0);
    // Below-the-fit mass plus half of the rest: P(10.5) for a unit
    // Gaussian centered at 10 is Phi(0.5).
    assert_relative_eq!(interior.probability, 0.6915, max_relative = 0.02);
    assert_eq!(beyond.probability, 1.0);
    assert!(beyond.chi2.is_finite());
}

#[test]
fn test_point_probability_read_path_is_idempotent() {
    let mut eng = gaussian_engine();
    let (_, result) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    let a = result.point_probability(10.8).unwrap();
    let b = result.point_probability(10.8).unwrap();
    assert_eq!(a.probability.to_bits(), b.probability.to_bits());
    assert_eq!(a.chi2.to_bits(), b.chi2.to_bits());
    // Boundary behavior of the stored representation.
    assert_eq!(result.point_probability(result.xlo - 1.0).unwrap().probability, 0.0);
    assert_eq!(result.point_probability(result.xhi + 1.0).unwrap().probability, 1.0);
}

#[test]
fn test_repeat_calls_are_bit_identical() {
    let mut eng = gaussian_engine();
    let (first, _) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    let (second, _) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_eq!(first.to_bits(), second.to_bits());
}

#[test]
fn test_state_restored_after_success() {
    let mut eng = correlated_engine();
    let before = snapshot(&eng);
    bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_eq!(snapshot(&eng), before);
    profile_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    assert_eq!(snapshot(&eng), before);
}

#[test]
fn test_state_restored_after_midway_failure() {
    // NLL starts failing after enough evaluations to get past the global
    // fit, so the failure lands inside the scan.
    let calls = AtomicU32::new(0);
    let mut eng = FnEngine::builder()
        .param("norm", 10.0, (0.0, 1000.0))
        .nll(move |p: &[f64]| {
            if calls.fetch_add(1, Ordering::Relaxed) > 200 {
                return Err(Error::Computation("synthetic NLL failure".into()));
            }
            let u = p[0] - 10.0;
            Ok(0.5 * u * u)
        })
        .build()
        .unwrap();
    let before = snapshot(&eng);
    let err = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Computation(_) | Error::Optimizer(_)));
    assert_eq!(snapshot(&eng), before);
}

#[test]
fn test_limit_grows_with_confidence_level() {
    let mut eng = gaussian_engine();
    let mut previous = f64::NEG_INFINITY;
    for cl in [0.90, 0.95, 0.99] {
        let opts = UpperLimitOptions { cl, ..UpperLimitOptions::default() };
        let (limit, _) = bayesian_upper_limit(&mut eng, "norm", &opts).unwrap();
        assert!(limit > previous, "limit at cl={cl} did not grow");
        previous = limit;
    }
}

#[test]
fn test_profile_cross_check_agrees_with_profile_limit() {
    let mut eng = gaussian_engine();
    let (_, bayes) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    let (p_limit, _) = profile_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    // The two-sided-threshold crossing read off the scan is the same
    // quantity the frequentist path solves for directly.
    assert_relative_eq!(bayes.profile_two_sided.x, p_limit, max_relative = 0.01);
    assert!(bayes.profile_cl.x > bayes.profile_two_sided.x);
}

#[test]
fn test_frequentist_points_of_interest_probabilities() {
    let mut eng = gaussian_engine();
    let opts = UpperLimitOptions {
        points_of_interest: vec![10.0, 11.0, 9.0],
        ..UpperLimitOptions::default()
    };
    let (_, result) = profile_upper_limit(&mut eng, "norm", &opts).unwrap();
    assert_eq!(result.points_of_interest.len(), 3);
    let at_fit = result.points_of_interest[0];
    let above = result.points_of_interest[1];
    let below = result.points_of_interest[2];
    // At the best fit chi2 = 0 and the one-sided probability is 1/2.
    assert_relative_eq!(at_fit.probability, 0.5, epsilon = 1e-6);
    // One sigma above: 0.5 (1 + F(1)) = Phi(1).
    assert_relative_eq!(above.chi2, 1.0, epsilon = 1e-4);
    assert_relative_eq!(above.probability, 0.8413, max_relative = 1e-3);
    // One sigma below: 0.5 (1 - F(1)) = 1 - Phi(1).
    assert_relative_eq!(below.probability, 0.1587, max_relative = 1e-3);
}

#[test]
fn test_no_lo_bound_search_integrates_from_the_fit() {
    let mut eng = gaussian_engine();
    let opts = UpperLimitOptions { no_lo_bound_search: true, ..UpperLimitOptions::default() };
    let (limit, result) = bayesian_upper_limit(&mut eng, "norm", &opts).unwrap();
    assert_relative_eq!(result.xlo, 10.0, epsilon = 1e-12);
    // Half-Gaussian 95% quantile: 10 + 1.96.
    assert_relative_eq!(limit, 11.96, max_relative = 0.02);
}

#[test]
fn test_careful_mode_reproduces_the_default_limit() {
    let mut eng = gaussian_engine();
    let (plain, _) = bayesian_upper_limit(&mut eng, "norm", &UpperLimitOptions::default()).unwrap();
    let opts = UpperLimitOptions { be_very_careful: true, ..UpperLimitOptions::default() };
    let (careful, result) = bayesian_upper_limit(&mut eng, "norm", &opts).unwrap();
    assert_relative_eq!(careful, plain, max_relative = 5e-3);
    // The tighter tolerance visits at least as many points.
    assert!(result.xs.len() >= 5);
}
