//! Property tests for the robustness proxies.
//!
//! 1. PSR bounds — analytic and bootstrap PSR stay in [0, 1]
//! 2. Single fold — PSR is 1 exactly when the value is positive
//! 3. Deflation — DSR never exceeds PSR, equal only without a penalty
//! 4. CPCV-light degeneracy — one value collapses every statistic onto it
//! 5. Stress-lite — fail share is a share, scenario means are ordered

use proptest::prelude::*;
use quantlab_core::domain::RunId;
use quantlab_runner::robustness::{
    cpcv_light, dsr_penalty, dsr_proxy, psr_bootstrap_proxy, psr_proxy, stress_lite, StressLimits, SCENARIOS,
};

fn arb_sharpes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-3.0f64..3.0, 0..12)
}

fn limits() -> StressLimits {
    StressLimits {
        sharpe_mean_min: -0.05,
        maxdd_mean_max: 28.0,
    }
}

proptest! {
    #[test]
    fn psr_is_a_probability(sharpes in arb_sharpes()) {
        let psr = psr_proxy(&sharpes);
        prop_assert!((0.0..=1.0).contains(&psr));
        let boot = psr_bootstrap_proxy(&sharpes, 64, &RunId::new("prop"), "tsmom_20");
        prop_assert!((0.0..=1.0).contains(&boot));
    }

    #[test]
    fn single_fold_psr_is_the_sign(v in -3.0f64..3.0) {
        let expected = if v > 0.0 { 1.0 } else { 0.0 };
        prop_assert_eq!(psr_proxy(&[v]), expected);
        prop_assert_eq!(psr_bootstrap_proxy(&[v], 64, &RunId::new("prop"), "c"), expected);
    }

    #[test]
    fn bootstrap_is_reproducible(sharpes in arb_sharpes(), resamples in 1usize..200) {
        let run = RunId::new("stageb_prop");
        prop_assert_eq!(
            psr_bootstrap_proxy(&sharpes, resamples, &run, "xsec_mom"),
            psr_bootstrap_proxy(&sharpes, resamples, &run, "xsec_mom")
        );
    }

    #[test]
    fn dsr_never_exceeds_psr(psr in 0.0f64..=1.0, count in 1usize..500) {
        let dsr = dsr_proxy(psr, count);
        prop_assert!(dsr <= psr);
        prop_assert!(dsr >= 0.0);
        if count > 1 && psr > dsr_penalty(count) {
            prop_assert!(dsr < psr);
        }
        prop_assert!(dsr_penalty(count) <= 0.30);
    }

    #[test]
    fn cpcv_single_value_is_degenerate(v in -3.0f64..3.0, min_combo in 1usize..4) {
        let c = cpcv_light(&[v], min_combo);
        prop_assert_eq!(c.mean, v);
        prop_assert_eq!(c.min, v);
        prop_assert_eq!(c.p25, v);
        prop_assert_eq!(c.p10, v);
        prop_assert_eq!(c.neg_share == 1.0, v < 0.0);
    }

    #[test]
    fn cpcv_statistics_are_ordered(sharpes in prop::collection::vec(-3.0f64..3.0, 2..8)) {
        let c = cpcv_light(&sharpes, 1);
        prop_assert!(c.min <= c.p10 + 1e-12);
        prop_assert!(c.p10 <= c.p25 + 1e-12);
        prop_assert!(c.min <= c.mean + 1e-12);
        prop_assert!((0.0..=1.0).contains(&c.neg_share));
        // sizes 1..k of k folds
        let k = sharpes.len() as u32;
        prop_assert_eq!(c.paths_total, (1usize << k) - 2);
    }

    #[test]
    fn stress_fail_share_is_a_share(
        sharpes in prop::collection::vec(-1.0f64..1.0, 1..6),
        turnover in 0.0f64..4.0,
        maxdd in 0.0f64..40.0,
    ) {
        let n = sharpes.len();
        let s = stress_lite(&sharpes, &vec![turnover; n], &vec![maxdd; n], limits());
        prop_assert_eq!(s.scenarios_total, SCENARIOS.len());
        prop_assert!((0.0..=1.0).contains(&s.fail_share));
        for r in &s.scenarios {
            prop_assert!(s.worst_mean_sharpe <= r.mean_sharpe);
            prop_assert!(s.worst_mean_maxdd >= r.mean_maxdd);
        }
    }
}

#[test]
fn no_folds_fail_every_stress_check() {
    let s = stress_lite(&[], &[], &[], limits());
    assert_eq!(s.fail_share, 1.0);
}

#[test]
fn dsr_penalty_is_zero_for_one_candidate() {
    assert_eq!(dsr_penalty(1), 0.0);
    assert_eq!(dsr_proxy(0.8, 1), 0.8);
}
