//! Property tests for fold construction.
//!
//! Uses proptest to verify, for every policy that builds:
//! 1. Window monotonicity — train_start <= train_end < test_start <= test_end
//! 2. No test overlap — test windows are ordered and disjoint
//! 3. Anchoring — every fold trains from the first date
//! 4. Embargo — exactly `embargo_days` dates sit between train and test
//! 5. Validator agreement — built folds never trip structural policy errors

use chrono::NaiveDate;
use proptest::prelude::*;
use quantlab_core::folds::{
    FoldBuilder, FoldError, FoldManifestConfig, FoldPolicy, FoldPolicyValidator, PolicyRequirements,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_policy() -> impl Strategy<Value = FoldPolicy> {
    (1usize..6, 1usize..15, 0usize..6, 1usize..40).prop_map(|(fold_count, test_days, embargo_days, min_train_days)| {
        FoldPolicy {
            fold_count,
            test_days,
            embargo_days,
            min_train_days,
        }
    })
}

fn dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    (0..n)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect()
}

proptest! {
    #[test]
    fn built_folds_are_monotonic_and_disjoint(policy in arb_policy(), n in 0usize..160) {
        let d = dates(n);
        match FoldBuilder::new(policy.clone()).build(&d) {
            Ok(folds) => {
                prop_assert!(!folds.is_empty());
                prop_assert!(folds.len() <= policy.fold_count);
                for f in &folds {
                    prop_assert!(f.is_monotonic());
                    prop_assert_eq!(f.train_start, d[0]);
                    prop_assert!(f.train_days >= policy.min_train_days);
                    prop_assert_eq!(f.test_dates.len(), policy.test_days);
                }
                for pair in folds.windows(2) {
                    prop_assert!(pair[0].test_end < pair[1].test_start);
                }
                prop_assert_eq!(folds.last().unwrap().test_end, d[n - 1]);
            }
            Err(FoldError::InsufficientDates { available, required }) => {
                prop_assert_eq!(available, n);
                prop_assert!(n < required);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    #[test]
    fn embargo_gap_is_exact(policy in arb_policy(), extra in 0usize..60) {
        let n = policy.min_dates() + extra;
        let d = dates(n);
        let folds = FoldBuilder::new(policy.clone()).build(&d).unwrap();
        for f in &folds {
            let last_train = *f.train_dates.last().unwrap();
            let first_test = f.test_dates[0];
            let between = d.iter().filter(|x| **x > last_train && **x < first_test).count();
            prop_assert_eq!(between, policy.embargo_days);
        }
    }

    #[test]
    fn validator_accepts_what_builder_produces(policy in arb_policy(), extra in 0usize..60) {
        let d = dates(policy.min_dates() + extra);
        let folds = FoldBuilder::new(policy.clone()).build(&d).unwrap();
        let config = FoldManifestConfig {
            fold_count_requested: policy.fold_count,
            fold_count_built: folds.len(),
            test_days: policy.test_days,
            embargo_days: policy.embargo_days,
            min_train_days: policy.min_train_days,
            ..Default::default()
        };
        // Requirements of zero isolate the structural checks.
        let validator = FoldPolicyValidator::new(PolicyRequirements {
            fold_count_min: 0,
            embargo_days_min: 0,
            test_days_min: 0,
            min_train_days_min: 0,
        });
        let report = validator.validate(&config, &folds);
        prop_assert!(report.ok, "errors: {:?}", report.errors);
        prop_assert_eq!(report.counts.fold_ids_unique, folds.len());
    }
}

// ── Fixed scenarios ──────────────────────────────────────────────────

#[test]
fn fourteen_date_scenario_tiles_last_six_dates() {
    let d = dates(14);
    let policy = FoldPolicy {
        fold_count: 3,
        test_days: 2,
        embargo_days: 1,
        min_train_days: 4,
    };
    let folds = FoldBuilder::new(policy).build(&d).unwrap();
    assert_eq!(folds.len(), 3);
    assert!(folds.iter().all(|f| f.train_start == d[0] && f.test_days == 2));
    let tested: Vec<NaiveDate> = folds.iter().flat_map(|f| f.test_dates.iter().copied()).collect();
    assert_eq!(tested, d[8..]);
}
