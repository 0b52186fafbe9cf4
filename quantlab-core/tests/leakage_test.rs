//! Leakage isolation tests for per-fold normalization.
//!
//! Invariant: normalization constants come from training rows only. Adding
//! a row to the training window must move the constants and the normalized
//! test values; swapping train and test must too. Changing test rows must
//! never move the constants.

use chrono::NaiveDate;
use quantlab_core::domain::AsOfPanelRow;
use quantlab_core::normalize::{Feature, FeatureNormalizer};

fn row(ret_20d: f64) -> AsOfPanelRow {
    let mut r = AsOfPanelRow::empty("AAA", "stock", NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
    r.ret_20d = Some(ret_20d);
    r.adv20_dollar = Some(1e6);
    r.fwd_ret_5d = Some(0.0);
    r
}

fn rows(values: &[f64]) -> Vec<AsOfPanelRow> {
    values.iter().copied().map(row).collect()
}

#[test]
fn extra_training_row_changes_constants_and_test_values() {
    let test = rows(&[25.0, 50.0]);

    let small = FeatureNormalizer::fit(&rows(&[10.0, 20.0, 30.0]));
    let large = FeatureNormalizer::fit(&rows(&[10.0, 20.0, 30.0, 40.0]));
    assert_ne!(small.get(Feature::Ret20d), large.get(Feature::Ret20d));

    let z_small = FeatureNormalizer::transform(&small, &test);
    let z_large = FeatureNormalizer::transform(&large, &test);
    for (a, b) in z_small.iter().zip(&z_large) {
        assert_ne!(a.z(Feature::Ret20d), b.z(Feature::Ret20d));
    }
}

#[test]
fn swapping_train_and_test_changes_constants() {
    let a = rows(&[1.0, 2.0, 3.0]);
    let b = rows(&[10.0, 30.0, 70.0]);
    assert_ne!(
        FeatureNormalizer::fit(&a).get(Feature::Ret20d),
        FeatureNormalizer::fit(&b).get(Feature::Ret20d)
    );
}

#[test]
fn test_rows_never_feed_the_constants() {
    let train = rows(&[10.0, 20.0, 30.0]);
    let stats = FeatureNormalizer::fit(&train);
    let before = stats.clone();
    let _ = FeatureNormalizer::transform(&stats, &rows(&[1e9, -1e9]));
    assert_eq!(stats, before);
    // z for the training mean is exactly zero
    let z = FeatureNormalizer::transform(&stats, &rows(&[20.0]));
    assert_eq!(z[0].z(Feature::Ret20d), 0.0);
}
