//! Anchored walk-forward folds with an embargo gap.
//!
//! Folds are laid out backward from the most recent as-of date. Every fold
//! trains from the first available date (anchored), leaves `embargo_days`
//! dates unused after the training window, and tests on the next
//! `test_days` dates. Test windows tile the tail of the date range without
//! overlapping.
//!
//! ```text
//! dates:  0 ........................................ n-1
//! fold_1: [train ......]  e  [test]
//! fold_2: [train ..............]  e  [test]
//! fold_3: [train ......................]  e  [test]
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Fold;

// ─── Configuration ───────────────────────────────────────────────────

/// Fold construction policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldPolicy {
    /// Number of folds requested (default 3).
    pub fold_count: usize,
    /// As-of dates per test window (default 20).
    pub test_days: usize,
    /// As-of dates skipped between train end and test start (default 5).
    pub embargo_days: usize,
    /// Minimum as-of dates in a training window (default 60).
    pub min_train_days: usize,
}

impl Default for FoldPolicy {
    fn default() -> Self {
        Self {
            fold_count: 3,
            test_days: 20,
            embargo_days: 5,
            min_train_days: 60,
        }
    }
}

impl FoldPolicy {
    /// Fewest dates that can hold one fold.
    pub fn min_dates(&self) -> usize {
        self.min_train_days + self.embargo_days + self.test_days
    }
}

/// Errors from fold construction. All of them are fatal for a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldError {
    #[error("insufficient as-of dates ({available}) for folds; need at least {required}")]
    InsufficientDates { available: usize, required: usize },
    #[error("no valid folds produced from {available} dates with {fold_count} requested")]
    NoValidFolds { available: usize, fold_count: usize },
    #[error("invalid fold policy: {0}")]
    InvalidPolicy(String),
}

// ─── Fold creation ───────────────────────────────────────────────────

/// Builds anchored, embargoed folds over a sorted list of distinct dates.
#[derive(Debug, Clone)]
pub struct FoldBuilder {
    policy: FoldPolicy,
}

impl FoldBuilder {
    pub fn new(policy: FoldPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FoldPolicy {
        &self.policy
    }

    /// Build folds over `dates` (ascending, distinct).
    ///
    /// For fold `i` of `fold_count`:
    /// - `test_end = n - 1 - (fold_count - 1 - i) * test_days`
    /// - `test_start = test_end - test_days + 1`
    /// - `train_end = test_start - embargo_days - 1`
    ///
    /// A fold whose indices fall before the first date, or whose training
    /// window is shorter than `min_train_days`, is discarded. Surviving folds
    /// are numbered `fold_1..` in order.
    pub fn build(&self, dates: &[NaiveDate]) -> Result<Vec<Fold>, FoldError> {
        let p = &self.policy;
        if p.fold_count == 0 {
            return Err(FoldError::InvalidPolicy("fold_count must be >= 1".into()));
        }
        if p.test_days == 0 {
            return Err(FoldError::InvalidPolicy("test_days must be >= 1".into()));
        }

        let n = dates.len();
        if n < p.min_dates() {
            return Err(FoldError::InsufficientDates {
                available: n,
                required: p.min_dates(),
            });
        }

        let n = n as i64;
        let test_days = p.test_days as i64;
        let embargo = p.embargo_days as i64;
        let mut folds: Vec<Fold> = Vec::with_capacity(p.fold_count);

        for i in 0..p.fold_count as i64 {
            let remaining_after = (p.fold_count as i64 - 1 - i) * test_days;
            let test_end_idx = n - 1 - remaining_after;
            let test_start_idx = test_end_idx - test_days + 1;
            let train_end_idx = test_start_idx - embargo - 1;
            if test_start_idx < 0 || train_end_idx < 0 {
                continue;
            }
            let train_days = (train_end_idx + 1) as usize;
            if train_days < p.min_train_days {
                continue;
            }

            let (tr_end, te_start, te_end) = (
                train_end_idx as usize,
                test_start_idx as usize,
                test_end_idx as usize,
            );
            folds.push(Fold {
                fold_id: format!("fold_{}", folds.len() + 1),
                train_start: dates[0],
                train_end: dates[tr_end],
                test_start: dates[te_start],
                test_end: dates[te_end],
                embargo_days: p.embargo_days,
                train_days,
                test_days: p.test_days,
                skipped: false,
                skip_reason: None,
                train_dates: dates[..=tr_end].to_vec(),
                test_dates: dates[te_start..=te_end].to_vec(),
            });
        }

        if folds.is_empty() {
            return Err(FoldError::NoValidFolds {
                available: dates.len(),
                fold_count: p.fold_count,
            });
        }
        Ok(folds)
    }
}

/// Sorted, de-duplicated dates.
pub fn distinct_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Vec<NaiveDate> {
    let mut out: Vec<NaiveDate> = dates.into_iter().collect();
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    fn policy(fold_count: usize, test: usize, embargo: usize, min_train: usize) -> FoldPolicy {
        FoldPolicy {
            fold_count,
            test_days: test,
            embargo_days: embargo,
            min_train_days: min_train,
        }
    }

    // ─── Layout tests ───────────────────────────────────────────────

    #[test]
    fn fourteen_dates_three_folds_tile_the_tail() {
        let d = dates(14);
        let folds = FoldBuilder::new(policy(3, 2, 1, 4)).build(&d).unwrap();

        assert_eq!(folds.len(), 3);
        for f in &folds {
            assert_eq!(f.train_start, d[0]);
            assert_eq!(f.test_days, 2);
            assert_eq!(f.test_dates.len(), 2);
            assert!(f.is_monotonic());
        }
        let tested: Vec<NaiveDate> = folds.iter().flat_map(|f| f.test_dates.clone()).collect();
        assert_eq!(tested, d[8..].to_vec());

        // fold_1: test 8..=9, train_end = 8 - 1 - 1 = 6
        assert_eq!(folds[0].fold_id, "fold_1");
        assert_eq!(folds[0].train_end, d[6]);
        assert_eq!(folds[0].train_days, 7);
        assert_eq!(folds[2].test_end, d[13]);
    }

    #[test]
    fn embargo_dates_are_excluded_from_both_windows() {
        let d = dates(30);
        let folds = FoldBuilder::new(policy(2, 5, 3, 5)).build(&d).unwrap();
        for f in &folds {
            let last_train = *f.train_dates.last().unwrap();
            let first_test = f.test_dates[0];
            let gap = d.iter().filter(|x| **x > last_train && **x < first_test).count();
            assert_eq!(gap, 3);
        }
    }

    #[test]
    fn short_folds_are_discarded_and_renumbered() {
        // 12 dates, 3 folds of 3 test days, embargo 1, min train 4:
        // the oldest fold would train on 2 dates and is dropped
        let d = dates(12);
        let folds = FoldBuilder::new(policy(3, 3, 1, 4)).build(&d).unwrap();
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].fold_id, "fold_1");
        assert_eq!(folds[1].fold_id, "fold_2");
        assert_eq!(folds[1].test_end, d[11]);
    }

    // ─── Error tests ────────────────────────────────────────────────

    #[test]
    fn insufficient_dates_is_rejected() {
        let err = FoldBuilder::new(policy(3, 2, 1, 4)).build(&dates(6)).unwrap_err();
        assert_eq!(
            err,
            FoldError::InsufficientDates {
                available: 6,
                required: 7
            }
        );
    }

    #[test]
    fn minimum_date_count_always_keeps_the_latest_fold() {
        // The most recent fold trains on n - test - embargo dates, so once the
        // global minimum holds it can never be discarded.
        let p = policy(5, 2, 1, 4);
        let folds = FoldBuilder::new(p.clone()).build(&dates(p.min_dates())).unwrap();
        assert_eq!(folds.len(), 1);
        assert_eq!(folds[0].train_days, 4);
    }

    #[test]
    fn zero_fold_count_is_invalid() {
        let err = FoldBuilder::new(policy(0, 2, 1, 4)).build(&dates(20)).unwrap_err();
        assert!(matches!(err, FoldError::InvalidPolicy(_)));
    }

    #[test]
    fn distinct_dates_sorts_and_dedups() {
        let d = dates(3);
        let out = distinct_dates(vec![d[2], d[0], d[2], d[1]]);
        assert_eq!(out, d);
    }
}
