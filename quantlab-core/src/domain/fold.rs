use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One anchored train/test window.
///
/// Invariant for folds produced by the builder:
/// `train_start <= train_end < test_start <= test_end`, with `embargo_days`
/// as-of dates strictly between `train_end` and `test_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fold {
    pub fold_id: String,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub embargo_days: usize,
    pub train_days: usize,
    pub test_days: usize,
    /// Set when the fold was built but had too few panel rows to score.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// As-of dates of the training window (not serialized).
    #[serde(skip)]
    pub train_dates: Vec<NaiveDate>,
    /// As-of dates of the test window (not serialized).
    #[serde(skip)]
    pub test_dates: Vec<NaiveDate>,
}

impl Fold {
    /// `train_start <= train_end < test_start <= test_end`.
    pub fn is_monotonic(&self) -> bool {
        self.train_start <= self.train_end
            && self.train_end < self.test_start
            && self.test_start <= self.test_end
    }

    /// Calendar days strictly between the train end and the test start.
    pub fn calendar_gap_days(&self) -> i64 {
        (self.test_start - self.train_end).num_days() - 1
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.skipped = true;
        self.skip_reason = Some(reason.into());
    }
}
