//! Fold policy validation.
//!
//! Re-checks a fold set loaded from a fold manifest against configured
//! minima. Errors make the set invalid; warnings are informational. The
//! caller decides whether an invalid set is fatal.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::domain::Fold;

// ─── Inputs ──────────────────────────────────────────────────────────

/// Minimum values a fold set must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRequirements {
    pub fold_count_min: usize,
    pub embargo_days_min: usize,
    pub test_days_min: usize,
    pub min_train_days_min: usize,
}

impl Default for PolicyRequirements {
    fn default() -> Self {
        Self {
            fold_count_min: 3,
            embargo_days_min: 2,
            test_days_min: 5,
            min_train_days_min: 8,
        }
    }
}

/// The `config` block of a fold manifest.
///
/// A zero in `test_days`, `embargo_days` or `min_train_days` means "not
/// declared" and skips the config-level check for that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldManifestConfig {
    pub panel_asof_days: usize,
    pub fold_count_requested: usize,
    pub fold_count_built: usize,
    pub test_days: usize,
    pub embargo_days: usize,
    pub min_train_days: usize,
    pub top_liquid_n: usize,
}

// ─── Issues ──────────────────────────────────────────────────────────

/// One validation finding. The string code is stable and is what reports
/// and gate reasons carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyIssue {
    NoFolds,
    FoldCountBelowMin { built: usize, min: usize },
    TestDaysBelowMin { configured: usize, min: usize },
    EmbargoDaysBelowMin { configured: usize, min: usize },
    MinTrainDaysBelowMin { configured: usize, min: usize },
    DuplicateFoldId(String),
    NonMonotonicWindows(String),
    TestWindowOverlap(String),
    TestDaysBelowMinPerFold(String),
    TrainDaysBelowMinPerFold(String),
    EmbargoDaysBelowMinPerFold(String),
    NegativeEmbargoGap(String),
    // warnings
    FoldCountBuiltMismatch { declared: usize, actual: usize },
    AnchorDrift(String),
    TestDaysMismatch(String),
    EmbargoDaysMismatch(String),
    LowCalendarEmbargoGap { fold_id: String, gap: i64 },
}

impl PolicyIssue {
    pub fn code(&self) -> &'static str {
        use PolicyIssue::*;
        match self {
            NoFolds => "NO_FOLDS",
            FoldCountBelowMin { .. } => "FOLD_COUNT_BELOW_MIN",
            TestDaysBelowMin { .. } => "TEST_DAYS_BELOW_MIN",
            EmbargoDaysBelowMin { .. } => "EMBARGO_DAYS_BELOW_MIN",
            MinTrainDaysBelowMin { .. } => "MIN_TRAIN_DAYS_BELOW_MIN",
            DuplicateFoldId(_) => "DUPLICATE_FOLD_ID",
            NonMonotonicWindows(_) => "NON_MONOTONIC_WINDOWS",
            TestWindowOverlap(_) => "TEST_WINDOW_OVERLAP",
            TestDaysBelowMinPerFold(_) => "TEST_DAYS_BELOW_MIN_PER_FOLD",
            TrainDaysBelowMinPerFold(_) => "TRAIN_DAYS_BELOW_MIN_PER_FOLD",
            EmbargoDaysBelowMinPerFold(_) => "EMBARGO_DAYS_BELOW_MIN_PER_FOLD",
            NegativeEmbargoGap(_) => "NEGATIVE_EMBARGO_GAP",
            FoldCountBuiltMismatch { .. } => "fold_count_built_mismatch",
            AnchorDrift(_) => "ANCHOR_DRIFT",
            TestDaysMismatch(_) => "TEST_DAYS_MISMATCH",
            EmbargoDaysMismatch(_) => "EMBARGO_DAYS_MISMATCH",
            LowCalendarEmbargoGap { .. } => "LOW_CALENDAR_EMBARGO_GAP",
        }
    }

    /// The fold this issue refers to, when it is fold-specific.
    pub fn fold_id(&self) -> Option<&str> {
        use PolicyIssue::*;
        match self {
            DuplicateFoldId(id)
            | NonMonotonicWindows(id)
            | TestWindowOverlap(id)
            | TestDaysBelowMinPerFold(id)
            | TrainDaysBelowMinPerFold(id)
            | EmbargoDaysBelowMinPerFold(id)
            | NegativeEmbargoGap(id)
            | AnchorDrift(id)
            | TestDaysMismatch(id)
            | EmbargoDaysMismatch(id) => Some(id),
            LowCalendarEmbargoGap { fold_id, .. } => Some(fold_id),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PolicyIssue::*;
        let code = self.code();
        match self {
            NoFolds => f.write_str(code),
            FoldCountBelowMin { built, min } => write!(f, "{code}:{built}<{min}"),
            TestDaysBelowMin { configured, min }
            | EmbargoDaysBelowMin { configured, min }
            | MinTrainDaysBelowMin { configured, min } => write!(f, "{code}:{configured}<{min}"),
            FoldCountBuiltMismatch { declared, actual } => write!(f, "{code}:{declared}!={actual}"),
            LowCalendarEmbargoGap { fold_id, gap } => write!(f, "{code}:{fold_id}:{gap}"),
            other => write!(f, "{code}:{}", other.fold_id().unwrap_or_default()),
        }
    }
}

impl Serialize for PolicyIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ─── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyCounts {
    pub folds_total: usize,
    pub fold_ids_unique: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldPolicyReport {
    pub ok: bool,
    pub errors: Vec<PolicyIssue>,
    pub warnings: Vec<PolicyIssue>,
    pub counts: PolicyCounts,
    pub config: FoldManifestConfig,
    pub requirements: PolicyRequirements,
}

impl FoldPolicyReport {
    /// Distinct error codes, in first-seen order.
    pub fn error_codes(&self) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        self.errors
            .iter()
            .map(PolicyIssue::code)
            .filter(|c| seen.insert(*c))
            .collect()
    }
}

// ─── Validator ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FoldPolicyValidator {
    requirements: PolicyRequirements,
}

impl FoldPolicyValidator {
    pub fn new(requirements: PolicyRequirements) -> Self {
        Self { requirements }
    }

    pub fn validate(&self, config: &FoldManifestConfig, folds: &[Fold]) -> FoldPolicyReport {
        let req = &self.requirements;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let built = if config.fold_count_built > 0 {
            config.fold_count_built
        } else {
            folds.len()
        };
        if built != folds.len() {
            warnings.push(PolicyIssue::FoldCountBuiltMismatch {
                declared: built,
                actual: folds.len(),
            });
        }
        if folds.is_empty() {
            errors.push(PolicyIssue::NoFolds);
        }
        if built < req.fold_count_min {
            errors.push(PolicyIssue::FoldCountBelowMin {
                built,
                min: req.fold_count_min,
            });
        }
        if config.test_days > 0 && config.test_days < req.test_days_min {
            errors.push(PolicyIssue::TestDaysBelowMin {
                configured: config.test_days,
                min: req.test_days_min,
            });
        }
        if config.embargo_days > 0 && config.embargo_days < req.embargo_days_min {
            errors.push(PolicyIssue::EmbargoDaysBelowMin {
                configured: config.embargo_days,
                min: req.embargo_days_min,
            });
        }
        if config.min_train_days > 0 && config.min_train_days < req.min_train_days_min {
            errors.push(PolicyIssue::MinTrainDaysBelowMin {
                configured: config.min_train_days,
                min: req.min_train_days_min,
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut anchor = None;
        let mut prev_test_end = None;

        for fold in folds {
            let id = fold.fold_id.clone();
            if !seen.insert(fold.fold_id.as_str()) {
                errors.push(PolicyIssue::DuplicateFoldId(id.clone()));
            }
            if !fold.is_monotonic() {
                errors.push(PolicyIssue::NonMonotonicWindows(id.clone()));
            }
            match anchor {
                None => anchor = Some(fold.train_start),
                Some(a) if a != fold.train_start => warnings.push(PolicyIssue::AnchorDrift(id.clone())),
                Some(_) => {}
            }
            if prev_test_end.is_some_and(|end| fold.test_start <= end) {
                errors.push(PolicyIssue::TestWindowOverlap(id.clone()));
            }
            prev_test_end = Some(fold.test_end);

            if config.test_days > 0 && fold.test_days != config.test_days {
                warnings.push(PolicyIssue::TestDaysMismatch(id.clone()));
            }
            if fold.test_days < req.test_days_min {
                errors.push(PolicyIssue::TestDaysBelowMinPerFold(id.clone()));
            }
            if fold.train_days < req.min_train_days_min {
                errors.push(PolicyIssue::TrainDaysBelowMinPerFold(id.clone()));
            }
            if config.embargo_days > 0 && fold.embargo_days != config.embargo_days {
                warnings.push(PolicyIssue::EmbargoDaysMismatch(id.clone()));
            }
            if fold.embargo_days < req.embargo_days_min {
                errors.push(PolicyIssue::EmbargoDaysBelowMinPerFold(id.clone()));
            }

            // Trading-day and calendar-day gaps differ, so a short calendar
            // gap is only a warning.
            let gap = fold.calendar_gap_days();
            if config.embargo_days > 0 && gap < 0 {
                errors.push(PolicyIssue::NegativeEmbargoGap(id.clone()));
            }
            if gap < req.embargo_days_min as i64 {
                warnings.push(PolicyIssue::LowCalendarEmbargoGap { fold_id: id, gap });
            }
        }

        FoldPolicyReport {
            ok: errors.is_empty(),
            counts: PolicyCounts {
                folds_total: folds.len(),
                fold_ids_unique: seen.len(),
            },
            errors,
            warnings,
            config: config.clone(),
            requirements: req.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn fold(id: &str, train_end: u32, test_start: u32, test_end: u32) -> Fold {
        Fold {
            fold_id: id.into(),
            train_start: d(1),
            train_end: d(train_end),
            test_start: d(test_start),
            test_end: d(test_end),
            embargo_days: 2,
            train_days: train_end as usize,
            test_days: 5,
            skipped: false,
            skip_reason: None,
            train_dates: Vec::new(),
            test_dates: Vec::new(),
        }
    }

    fn config(built: usize) -> FoldManifestConfig {
        FoldManifestConfig {
            fold_count_requested: 3,
            fold_count_built: built,
            test_days: 5,
            embargo_days: 2,
            min_train_days: 8,
            ..Default::default()
        }
    }

    fn valid_folds() -> Vec<Fold> {
        vec![
            fold("fold_1", 8, 11, 15),
            fold("fold_2", 13, 16, 20),
            fold("fold_3", 18, 21, 25),
        ]
    }

    #[test]
    fn well_formed_set_is_ok() {
        let report = FoldPolicyValidator::default().validate(&config(3), &valid_folds());
        assert!(report.ok, "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(report.counts.folds_total, 3);
        assert_eq!(report.counts.fold_ids_unique, 3);
    }

    #[test]
    fn empty_set_reports_no_folds_and_count() {
        let report = FoldPolicyValidator::default().validate(&config(0), &[]);
        assert!(!report.ok);
        assert_eq!(report.error_codes(), vec!["NO_FOLDS", "FOLD_COUNT_BELOW_MIN"]);
    }

    #[test]
    fn overlap_and_duplicates_are_errors() {
        let mut folds = valid_folds();
        folds[1] = fold("fold_1", 12, 14, 20);
        let report = FoldPolicyValidator::default().validate(&config(3), &folds);
        let codes = report.error_codes();
        assert!(codes.contains(&"DUPLICATE_FOLD_ID"));
        assert!(codes.contains(&"TEST_WINDOW_OVERLAP"));
        assert_eq!(
            report.errors.iter().find(|e| e.code() == "TEST_WINDOW_OVERLAP").unwrap().to_string(),
            "TEST_WINDOW_OVERLAP:fold_1"
        );
    }

    #[test]
    fn non_monotonic_window_is_an_error() {
        let mut folds = valid_folds();
        folds[2] = fold("fold_3", 22, 21, 25);
        let report = FoldPolicyValidator::default().validate(&config(3), &folds);
        assert!(report.error_codes().contains(&"NON_MONOTONIC_WINDOWS"));
        assert!(report.error_codes().contains(&"NEGATIVE_EMBARGO_GAP"));
    }

    #[test]
    fn anchor_drift_and_mismatches_are_warnings() {
        let mut folds = valid_folds();
        folds[1].train_start = d(2);
        folds[2].test_days = 6;
        let report = FoldPolicyValidator::default().validate(&config(3), &folds);
        assert!(report.ok);
        let codes: Vec<_> = report.warnings.iter().map(PolicyIssue::code).collect();
        assert_eq!(codes, vec!["ANCHOR_DRIFT", "TEST_DAYS_MISMATCH"]);
    }

    #[test]
    fn short_calendar_gap_warns_with_gap_value() {
        let folds = vec![
            fold("fold_1", 8, 10, 15),
            fold("fold_2", 13, 16, 20),
            fold("fold_3", 18, 21, 25),
        ];
        let report = FoldPolicyValidator::default().validate(&config(3), &folds);
        assert!(report.ok);
        assert_eq!(report.warnings[0].to_string(), "LOW_CALENDAR_EMBARGO_GAP:fold_1:1");
    }

    #[test]
    fn config_minima_checked_only_when_declared() {
        let mut cfg = config(3);
        cfg.test_days = 0;
        cfg.embargo_days = 1;
        let report = FoldPolicyValidator::default().validate(&cfg, &valid_folds());
        let codes = report.error_codes();
        assert!(!codes.contains(&"TEST_DAYS_BELOW_MIN"));
        assert!(codes.contains(&"EMBARGO_DAYS_BELOW_MIN"));
    }

    #[test]
    fn declared_count_mismatch_is_a_warning() {
        let report = FoldPolicyValidator::default().validate(&config(4), &valid_folds());
        assert_eq!(report.warnings[0].to_string(), "fold_count_built_mismatch:4!=3");
    }

    #[test]
    fn issues_serialize_as_strings() {
        let json = serde_json::to_string(&PolicyIssue::AnchorDrift("fold_2".into())).unwrap();
        assert_eq!(json, "\"ANCHOR_DRIFT:fold_2\"");
    }
}
