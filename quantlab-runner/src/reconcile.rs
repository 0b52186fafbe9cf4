//! Cross-checks declared against observed counts across a run's artifacts.
//!
//! Every check is named and reported. Strict mode turns any failed check
//! into a non-zero exit; lenient mode only reports.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use quantlab_core::candidates::CATALOGUE;
use quantlab_core::domain::RunId;

use crate::aggregate::desc;
use crate::artifacts;
use crate::config::PipelineConfig;
use crate::registry::records::{CandidateStateEvent, PromotionDecision, PromotionEvent};
use crate::registry::score::{read_candidates, RegistryCandidate};
use crate::registry::{update, Ledger, LedgerEntry, RegistryError, RegistryPaths, RegistryStore};
use crate::stages::stage_a::{self, StageAOutput};
use crate::stages::stage_b::{read_run_report, stage_b_run_id};
use crate::stages::{exit_code, StageError};

pub const REPORT_SCHEMA: &str = "quantlab.reconciliation_report.v1";
pub const REPORT: &str = "reconciliation_report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    /// The artifacts the check needs do not exist yet.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(name: &str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: if ok { CheckStatus::Pass } else { CheckStatus::Fail },
            detail: detail.into(),
        }
    }

    fn skip(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Skip,
            detail: detail.into(),
        }
    }

    pub fn failed(&self) -> bool {
        self.status == CheckStatus::Fail
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub schema: String,
    /// No check failed.
    pub ok: bool,
    pub strict: bool,
    pub exit_code: i32,
    pub stage_a_run_id: RunId,
    pub stage_b_run_id: RunId,
    pub checks: Vec<Check>,
    pub failed: Vec<String>,
}

pub struct Reconciler<'a> {
    config: &'a PipelineConfig,
    quant_root: PathBuf,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a PipelineConfig, quant_root: &Path) -> Self {
        Self {
            config,
            quant_root: quant_root.to_path_buf(),
        }
    }

    /// Run every check for a Stage A run and the Stage B / registry runs
    /// derived from it. Missing Stage A artifacts are fatal; missing later
    /// artifacts skip the checks that need them.
    pub fn run(&self, stage_a_run_id: &RunId, strict: bool) -> Result<ReconcileReport, RegistryError> {
        let a = stage_a::load_outputs(&self.quant_root, stage_a_run_id)?;
        let b_run_id = stage_b_run_id(stage_a_run_id);

        let mut checks = stage_a_checks(&a);
        checks.extend(self.stage_b_checks(&a, &b_run_id)?);
        checks.extend(self.registry_checks(&b_run_id)?);

        let failed: Vec<String> = checks.iter().filter(|c| c.failed()).map(|c| c.name.clone()).collect();
        let ok = failed.is_empty();
        let report = ReconcileReport {
            schema: REPORT_SCHEMA.into(),
            ok,
            strict,
            exit_code: if strict && !ok { exit_code::RECONCILIATION } else { 0 },
            stage_a_run_id: stage_a_run_id.clone(),
            stage_b_run_id: b_run_id,
            checks,
            failed,
        };
        artifacts::atomic_write_json(
            &artifacts::outputs_dir(&self.quant_root, stage_a_run_id.as_str()).join(REPORT),
            &report,
        )?;
        if ok {
            info!(run_id = %stage_a_run_id, checks = report.checks.len(), "reconciliation passed");
        } else {
            warn!(run_id = %stage_a_run_id, failed = %report.failed.join(","), strict, "reconciliation mismatches");
        }
        Ok(report)
    }

    fn stage_b_checks(&self, a: &StageAOutput, b_run_id: &RunId) -> Result<Vec<Check>, RegistryError> {
        const NAMES: [&str; 4] = [
            "stage_b_candidates_match_stage_a",
            "survivors_subset_of_passing",
            "survivors_within_cap",
            "survivors_sorted",
        ];
        let run_report = match read_run_report(&self.quant_root, b_run_id) {
            Ok(r) => r,
            Err(StageError::MissingArtifact(path)) => {
                return Ok(NAMES
                    .iter()
                    .map(|n| Check::skip(n, format!("no stage B run report at {path}")))
                    .collect())
            }
            Err(e) => return Err(e.into()),
        };
        let candidates = read_candidates(Path::new(&run_report.candidates))?;
        let survivors = read_candidates(Path::new(&run_report.survivors))?;

        let stage_a_ids: BTreeSet<&str> = a.aggregates.iter().map(|c| c.candidate_id.as_str()).collect();
        let stage_b_ids: BTreeSet<&str> = candidates.iter().map(|c| c.candidate_id.as_str()).collect();
        let passing: BTreeSet<&str> = candidates
            .iter()
            .filter(|c| c.pass)
            .map(|c| c.candidate_id.as_str())
            .collect();
        let not_passing: Vec<&str> = survivors
            .iter()
            .map(|s| s.candidate_id.as_str())
            .filter(|id| !passing.contains(id))
            .collect();
        let cap = self.config.gates.strict_survivors_max;
        let unsorted = survivors
            .windows(2)
            .position(|w| stage_b_order(&w[0], &w[1]) == Ordering::Greater);

        Ok(vec![
            Check::new(
                NAMES[0],
                stage_a_ids == stage_b_ids,
                format!("stage_a={} stage_b={}", stage_a_ids.len(), stage_b_ids.len()),
            ),
            Check::new(
                NAMES[1],
                not_passing.is_empty(),
                format!("survivors_not_passing=[{}]", not_passing.join(",")),
            ),
            Check::new(
                NAMES[2],
                survivors.len() <= cap,
                format!("survivors={} cap={cap}", survivors.len()),
            ),
            Check::new(
                NAMES[3],
                unsorted.is_none(),
                unsorted.map_or_else(|| "sorted".to_string(), |i| format!("out of order at position {}", i + 1)),
            ),
        ])
    }

    fn registry_checks(&self, b_run_id: &RunId) -> Result<Vec<Check>, RegistryError> {
        let paths = RegistryPaths::new(&self.quant_root);
        let decisions = Ledger::<PromotionDecision>::new(paths.decisions_ledger()).read()?;
        let events = Ledger::<PromotionEvent>::new(paths.events_ledger()).read()?;
        let state_events = Ledger::<CandidateStateEvent>::new(paths.state_events_ledger()).read()?;

        let mut dupes = decisions.duplicate_ids();
        dupes.extend(events.duplicate_ids());
        dupes.extend(state_events.duplicate_ids());
        let unique = Check::new("ledger_ids_unique", dupes.is_empty(), format!("duplicates=[{}]", dupes.join(",")));

        let name = "registry_decision_in_ledger";
        let in_ledger = match update::read_report(&self.quant_root, b_run_id) {
            Err(RegistryError::Stage(StageError::MissingArtifact(_))) => {
                Check::skip(name, "no registry update for this run")
            }
            Err(e) => return Err(e),
            Ok(report) => {
                let id = report.decision.decision_id.as_str();
                let ledgered = decisions.entries.iter().any(|d| d.ledger_id() == id);
                let stored = paths.db().is_file()
                    && RegistryStore::open(&paths.db())?
                        .decisions_for_run(b_run_id.as_str())?
                        .last()
                        .is_some_and(|d| d.decision_id == id);
                Check::new(name, ledgered && stored, format!("decision_id={id} ledger={ledgered} store={stored}"))
            }
        };
        Ok(vec![in_ledger, unique])
    }
}

fn stage_a_checks(a: &StageAOutput) -> Vec<Check> {
    let manifest = &a.manifest;
    let scored = manifest.scored_fold_ids().len();
    let expected_rows = scored * CATALOGUE.len();
    let with_metrics: BTreeSet<&str> = a.table.candidate_ids().collect();
    let missing: Vec<&str> = a
        .aggregates
        .iter()
        .map(|c| c.candidate_id.as_str())
        .filter(|id| !with_metrics.contains(id))
        .collect();

    vec![
        Check::new(
            "fold_count_built_matches_folds",
            manifest.config.fold_count_built == manifest.folds.len(),
            format!(
                "declared={} observed={}",
                manifest.config.fold_count_built,
                manifest.folds.len()
            ),
        ),
        Check::new(
            "fold_metrics_rows_match_folds_x_candidates",
            a.table.len() == expected_rows,
            format!("rows={} expected={scored}x{}={expected_rows}", a.table.len(), CATALOGUE.len()),
        ),
        Check::new(
            "candidates_have_fold_metrics",
            missing.is_empty(),
            format!("missing=[{}]", missing.join(",")),
        ),
    ]
}

/// Stage B output order: pass, DSR, PSR, IC mean desc, then id.
fn stage_b_order(a: &RegistryCandidate, b: &RegistryCandidate) -> Ordering {
    b.pass
        .cmp(&a.pass)
        .then_with(|| desc(a.dsr_proxy, b.dsr_proxy))
        .then_with(|| desc(a.psr_proxy, b.psr_proxy))
        .then_with(|| desc(a.ic_5d_oos_mean, b.ic_5d_oos_mean))
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::stage_a::tests::{small_config, synthetic_panel};
    use crate::stages::{FoldsManifest, StageA, StageB};

    fn pipeline(dir: &Path, config: &PipelineConfig) -> RunId {
        let panel = synthetic_panel(14, 40);
        let end = panel.summary.asof_date_last.unwrap();
        let run = RunId::stage_a(end);
        let stage = StageA::new(config);
        let out = stage.evaluate(&run, end, &panel).unwrap();
        stage.write(dir, &out).unwrap();
        StageB::new(config).run_loaded(dir, &out).unwrap();
        run
    }

    #[test]
    fn clean_run_passes_and_skips_registry_checks() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let run = pipeline(dir.path(), &config);
        let report = Reconciler::new(&config, dir.path()).run(&run, true).unwrap();

        assert!(report.ok, "{:?}", report.failed);
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.checks.len(), 9);
        let decision = report
            .checks
            .iter()
            .find(|c| c.name == "registry_decision_in_ledger")
            .unwrap();
        assert_eq!(decision.status, CheckStatus::Skip);
        assert!(artifacts::outputs_dir(dir.path(), run.as_str()).join(REPORT).is_file());
    }

    #[test]
    fn mismatch_is_fatal_only_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let run = pipeline(dir.path(), &config);

        let path = artifacts::outputs_dir(dir.path(), run.as_str()).join(stage_a::FOLDS_MANIFEST);
        let mut manifest: FoldsManifest = artifacts::read_json(&path).unwrap();
        manifest.config.fold_count_built += 1;
        artifacts::atomic_write_json(&path, &manifest).unwrap();

        let reconciler = Reconciler::new(&config, dir.path());
        let lenient = reconciler.run(&run, false).unwrap();
        assert!(!lenient.ok);
        assert_eq!(lenient.exit_code, 0);
        assert_eq!(lenient.failed, vec!["fold_count_built_matches_folds"]);

        let strict = reconciler.run(&run, true).unwrap();
        assert_eq!(strict.exit_code, exit_code::RECONCILIATION);
    }

    #[test]
    fn registry_decision_is_found_after_update() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let run = pipeline(dir.path(), &config);
        crate::registry::RegistryUpdate::new(&config.promotion, dir.path())
            .run(&stage_b_run_id(&run), crate::registry::update::tests::at(1))
            .unwrap();

        let report = Reconciler::new(&config, dir.path()).run(&run, true).unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "registry_decision_in_ledger")
            .unwrap();
        assert_eq!(check.status, CheckStatus::Pass, "{}", check.detail);
        assert!(report.ok);
    }

    #[test]
    fn missing_stage_a_is_fatal_input() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let err = Reconciler::new(&config, dir.path())
            .run(&RunId::new("stagea_none"), false)
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_code::FATAL_INPUT);
    }
}
