//! Stage B light: fold-policy re-validation, robustness proxies and the
//! strict gate over every Stage A candidate.
//!
//! Artifacts go to `<stage A outputs>/stage_b_light/`; a small run report
//! under `runs/run_id=stageb_<stage A run>/` points the registry at them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use quantlab_core::domain::RunId;
use quantlab_core::folds::{FoldPolicyReport, FoldPolicyValidator};

use super::stage_a::{self, StageAOutput};
use super::{ArtifactRef, StageError};
use crate::artifacts::{self, FoldSummaryRow};
use crate::config::{PipelineConfig, RobustnessConfig};
use crate::gates::{
    select_survivors, sort_stage_b, summarize_failures, FailedExample, GateContext, GateEvaluator, GateThresholds,
    StageBRow,
};
use crate::robustness::RobustnessEngine;

pub const REPORT_SCHEMA: &str = "quantlab.stage_b_light_report.v1";
pub const RUN_REPORT_SCHEMA: &str = "quantlab.stage_b_run_report.v1";

pub const SUBDIR: &str = "stage_b_light";
pub const CANDIDATES: &str = "stage_b_light_candidates.parquet";
pub const SURVIVORS: &str = "survivors_B_light.parquet";
pub const FOLD_SUMMARY: &str = "fold_summary.parquet";
pub const STRESS: &str = "stress_lite_fold_scenarios.parquet";
pub const FOLD_POLICY: &str = "fold_policy_validation.json";
pub const CANDIDATES_CSV: &str = "stage_b_light_candidates.csv";
pub const REPORT: &str = "stage_b_light_report.json";
pub const RUN_REPORT: &str = "stage_b_run_report.json";

/// `stageb_<stage A run id>`.
pub fn stage_b_run_id(stage_a_run_id: &RunId) -> RunId {
    RunId::new(format!("stageb_{stage_a_run_id}"))
}

/// Directory holding the Stage B light artifacts of a Stage A run.
pub fn stage_b_dir(quant_root: &Path, stage_a_run_id: &RunId) -> PathBuf {
    artifacts::outputs_dir(quant_root, stage_a_run_id.as_str()).join(SUBDIR)
}

/// Everything Stage B computes, before anything is written.
#[derive(Debug, Clone)]
pub struct StageBOutput {
    pub run_id: RunId,
    pub stage_a_run_id: RunId,
    pub policy: FoldPolicyReport,
    pub context: GateContext,
    /// Sorted by (pass, DSR, PSR, IC mean) desc, then id.
    pub rows: Vec<StageBRow>,
    pub survivors: Vec<StageBRow>,
    pub fold_summary: Vec<FoldSummaryRow>,
}

impl StageBOutput {
    pub fn passing(&self) -> usize {
        self.rows.iter().filter(|r| r.pass()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBCounts {
    pub candidates_total: usize,
    pub passing_total: usize,
    pub survivors_total: usize,
    pub folds_built: usize,
    pub folds_scored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBReport {
    pub schema: String,
    pub ok: bool,
    pub run_id: RunId,
    pub stage_a_run_id: RunId,
    pub config_hash: String,
    pub counts: StageBCounts,
    pub fold_policy_ok: bool,
    pub gate_context: GateContext,
    pub thresholds: GateThresholds,
    pub robustness: RobustnessConfig,
    pub fail_reason_counts: Vec<(String, usize)>,
    pub failed_examples: Vec<FailedExample>,
    pub survivors: Vec<String>,
    pub artifacts: BTreeMap<String, ArtifactRef>,
}

/// Pointer file the registry update starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBRunReport {
    pub schema: String,
    pub ok: bool,
    pub exit_code: i32,
    pub run_id: RunId,
    pub stage_a_run_id: RunId,
    pub stage_b_light_report: String,
    pub candidates: String,
    pub survivors: String,
}

pub struct StageB<'a> {
    config: &'a PipelineConfig,
}

impl<'a> StageB<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn validate_policy(&self, stage_a: &StageAOutput) -> FoldPolicyReport {
        FoldPolicyValidator::new(self.config.policy.requirements())
            .validate(&stage_a.manifest.config, &stage_a.manifest.folds)
    }

    /// Robustness and gates for every Stage A candidate.
    pub fn evaluate(&self, stage_a: &StageAOutput, policy: FoldPolicyReport) -> StageBOutput {
        let stage_a_run_id = stage_a.manifest.run_id.clone();
        let run_id = stage_b_run_id(&stage_a_run_id);
        let thresholds = self.config.gates.clone();
        let context = GateContext::new(
            policy.ok,
            self.config.policy.require_fold_policy_valid,
            self.config.policy.fold_count_min,
            stage_a.manifest.config.fold_count_built,
        );
        let engine = RobustnessEngine::new(&self.config.robustness, thresholds.stress_limits());
        let evaluator = GateEvaluator::new(thresholds, context);
        let candidate_count = stage_a.aggregates.len();

        let mut rows: Vec<StageBRow> = stage_a
            .aggregates
            .iter()
            .map(|agg| {
                let robustness = engine.evaluate(&run_id, &agg.candidate_id, &stage_a.table, candidate_count);
                let gates = evaluator.evaluate(agg, &robustness);
                StageBRow {
                    aggregate: agg.clone(),
                    robustness,
                    gates,
                }
            })
            .collect();
        sort_stage_b(&mut rows);
        let survivors = select_survivors(&rows, self.config.gates.strict_survivors_max);

        let output = StageBOutput {
            run_id,
            stage_a_run_id,
            policy,
            context,
            fold_summary: artifacts::fold_summary(&stage_a.table),
            rows,
            survivors,
        };
        info!(
            run_id = %output.run_id,
            candidates = output.rows.len(),
            passing = output.passing(),
            survivors = output.survivors.len(),
            "stage B light evaluated"
        );
        output
    }

    /// Write every Stage B artifact plus the run report.
    pub fn write(&self, quant_root: &Path, stage_a: &StageAOutput, output: &StageBOutput) -> Result<StageBReport, StageError> {
        let dir = stage_b_dir(quant_root, &output.stage_a_run_id);
        let mut refs = BTreeMap::new();

        let path = dir.join(FOLD_POLICY);
        artifacts::atomic_write_json(&path, &output.policy)?;
        refs.insert("fold_policy_validation".to_string(), ArtifactRef::of(&path)?);

        let path = dir.join(CANDIDATES);
        artifacts::write_frame(&mut artifacts::stage_b_frame(&output.rows)?, &path)?;
        refs.insert("stage_b_light_candidates".to_string(), ArtifactRef::of(&path)?);

        let path = dir.join(SURVIVORS);
        artifacts::write_frame(&mut artifacts::stage_b_frame(&output.survivors)?, &path)?;
        refs.insert("survivors_B_light".to_string(), ArtifactRef::of(&path)?);

        let path = dir.join(FOLD_SUMMARY);
        artifacts::write_frame(&mut artifacts::fold_summary_frame(&output.fold_summary)?, &path)?;
        refs.insert("fold_summary".to_string(), ArtifactRef::of(&path)?);

        let path = dir.join(STRESS);
        artifacts::write_frame(&mut artifacts::stress_frame(&output.rows)?, &path)?;
        refs.insert("stress_lite_fold_scenarios".to_string(), ArtifactRef::of(&path)?);

        let path = dir.join(CANDIDATES_CSV);
        artifacts::atomic_write(&path, artifacts::export_stage_b_csv(&output.rows)?.as_bytes())?;
        refs.insert("stage_b_light_candidates_csv".to_string(), ArtifactRef::of(&path)?);

        let summary = summarize_failures(&output.rows);
        let report = StageBReport {
            schema: REPORT_SCHEMA.into(),
            ok: true,
            run_id: output.run_id.clone(),
            stage_a_run_id: output.stage_a_run_id.clone(),
            config_hash: self.config.config_hash(),
            counts: StageBCounts {
                candidates_total: output.rows.len(),
                passing_total: output.passing(),
                survivors_total: output.survivors.len(),
                folds_built: stage_a.manifest.folds.len(),
                folds_scored: stage_a.manifest.scored_fold_ids().len(),
            },
            fold_policy_ok: output.policy.ok,
            gate_context: output.context,
            thresholds: self.config.gates.clone(),
            robustness: self.config.robustness.clone(),
            fail_reason_counts: summary.fail_reason_counts,
            failed_examples: summary.failed_examples,
            survivors: output.survivors.iter().map(|r| r.candidate_id().to_string()).collect(),
            artifacts: refs,
        };
        let report_path = dir.join(REPORT);
        artifacts::atomic_write_json(&report_path, &report)?;

        let run_report = StageBRunReport {
            schema: RUN_REPORT_SCHEMA.into(),
            ok: true,
            exit_code: 0,
            run_id: output.run_id.clone(),
            stage_a_run_id: output.stage_a_run_id.clone(),
            stage_b_light_report: report_path.display().to_string(),
            candidates: dir.join(CANDIDATES).display().to_string(),
            survivors: dir.join(SURVIVORS).display().to_string(),
        };
        artifacts::atomic_write_json(
            &artifacts::run_dir(quant_root, output.run_id.as_str()).join(RUN_REPORT),
            &run_report,
        )?;
        info!(run_id = %output.run_id, dir = %dir.display(), "stage B light artifacts written");
        Ok(report)
    }

    /// Load Stage A artifacts, validate the fold policy, evaluate and write.
    ///
    /// The policy report is written before an invalid policy aborts the
    /// run, so the failure can be inspected.
    pub fn run(&self, quant_root: &Path, stage_a_run_id: &RunId) -> Result<(StageBOutput, StageBReport), StageError> {
        let stage_a = stage_a::load_outputs(quant_root, stage_a_run_id)?;
        self.run_loaded(quant_root, &stage_a)
    }

    /// Like [`StageB::run`] with Stage A outputs already in memory.
    pub fn run_loaded(&self, quant_root: &Path, stage_a: &StageAOutput) -> Result<(StageBOutput, StageBReport), StageError> {
        let policy = self.validate_policy(stage_a);
        if !policy.ok {
            let codes: Vec<String> = policy.error_codes().iter().map(|c| c.to_string()).collect();
            if self.config.policy.require_fold_policy_valid {
                let dir = stage_b_dir(quant_root, &stage_a.manifest.run_id);
                artifacts::atomic_write_json(&dir.join(FOLD_POLICY), &policy)?;
                return Err(StageError::PolicyViolation { codes });
            }
            warn!(codes = %codes.join(","), "fold policy invalid; continuing because validity is not required");
        }
        let output = self.evaluate(stage_a, policy);
        let report = self.write(quant_root, stage_a, &output)?;
        Ok((output, report))
    }
}

/// Read the run report written by [`StageB::write`].
pub fn read_run_report(quant_root: &Path, stage_b_run_id: &RunId) -> Result<StageBRunReport, StageError> {
    let path = artifacts::run_dir(quant_root, stage_b_run_id.as_str()).join(RUN_REPORT);
    super::require_file(&path)?;
    Ok(artifacts::read_json(&path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::stage_a::tests::{small_config, synthetic_panel};
    use crate::stages::StageA;
    use quantlab_core::candidates::CATALOGUE;

    fn stage_a_output(config: &PipelineConfig) -> StageAOutput {
        let panel = synthetic_panel(14, 40);
        let end = panel.summary.asof_date_last.unwrap();
        StageA::new(config)
            .evaluate(&RunId::stage_a(end), end, &panel)
            .unwrap()
    }

    #[test]
    fn every_stage_a_candidate_is_evaluated() {
        let config = small_config();
        let a = stage_a_output(&config);
        let stage = StageB::new(&config);
        let policy = stage.validate_policy(&a);
        assert!(policy.ok, "{:?}", policy.errors);
        let b = stage.evaluate(&a, policy);

        assert_eq!(b.run_id.as_str(), "stageb_stagea_tsplits_2024-01-14");
        assert_eq!(b.rows.len(), CATALOGUE.len());
        assert_eq!(b.context.folds_used_min, 3);
        assert!(b.rows.iter().all(|r| r.robustness.folds_observed == 3));
        assert!(b.survivors.len() <= config.gates.strict_survivors_max);
        assert!(b.survivors.iter().all(StageBRow::pass));
        assert_eq!(b.fold_summary.len(), 3);
        // passing rows first
        let first_fail = b.rows.iter().position(|r| !r.pass()).unwrap_or(b.rows.len());
        assert!(b.rows[first_fail..].iter().all(|r| !r.pass()));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let config = small_config();
        let a = stage_a_output(&config);
        let stage = StageB::new(&config);
        let x = stage.evaluate(&a, stage.validate_policy(&a));
        let y = stage.evaluate(&a, stage.validate_policy(&a));
        assert_eq!(x.rows, y.rows);
    }

    #[test]
    fn invalid_policy_is_fatal_unless_waived() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.policy.test_days_min = 5;
        let a = stage_a_output(&config);

        let err = StageB::new(&config).run_loaded(dir.path(), &a).unwrap_err();
        match &err {
            StageError::PolicyViolation { codes } => {
                assert_eq!(codes, &vec!["TEST_DAYS_BELOW_MIN", "TEST_DAYS_BELOW_MIN_PER_FOLD"])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(stage_b_dir(dir.path(), &a.manifest.run_id).join(FOLD_POLICY).is_file());

        config.policy.require_fold_policy_valid = false;
        let (b, report) = StageB::new(&config).run_loaded(dir.path(), &a).unwrap();
        assert!(!report.fold_policy_ok);
        // the policy gate is waived, not failed
        assert!(b.rows.iter().all(|r| r.gates.checks[0]));
    }

    #[test]
    fn written_report_points_at_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let a = stage_a_output(&config);
        let (b, report) = StageB::new(&config).run_loaded(dir.path(), &a).unwrap();

        assert_eq!(report.counts.candidates_total, 8);
        assert_eq!(report.artifacts.len(), 6);
        let run_report = read_run_report(dir.path(), &b.run_id).unwrap();
        assert_eq!(run_report.stage_a_run_id, a.manifest.run_id);
        assert!(Path::new(&run_report.candidates).is_file());
        let csv = std::fs::read_to_string(stage_b_dir(dir.path(), &a.manifest.run_id).join(CANDIDATES_CSV)).unwrap();
        assert_eq!(csv.lines().count(), 9);
    }
}
