//! Stage A: anchored time splits over the as-of panel, per-fold scoring of
//! the candidate catalogue, cross-fold aggregates and the proxy gate.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use quantlab_core::candidates::CATALOGUE;
use quantlab_core::data::{FeatureStore, Panel, PanelCache, PanelLoader, PanelSummary};
use quantlab_core::domain::{AsOfPanelRow, Fold, FoldMetric, FoldMetricTable, RunId};
use quantlab_core::folds::{FoldBuilder, FoldManifestConfig};
use quantlab_core::normalize::FeatureNormalizer;
use quantlab_core::scoring::{sort_metrics, CandidateScorer};

use super::{require_file, ArtifactRef, StageError};
use crate::aggregate::{aggregate_candidates, sort_stage_a, stage_a_survivors, CandidateAggregate};
use crate::artifacts;
use crate::config::{PipelineConfig, ProxyGate};

pub const MANIFEST_SCHEMA: &str = "quantlab.folds_manifest.v1";
pub const REPORT_SCHEMA: &str = "quantlab.stage_a_report.v1";
pub const FOLD_METHOD: &str = "anchored_time_splits_with_embargo";
pub const TARGET: &str = "fwd_ret_5d";

pub const FOLDS_MANIFEST: &str = "folds_manifest.json";
pub const FOLD_METRICS: &str = "fold_metrics.parquet";
pub const CANDIDATES: &str = "candidates.parquet";
pub const SURVIVORS: &str = "survivors_A.parquet";
pub const REPORT: &str = "stage_a_report.json";

/// The fold manifest Stage B re-validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldsManifest {
    pub schema: String,
    pub run_id: RunId,
    pub asof_end_date: NaiveDate,
    pub fold_method: String,
    pub target: String,
    pub config: FoldManifestConfig,
    pub panel: PanelSummary,
    pub folds: Vec<Fold>,
}

impl FoldsManifest {
    /// Ids of folds that were scored, in fold order.
    pub fn scored_fold_ids(&self) -> Vec<String> {
        self.folds
            .iter()
            .filter(|f| !f.skipped)
            .map(|f| f.fold_id.clone())
            .collect()
    }
}

/// Everything Stage A computes, before anything is written.
#[derive(Debug, Clone)]
pub struct StageAOutput {
    pub manifest: FoldsManifest,
    pub table: FoldMetricTable,
    /// Sorted by (IC mean desc, spread desc, id asc).
    pub aggregates: Vec<CandidateAggregate>,
    pub survivors: Vec<CandidateAggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFold {
    pub fold_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageACounts {
    pub folds_built: usize,
    pub folds_scored: usize,
    pub folds_skipped: usize,
    pub fold_metrics_rows: usize,
    pub candidates_total: usize,
    pub survivors_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAReport {
    pub schema: String,
    pub ok: bool,
    pub run_id: RunId,
    pub asof_end_date: NaiveDate,
    pub config_hash: String,
    pub counts: StageACounts,
    pub skipped_folds: Vec<SkippedFold>,
    pub proxy_gate: ProxyGate,
    pub survivors: Vec<String>,
    pub panel: PanelSummary,
    pub artifacts: BTreeMap<String, ArtifactRef>,
}

pub struct StageA<'a> {
    config: &'a PipelineConfig,
}

impl<'a> StageA<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Load the panel from the configured feature store version.
    pub fn load_panel(&self, quant_root: &Path, asof_end_date: NaiveDate) -> Result<Panel, StageError> {
        let sa = &self.config.stage_a;
        let root = FeatureStore::version_root(quant_root, &sa.feature_store_version);
        let mut loader = PanelLoader::new(FeatureStore::open(root)?);
        if sa.use_panel_cache {
            loader = loader.with_cache(PanelCache::new(quant_root.join("cache").join("panels")));
        }
        Ok(loader.load(&self.config.panel_query(asof_end_date))?)
    }

    /// Build folds over the panel and score every candidate in every fold.
    pub fn evaluate(&self, run_id: &RunId, asof_end_date: NaiveDate, panel: &Panel) -> Result<StageAOutput, StageError> {
        let sa = &self.config.stage_a;
        let dates = panel.asof_dates();
        let mut folds = FoldBuilder::new(self.config.fold.clone()).build(&dates)?;
        info!(run_id = %run_id, dates = dates.len(), folds = folds.len(), "stage A folds built");

        let mut metrics: Vec<FoldMetric> = Vec::new();
        for fold in &mut folds {
            let train: Vec<&AsOfPanelRow> = rows_between(&panel.rows, fold.train_start, fold.train_end);
            let test: Vec<&AsOfPanelRow> = rows_between(&panel.rows, fold.test_start, fold.test_end);
            if train.len() < sa.min_train_rows || test.len() < sa.min_test_rows {
                let reason = format!("insufficient_rows train={} test={}", train.len(), test.len());
                warn!(fold_id = %fold.fold_id, %reason, "skipping fold");
                fold.mark_skipped(reason);
                continue;
            }

            let stats = FeatureNormalizer::fit(train.iter().copied());
            let normalized = FeatureNormalizer::transform(&stats, test.iter().copied());
            let fold_id = fold.fold_id.as_str();
            let scored: Vec<FoldMetric> = CATALOGUE
                .par_iter()
                .map(|c| CandidateScorer.score_fold(fold_id, c, &normalized))
                .collect();
            debug!(fold_id, train = train.len(), test = normalized.len(), "fold scored");
            metrics.extend(scored);
        }
        if metrics.is_empty() {
            return Err(StageError::NoFoldMetrics);
        }

        let fold_order: Vec<String> = folds.iter().filter(|f| !f.skipped).map(|f| f.fold_id.clone()).collect();
        sort_metrics(&mut metrics, &fold_order, &CATALOGUE);
        let table = FoldMetricTable::from_rows(metrics);

        let mut aggregates = aggregate_candidates(&table, &CATALOGUE);
        sort_stage_a(&mut aggregates);
        let survivors = stage_a_survivors(&aggregates, &sa.proxy_gate, sa.survivors_max);
        info!(
            run_id = %run_id,
            rows = table.len(),
            candidates = aggregates.len(),
            survivors = survivors.len(),
            "stage A evaluated"
        );

        let fold_policy = &self.config.fold;
        let manifest = FoldsManifest {
            schema: MANIFEST_SCHEMA.into(),
            run_id: run_id.clone(),
            asof_end_date,
            fold_method: FOLD_METHOD.into(),
            target: TARGET.into(),
            config: FoldManifestConfig {
                panel_asof_days: sa.panel_asof_days,
                fold_count_requested: fold_policy.fold_count,
                fold_count_built: folds.len(),
                test_days: fold_policy.test_days,
                embargo_days: fold_policy.embargo_days,
                min_train_days: fold_policy.min_train_days,
                top_liquid_n: sa.top_liquid_n,
            },
            panel: panel.summary.clone(),
            folds,
        };
        Ok(StageAOutput {
            manifest,
            table,
            aggregates,
            survivors,
        })
    }

    /// Write every Stage A artifact under the run's outputs directory.
    pub fn write(&self, quant_root: &Path, output: &StageAOutput) -> Result<StageAReport, StageError> {
        let manifest = &output.manifest;
        let out = artifacts::outputs_dir(quant_root, manifest.run_id.as_str());
        let mut refs = BTreeMap::new();

        let path = out.join(FOLDS_MANIFEST);
        artifacts::atomic_write_json(&path, manifest)?;
        refs.insert("folds_manifest".to_string(), ArtifactRef::of(&path)?);

        let path = out.join(FOLD_METRICS);
        artifacts::write_frame(&mut artifacts::fold_metrics_frame(output.table.rows())?, &path)?;
        refs.insert("fold_metrics".to_string(), ArtifactRef::of(&path)?);

        let path = out.join(CANDIDATES);
        artifacts::write_frame(&mut artifacts::aggregates_frame(&output.aggregates)?, &path)?;
        refs.insert("candidates".to_string(), ArtifactRef::of(&path)?);

        let path = out.join(SURVIVORS);
        artifacts::write_frame(&mut artifacts::aggregates_frame(&output.survivors)?, &path)?;
        refs.insert("survivors_A".to_string(), ArtifactRef::of(&path)?);

        let skipped_folds: Vec<SkippedFold> = manifest
            .folds
            .iter()
            .filter(|f| f.skipped)
            .map(|f| SkippedFold {
                fold_id: f.fold_id.clone(),
                reason: f.skip_reason.clone().unwrap_or_default(),
            })
            .collect();
        let report = StageAReport {
            schema: REPORT_SCHEMA.into(),
            ok: true,
            run_id: manifest.run_id.clone(),
            asof_end_date: manifest.asof_end_date,
            config_hash: self.config.config_hash(),
            counts: StageACounts {
                folds_built: manifest.folds.len(),
                folds_scored: manifest.folds.len() - skipped_folds.len(),
                folds_skipped: skipped_folds.len(),
                fold_metrics_rows: output.table.len(),
                candidates_total: output.aggregates.len(),
                survivors_total: output.survivors.len(),
            },
            skipped_folds,
            proxy_gate: self.config.stage_a.proxy_gate.clone(),
            survivors: output.survivors.iter().map(|a| a.candidate_id.clone()).collect(),
            panel: manifest.panel.clone(),
            artifacts: refs,
        };
        artifacts::atomic_write_json(&out.join(REPORT), &report)?;
        info!(run_id = %report.run_id, dir = %out.display(), "stage A artifacts written");
        Ok(report)
    }

    /// Load, evaluate and write. The run id defaults to
    /// `stagea_tsplits_<asof_end_date>`.
    pub fn run(
        &self,
        quant_root: &Path,
        asof_end_date: NaiveDate,
        run_id: Option<RunId>,
    ) -> Result<(StageAOutput, StageAReport), StageError> {
        let run_id = run_id.unwrap_or_else(|| RunId::stage_a(asof_end_date));
        let panel = self.load_panel(quant_root, asof_end_date)?;
        let output = self.evaluate(&run_id, asof_end_date, &panel)?;
        let report = self.write(quant_root, &output)?;
        Ok((output, report))
    }
}

/// Read back the Stage A artifacts Stage B consumes.
pub fn load_outputs(quant_root: &Path, run_id: &RunId) -> Result<StageAOutput, StageError> {
    let out = artifacts::outputs_dir(quant_root, run_id.as_str());
    for name in [FOLDS_MANIFEST, FOLD_METRICS, CANDIDATES] {
        require_file(&out.join(name))?;
    }
    let manifest: FoldsManifest = artifacts::read_json(&out.join(FOLDS_MANIFEST))?;
    let rows = artifacts::read_fold_metrics(&out.join(FOLD_METRICS))?;
    if rows.is_empty() {
        return Err(StageError::EmptyArtifact(out.join(FOLD_METRICS).display().to_string()));
    }
    let aggregates = artifacts::read_aggregates(&out.join(CANDIDATES))?;
    if aggregates.is_empty() {
        return Err(StageError::EmptyArtifact(out.join(CANDIDATES).display().to_string()));
    }
    let survivors_path = out.join(SURVIVORS);
    let survivors = if survivors_path.is_file() {
        artifacts::read_aggregates(&survivors_path)?
    } else {
        Vec::new()
    };
    Ok(StageAOutput {
        manifest,
        table: FoldMetricTable::from_rows(rows),
        aggregates,
        survivors,
    })
}

fn rows_between(rows: &[AsOfPanelRow], start: NaiveDate, end: NaiveDate) -> Vec<&AsOfPanelRow> {
    rows.iter()
        .filter(|r| r.asof_date >= start && r.asof_date <= end)
        .collect()
}
