//! Run artifacts: atomic JSON/parquet writes, file hashes, and the typed
//! tables exchanged between stages.
//!
//! Every write goes to a sibling temp file first and is renamed into place,
//! so a crash never leaves a half-written artifact under its final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use quantlab_core::data::frame;
use quantlab_core::domain::{Family, FoldMetric, FoldMetricTable, MetricColumn};
use quantlab_core::stats;

use crate::aggregate::CandidateAggregate;
use crate::gates::{Gate, StageBRow};

/// Column holding the conjunctive Stage B pass flag.
pub const PASS_COLUMN: &str = "stage_b_light_pass";

// ─── Paths ───────────────────────────────────────────────────────────

/// `<quant_root>/runs/run_id=<id>/outputs`.
pub fn outputs_dir(quant_root: &Path, run_id: &str) -> PathBuf {
    run_dir(quant_root, run_id).join("outputs")
}

/// `<quant_root>/runs/run_id=<id>`.
pub fn run_dir(quant_root: &Path, run_id: &str) -> PathBuf {
    quant_root.join("runs").join(format!("run_id={run_id}"))
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".into());
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

// ─── Atomic writes ───────────────────────────────────────────────────

/// Write bytes to `path` via temp file + rename. Creates parent dirs.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Pretty JSON, written atomically.
pub fn atomic_write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value).context("serialize artifact JSON")?;
    json.push(b'\n');
    atomic_write(path, &json)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

/// Parquet, written atomically.
pub fn write_frame(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    frame::write_parquet(df, &tmp).with_context(|| format!("write {}", path.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

pub fn read_frame(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(anyhow!("missing artifact: {}", path.display()));
    }
    frame::read_parquet(path).with_context(|| format!("read {}", path.display()))
}

/// BLAKE3 of a file's bytes (hex).
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("hash {}", path.display()))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// ─── Column helpers ──────────────────────────────────────────────────

fn usize_col(name: &str, values: impl Iterator<Item = usize>) -> Column {
    Column::new(name.into(), values.map(|v| v as u64).collect::<Vec<u64>>())
}

fn f64_col(name: &str, values: impl Iterator<Item = f64>) -> Column {
    Column::new(name.into(), values.collect::<Vec<f64>>())
}

fn str_col<'a>(name: &str, values: impl Iterator<Item = &'a str>) -> Column {
    Column::new(name.into(), values.collect::<Vec<&str>>())
}

pub(crate) fn read_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let col = df.column(name).with_context(|| format!("column {name}"))?;
    let cast = col.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

pub(crate) fn read_usize(df: &DataFrame, name: &str) -> Result<Vec<usize>> {
    let col = df.column(name).with_context(|| format!("column {name}"))?;
    let cast = col.cast(&DataType::UInt64)?;
    Ok(cast.u64()?.into_iter().map(|v| v.unwrap_or(0) as usize).collect())
}

pub(crate) fn read_str(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let col = df.column(name).with_context(|| format!("column {name}"))?;
    let cast = col.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

pub(crate) fn read_bool(df: &DataFrame, name: &str) -> Result<Vec<bool>> {
    let col = df.column(name).with_context(|| format!("column {name}"))?;
    Ok(col.bool()?.into_iter().map(|v| v.unwrap_or(false)).collect())
}

fn read_family(df: &DataFrame) -> Result<Vec<Family>> {
    read_str(df, "family")?
        .iter()
        .map(|s| s.parse::<Family>().map_err(anyhow::Error::from))
        .collect()
}

/// Every cell of a frame row as JSON, keyed by column name.
pub(crate) fn row_json(df: &DataFrame, idx: usize) -> Result<serde_json::Map<String, serde_json::Value>> {
    use serde_json::Value;
    let mut map = serde_json::Map::new();
    for col in df.get_columns() {
        let value = match col.get(idx)? {
            AnyValue::Null => Value::Null,
            AnyValue::Boolean(b) => Value::Bool(b),
            AnyValue::String(s) => Value::String(s.to_string()),
            AnyValue::StringOwned(s) => Value::String(s.to_string()),
            AnyValue::UInt32(v) => Value::from(v),
            AnyValue::UInt64(v) => Value::from(v),
            AnyValue::Int32(v) => Value::from(v),
            AnyValue::Int64(v) => Value::from(v),
            AnyValue::Float32(v) => Value::from(f64::from(v)),
            AnyValue::Float64(v) => serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number),
            other => Value::String(other.to_string()),
        };
        map.insert(col.name().to_string(), value);
    }
    Ok(map)
}

// ─── Fold metrics ────────────────────────────────────────────────────

pub fn fold_metrics_frame(rows: &[FoldMetric]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        str_col("fold_id", rows.iter().map(|m| m.fold_id.as_str())),
        str_col("candidate_id", rows.iter().map(|m| m.candidate_id.as_str())),
        str_col("family", rows.iter().map(|m| m.family.as_str())),
        usize_col("rows", rows.iter().map(|m| m.rows)),
        f64_col("ic_5d", rows.iter().map(|m| m.ic_5d)),
        f64_col("oos_sharpe_proxy", rows.iter().map(|m| m.oos_sharpe_proxy)),
        f64_col("top_minus_bottom_5d", rows.iter().map(|m| m.top_minus_bottom_5d)),
        f64_col("turnover_proxy", rows.iter().map(|m| m.turnover_proxy)),
        f64_col("maxdd_proxy_pct", rows.iter().map(|m| m.maxdd_proxy_pct)),
    ])?)
}

pub fn read_fold_metrics(path: &Path) -> Result<Vec<FoldMetric>> {
    let df = read_frame(path)?;
    let fold_id = read_str(&df, "fold_id")?;
    let candidate_id = read_str(&df, "candidate_id")?;
    let family = read_family(&df)?;
    let rows = read_usize(&df, "rows")?;
    let ic = read_f64(&df, "ic_5d")?;
    let sharpe = read_f64(&df, "oos_sharpe_proxy")?;
    let spread = read_f64(&df, "top_minus_bottom_5d")?;
    let turnover = read_f64(&df, "turnover_proxy")?;
    let maxdd = read_f64(&df, "maxdd_proxy_pct")?;
    Ok((0..df.height())
        .map(|i| FoldMetric {
            fold_id: fold_id[i].clone(),
            candidate_id: candidate_id[i].clone(),
            family: family[i],
            rows: rows[i],
            ic_5d: ic[i],
            oos_sharpe_proxy: sharpe[i],
            top_minus_bottom_5d: spread[i],
            turnover_proxy: turnover[i],
            maxdd_proxy_pct: maxdd[i],
        })
        .collect())
}

// ─── Candidate aggregates ────────────────────────────────────────────

fn aggregate_columns(rows: &[&CandidateAggregate]) -> Vec<Column> {
    vec![
        str_col("candidate_id", rows.iter().map(|a| a.candidate_id.as_str())),
        str_col("family", rows.iter().map(|a| a.family.as_str())),
        usize_col("folds_used", rows.iter().map(|a| a.folds_used)),
        f64_col("ic_5d_oos_mean", rows.iter().map(|a| a.ic_5d_oos_mean)),
        f64_col("ic_5d_oos_min", rows.iter().map(|a| a.ic_5d_oos_min)),
        f64_col("oos_sharpe_proxy_mean", rows.iter().map(|a| a.oos_sharpe_proxy_mean)),
        f64_col("oos_sharpe_proxy_min", rows.iter().map(|a| a.oos_sharpe_proxy_min)),
        f64_col("top_minus_bottom_5d_mean", rows.iter().map(|a| a.top_minus_bottom_5d_mean)),
        f64_col("turnover_proxy_mean", rows.iter().map(|a| a.turnover_proxy_mean)),
        f64_col("maxdd_proxy_pct_mean", rows.iter().map(|a| a.maxdd_proxy_pct_mean)),
        f64_col(
            "bootstrap_neg_sharpe_share_proxy",
            rows.iter().map(|a| a.bootstrap_neg_sharpe_share_proxy),
        ),
    ]
}

pub fn aggregates_frame(rows: &[CandidateAggregate]) -> Result<DataFrame> {
    let refs: Vec<&CandidateAggregate> = rows.iter().collect();
    Ok(DataFrame::new(aggregate_columns(&refs))?)
}

pub fn read_aggregates(path: &Path) -> Result<Vec<CandidateAggregate>> {
    let df = read_frame(path)?;
    read_aggregates_from(&df)
}

pub(crate) fn read_aggregates_from(df: &DataFrame) -> Result<Vec<CandidateAggregate>> {
    let candidate_id = read_str(df, "candidate_id")?;
    let family = read_family(df)?;
    let folds_used = read_usize(df, "folds_used")?;
    let ic_mean = read_f64(df, "ic_5d_oos_mean")?;
    let ic_min = read_f64(df, "ic_5d_oos_min")?;
    let sharpe_mean = read_f64(df, "oos_sharpe_proxy_mean")?;
    let sharpe_min = read_f64(df, "oos_sharpe_proxy_min")?;
    let spread = read_f64(df, "top_minus_bottom_5d_mean")?;
    let turnover = read_f64(df, "turnover_proxy_mean")?;
    let maxdd = read_f64(df, "maxdd_proxy_pct_mean")?;
    let neg = read_f64(df, "bootstrap_neg_sharpe_share_proxy")?;
    Ok((0..df.height())
        .map(|i| CandidateAggregate {
            candidate_id: candidate_id[i].clone(),
            family: family[i],
            folds_used: folds_used[i],
            ic_5d_oos_mean: ic_mean[i],
            ic_5d_oos_min: ic_min[i],
            oos_sharpe_proxy_mean: sharpe_mean[i],
            oos_sharpe_proxy_min: sharpe_min[i],
            top_minus_bottom_5d_mean: spread[i],
            turnover_proxy_mean: turnover[i],
            maxdd_proxy_pct_mean: maxdd[i],
            bootstrap_neg_sharpe_share_proxy: neg[i],
        })
        .collect())
}

// ─── Stage B tables ──────────────────────────────────────────────────

/// Aggregate, robustness and gate columns of Stage B rows, in row order.
pub fn stage_b_frame(rows: &[StageBRow]) -> Result<DataFrame> {
    let aggs: Vec<&CandidateAggregate> = rows.iter().map(|r| &r.aggregate).collect();
    let mut columns = aggregate_columns(&aggs);
    let rob = |name: &str, get: fn(&StageBRow) -> f64| f64_col(name, rows.iter().map(get));
    columns.extend([
        rob("psr_proxy", |r| r.robustness.psr_proxy),
        rob("dsr_proxy", |r| r.robustness.dsr_proxy),
        rob("psr_bootstrap_proxy", |r| r.robustness.psr_bootstrap_proxy),
        rob("dsr_bootstrap_proxy", |r| r.robustness.dsr_bootstrap_proxy),
        usize_col("cpcv_light_paths_total", rows.iter().map(|r| r.robustness.cpcv.paths_total)),
        rob("cpcv_light_sharpe_mean", |r| r.robustness.cpcv.mean),
        rob("cpcv_light_sharpe_min", |r| r.robustness.cpcv.min),
        rob("cpcv_light_sharpe_p25", |r| r.robustness.cpcv.p25),
        rob("cpcv_light_sharpe_p10", |r| r.robustness.cpcv.p10),
        rob("cpcv_light_neg_sharpe_share", |r| r.robustness.cpcv.neg_share),
        rob("cpcv_light_sharpe_std", |r| r.robustness.cpcv.std),
        rob("ic_fold_std_proxy", |r| r.robustness.ic_fold_std_proxy),
        usize_col("folds_observed_from_metrics", rows.iter().map(|r| r.robustness.folds_observed)),
        usize_col(
            "stress_lite_scenarios_total",
            rows.iter().map(|r| r.robustness.stress.scenarios_total),
        ),
        rob("stress_lite_worst_mean_sharpe", |r| r.robustness.stress.worst_mean_sharpe),
        rob("stress_lite_worst_mean_maxdd", |r| r.robustness.stress.worst_mean_maxdd),
        rob("stress_lite_fail_share", |r| r.robustness.stress.fail_share),
    ]);
    for gate in Gate::ALL {
        columns.push(Column::new(
            gate.name().into(),
            rows.iter().map(|r| r.gates.get(gate)).collect::<Vec<bool>>(),
        ));
    }
    columns.push(Column::new(
        PASS_COLUMN.into(),
        rows.iter().map(StageBRow::pass).collect::<Vec<bool>>(),
    ));
    Ok(DataFrame::new(columns)?)
}

/// One row per (candidate, stress scenario).
pub fn stress_frame(rows: &[StageBRow]) -> Result<DataFrame> {
    let flat: Vec<(&StageBRow, &crate::robustness::ScenarioResult)> = rows
        .iter()
        .flat_map(|r| r.robustness.stress.scenarios.iter().map(move |s| (r, s)))
        .collect();
    Ok(DataFrame::new(vec![
        str_col("candidate_id", flat.iter().map(|(r, _)| r.candidate_id())),
        str_col("family", flat.iter().map(|(r, _)| r.aggregate.family.as_str())),
        str_col("scenario_id", flat.iter().map(|(_, s)| s.scenario_id.as_str())),
        f64_col("mean_sharpe", flat.iter().map(|(_, s)| s.mean_sharpe)),
        f64_col("mean_maxdd", flat.iter().map(|(_, s)| s.mean_maxdd)),
    ])?)
}

/// Per-fold summary across candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldSummaryRow {
    pub fold_id: String,
    pub candidate_rows: usize,
    pub rows_max: usize,
    pub ic_5d_mean: f64,
    pub oos_sharpe_proxy_mean: f64,
    pub oos_sharpe_proxy_min: f64,
    pub oos_sharpe_proxy_max: f64,
}

/// Fold summaries in fold order.
pub fn fold_summary(table: &FoldMetricTable) -> Vec<FoldSummaryRow> {
    table
        .fold_ids()
        .iter()
        .map(|fold_id| {
            let metrics: Vec<&FoldMetric> = table.for_fold(fold_id).collect();
            let sharpes: Vec<f64> = metrics.iter().map(|m| m.oos_sharpe_proxy).collect();
            let ics: Vec<f64> = metrics.iter().map(|m| m.ic_5d).collect();
            FoldSummaryRow {
                fold_id: fold_id.clone(),
                candidate_rows: metrics.len(),
                rows_max: metrics.iter().map(|m| m.rows).max().unwrap_or(0),
                ic_5d_mean: stats::mean(&ics),
                oos_sharpe_proxy_mean: stats::mean(&sharpes),
                oos_sharpe_proxy_min: stats::min(&sharpes).unwrap_or(0.0),
                oos_sharpe_proxy_max: stats::max(&sharpes).unwrap_or(0.0),
            }
        })
        .collect()
}

pub fn fold_summary_frame(rows: &[FoldSummaryRow]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        str_col("fold_id", rows.iter().map(|r| r.fold_id.as_str())),
        usize_col("candidate_rows", rows.iter().map(|r| r.candidate_rows)),
        usize_col("rows_max", rows.iter().map(|r| r.rows_max)),
        f64_col("ic_5d_mean", rows.iter().map(|r| r.ic_5d_mean)),
        f64_col("oos_sharpe_proxy_mean", rows.iter().map(|r| r.oos_sharpe_proxy_mean)),
        f64_col("oos_sharpe_proxy_min", rows.iter().map(|r| r.oos_sharpe_proxy_min)),
        f64_col("oos_sharpe_proxy_max", rows.iter().map(|r| r.oos_sharpe_proxy_max)),
    ])?)
}

// ─── CSV export ──────────────────────────────────────────────────────

/// Human-readable Stage B table.
///
/// Columns: candidate_id, family, pass, failed_gates, folds_used,
/// ic_5d_oos_mean, oos_sharpe_proxy_mean, psr_proxy, dsr_proxy,
/// cpcv_light_sharpe_min, stress_lite_worst_mean_sharpe, turnover_proxy_mean,
/// maxdd_proxy_pct_mean
pub fn export_stage_b_csv(rows: &[StageBRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "candidate_id",
        "family",
        "pass",
        "failed_gates",
        "folds_used",
        "ic_5d_oos_mean",
        "oos_sharpe_proxy_mean",
        "psr_proxy",
        "dsr_proxy",
        "cpcv_light_sharpe_min",
        "stress_lite_worst_mean_sharpe",
        "turnover_proxy_mean",
        "maxdd_proxy_pct_mean",
    ])?;
    for r in rows {
        let a = &r.aggregate;
        let rb = &r.robustness;
        wtr.write_record([
            a.candidate_id.as_str(),
            a.family.as_str(),
            if r.pass() { "true" } else { "false" },
            &r.gates.failed().join(";"),
            &a.folds_used.to_string(),
            &format!("{:.6}", a.ic_5d_oos_mean),
            &format!("{:.6}", a.oos_sharpe_proxy_mean),
            &format!("{:.6}", rb.psr_proxy),
            &format!("{:.6}", rb.dsr_proxy),
            &format!("{:.6}", rb.cpcv.min),
            &format!("{:.6}", rb.stress.worst_mean_sharpe),
            &format!("{:.6}", a.turnover_proxy_mean),
            &format!("{:.4}", a.maxdd_proxy_pct_mean),
        ])?;
    }
    let bytes = wtr.into_inner().context("flush CSV writer")?;
    String::from_utf8(bytes).context("CSV is not UTF-8")
}

/// Column values of one metric for every candidate, keyed by candidate id.
pub fn metric_columns(table: &FoldMetricTable, column: MetricColumn) -> Vec<(String, Vec<f64>)> {
    table
        .candidate_ids()
        .map(|id| (id.to_string(), table.column(id, column)))
        .collect()
}
