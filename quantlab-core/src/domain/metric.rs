//! Fold-level metric rows and the columnar table that indexes them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::candidate::Family;

/// One (candidate, fold) evaluation. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetric {
    pub fold_id: String,
    pub candidate_id: String,
    pub family: Family,
    /// Test rows with a valid target.
    pub rows: usize,
    /// Spearman rank IC of score vs 5-day forward return.
    pub ic_5d: f64,
    /// Decile spread over top-decile dispersion. Not an annualized Sharpe.
    pub oos_sharpe_proxy: f64,
    pub top_minus_bottom_5d: f64,
    /// Mean |z_ret_5d|. A churn proxy, not portfolio turnover.
    pub turnover_proxy: f64,
    /// Mean |z_vol_20| x 10. A risk proxy, not peak-to-trough drawdown.
    pub maxdd_proxy_pct: f64,
}

/// Selects one numeric column of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricColumn {
    Ic,
    Sharpe,
    Spread,
    Turnover,
    MaxDd,
}

impl MetricColumn {
    fn get(&self, m: &FoldMetric) -> f64 {
        match self {
            MetricColumn::Ic => m.ic_5d,
            MetricColumn::Sharpe => m.oos_sharpe_proxy,
            MetricColumn::Spread => m.top_minus_bottom_5d,
            MetricColumn::Turnover => m.turnover_proxy,
            MetricColumn::MaxDd => m.maxdd_proxy_pct,
        }
    }
}

/// Arena of `FoldMetric` rows indexed by candidate and by fold.
///
/// Row order is insertion order, which callers keep as (fold order,
/// catalogue order). Per-candidate columns therefore come back in fold order.
#[derive(Debug, Clone, Default)]
pub struct FoldMetricTable {
    rows: Vec<FoldMetric>,
    fold_order: Vec<String>,
    by_candidate: BTreeMap<String, Vec<usize>>,
    by_fold: BTreeMap<String, Vec<usize>>,
}

impl FoldMetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = FoldMetric>) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.push(row);
        }
        table
    }

    pub fn push(&mut self, metric: FoldMetric) {
        let idx = self.rows.len();
        if !self.by_fold.contains_key(&metric.fold_id) {
            self.fold_order.push(metric.fold_id.clone());
        }
        self.by_candidate
            .entry(metric.candidate_id.clone())
            .or_default()
            .push(idx);
        self.by_fold
            .entry(metric.fold_id.clone())
            .or_default()
            .push(idx);
        self.rows.push(metric);
    }

    pub fn rows(&self) -> &[FoldMetric] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fold ids in first-seen order.
    pub fn fold_ids(&self) -> &[String] {
        &self.fold_order
    }

    /// Candidate ids, sorted.
    pub fn candidate_ids(&self) -> impl Iterator<Item = &str> {
        self.by_candidate.keys().map(String::as_str)
    }

    pub fn for_candidate<'a>(&'a self, candidate_id: &str) -> impl Iterator<Item = &'a FoldMetric> + 'a {
        self.by_candidate
            .get(candidate_id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.rows[i])
    }

    pub fn for_fold<'a>(&'a self, fold_id: &str) -> impl Iterator<Item = &'a FoldMetric> + 'a {
        self.by_fold
            .get(fold_id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.rows[i])
    }

    /// One metric column for a candidate, in fold order.
    pub fn column(&self, candidate_id: &str, column: MetricColumn) -> Vec<f64> {
        self.for_candidate(candidate_id).map(|m| column.get(m)).collect()
    }

    pub fn folds_for(&self, candidate_id: &str) -> usize {
        self.by_candidate.get(candidate_id).map_or(0, Vec::len)
    }
}
