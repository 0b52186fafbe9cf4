//! Cross-fold candidate aggregates and the Stage A proxy gate.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use quantlab_core::candidates::Candidate;
use quantlab_core::domain::{Family, FoldMetricTable, MetricColumn};
use quantlab_core::stats;

use crate::config::ProxyGate;

/// Per-candidate summary of its fold metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAggregate {
    pub candidate_id: String,
    pub family: Family,
    pub folds_used: usize,
    pub ic_5d_oos_mean: f64,
    pub ic_5d_oos_min: f64,
    pub oos_sharpe_proxy_mean: f64,
    pub oos_sharpe_proxy_min: f64,
    pub top_minus_bottom_5d_mean: f64,
    pub turnover_proxy_mean: f64,
    pub maxdd_proxy_pct_mean: f64,
    /// Share of folds with a negative Sharpe proxy.
    pub bootstrap_neg_sharpe_share_proxy: f64,
}

impl CandidateAggregate {
    /// Aggregate one candidate. `None` when it has no fold metrics.
    pub fn from_table(table: &FoldMetricTable, candidate_id: &str, family: Family) -> Option<Self> {
        let sharpes = table.column(candidate_id, MetricColumn::Sharpe);
        if sharpes.is_empty() {
            return None;
        }
        let ics = table.column(candidate_id, MetricColumn::Ic);
        let negative = sharpes.iter().filter(|v| **v < 0.0).count();
        Some(Self {
            candidate_id: candidate_id.to_string(),
            family,
            folds_used: sharpes.len(),
            ic_5d_oos_mean: stats::mean(&ics),
            ic_5d_oos_min: stats::min(&ics).unwrap_or(0.0),
            oos_sharpe_proxy_mean: stats::mean(&sharpes),
            oos_sharpe_proxy_min: stats::min(&sharpes).unwrap_or(0.0),
            top_minus_bottom_5d_mean: stats::mean(&table.column(candidate_id, MetricColumn::Spread)),
            turnover_proxy_mean: stats::mean(&table.column(candidate_id, MetricColumn::Turnover)),
            maxdd_proxy_pct_mean: stats::mean(&table.column(candidate_id, MetricColumn::MaxDd)),
            bootstrap_neg_sharpe_share_proxy: negative as f64 / sharpes.len() as f64,
        })
    }
}

/// Aggregate every catalogue candidate that has fold metrics, in catalogue
/// order.
pub fn aggregate_candidates(table: &FoldMetricTable, catalogue: &[Candidate]) -> Vec<CandidateAggregate> {
    catalogue
        .iter()
        .filter_map(|c| CandidateAggregate::from_table(table, c.id, c.family))
        .collect()
}

/// Stage A ordering: IC mean desc, spread mean desc, candidate id asc.
pub fn sort_stage_a(aggregates: &mut [CandidateAggregate]) {
    aggregates.sort_by(|a, b| {
        b.ic_5d_oos_mean
            .total_cmp(&a.ic_5d_oos_mean)
            .then_with(|| b.top_minus_bottom_5d_mean.total_cmp(&a.top_minus_bottom_5d_mean))
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
}

impl ProxyGate {
    pub fn passes(&self, a: &CandidateAggregate) -> bool {
        a.ic_5d_oos_mean >= self.ic_mean_min
            && a.maxdd_proxy_pct_mean <= self.maxdd_mean_max
            && a.turnover_proxy_mean <= self.turnover_mean_max
            && a.bootstrap_neg_sharpe_share_proxy <= self.neg_sharpe_share_max
    }
}

/// Proxy-gate survivors of an already sorted aggregate list, capped at
/// `cap`.
pub fn stage_a_survivors(sorted: &[CandidateAggregate], gate: &ProxyGate, cap: usize) -> Vec<CandidateAggregate> {
    sorted
        .iter()
        .filter(|a| gate.passes(a))
        .take(cap)
        .cloned()
        .collect()
}

/// Descending comparison that treats NaN as the lowest value.
pub(crate) fn desc(a: f64, b: f64) -> Ordering {
    let key = |v: f64| if v.is_nan() { f64::NEG_INFINITY } else { v };
    key(b).total_cmp(&key(a))
}
