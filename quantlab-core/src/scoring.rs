//! Fold-level candidate scoring.
//!
//! Metrics are proxies tuned against the gate thresholds:
//! - `ic_5d`: Spearman rank IC of score vs forward return
//! - `oos_sharpe_proxy`: top-minus-bottom decile spread over the top decile's
//!   return dispersion, not an annualized Sharpe ratio
//! - `turnover_proxy`: mean |z_ret_5d|, a churn indicator, not turnover
//! - `maxdd_proxy_pct`: mean |z_vol_20| x 10, a risk indicator, not drawdown

use crate::candidates::Candidate;
use crate::domain::FoldMetric;
use crate::normalize::{Feature, NormalizedRow};
use crate::stats;

/// Fewest rows for which a rank IC is computed.
pub const MIN_IC_ROWS: usize = 30;
/// Smallest decile bucket.
pub const MIN_DECILE_ROWS: usize = 20;

/// Spearman rank correlation with average ranks for ties. Returns 0.0 below
/// `MIN_IC_ROWS` pairs or when either side has no rank variance.
pub fn spearman_ic(scores: &[f64], targets: &[f64]) -> f64 {
    if scores.len() != targets.len() || scores.len() < MIN_IC_ROWS {
        return 0.0;
    }
    let rs = stats::average_ranks(scores);
    let rt = stats::average_ranks(targets);
    stats::pearson(&rs, &rt).unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateScorer;

impl CandidateScorer {
    /// Score one candidate on one fold's normalized test rows.
    pub fn score_fold(&self, fold_id: &str, candidate: &Candidate, rows: &[NormalizedRow]) -> FoldMetric {
        let n = rows.len();
        let mut metric = FoldMetric {
            fold_id: fold_id.to_string(),
            candidate_id: candidate.id.to_string(),
            family: candidate.family,
            rows: n,
            ic_5d: 0.0,
            oos_sharpe_proxy: 0.0,
            top_minus_bottom_5d: 0.0,
            turnover_proxy: 0.0,
            maxdd_proxy_pct: 0.0,
        };
        if n == 0 {
            return metric;
        }

        let scores: Vec<f64> = rows.iter().map(|r| candidate.score(r)).collect();
        let targets: Vec<f64> = rows.iter().map(|r| r.target).collect();
        metric.ic_5d = spearman_ic(&scores, &targets);

        // Ties keep row order in both directions.
        let mut desc: Vec<usize> = (0..n).collect();
        desc.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let mut asc: Vec<usize> = (0..n).collect();
        asc.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));

        let decile = MIN_DECILE_ROWS.max(n / 10).min(n);
        let top: Vec<f64> = desc[..decile].iter().map(|&i| targets[i]).collect();
        let bottom: Vec<f64> = asc[..decile].iter().map(|&i| targets[i]).collect();

        let spread = stats::mean(&top) - stats::mean(&bottom);
        let top_std = stats::std_dev(&top)
            .filter(|s| s.is_finite() && s.abs() >= 1e-12)
            .unwrap_or(1.0);

        metric.top_minus_bottom_5d = spread;
        metric.oos_sharpe_proxy = spread / top_std;
        metric.turnover_proxy = mean_abs(rows, Feature::Ret5d);
        metric.maxdd_proxy_pct = mean_abs(rows, Feature::EwmaVol20) * 10.0;
        metric
    }

    /// Score every candidate in `catalogue` order.
    pub fn score_all(&self, fold_id: &str, catalogue: &[Candidate], rows: &[NormalizedRow]) -> Vec<FoldMetric> {
        catalogue
            .iter()
            .map(|c| self.score_fold(fold_id, c, rows))
            .collect()
    }
}

fn mean_abs(rows: &[NormalizedRow], feature: Feature) -> f64 {
    let values: Vec<f64> = rows.iter().map(|r| r.z(feature).abs()).collect();
    stats::mean(&values)
}

/// Sort fold metrics into (fold order, catalogue order).
pub fn sort_metrics(metrics: &mut [FoldMetric], fold_order: &[String], catalogue: &[Candidate]) {
    let fold_pos = |id: &str| fold_order.iter().position(|f| f == id).unwrap_or(usize::MAX);
    let cand_pos = |id: &str| catalogue.iter().position(|c| c.id == id).unwrap_or(usize::MAX);
    metrics.sort_by(|a, b| {
        fold_pos(&a.fold_id)
            .cmp(&fold_pos(&b.fold_id))
            .then_with(|| cand_pos(&a.candidate_id).cmp(&cand_pos(&b.candidate_id)))
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
}
