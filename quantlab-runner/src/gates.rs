//! Stage B gate evaluation.
//!
//! Twenty named threshold checks, always evaluated in the same order. A
//! candidate passes when every check passes; a failing candidate carries the
//! names of its failed checks as reason codes. Failing a gate is an outcome,
//! not an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::aggregate::{desc, CandidateAggregate};
use crate::robustness::{RobustnessMetrics, StressLimits};

// ─── Thresholds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    pub ic_mean_min: f64,
    pub ic_min_min: f64,
    pub ic_fold_std_max: f64,
    pub sharpe_mean_min: f64,
    pub sharpe_min_min: f64,
    pub turnover_mean_max: f64,
    pub maxdd_mean_max: f64,
    pub bootstrap_neg_sharpe_share_max: f64,
    pub psr_proxy_min: f64,
    pub dsr_proxy_min: f64,
    pub psr_bootstrap_proxy_min: f64,
    pub dsr_bootstrap_proxy_min: f64,
    pub cpcv_light_sharpe_min: f64,
    pub cpcv_light_p25_min: f64,
    pub cpcv_light_neg_share_max: f64,
    pub stress_lite_sharpe_mean_min: f64,
    pub stress_lite_maxdd_mean_max: f64,
    pub stress_lite_fail_share_max: f64,
    /// Cap on Stage B survivors.
    pub strict_survivors_max: usize,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            ic_mean_min: 0.01,
            ic_min_min: -0.02,
            ic_fold_std_max: 0.20,
            sharpe_mean_min: 0.03,
            sharpe_min_min: -0.25,
            turnover_mean_max: 2.0,
            maxdd_mean_max: 20.0,
            bootstrap_neg_sharpe_share_max: 0.5,
            psr_proxy_min: 0.60,
            dsr_proxy_min: 0.50,
            psr_bootstrap_proxy_min: 0.55,
            dsr_bootstrap_proxy_min: 0.45,
            cpcv_light_sharpe_min: 0.0,
            cpcv_light_p25_min: -0.02,
            cpcv_light_neg_share_max: 0.50,
            stress_lite_sharpe_mean_min: -0.05,
            stress_lite_maxdd_mean_max: 28.0,
            stress_lite_fail_share_max: 0.34,
            strict_survivors_max: 8,
        }
    }
}

impl GateThresholds {
    /// Limits the stress-lite fail share is counted against.
    pub fn stress_limits(&self) -> StressLimits {
        StressLimits {
            sharpe_mean_min: self.stress_lite_sharpe_mean_min,
            maxdd_mean_max: self.stress_lite_maxdd_mean_max,
        }
    }
}

// ─── Gates ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Gate {
    FoldPolicyValid,
    FoldsUsed,
    IcMean,
    IcMin,
    IcFoldStd,
    SharpeMean,
    SharpeMin,
    Turnover,
    MaxDd,
    BootstrapNegSharpe,
    PsrProxy,
    DsrProxy,
    PsrBootstrapProxy,
    DsrBootstrapProxy,
    CpcvLightSharpeMin,
    CpcvLightSharpeP25,
    CpcvLightNegShare,
    StressLiteSharpe,
    StressLiteMaxDd,
    StressLiteFailShare,
}

impl Gate {
    /// Evaluation order.
    pub const ALL: [Gate; 20] = [
        Gate::FoldPolicyValid,
        Gate::FoldsUsed,
        Gate::IcMean,
        Gate::IcMin,
        Gate::IcFoldStd,
        Gate::SharpeMean,
        Gate::SharpeMin,
        Gate::Turnover,
        Gate::MaxDd,
        Gate::BootstrapNegSharpe,
        Gate::PsrProxy,
        Gate::DsrProxy,
        Gate::PsrBootstrapProxy,
        Gate::DsrBootstrapProxy,
        Gate::CpcvLightSharpeMin,
        Gate::CpcvLightSharpeP25,
        Gate::CpcvLightNegShare,
        Gate::StressLiteSharpe,
        Gate::StressLiteMaxDd,
        Gate::StressLiteFailShare,
    ];

    /// Column name and reason code.
    pub fn name(self) -> &'static str {
        match self {
            Gate::FoldPolicyValid => "g_fold_policy_valid",
            Gate::FoldsUsed => "g_folds_used",
            Gate::IcMean => "g_ic_mean",
            Gate::IcMin => "g_ic_min",
            Gate::IcFoldStd => "g_ic_fold_std",
            Gate::SharpeMean => "g_sharpe_mean",
            Gate::SharpeMin => "g_sharpe_min",
            Gate::Turnover => "g_turnover",
            Gate::MaxDd => "g_maxdd",
            Gate::BootstrapNegSharpe => "g_bootstrap_neg_sharpe",
            Gate::PsrProxy => "g_psr_proxy",
            Gate::DsrProxy => "g_dsr_proxy",
            Gate::PsrBootstrapProxy => "g_psr_bootstrap_proxy",
            Gate::DsrBootstrapProxy => "g_dsr_bootstrap_proxy",
            Gate::CpcvLightSharpeMin => "g_cpcv_light_sharpe_min",
            Gate::CpcvLightSharpeP25 => "g_cpcv_light_sharpe_p25",
            Gate::CpcvLightNegShare => "g_cpcv_light_neg_share",
            Gate::StressLiteSharpe => "g_stress_lite_sharpe",
            Gate::StressLiteMaxDd => "g_stress_lite_maxdd",
            Gate::StressLiteFailShare => "g_stress_lite_fail_share",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Run-level inputs shared by every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateContext {
    /// Fold policy valid, or validity not required.
    pub fold_policy_ok: bool,
    pub folds_used_min: usize,
}

impl GateContext {
    /// `folds_used_min = max(fold_count_min, fold_count_built or 1)`.
    pub fn new(policy_valid: bool, require_valid: bool, fold_count_min: usize, fold_count_built: usize) -> Self {
        let built = if fold_count_built > 0 { fold_count_built } else { 1 };
        Self {
            fold_policy_ok: policy_valid || !require_valid,
            folds_used_min: fold_count_min.max(built),
        }
    }
}

/// Per-gate results in `Gate::ALL` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub checks: Vec<bool>,
    pub pass: bool,
}

impl GateOutcome {
    pub fn get(&self, gate: Gate) -> bool {
        self.checks.get(gate.index()).copied().unwrap_or(false)
    }

    /// Names of failed gates, in evaluation order.
    pub fn failed(&self) -> Vec<&'static str> {
        Gate::ALL
            .iter()
            .filter(|g| !self.get(**g))
            .map(|g| g.name())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct GateEvaluator {
    thresholds: GateThresholds,
    context: GateContext,
}

impl GateEvaluator {
    pub fn new(thresholds: GateThresholds, context: GateContext) -> Self {
        Self { thresholds, context }
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    pub fn context(&self) -> GateContext {
        self.context
    }

    pub fn evaluate(&self, a: &CandidateAggregate, r: &RobustnessMetrics) -> GateOutcome {
        let t = &self.thresholds;
        let checks: Vec<bool> = Gate::ALL
            .iter()
            .map(|gate| match gate {
                Gate::FoldPolicyValid => self.context.fold_policy_ok,
                Gate::FoldsUsed => a.folds_used >= self.context.folds_used_min,
                Gate::IcMean => a.ic_5d_oos_mean >= t.ic_mean_min,
                Gate::IcMin => a.ic_5d_oos_min >= t.ic_min_min,
                Gate::IcFoldStd => r.ic_fold_std_proxy <= t.ic_fold_std_max,
                Gate::SharpeMean => a.oos_sharpe_proxy_mean >= t.sharpe_mean_min,
                Gate::SharpeMin => a.oos_sharpe_proxy_min >= t.sharpe_min_min,
                Gate::Turnover => a.turnover_proxy_mean <= t.turnover_mean_max,
                Gate::MaxDd => a.maxdd_proxy_pct_mean <= t.maxdd_mean_max,
                Gate::BootstrapNegSharpe => a.bootstrap_neg_sharpe_share_proxy <= t.bootstrap_neg_sharpe_share_max,
                Gate::PsrProxy => r.psr_proxy >= t.psr_proxy_min,
                Gate::DsrProxy => r.dsr_proxy >= t.dsr_proxy_min,
                Gate::PsrBootstrapProxy => r.psr_bootstrap_proxy >= t.psr_bootstrap_proxy_min,
                Gate::DsrBootstrapProxy => r.dsr_bootstrap_proxy >= t.dsr_bootstrap_proxy_min,
                Gate::CpcvLightSharpeMin => r.cpcv.min >= t.cpcv_light_sharpe_min,
                Gate::CpcvLightSharpeP25 => r.cpcv.p25 >= t.cpcv_light_p25_min,
                Gate::CpcvLightNegShare => r.cpcv.neg_share <= t.cpcv_light_neg_share_max,
                Gate::StressLiteSharpe => r.stress.worst_mean_sharpe >= t.stress_lite_sharpe_mean_min,
                Gate::StressLiteMaxDd => r.stress.worst_mean_maxdd <= t.stress_lite_maxdd_mean_max,
                Gate::StressLiteFailShare => r.stress.fail_share <= t.stress_lite_fail_share_max,
            })
            .collect();
        let pass = checks.iter().all(|c| *c);
        GateOutcome { checks, pass }
    }
}

// ─── Stage B rows ────────────────────────────────────────────────────

/// One evaluated candidate: aggregates, robustness block and gate results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBRow {
    pub aggregate: CandidateAggregate,
    pub robustness: RobustnessMetrics,
    pub gates: GateOutcome,
}

impl StageBRow {
    pub fn candidate_id(&self) -> &str {
        &self.aggregate.candidate_id
    }

    pub fn pass(&self) -> bool {
        self.gates.pass
    }
}

/// Order: pass desc, DSR desc, PSR desc, IC mean desc, candidate id asc.
pub fn sort_stage_b(rows: &mut [StageBRow]) {
    rows.sort_by(|a, b| {
        b.pass()
            .cmp(&a.pass())
            .then_with(|| desc(a.robustness.dsr_proxy, b.robustness.dsr_proxy))
            .then_with(|| desc(a.robustness.psr_proxy, b.robustness.psr_proxy))
            .then_with(|| desc(a.aggregate.ic_5d_oos_mean, b.aggregate.ic_5d_oos_mean))
            .then_with(|| a.candidate_id().cmp(b.candidate_id()))
    });
}

/// Passing rows of a sorted list, capped.
pub fn select_survivors(sorted: &[StageBRow], cap: usize) -> Vec<StageBRow> {
    sorted.iter().filter(|r| r.pass()).take(cap).cloned().collect()
}

// ─── Failure summary ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedExample {
    pub candidate_id: String,
    pub family: String,
    pub reasons: Vec<String>,
    pub ic_5d_oos_mean: f64,
    pub oos_sharpe_proxy_mean: f64,
    pub psr_proxy: f64,
    pub dsr_proxy: f64,
    pub cpcv_light_sharpe_min: f64,
    pub cpcv_light_sharpe_p25: f64,
    pub cpcv_light_neg_sharpe_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSummary {
    /// `(gate, failures)` sorted by count desc, then name.
    pub fail_reason_counts: Vec<(String, usize)>,
    pub failed_examples: Vec<FailedExample>,
}

pub const MAX_FAILED_EXAMPLES: usize = 10;

/// Summarize failures over sorted rows.
pub fn summarize_failures(sorted: &[StageBRow]) -> GateSummary {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut examples = Vec::new();
    for row in sorted.iter().filter(|r| !r.pass()) {
        let reasons = row.gates.failed();
        for r in &reasons {
            *counts.entry(*r).or_default() += 1;
        }
        if examples.len() < MAX_FAILED_EXAMPLES {
            examples.push(FailedExample {
                candidate_id: row.candidate_id().to_string(),
                family: row.aggregate.family.to_string(),
                reasons: reasons.iter().map(|s| s.to_string()).collect(),
                ic_5d_oos_mean: row.aggregate.ic_5d_oos_mean,
                oos_sharpe_proxy_mean: row.aggregate.oos_sharpe_proxy_mean,
                psr_proxy: row.robustness.psr_proxy,
                dsr_proxy: row.robustness.dsr_proxy,
                cpcv_light_sharpe_min: row.robustness.cpcv.min,
                cpcv_light_sharpe_p25: row.robustness.cpcv.p25,
                cpcv_light_neg_sharpe_share: row.robustness.cpcv.neg_share,
            });
        }
    }
    let mut fail_reason_counts: Vec<(String, usize)> =
        counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    fail_reason_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    GateSummary {
        fail_reason_counts,
        failed_examples: examples,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::robustness::{CpcvLight, StressSummary};
    use quantlab_core::domain::Family;

    pub(crate) fn strong_row(id: &str, dsr: f64) -> StageBRow {
        let aggregate = CandidateAggregate {
            candidate_id: id.into(),
            family: Family::Tsmom,
            folds_used: 3,
            ic_5d_oos_mean: 0.04,
            ic_5d_oos_min: 0.01,
            oos_sharpe_proxy_mean: 0.2,
            oos_sharpe_proxy_min: 0.1,
            top_minus_bottom_5d_mean: 0.01,
            turnover_proxy_mean: 0.001,
            maxdd_proxy_pct_mean: 8.0,
            bootstrap_neg_sharpe_share_proxy: 0.0,
        };
        let robustness = RobustnessMetrics {
            folds_observed: 3,
            ic_fold_std_proxy: 0.02,
            psr_proxy: 0.99,
            dsr_proxy: dsr,
            psr_bootstrap_proxy: 1.0,
            dsr_bootstrap_proxy: 0.85,
            cpcv: CpcvLight {
                paths_total: 6,
                combo_sizes: vec![1, 2],
                combo_policy: crate::robustness::cpcv::POLICY_ALL_SIZES.into(),
                mean: 0.2,
                min: 0.1,
                p25: 0.15,
                p10: 0.1,
                neg_share: 0.0,
                std: 0.05,
            },
            stress: StressSummary {
                scenarios_total: 4,
                worst_mean_sharpe: 0.1,
                worst_mean_maxdd: 11.6,
                fail_share: 0.0,
                scenarios: Vec::new(),
            },
        };
        let gates = evaluator().evaluate(&aggregate, &robustness);
        StageBRow {
            aggregate,
            robustness,
            gates,
        }
    }

    fn evaluator() -> GateEvaluator {
        GateEvaluator::new(GateThresholds::default(), GateContext::new(true, true, 3, 3))
    }

    #[test]
    fn gate_names_are_unique_and_ordered() {
        let names: Vec<&str> = Gate::ALL.iter().map(|g| g.name()).collect();
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 20);
        assert_eq!(names[0], "g_fold_policy_valid");
        assert_eq!(names[19], "g_stress_lite_fail_share");
        assert!(Gate::ALL.iter().enumerate().all(|(i, g)| g.index() == i));
    }

    #[test]
    fn strong_candidate_passes_every_gate() {
        let row = strong_row("tsmom_20", 0.84);
        assert!(row.pass(), "failed: {:?}", row.gates.failed());
        assert!(row.gates.failed().is_empty());
    }

    #[test]
    fn failures_are_named_in_order() {
        let mut row = strong_row("tsmom_20", 0.84);
        row.aggregate.turnover_proxy_mean = 3.0;
        row.robustness.psr_proxy = 0.2;
        let gates = evaluator().evaluate(&row.aggregate, &row.robustness);
        assert!(!gates.pass);
        assert_eq!(gates.failed(), vec!["g_turnover", "g_psr_proxy"]);
    }

    #[test]
    fn policy_gate_respects_require_flag() {
        assert!(!GateContext::new(false, true, 3, 3).fold_policy_ok);
        assert!(GateContext::new(false, false, 3, 3).fold_policy_ok);
        assert_eq!(GateContext::new(true, true, 3, 0).folds_used_min, 3);
        assert_eq!(GateContext::new(true, true, 2, 4).folds_used_min, 4);
        assert_eq!(GateContext::new(true, true, 0, 0).folds_used_min, 1);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let row = strong_row("x", 0.3);
        let a = evaluator().evaluate(&row.aggregate, &row.robustness);
        let b = evaluator().evaluate(&row.aggregate, &row.robustness);
        assert_eq!(a, b);
        assert_eq!(a.failed(), vec!["g_dsr_proxy"]);
    }

    #[test]
    fn sort_and_survivor_cap() {
        let mut rows = vec![
            strong_row("b", 0.8),
            strong_row("fail", 0.1),
            strong_row("a", 0.8),
            strong_row("c", 0.9),
        ];
        sort_stage_b(&mut rows);
        let order: Vec<&str> = rows.iter().map(|r| r.candidate_id()).collect();
        assert_eq!(order, vec!["c", "a", "b", "fail"]);
        let survivors = select_survivors(&rows, 2);
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[1].candidate_id(), "a");
    }

    #[test]
    fn failure_summary_counts_and_orders() {
        let mut rows = vec![strong_row("x", 0.1), strong_row("y", 0.1), strong_row("ok", 0.8)];
        rows[1].aggregate.turnover_proxy_mean = 9.0;
        rows[1].gates = evaluator().evaluate(&rows[1].aggregate, &rows[1].robustness);
        let summary = summarize_failures(&rows);
        assert_eq!(
            summary.fail_reason_counts,
            vec![("g_dsr_proxy".to_string(), 2), ("g_turnover".to_string(), 1)]
        );
        assert_eq!(summary.failed_examples.len(), 2);
        assert_eq!(summary.failed_examples[1].reasons, vec!["g_turnover", "g_dsr_proxy"]);
    }
}
