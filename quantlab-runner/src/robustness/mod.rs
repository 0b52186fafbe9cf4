//! Stage B robustness proxies.
//!
//! For each candidate the engine reads its fold-level columns from the
//! `FoldMetricTable` (fold order) and derives:
//!
//! 1. **PSR / DSR**: analytic and bootstrap probabilistic Sharpe proxies,
//!    deflated by a multiple-testing penalty
//! 2. **CPCV-light**: statistics over every fold combination
//! 3. **Stress-lite**: four fixed cost and drawdown shock scenarios
//! 4. **IC fold std**: dispersion of fold ICs
//!
//! All of it is deterministic: the only randomness is the bootstrap, which is
//! seeded from the run and candidate ids.

pub mod cpcv;
pub mod psr;
pub mod stress;

pub use cpcv::{cpcv_light, CpcvLight};
pub use psr::{dsr_penalty, dsr_proxy, norm_cdf, psr_bootstrap_proxy, psr_proxy};
pub use stress::{stress_lite, ScenarioResult, StressLimits, StressScenario, StressSummary, SCENARIOS};

use serde::{Deserialize, Serialize};

use quantlab_core::domain::{FoldMetricTable, MetricColumn, RunId};
use quantlab_core::stats;

use crate::config::RobustnessConfig;

/// Robustness block of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessMetrics {
    pub folds_observed: usize,
    pub ic_fold_std_proxy: f64,
    pub psr_proxy: f64,
    pub dsr_proxy: f64,
    pub psr_bootstrap_proxy: f64,
    pub dsr_bootstrap_proxy: f64,
    pub cpcv: CpcvLight,
    pub stress: StressSummary,
}

#[derive(Debug, Clone)]
pub struct RobustnessEngine {
    resamples: usize,
    min_combo_size: usize,
    limits: StressLimits,
}

impl RobustnessEngine {
    pub fn new(config: &RobustnessConfig, limits: StressLimits) -> Self {
        Self {
            resamples: config.bootstrap_resamples.max(32),
            min_combo_size: config.cpcv_light_min_combo_size.max(1),
            limits,
        }
    }

    pub fn resamples(&self) -> usize {
        self.resamples
    }

    pub fn min_combo_size(&self) -> usize {
        self.min_combo_size
    }

    /// Evaluate one candidate. `candidate_count` is the number of
    /// candidates tested in the run and drives the DSR penalty.
    pub fn evaluate(
        &self,
        run_id: &RunId,
        candidate_id: &str,
        table: &FoldMetricTable,
        candidate_count: usize,
    ) -> RobustnessMetrics {
        let sharpes = table.column(candidate_id, MetricColumn::Sharpe);
        let ics = table.column(candidate_id, MetricColumn::Ic);
        let turnovers = table.column(candidate_id, MetricColumn::Turnover);
        let maxdds = table.column(candidate_id, MetricColumn::MaxDd);

        let psr = psr_proxy(&sharpes);
        let psr_boot = psr_bootstrap_proxy(&sharpes, self.resamples, run_id, candidate_id);
        RobustnessMetrics {
            folds_observed: sharpes.len(),
            ic_fold_std_proxy: stats::std_dev(&ics).unwrap_or(0.0),
            psr_proxy: psr,
            dsr_proxy: dsr_proxy(psr, candidate_count),
            psr_bootstrap_proxy: psr_boot,
            dsr_bootstrap_proxy: dsr_proxy(psr_boot, candidate_count),
            cpcv: cpcv_light(&sharpes, self.min_combo_size),
            stress: stress_lite(&sharpes, &turnovers, &maxdds, self.limits),
        }
    }
}
