//! Stress-lite: fixed cost/drawdown shock scenarios applied per fold.

use serde::{Deserialize, Serialize};

use quantlab_core::stats;

/// One shock: a flat Sharpe haircut plus a turnover-proportional one, and a
/// drawdown multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressScenario {
    pub id: &'static str,
    pub sharpe_penalty_base: f64,
    pub turnover_mult: f64,
    pub maxdd_mult: f64,
}

pub const SCENARIOS: [StressScenario; 4] = [
    StressScenario {
        id: "slippage_x2",
        sharpe_penalty_base: 0.03,
        turnover_mult: 8.0,
        maxdd_mult: 1.15,
    },
    StressScenario {
        id: "slippage_x3_spreadfloor",
        sharpe_penalty_base: 0.06,
        turnover_mult: 14.0,
        maxdd_mult: 1.30,
    },
    StressScenario {
        id: "liquidity_shock_adv50",
        sharpe_penalty_base: 0.08,
        turnover_mult: 18.0,
        maxdd_mult: 1.45,
    },
    StressScenario {
        id: "correlation_spike",
        sharpe_penalty_base: 0.05,
        turnover_mult: 10.0,
        maxdd_mult: 1.35,
    },
];

/// Mean stressed metrics of one candidate under one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub mean_sharpe: f64,
    pub mean_maxdd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressSummary {
    pub scenarios_total: usize,
    /// Lowest scenario mean Sharpe.
    pub worst_mean_sharpe: f64,
    /// Highest scenario mean drawdown.
    pub worst_mean_maxdd: f64,
    /// Failed (scenario, metric) checks over `2 * scenarios_total`; 1.0
    /// with no folds.
    pub fail_share: f64,
    pub scenarios: Vec<ScenarioResult>,
}

/// Limits a scenario mean must respect to count as a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressLimits {
    pub sharpe_mean_min: f64,
    pub maxdd_mean_max: f64,
}

/// Apply every scenario to per-fold (sharpe, turnover, drawdown) columns.
///
/// Columns shorter than `sharpes` are padded with zeros.
pub fn stress_lite(sharpes: &[f64], turnovers: &[f64], maxdds: &[f64], limits: StressLimits) -> StressSummary {
    let n = sharpes.len();
    if n == 0 {
        return StressSummary {
            scenarios_total: 0,
            worst_mean_sharpe: 0.0,
            worst_mean_maxdd: 0.0,
            fail_share: 1.0,
            scenarios: Vec::new(),
        };
    }
    let at = |col: &[f64], i: usize| col.get(i).copied().unwrap_or(0.0);

    let scenarios: Vec<ScenarioResult> = SCENARIOS
        .iter()
        .map(|sc| {
            let stressed_sharpe: Vec<f64> = (0..n)
                .map(|i| sharpes[i] - (sc.sharpe_penalty_base + sc.turnover_mult * at(turnovers, i).max(0.0)))
                .collect();
            let stressed_dd: Vec<f64> = (0..n).map(|i| at(maxdds, i) * sc.maxdd_mult).collect();
            ScenarioResult {
                scenario_id: sc.id.to_string(),
                mean_sharpe: stats::mean(&stressed_sharpe),
                mean_maxdd: stats::mean(&stressed_dd),
            }
        })
        .collect();

    let sharpe_fails = scenarios
        .iter()
        .filter(|s| s.mean_sharpe < limits.sharpe_mean_min)
        .count();
    let dd_fails = scenarios
        .iter()
        .filter(|s| s.mean_maxdd > limits.maxdd_mean_max)
        .count();
    let worst_mean_sharpe = scenarios
        .iter()
        .map(|s| s.mean_sharpe)
        .reduce(f64::min)
        .unwrap_or(0.0);
    let worst_mean_maxdd = scenarios
        .iter()
        .map(|s| s.mean_maxdd)
        .reduce(f64::max)
        .unwrap_or(0.0);

    StressSummary {
        scenarios_total: scenarios.len(),
        worst_mean_sharpe,
        worst_mean_maxdd,
        fail_share: (sharpe_fails + dd_fails) as f64 / (2 * scenarios.len()) as f64,
        scenarios,
    }
}
