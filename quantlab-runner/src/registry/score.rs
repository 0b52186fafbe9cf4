//! Registry score and candidate ranking.
//!
//! ```text
//! score = 0.30·dsr + 0.20·psr
//!       + 0.15·norm(sharpe_mean, 0, 0.25)
//!       + 0.10·norm(ic_mean, 0, 0.08)
//!       + 0.10·(1 − norm(turnover, 0, 4))
//!       + 0.10·(1 − norm(maxdd, 0, 25))
//!       + 0.05·norm(cpcv_min, −0.05, 0.10)
//! ```
//!
//! rounded to 6 decimals.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::aggregate::desc;
use crate::artifacts::{self, PASS_COLUMN};

/// Clamp `(value - lo) / (hi - lo)` into [0, 1]; 0 when `hi <= lo`.
pub fn norm01(value: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// A Stage B candidate as the registry sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryCandidate {
    pub candidate_id: String,
    pub family: String,
    pub pass: bool,
    pub q1_registry_score: f64,
    pub dsr_proxy: f64,
    pub psr_proxy: f64,
    pub oos_sharpe_proxy_mean: f64,
    pub ic_5d_oos_mean: f64,
    pub turnover_proxy_mean: f64,
    pub maxdd_proxy_pct_mean: f64,
    pub cpcv_light_sharpe_min: f64,
    pub cpcv_light_neg_sharpe_share: f64,
    /// Every Stage B column of the candidate, plus its registry score.
    pub metrics: Map<String, Value>,
}

/// Registry score of one candidate. Non-finite inputs count as 0.
pub fn registry_score(c: &RegistryCandidate) -> f64 {
    let f = |v: f64| if v.is_finite() { v } else { 0.0 };
    let score = 0.30 * f(c.dsr_proxy)
        + 0.20 * f(c.psr_proxy)
        + 0.15 * norm01(f(c.oos_sharpe_proxy_mean), 0.0, 0.25)
        + 0.10 * norm01(f(c.ic_5d_oos_mean), 0.0, 0.08)
        + 0.10 * (1.0 - norm01(f(c.turnover_proxy_mean), 0.0, 4.0))
        + 0.10 * (1.0 - norm01(f(c.maxdd_proxy_pct_mean), 0.0, 25.0))
        + 0.05 * norm01(f(c.cpcv_light_sharpe_min), -0.05, 0.10);
    round6(score)
}

impl RegistryCandidate {
    /// Fill `q1_registry_score` and mirror it into `metrics`.
    pub fn scored(mut self) -> Self {
        self.q1_registry_score = registry_score(&self);
        self.metrics
            .insert("q1_registry_score".into(), Value::from(self.q1_registry_score));
        self
    }
}

/// Read and score a Stage B candidates (or survivors) parquet file.
pub fn read_candidates(path: &Path) -> anyhow::Result<Vec<RegistryCandidate>> {
    let df = artifacts::read_frame(path)?;
    let finite = |name: &str| -> anyhow::Result<Vec<f64>> {
        Ok(artifacts::read_f64(&df, name)?
            .into_iter()
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .collect())
    };
    let candidate_id = artifacts::read_str(&df, "candidate_id")?;
    let family = artifacts::read_str(&df, "family")?;
    let pass = artifacts::read_bool(&df, PASS_COLUMN)?;
    let dsr = finite("dsr_proxy")?;
    let psr = finite("psr_proxy")?;
    let sharpe = finite("oos_sharpe_proxy_mean")?;
    let ic = finite("ic_5d_oos_mean")?;
    let turnover = finite("turnover_proxy_mean")?;
    let maxdd = finite("maxdd_proxy_pct_mean")?;
    let cpcv_min = finite("cpcv_light_sharpe_min")?;
    let cpcv_neg = finite("cpcv_light_neg_sharpe_share")?;

    (0..df.height())
        .map(|i| {
            Ok(RegistryCandidate {
                candidate_id: candidate_id[i].clone(),
                family: family[i].clone(),
                pass: pass[i],
                q1_registry_score: 0.0,
                dsr_proxy: dsr[i],
                psr_proxy: psr[i],
                oos_sharpe_proxy_mean: sharpe[i],
                ic_5d_oos_mean: ic[i],
                turnover_proxy_mean: turnover[i],
                maxdd_proxy_pct_mean: maxdd[i],
                cpcv_light_sharpe_min: cpcv_min[i],
                cpcv_light_neg_sharpe_share: cpcv_neg[i],
                metrics: artifacts::row_json(&df, i)?,
            }
            .scored())
        })
        .collect()
}

/// Candidates: pass, score, DSR, PSR desc, then id asc.
pub fn rank_candidates(candidates: &mut [RegistryCandidate]) {
    candidates.sort_by(|a, b| {
        b.pass
            .cmp(&a.pass)
            .then_with(|| desc(a.q1_registry_score, b.q1_registry_score))
            .then_with(|| desc(a.dsr_proxy, b.dsr_proxy))
            .then_with(|| desc(a.psr_proxy, b.psr_proxy))
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
}

/// Survivors: score, DSR, PSR desc, then id asc. The first is the
/// challenger.
pub fn rank_survivors(survivors: &mut [RegistryCandidate]) {
    survivors.sort_by(|a, b| {
        desc(a.q1_registry_score, b.q1_registry_score)
            .then_with(|| desc(a.dsr_proxy, b.dsr_proxy))
            .then_with(|| desc(a.psr_proxy, b.psr_proxy))
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
}
