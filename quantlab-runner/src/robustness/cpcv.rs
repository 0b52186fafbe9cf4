//! CPCV-light: combinatorial path statistics over fold Sharpe proxies.
//!
//! Each "path" is one combination of folds, scored by the mean Sharpe proxy
//! of its members. Combination sizes run from `min_combo_size` to `k - 1`.

use serde::{Deserialize, Serialize};

use quantlab_core::stats;

pub const POLICY_ALL_SIZES: &str = "all_combo_sizes_from_min_combo_size_to_n_minus_1";
pub const POLICY_TRIVIAL: &str = "single_fold_or_trivial";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpcvLight {
    pub paths_total: usize,
    pub combo_sizes: Vec<usize>,
    pub combo_policy: String,
    pub mean: f64,
    pub min: f64,
    pub p25: f64,
    pub p10: f64,
    pub neg_share: f64,
    pub std: f64,
}

impl CpcvLight {
    fn trivial(sharpes: &[f64]) -> Self {
        let v = sharpes.first().copied().unwrap_or(0.0);
        Self {
            paths_total: sharpes.len(),
            combo_sizes: if sharpes.is_empty() { Vec::new() } else { vec![1] },
            combo_policy: POLICY_TRIVIAL.into(),
            mean: v,
            min: v,
            p25: v,
            p10: v,
            neg_share: if v < 0.0 { 1.0 } else { 0.0 },
            std: 0.0,
        }
    }
}

/// Path statistics for one candidate's fold Sharpe proxies (fold order).
pub fn cpcv_light(sharpes: &[f64], min_combo_size: usize) -> CpcvLight {
    let k = sharpes.len();
    if k <= 1 {
        return CpcvLight::trivial(sharpes);
    }
    let mut combo_sizes: Vec<usize> = (min_combo_size.max(1)..k).collect();
    if combo_sizes.is_empty() {
        combo_sizes = vec![1];
    }

    let mut paths = Vec::new();
    for &size in &combo_sizes {
        for_each_combination(k, size, |idx| {
            let sum: f64 = idx.iter().map(|&i| sharpes[i]).sum();
            paths.push(sum / idx.len() as f64);
        });
    }

    let mut sorted = paths.clone();
    sorted.sort_by(f64::total_cmp);
    let negative = paths.iter().filter(|v| **v < 0.0).count();
    CpcvLight {
        paths_total: paths.len(),
        combo_sizes,
        combo_policy: POLICY_ALL_SIZES.into(),
        mean: stats::mean(&paths),
        min: sorted[0],
        p25: stats::quantile_sorted(&sorted, 0.25),
        p10: stats::quantile_sorted(&sorted, 0.10),
        neg_share: negative as f64 / paths.len() as f64,
        std: stats::std_dev(&paths).unwrap_or(0.0),
    }
}

/// Visits every `size`-subset of `0..n` in lexicographic order.
fn for_each_combination(n: usize, size: usize, mut visit: impl FnMut(&[usize])) {
    if size == 0 || size > n {
        return;
    }
    let mut idx: Vec<usize> = (0..size).collect();
    loop {
        visit(&idx);
        // rightmost position that can still advance
        let Some(pos) = (0..size).rev().find(|&i| idx[i] < n - size + i) else {
            return;
        };
        idx[pos] += 1;
        for j in pos + 1..size {
            idx[j] = idx[j - 1] + 1;
        }
    }
}
