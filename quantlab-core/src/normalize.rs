//! Leakage-safe per-fold feature normalization.
//!
//! Location and scale come from a fold's training rows only and are applied
//! to that fold's test rows only. Nothing computed from test rows ever feeds
//! back into the statistics.

use serde::{Deserialize, Serialize};

use crate::domain::AsOfPanelRow;
use crate::stats;

/// Floor applied to ADV before taking its log.
const ADV_LOG_FLOOR: f64 = 1e-9;
/// Scales at or below this are treated as degenerate and replaced by 1.0.
const MIN_SCALE: f64 = 1e-12;

/// A normalized input feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Ret20d,
    Ret5d,
    Rsi14,
    MacdHist,
    AtrPct14,
    EwmaVol20,
    BollZ20,
    LogAdv20,
}

impl Feature {
    pub const ALL: [Feature; 8] = [
        Feature::Ret20d,
        Feature::Ret5d,
        Feature::Rsi14,
        Feature::MacdHist,
        Feature::AtrPct14,
        Feature::EwmaVol20,
        Feature::BollZ20,
        Feature::LogAdv20,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Position in `ALL` and in `NormalizedRow::z`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name of the normalized column.
    pub fn z_name(self) -> &'static str {
        match self {
            Feature::Ret20d => "z_ret_20d",
            Feature::Ret5d => "z_ret_5d",
            Feature::Rsi14 => "z_rsi_14",
            Feature::MacdHist => "z_macd_hist",
            Feature::AtrPct14 => "z_atr_pct_14",
            Feature::EwmaVol20 => "z_vol_20",
            Feature::BollZ20 => "z_boll_z_20",
            Feature::LogAdv20 => "z_liq",
        }
    }

    /// Raw value from a panel row.
    pub fn raw(self, row: &AsOfPanelRow) -> Option<f64> {
        match self {
            Feature::Ret20d => row.ret_20d,
            Feature::Ret5d => row.ret_5d,
            Feature::Rsi14 => row.rsi_14,
            Feature::MacdHist => row.macd_hist,
            Feature::AtrPct14 => row.atr_pct_14,
            Feature::EwmaVol20 => row.ewma_vol_20,
            Feature::BollZ20 => row.boll_z_20,
            Feature::LogAdv20 => row.adv20_dollar.map(|v| v.max(ADV_LOG_FLOOR).ln()),
        }
    }
}

/// Train-set location and scale for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStat {
    pub mean: f64,
    pub std: f64,
}

impl FeatureStat {
    /// Mean and ddof=1 std of the finite values; missing mean is 0.0 and a
    /// missing or degenerate std is 1.0.
    fn from_values(values: &[f64]) -> Self {
        let mean = if values.is_empty() { 0.0 } else { stats::mean(values) };
        let std = stats::std_dev(values)
            .filter(|s| s.is_finite() && *s > MIN_SCALE)
            .unwrap_or(1.0);
        Self { mean, std }
    }

    fn apply(&self, raw: Option<f64>) -> f64 {
        match stats::finite(raw) {
            Some(x) => {
                let z = (x - self.mean) / self.std;
                if z.is_finite() {
                    z
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

/// Statistics for every feature, fitted on one fold's training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    stats: [FeatureStat; Feature::COUNT],
    train_rows: usize,
}

impl NormalizationStats {
    pub fn get(&self, feature: Feature) -> FeatureStat {
        self.stats[feature.index()]
    }

    pub fn train_rows(&self) -> usize {
        self.train_rows
    }
}

/// A test row after normalization: one z-score per feature, the trend gate
/// and the scoring target.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub z: [f64; Feature::COUNT],
    /// +1.0 when `close_raw > sma_200`, else -1.0 (missing counts as -1.0).
    pub trend_gate: f64,
    pub target: f64,
}

impl NormalizedRow {
    pub fn z(&self, feature: Feature) -> f64 {
        self.z[feature.index()]
    }
}

pub struct FeatureNormalizer;

impl FeatureNormalizer {
    /// Fit per-feature statistics on training rows.
    pub fn fit<'a>(train: impl IntoIterator<Item = &'a AsOfPanelRow>) -> NormalizationStats {
        let mut columns: [Vec<f64>; Feature::COUNT] = Default::default();
        let mut train_rows = 0;
        for row in train {
            train_rows += 1;
            for feature in Feature::ALL {
                if let Some(v) = stats::finite(feature.raw(row)) {
                    columns[feature.index()].push(v);
                }
            }
        }
        let stats = std::array::from_fn(|i| FeatureStat::from_values(&columns[i]));
        NormalizationStats { stats, train_rows }
    }

    /// Normalize test rows with fitted statistics. Rows without a finite
    /// target are dropped; input order is preserved.
    pub fn transform<'a>(
        stats: &NormalizationStats,
        test: impl IntoIterator<Item = &'a AsOfPanelRow>,
    ) -> Vec<NormalizedRow> {
        test.into_iter()
            .filter_map(|row| {
                let target = row.target()?;
                let z = std::array::from_fn(|i| stats.stats[i].apply(Feature::ALL[i].raw(row)));
                Some(NormalizedRow {
                    z,
                    trend_gate: trend_gate(row),
                    target,
                })
            })
            .collect()
    }
}

fn trend_gate(row: &AsOfPanelRow) -> f64 {
    match (row.close_raw, row.sma_200) {
        (Some(close), Some(sma)) if close > sma => 1.0,
        _ => -1.0,
    }
}
