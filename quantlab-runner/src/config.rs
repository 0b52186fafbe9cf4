//! Serializable pipeline configuration.
//!
//! One `PipelineConfig` carries every knob of a run, grouped per stage. It is
//! layered as defaults → TOML file → CLI overrides and then passed
//! explicitly into each stage; nothing here reads the environment.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use quantlab_core::data::PanelQuery;
use quantlab_core::folds::{FoldPolicy, PolicyRequirements};

use crate::gates::GateThresholds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full configuration of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fold construction (Stage A).
    pub fold: FoldPolicy,
    /// Fold-policy minima re-checked by Stage B.
    pub policy: PolicyConfig,
    pub stage_a: StageAConfig,
    pub robustness: RobustnessConfig,
    pub gates: GateThresholds,
    pub promotion: PromotionConfig,
}

impl PipelineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Rejects values no stage can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fold.fold_count == 0 {
            return Err(ConfigError::Invalid("fold.fold_count must be at least 1".into()));
        }
        if self.fold.test_days == 0 {
            return Err(ConfigError::Invalid("fold.test_days must be at least 1".into()));
        }
        if self.stage_a.panel_asof_days == 0 {
            return Err(ConfigError::Invalid("stage_a.panel_asof_days must be at least 1".into()));
        }
        if self.stage_a.asset_classes.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid("stage_a.asset_classes is empty".into()));
        }
        if !self.promotion.score_epsilon.is_finite() || self.promotion.score_epsilon < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "promotion.score_epsilon must be finite and non-negative, got {}",
                self.promotion.score_epsilon
            )));
        }
        Ok(())
    }

    /// BLAKE3 over the canonical JSON form of the config.
    ///
    /// Two configs with equal content hash equally regardless of how they
    /// were layered.
    pub fn config_hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        quantlab_core::domain::stable_hash(&value)
    }

    /// Panel query for a Stage A run ending at `asof_end_date`.
    pub fn panel_query(&self, asof_end_date: NaiveDate) -> PanelQuery {
        PanelQuery {
            asof_end_date,
            panel_asof_days: self.stage_a.panel_asof_days,
            asset_classes: self.stage_a.asset_classes.clone(),
            top_liquid_n: self.stage_a.top_liquid_n,
            min_panel_rows: self.stage_a.min_panel_rows,
            part_glob: self.stage_a.part_glob.clone(),
        }
    }
}

/// Fold-policy minima plus the switch that makes a violation fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub fold_count_min: usize,
    pub embargo_days_min: usize,
    pub test_days_min: usize,
    pub min_train_days_min: usize,
    /// When false an invalid fold set only logs a warning.
    pub require_fold_policy_valid: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let req = PolicyRequirements::default();
        Self {
            fold_count_min: req.fold_count_min,
            embargo_days_min: req.embargo_days_min,
            test_days_min: req.test_days_min,
            min_train_days_min: req.min_train_days_min,
            require_fold_policy_valid: true,
        }
    }
}

impl PolicyConfig {
    pub fn requirements(&self) -> PolicyRequirements {
        PolicyRequirements {
            fold_count_min: self.fold_count_min,
            embargo_days_min: self.embargo_days_min,
            test_days_min: self.test_days_min,
            min_train_days_min: self.min_train_days_min,
        }
    }
}

/// Stage A: panel selection, fold scoring and the cheap proxy gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageAConfig {
    pub feature_store_version: String,
    pub asset_classes: Vec<String>,
    pub part_glob: String,
    pub panel_asof_days: usize,
    pub top_liquid_n: usize,
    pub min_panel_rows: usize,
    /// A fold with fewer training rows is skipped.
    pub min_train_rows: usize,
    /// A fold with fewer test rows is skipped.
    pub min_test_rows: usize,
    pub survivors_max: usize,
    pub use_panel_cache: bool,
    pub proxy_gate: ProxyGate,
}

impl Default for StageAConfig {
    fn default() -> Self {
        Self {
            feature_store_version: "v4_q1panel".into(),
            asset_classes: vec!["stock".into(), "etf".into()],
            part_glob: "part-*.parquet".into(),
            panel_asof_days: 120,
            top_liquid_n: 5000,
            min_panel_rows: 1000,
            min_train_rows: 500,
            min_test_rows: 200,
            survivors_max: 24,
            use_panel_cache: true,
            proxy_gate: ProxyGate::default(),
        }
    }
}

/// Thresholds of the Stage A pre-filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyGate {
    pub ic_mean_min: f64,
    pub maxdd_mean_max: f64,
    pub turnover_mean_max: f64,
    pub neg_sharpe_share_max: f64,
}

impl Default for ProxyGate {
    fn default() -> Self {
        Self {
            ic_mean_min: 0.0,
            maxdd_mean_max: 35.0,
            turnover_mean_max: 4.0,
            neg_sharpe_share_max: 0.65,
        }
    }
}

/// Stage B robustness proxies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustnessConfig {
    /// Bootstrap resamples; raised to at least 32.
    pub bootstrap_resamples: usize,
    /// Smallest CPCV-light combination; raised to at least 1.
    pub cpcv_light_min_combo_size: usize,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            bootstrap_resamples: 512,
            cpcv_light_min_combo_size: 1,
        }
    }
}

/// Champion promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Hysteresis band a challenger must clear over the champion's score.
    pub score_epsilon: f64,
    /// Promote the top survivor when no champion exists yet.
    pub promote_on_empty: bool,
    pub slot: String,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            score_epsilon: 0.01,
            promote_on_empty: true,
            slot: "default".into(),
        }
    }
}
