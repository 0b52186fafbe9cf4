//! As-of panel rows — the immutable input produced by the feature store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One asset's feature vector plus its forward return for one as-of date.
///
/// Every feature is optional: the feature store emits nulls for warm-up
/// windows and missing bars, and downstream code must tolerate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsOfPanelRow {
    pub asset_id: String,
    pub asset_class: String,
    pub asof_date: NaiveDate,
    pub feature_date: Option<NaiveDate>,
    pub ret_20d: Option<f64>,
    pub ret_5d: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd_hist: Option<f64>,
    pub atr_pct_14: Option<f64>,
    pub ewma_vol_20: Option<f64>,
    pub boll_z_20: Option<f64>,
    pub adv20_dollar: Option<f64>,
    pub close_raw: Option<f64>,
    pub sma_200: Option<f64>,
    /// Realized 5-day forward return: the scoring target.
    pub fwd_ret_5d: Option<f64>,
}

impl AsOfPanelRow {
    /// A row with identity fields set and every feature missing.
    pub fn empty(asset_id: impl Into<String>, asset_class: impl Into<String>, asof_date: NaiveDate) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_class: asset_class.into(),
            asof_date,
            feature_date: None,
            ret_20d: None,
            ret_5d: None,
            rsi_14: None,
            macd_hist: None,
            atr_pct_14: None,
            ewma_vol_20: None,
            boll_z_20: None,
            adv20_dollar: None,
            close_raw: None,
            sma_200: None,
            fwd_ret_5d: None,
        }
    }

    /// Forward-return target, if present and finite.
    pub fn target(&self) -> Option<f64> {
        self.fwd_ret_5d.filter(|v| v.is_finite())
    }

    /// True when the row carries everything the panel filter requires:
    /// an asset id, a finite positive ADV and a finite target.
    pub fn is_usable(&self) -> bool {
        !self.asset_id.is_empty()
            && self.adv20_dollar.map_or(false, |v| v.is_finite() && v > 0.0)
            && self.target().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn usable_requires_positive_adv_and_target() {
        let mut row = AsOfPanelRow::empty("AAA", "stock", day());
        assert!(!row.is_usable());
        row.adv20_dollar = Some(1e6);
        assert!(!row.is_usable());
        row.fwd_ret_5d = Some(0.01);
        assert!(row.is_usable());
        row.adv20_dollar = Some(0.0);
        assert!(!row.is_usable());
    }

    #[test]
    fn nan_target_is_missing() {
        let mut row = AsOfPanelRow::empty("AAA", "stock", day());
        row.fwd_ret_5d = Some(f64::NAN);
        assert_eq!(row.target(), None);
    }
}
