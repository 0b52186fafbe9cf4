//! Panel loading: partition selection, filtering, liquidity selection and
//! caching.

pub mod feature_store;
pub mod frame;
pub mod panel_cache;

pub use feature_store::{glob_match, FeatureStore, PartitionFile};
pub use panel_cache::{cache_key, CacheStatus, PanelCache};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::AsOfPanelRow;
use crate::stats;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("feature store not found: {}", .0.display())]
    FeatureRootMissing(PathBuf),

    #[error("no as-of partitions at or before {asof_end_date}")]
    NoPartitions { asof_end_date: NaiveDate },

    #[error("no panel feature files found for the selected dates and classes")]
    NoPanelFiles,

    #[error("empty panel after filtering")]
    EmptyPanel,

    #[error("insufficient rows after top_liquid_n filter ({rows} < {min})")]
    InsufficientRows { rows: usize, min: usize },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What to load from the feature store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelQuery {
    pub asof_end_date: NaiveDate,
    /// Number of most recent as-of partitions to keep.
    pub panel_asof_days: usize,
    /// Lowercase asset classes to include.
    pub asset_classes: Vec<String>,
    pub top_liquid_n: usize,
    pub min_panel_rows: usize,
    pub part_glob: String,
}

impl PanelQuery {
    /// Stable fingerprint of the query fields that shape the selected panel.
    pub fn fingerprint(&self) -> String {
        let value = serde_json::json!({
            "asof_end_date": self.asof_end_date.to_string(),
            "panel_asof_days": self.panel_asof_days,
            "asset_classes": self.asset_classes,
            "top_liquid_n": self.top_liquid_n,
            "min_panel_rows": self.min_panel_rows,
        });
        crate::domain::stable_hash(&value)
    }
}

/// Description of a loaded panel, written into the fold manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSummary {
    pub feature_root: String,
    pub asof_dates_selected: usize,
    pub asof_date_first: Option<NaiveDate>,
    pub asof_date_last: Option<NaiveDate>,
    pub files: usize,
    pub rows: usize,
    pub assets: usize,
    pub asset_classes: Vec<String>,
    pub cache_status: CacheStatus,
}

#[derive(Debug, Clone)]
pub struct Panel {
    pub rows: Vec<AsOfPanelRow>,
    pub summary: PanelSummary,
}

impl Panel {
    /// Sorted distinct as-of dates present in the panel.
    pub fn asof_dates(&self) -> Vec<NaiveDate> {
        let set: BTreeSet<NaiveDate> = self.rows.iter().map(|r| r.asof_date).collect();
        set.into_iter().collect()
    }
}

/// Drop rows with an excluded class, a missing target or a non-positive
/// ADV. Classes are compared lowercased.
pub fn filter_rows(rows: Vec<AsOfPanelRow>, classes: &[String]) -> Vec<AsOfPanelRow> {
    let wanted: HashSet<String> = classes.iter().map(|c| c.to_ascii_lowercase()).collect();
    rows.into_iter()
        .filter(|r| wanted.contains(&r.asset_class.to_ascii_lowercase()) && r.is_usable())
        .collect()
}

/// Keep rows of the `top_n` most liquid assets, ranked by (median ADV desc,
/// row count desc, asset id asc).
pub fn select_top_liquid(rows: Vec<AsOfPanelRow>, top_n: usize) -> Vec<AsOfPanelRow> {
    let mut by_asset: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in &rows {
        if let Some(adv) = r.adv20_dollar {
            by_asset.entry(r.asset_id.as_str()).or_default().push(adv);
        }
    }
    let mut ranked: Vec<(&str, f64, usize)> = by_asset
        .iter()
        .map(|(id, advs)| (*id, stats::median(advs).unwrap_or(0.0), advs.len()))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then(b.2.cmp(&a.2))
            .then(a.0.cmp(b.0))
    });
    let keep: HashSet<String> = ranked
        .into_iter()
        .take(top_n)
        .map(|(id, _, _)| id.to_string())
        .collect();
    rows.into_iter().filter(|r| keep.contains(&r.asset_id)).collect()
}

/// Loads the as-of panel for a Stage A run.
pub struct PanelLoader {
    store: FeatureStore,
    cache: Option<PanelCache>,
}

impl PanelLoader {
    pub fn new(store: FeatureStore) -> Self {
        Self { store, cache: None }
    }

    pub fn with_cache(mut self, cache: PanelCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn load(&self, query: &PanelQuery) -> Result<Panel, PanelError> {
        let all_dates = self.store.asof_dates()?;
        let eligible: Vec<NaiveDate> = all_dates
            .into_iter()
            .filter(|d| *d <= query.asof_end_date)
            .collect();
        if eligible.is_empty() {
            return Err(PanelError::NoPartitions {
                asof_end_date: query.asof_end_date,
            });
        }
        let start = eligible.len().saturating_sub(query.panel_asof_days);
        let selected = &eligible[start..];

        let classes: Vec<String> = query
            .asset_classes
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        let files = self
            .store
            .partition_files(selected, &classes, &query.part_glob)?;
        if files.is_empty() {
            return Err(PanelError::NoPanelFiles);
        }
        debug!(dates = selected.len(), files = files.len(), "panel partitions selected");

        let build = || self.build(&files, &classes, query);
        let (rows, cache_status) = match &self.cache {
            Some(cache) => cache.load_or_build(&cache_key(&files, &query.fingerprint()), build)?,
            None => (build()?, CacheStatus::Rebuilt),
        };

        let assets: HashSet<&str> = rows.iter().map(|r| r.asset_id.as_str()).collect();
        let summary = PanelSummary {
            feature_root: self.store.root().display().to_string(),
            asof_dates_selected: selected.len(),
            asof_date_first: selected.first().copied(),
            asof_date_last: selected.last().copied(),
            files: files.len(),
            rows: rows.len(),
            assets: assets.len(),
            asset_classes: classes.clone(),
            cache_status,
        };
        info!(
            rows = summary.rows,
            assets = summary.assets,
            dates = summary.asof_dates_selected,
            cache = %cache_status,
            "panel loaded"
        );
        Ok(Panel { rows, summary })
    }

    fn build(
        &self,
        files: &[PartitionFile],
        classes: &[String],
        query: &PanelQuery,
    ) -> Result<Vec<AsOfPanelRow>, PanelError> {
        let mut raw = Vec::new();
        for file in files {
            let df = frame::read_parquet(&file.path)?;
            let (rows, dropped) = frame::dataframe_to_rows(&df, Some(&file.asset_class))?;
            if dropped > 0 {
                debug!(path = %file.path.display(), dropped, "rows without asset id or as-of date");
            }
            raw.extend(rows);
        }
        let raw_count = raw.len();
        let filtered = filter_rows(raw, classes);
        if filtered.is_empty() {
            return Err(PanelError::EmptyPanel);
        }
        let selected = select_top_liquid(filtered, query.top_liquid_n);
        debug!(raw = raw_count, kept = selected.len(), "panel filtered");
        if selected.len() < query.min_panel_rows {
            return Err(PanelError::InsufficientRows {
                rows: selected.len(),
                min: query.min_panel_rows,
            });
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, class: &str, day: u32, adv: Option<f64>) -> AsOfPanelRow {
        let mut r = AsOfPanelRow::empty(id, class, NaiveDate::from_ymd_opt(2024, 4, day).unwrap());
        r.adv20_dollar = adv;
        r.fwd_ret_5d = Some(0.0);
        r
    }

    #[test]
    fn filter_drops_classes_and_bad_adv() {
        let rows = vec![
            row("A", "stock", 1, Some(1.0)),
            row("B", "crypto", 1, Some(1.0)),
            row("C", "ETF", 1, Some(1.0)),
            row("D", "stock", 1, Some(0.0)),
            row("E", "stock", 1, None),
        ];
        let kept = filter_rows(rows, &["stock".into(), "etf".into()]);
        let ids: Vec<&str> = kept.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
    }

    #[test]
    fn liquidity_rank_uses_median_then_rows_then_id() {
        let rows = vec![
            // A: median 5, 3 rows
            row("A", "stock", 1, Some(1.0)),
            row("A", "stock", 2, Some(5.0)),
            row("A", "stock", 3, Some(100.0)),
            // B: median 5, 2 rows
            row("B", "stock", 1, Some(5.0)),
            row("B", "stock", 2, Some(5.0)),
            // C: median 5, 2 rows, loses the id tie-break to B
            row("C", "stock", 1, Some(5.0)),
            row("C", "stock", 2, Some(5.0)),
            // D: median 2
            row("D", "stock", 1, Some(2.0)),
        ];
        let kept = select_top_liquid(rows, 2);
        let ids: BTreeSet<&str> = kept.iter().map(|r| r.asset_id.as_str()).collect();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(kept.len(), 5);
    }

    fn write_partition(root: &std::path::Path, day: u32, class: &str, rows: &[AsOfPanelRow]) {
        let dir = root
            .join(format!("asof_date=2024-04-{day:02}"))
            .join(format!("asset_class={class}"));
        std::fs::create_dir_all(&dir).unwrap();
        frame::write_rows(rows, &dir.join("part-0.parquet")).unwrap();
    }

    fn query(min_rows: usize) -> PanelQuery {
        PanelQuery {
            asof_end_date: NaiveDate::from_ymd_opt(2024, 4, 3).unwrap(),
            panel_asof_days: 2,
            asset_classes: vec!["stock".into()],
            top_liquid_n: 10,
            min_panel_rows: min_rows,
            part_glob: "part-*.parquet".into(),
        }
    }

    #[test]
    fn loader_selects_recent_partitions_up_to_end_date() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=4 {
            let rows: Vec<_> = (0..3).map(|i| row(&format!("S{i}"), "stock", day, Some(1e6))).collect();
            write_partition(dir.path(), day, "stock", &rows);
        }
        let loader = PanelLoader::new(FeatureStore::open(dir.path()).unwrap());
        let panel = loader.load(&query(1)).unwrap();
        let dates = panel.asof_dates();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[1], NaiveDate::from_ymd_opt(2024, 4, 3).unwrap());
        assert_eq!(panel.summary.rows, 6);
        assert_eq!(panel.summary.cache_status, CacheStatus::Rebuilt);
    }

    #[test]
    fn loader_enforces_minimum_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 3, "stock", &[row("S0", "stock", 3, Some(1e6))]);
        let loader = PanelLoader::new(FeatureStore::open(dir.path()).unwrap());
        let err = loader.load(&query(1000)).unwrap_err();
        assert!(matches!(err, PanelError::InsufficientRows { rows: 1, min: 1000 }));
    }

    #[test]
    fn loader_reports_no_partitions_before_end() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 9, "stock", &[row("S0", "stock", 9, Some(1e6))]);
        let loader = PanelLoader::new(FeatureStore::open(dir.path()).unwrap());
        assert!(matches!(loader.load(&query(1)), Err(PanelError::NoPartitions { .. })));
    }
}
