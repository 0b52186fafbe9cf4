//! Partition discovery over the feature store.
//!
//! Layout: `{root}/asof_date=YYYY-MM-DD/asset_class={cls}/part-*.parquet`

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::frame::parse_day;
use super::PanelError;

/// One parquet file of the feature store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFile {
    pub asof_date: NaiveDate,
    pub asset_class: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Read-only view of a feature store version directory.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    root: PathBuf,
}

impl FeatureStore {
    /// Open a store root. Fails if the directory does not exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PanelError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PanelError::FeatureRootMissing(root));
        }
        Ok(Self { root })
    }

    /// `{quant_root}/features/store/feature_store_version={version}`
    pub fn version_root(quant_root: &Path, version: &str) -> PathBuf {
        quant_root
            .join("features")
            .join("store")
            .join(format!("feature_store_version={version}"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sorted as-of dates that have a partition directory. Directories whose
    /// name does not parse are ignored.
    pub fn asof_dates(&self) -> Result<Vec<NaiveDate>, PanelError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match name.strip_prefix("asof_date=").and_then(parse_day) {
                Some(d) => out.push(d),
                None => debug!(dir = %path.display(), "skipping non-partition directory"),
            }
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    fn class_dir(&self, date: NaiveDate, class: &str) -> PathBuf {
        self.root
            .join(format!("asof_date={date}"))
            .join(format!("asset_class={class}"))
    }

    /// Files matching `pattern` for each (date, class), in date then class
    /// then file-name order. Missing class directories contribute nothing.
    pub fn partition_files(
        &self,
        dates: &[NaiveDate],
        classes: &[String],
        pattern: &str,
    ) -> Result<Vec<PartitionFile>, PanelError> {
        let mut out = Vec::new();
        for &date in dates {
            for class in classes {
                let dir = self.class_dir(date, class);
                if !dir.is_dir() {
                    continue;
                }
                let mut files: Vec<PartitionFile> = Vec::new();
                for entry in fs::read_dir(&dir)? {
                    let entry = entry?;
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if !glob_match(pattern, name) {
                        continue;
                    }
                    files.push(PartitionFile {
                        asof_date: date,
                        asset_class: class.clone(),
                        path: entry.path(),
                        size_bytes: entry.metadata()?.len(),
                    });
                }
                files.sort_by(|a, b| a.path.cmp(&b.path));
                out.extend(files);
            }
        }
        Ok(out)
    }
}

/// Minimal wildcard match: `*` matches any run of characters, everything
/// else is literal.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || name.len() < first.len() + last.len() || !name.ends_with(last) {
        return false;
    }
    let mut rest = &name[first.len()..name.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_part_files() {
        assert!(glob_match("part-*.parquet", "part-00000.parquet"));
        assert!(!glob_match("part-*.parquet", "part-0.parquet.tmp"));
        assert!(!glob_match("part-*.parquet", "meta.json"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("ab*ba", "aba"));
    }

    #[test]
    fn discovers_dates_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for (date, class) in [("2024-01-02", "stock"), ("2024-01-03", "etf"), ("2024-01-03", "stock")] {
            let p = root.join(format!("asof_date={date}")).join(format!("asset_class={class}"));
            fs::create_dir_all(&p).unwrap();
            fs::write(p.join("part-0.parquet"), b"x").unwrap();
            fs::write(p.join("notes.txt"), b"x").unwrap();
        }
        fs::create_dir_all(root.join("_tmp")).unwrap();

        let store = FeatureStore::open(root).unwrap();
        let dates = store.asof_dates().unwrap();
        assert_eq!(dates.len(), 2);

        let files = store
            .partition_files(&dates, &["stock".into(), "etf".into()], "part-*.parquet")
            .unwrap();
        let classes: Vec<&str> = files.iter().map(|f| f.asset_class.as_str()).collect();
        assert_eq!(classes, vec!["stock", "stock", "etf"]);
        assert!(files.iter().all(|f| f.size_bytes == 1));
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = FeatureStore::open(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, PanelError::FeatureRootMissing(_)));
    }
}
