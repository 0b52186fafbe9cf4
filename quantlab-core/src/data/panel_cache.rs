//! Single-file parquet cache for a selected panel.
//!
//! Layout: `{cache_dir}/panel_{key}.parquet`
//!
//! - Writes are atomic (write `.tmp`, rename into place)
//! - Unreadable files are quarantined (`.quarantined`) and rebuilt
//! - The outcome is always reported as a `CacheStatus`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::feature_store::PartitionFile;
use super::frame;
use super::PanelError;
use crate::domain::AsOfPanelRow;

/// How a cached panel was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Read from an existing valid cache file.
    Hit,
    /// No cache file existed; built from partitions.
    Rebuilt,
    /// A cache file existed but was unreadable; quarantined and rebuilt.
    Repaired,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Rebuilt => "rebuilt",
            CacheStatus::Repaired => "repaired",
        })
    }
}

/// Cache key: BLAKE3 over the partition paths and sizes plus a query
/// fingerprint. Any added, removed or resized partition changes the key.
pub fn cache_key(files: &[PartitionFile], query_fingerprint: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for f in files {
        hasher.update(f.path.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(&f.size_bytes.to_le_bytes());
    }
    hasher.update(query_fingerprint.as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

pub struct PanelCache {
    cache_dir: PathBuf,
}

impl PanelCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("panel_{key}.parquet"))
    }

    /// Return the cached panel for `key`, building it with `build` when the
    /// cache is missing or unreadable.
    pub fn load_or_build<F>(&self, key: &str, build: F) -> Result<(Vec<AsOfPanelRow>, CacheStatus), PanelError>
    where
        F: FnOnce() -> Result<Vec<AsOfPanelRow>, PanelError>,
    {
        let path = self.path_for(key);
        let mut status = CacheStatus::Rebuilt;

        if path.exists() {
            match frame::read_rows_validated(&path) {
                Ok(rows) => {
                    info!(path = %path.display(), rows = rows.len(), "panel cache hit");
                    return Ok((rows, CacheStatus::Hit));
                }
                Err(e) => {
                    let quarantine = quarantine_path(&path);
                    warn!(path = %path.display(), error = %e, "quarantining unreadable panel cache");
                    fs::rename(&path, &quarantine)?;
                    status = CacheStatus::Repaired;
                }
            }
        }

        let rows = build()?;
        self.store(&path, &rows)?;
        info!(path = %path.display(), rows = rows.len(), %status, "panel cache written");
        Ok((rows, status))
    }

    fn store(&self, path: &Path, rows: &[AsOfPanelRow]) -> Result<(), PanelError> {
        fs::create_dir_all(&self.cache_dir)?;
        let tmp = path.with_extension("parquet.tmp");
        frame::write_rows(rows, &tmp)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            PanelError::Io(e)
        })
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    path.with_extension("parquet.quarantined")
}
