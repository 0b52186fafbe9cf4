//! Append-only NDJSON ledgers.
//!
//! One JSON object per line. An append whose id is already on file is a
//! no-op, so re-running a registry update never duplicates an entry.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use super::store::UpsertOutcome;

/// A record with a stable id that can be appended to a ledger.
pub trait LedgerEntry: Serialize + DeserializeOwned {
    fn ledger_id(&self) -> &str;
    fn ledger_ts(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct LedgerContents<T> {
    pub entries: Vec<T>,
    /// Lines that failed to parse. Skipped, never fatal.
    pub malformed: usize,
}

impl<T: LedgerEntry> LedgerContents<T> {
    pub fn ids(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.ledger_id()).collect()
    }

    /// Ids that occur more than once.
    pub fn duplicate_ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut dupes = BTreeSet::new();
        for e in &self.entries {
            if !seen.insert(e.ledger_id()) {
                dupes.insert(e.ledger_id().to_string());
            }
        }
        dupes.into_iter().collect()
    }
}

#[derive(Debug, Clone)]
pub struct Ledger<T> {
    path: PathBuf,
    _entry: PhantomData<fn() -> T>,
}

impl<T: LedgerEntry> Ledger<T> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _entry: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> io::Result<LedgerContents<T>> {
        let mut contents = LedgerContents {
            entries: Vec::new(),
            malformed: 0,
        };
        if !self.path.exists() {
            return Ok(contents);
        }
        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(entry) => contents.entries.push(entry),
                Err(_) => contents.malformed += 1,
            }
        }
        if contents.malformed > 0 {
            tracing::warn!(
                path = %self.path.display(),
                malformed = contents.malformed,
                "skipped malformed ledger lines"
            );
        }
        Ok(contents)
    }

    pub fn append(&self, entry: &T) -> io::Result<UpsertOutcome> {
        Ok(self.append_all(std::slice::from_ref(entry))?[0])
    }

    /// Append entries whose ids are not yet on file, in order.
    pub fn append_all(&self, entries: &[T]) -> io::Result<Vec<UpsertOutcome>> {
        let existing = self.read()?;
        let mut known: BTreeSet<String> = existing.ids().into_iter().map(str::to_string).collect();
        let mut outcomes = Vec::with_capacity(entries.len());
        let mut lines = Vec::new();
        for entry in entries {
            if known.insert(entry.ledger_id().to_string()) {
                let json =
                    serde_json::to_string(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                lines.push(json);
                outcomes.push(UpsertOutcome::Inserted);
            } else {
                outcomes.push(UpsertOutcome::Unchanged);
            }
        }
        if lines.is_empty() {
            return Ok(outcomes);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        for line in &lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: String,
        ts: String,
    }

    impl LedgerEntry for Entry {
        fn ledger_id(&self) -> &str {
            &self.id
        }
        fn ledger_ts(&self) -> &str {
            &self.ts
        }
    }

    fn entry(id: &str) -> Entry {
        Entry {
            id: id.into(),
            ts: "2024-06-28T00:00:00Z".into(),
        }
    }

    #[test]
    fn reappending_the_same_id_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::<Entry>::new(dir.path().join("ledgers").join("x.ndjson"));
        assert_eq!(ledger.append(&entry("a")).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(ledger.append(&entry("a")).unwrap(), UpsertOutcome::Unchanged);
        let outcomes = ledger.append_all(&[entry("b"), entry("a"), entry("b")]).unwrap();
        assert_eq!(
            outcomes,
            vec![UpsertOutcome::Inserted, UpsertOutcome::Unchanged, UpsertOutcome::Unchanged]
        );
        let contents = ledger.read().unwrap();
        assert_eq!(contents.entries, vec![entry("a"), entry("b")]);
        assert!(contents.duplicate_ids().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.ndjson");
        fs::write(&path, "{\"id\":\"a\",\"ts\":\"t\"}\nnot json\n\n{\"id\":\"a\",\"ts\":\"t\"}\n{\"truncated\n").unwrap();
        let contents = Ledger::<Entry>::new(path).read().unwrap();
        assert_eq!(contents.entries.len(), 2);
        assert_eq!(contents.malformed, 2);
        assert_eq!(contents.duplicate_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let contents = Ledger::<Entry>::new(dir.path().join("none.ndjson")).read().unwrap();
        assert!(contents.entries.is_empty());
        assert_eq!(contents.malformed, 0);
    }
}
