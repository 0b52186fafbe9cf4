//! SQLite registry store.
//!
//! Every table carries its natural key, a few query columns, the full record
//! as JSON and a content hash. Writes are upserts that report whether they
//! inserted, found identical content, or replaced.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use quantlab_core::domain::stable_hash;

use super::records::{
    CandidateStateEvent, CandidateStateRecord, ChampionRecord, PromotionDecision, PromotionEvent, RunCandidateRecord,
    RunRecord,
};
use super::RegistryError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
  run_id TEXT PRIMARY KEY,
  stage_a_run_id TEXT NOT NULL,
  ok INTEGER NOT NULL,
  created_at TEXT NOT NULL,
  record_json TEXT NOT NULL,
  content_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_candidates (
  run_id TEXT NOT NULL,
  candidate_id TEXT NOT NULL,
  family TEXT,
  q1_registry_score REAL,
  pass INTEGER NOT NULL,
  record_json TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  PRIMARY KEY (run_id, candidate_id)
);

CREATE TABLE IF NOT EXISTS champion_state (
  slot TEXT PRIMARY KEY,
  champion_id TEXT NOT NULL,
  candidate_id TEXT NOT NULL,
  record_json TEXT NOT NULL,
  content_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS candidate_registry_state (
  candidate_id TEXT PRIMARY KEY,
  state TEXT NOT NULL,
  source_run_id TEXT NOT NULL,
  record_json TEXT NOT NULL,
  content_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS promotion_decisions (
  decision_id TEXT PRIMARY KEY,
  ts TEXT NOT NULL,
  stage_b_run_id TEXT NOT NULL,
  decision TEXT NOT NULL,
  record_json TEXT NOT NULL,
  content_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_promotion_decisions_run ON promotion_decisions(stage_b_run_id);

CREATE TABLE IF NOT EXISTS promotion_events (
  event_id TEXT PRIMARY KEY,
  ts TEXT NOT NULL,
  stage_b_run_id TEXT NOT NULL,
  candidate_id TEXT NOT NULL,
  old_champion_id TEXT,
  record_json TEXT NOT NULL,
  content_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS candidate_state_events (
  event_id TEXT PRIMARY KEY,
  ts TEXT NOT NULL,
  stage_b_run_id TEXT NOT NULL,
  candidate_id TEXT NOT NULL,
  record_json TEXT NOT NULL,
  content_hash TEXT NOT NULL
);
";

/// A record persisted in one registry table.
pub trait StoreRecord: Serialize + DeserializeOwned {
    const TABLE: &'static str;
    /// Natural key columns, all present in `columns()`.
    const KEY: &'static [&'static str];
    /// Audit tables never overwrite an existing key.
    const APPEND_ONLY: bool = false;
    /// Fields left out of the content hash.
    const VOLATILE: &'static [&'static str] = &[];

    /// Key and query columns, in schema order.
    fn columns(&self) -> Vec<(&'static str, SqlValue)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
    Replaced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub unchanged: usize,
    pub replaced: usize,
}

impl UpsertCounts {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Replaced => self.replaced += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.unchanged + self.replaced
    }
}

fn content_hash<R: StoreRecord>(record: &R) -> Result<(String, String), RegistryError> {
    let mut value = serde_json::to_value(record)?;
    let json = value.to_string();
    if let Some(obj) = value.as_object_mut() {
        for field in R::VOLATILE {
            obj.remove(*field);
        }
    }
    Ok((json, stable_hash(&value)))
}

fn key_values<R: StoreRecord>(columns: &[(&'static str, SqlValue)]) -> Vec<SqlValue> {
    R::KEY
        .iter()
        .filter_map(|k| columns.iter().find(|(name, _)| name == k).map(|(_, v)| v.clone()))
        .collect()
}

fn key_clause<R: StoreRecord>() -> String {
    R::KEY
        .iter()
        .map(|k| format!("{k} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn upsert_on<R: StoreRecord>(conn: &Connection, record: &R) -> Result<UpsertOutcome, RegistryError> {
    let (json, hash) = content_hash(record)?;
    let columns = record.columns();
    let keys = key_values::<R>(&columns);

    let existing: Option<String> = conn
        .query_row(
            &format!("SELECT content_hash FROM {} WHERE {}", R::TABLE, key_clause::<R>()),
            params_from_iter(keys.iter()),
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing {
        Some(stored) if stored == hash => return Ok(UpsertOutcome::Unchanged),
        Some(_) if R::APPEND_ONLY => {
            tracing::warn!(table = R::TABLE, "append-only key already present with other content; kept stored row");
            return Ok(UpsertOutcome::Unchanged);
        }
        Some(_) => UpsertOutcome::Replaced,
        None => UpsertOutcome::Inserted,
    };

    let names: Vec<&str> = columns
        .iter()
        .map(|(n, _)| *n)
        .chain(["record_json", "content_hash"])
        .collect();
    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        R::TABLE,
        names.join(", "),
        placeholders
    );
    let values: Vec<SqlValue> = columns
        .into_iter()
        .map(|(_, v)| v)
        .chain([SqlValue::Text(json), SqlValue::Text(hash)])
        .collect();
    conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(outcome)
}

/// Writes staged inside one transaction.
pub struct Batch<'a> {
    conn: &'a Connection,
    counts: BTreeMap<&'static str, UpsertCounts>,
}

impl Batch<'_> {
    pub fn upsert<R: StoreRecord>(&mut self, record: &R) -> Result<UpsertOutcome, RegistryError> {
        let outcome = upsert_on(self.conn, record)?;
        self.counts.entry(R::TABLE).or_default().record(outcome);
        Ok(outcome)
    }
}

pub struct RegistryStore {
    conn: Connection,
}

impl RegistryStore {
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Single upsert in its own implicit transaction.
    pub fn upsert<R: StoreRecord>(&self, record: &R) -> Result<UpsertOutcome, RegistryError> {
        upsert_on(&self.conn, record)
    }

    /// Run `f` inside one transaction. Nothing is committed if it fails.
    pub fn batch<T>(
        &mut self,
        f: impl FnOnce(&mut Batch<'_>) -> Result<T, RegistryError>,
    ) -> Result<(T, BTreeMap<&'static str, UpsertCounts>), RegistryError> {
        let tx = self.conn.transaction()?;
        let mut batch = Batch {
            conn: &tx,
            counts: BTreeMap::new(),
        };
        let out = f(&mut batch)?;
        let counts = batch.counts;
        tx.commit()?;
        Ok((out, counts))
    }

    pub fn get<R: StoreRecord>(&self, key: &[SqlValue]) -> Result<Option<R>, RegistryError> {
        let json: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT record_json FROM {} WHERE {}", R::TABLE, key_clause::<R>()),
                params_from_iter(key.iter()),
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(RegistryError::from))
            .transpose()
    }

    /// Every record of a table, in insertion order.
    pub fn all<R: StoreRecord>(&self) -> Result<Vec<R>, RegistryError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT record_json FROM {} ORDER BY rowid", R::TABLE))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(serde_json::from_str(&json?)?);
        }
        Ok(out)
    }

    pub fn count<R: StoreRecord>(&self) -> Result<usize, RegistryError> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", R::TABLE), [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    pub fn champion(&self, slot: &str) -> Result<Option<ChampionRecord>, RegistryError> {
        self.get(&[SqlValue::Text(slot.to_string())])
    }

    pub fn candidate_states(&self) -> Result<BTreeMap<String, CandidateStateRecord>, RegistryError> {
        Ok(self
            .all::<CandidateStateRecord>()?
            .into_iter()
            .map(|r| (r.candidate_id.clone(), r))
            .collect())
    }

    pub fn run(&self, run_id: &str) -> Result<Option<RunRecord>, RegistryError> {
        self.get(&[SqlValue::Text(run_id.to_string())])
    }

    pub fn run_candidates(&self, run_id: &str) -> Result<Vec<RunCandidateRecord>, RegistryError> {
        self.query_json(
            "SELECT record_json FROM run_candidates WHERE run_id = ?1 ORDER BY candidate_id",
            run_id,
        )
    }

    pub fn decisions_for_run(&self, run_id: &str) -> Result<Vec<PromotionDecision>, RegistryError> {
        self.query_json(
            "SELECT record_json FROM promotion_decisions WHERE stage_b_run_id = ?1 ORDER BY ts, rowid",
            run_id,
        )
    }

    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<PromotionEvent>, RegistryError> {
        self.query_json(
            "SELECT record_json FROM promotion_events WHERE stage_b_run_id = ?1 ORDER BY ts, rowid",
            run_id,
        )
    }

    pub fn state_events_for_run(&self, run_id: &str) -> Result<Vec<CandidateStateEvent>, RegistryError> {
        self.query_json(
            "SELECT record_json FROM candidate_state_events WHERE stage_b_run_id = ?1 ORDER BY ts, rowid",
            run_id,
        )
    }

    fn query_json<T: DeserializeOwned>(&self, sql: &str, arg: &str) -> Result<Vec<T>, RegistryError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![arg], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(serde_json::from_str(&json?)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::score::tests::candidate;
    use crate::registry::states::CandidateState;
    use serde_json::Map;

    fn state(candidate_id: &str, state: CandidateState, ts: &str) -> CandidateStateRecord {
        CandidateStateRecord {
            candidate_id: candidate_id.into(),
            family: "TSMOM".into(),
            state,
            source_run_id: "stageb_r1".into(),
            updated_at: ts.into(),
            reason_codes: vec!["STAGE_B_LIGHT_SURVIVOR".into()],
            q1_registry_score: 0.5,
            champion_id: None,
            metrics: Map::new(),
        }
    }

    #[test]
    fn upsert_reports_inserted_unchanged_replaced() {
        let store = RegistryStore::open_in_memory().unwrap();
        let a = state("a", CandidateState::Shadow, "2024-06-28T00:00:00Z");
        assert_eq!(store.upsert(&a).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&a).unwrap(), UpsertOutcome::Unchanged);

        // Only the timestamp differs: still unchanged.
        let later = state("a", CandidateState::Shadow, "2024-07-01T00:00:00Z");
        assert_eq!(store.upsert(&later).unwrap(), UpsertOutcome::Unchanged);

        let retired = state("a", CandidateState::Retired, "2024-07-01T00:00:00Z");
        assert_eq!(store.upsert(&retired).unwrap(), UpsertOutcome::Replaced);
        let stored = store.candidate_states().unwrap();
        assert_eq!(stored["a"].state, CandidateState::Retired);
    }

    #[test]
    fn composite_keys_and_lookups() {
        let store = RegistryStore::open_in_memory().unwrap();
        let c = candidate("tsmom_20d", 0.6);
        let r1 = RunCandidateRecord::new("stageb_r1", &c);
        let r2 = RunCandidateRecord::new("stageb_r2", &c);
        assert_eq!(store.upsert(&r1).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&r2).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.count::<RunCandidateRecord>().unwrap(), 2);
        assert_eq!(store.run_candidates("stageb_r1").unwrap(), vec![r1]);

        assert!(store.champion("default").unwrap().is_none());
        let champ = ChampionRecord::promote("default", "stageb_r1", &c, "2024-06-28T00:00:00Z");
        store.upsert(&champ).unwrap();
        assert_eq!(store.champion("default").unwrap(), Some(champ));
    }

    #[test]
    fn failed_batch_rolls_back() {
        let mut store = RegistryStore::open_in_memory().unwrap();
        let result = store.batch(|b| {
            b.upsert(&state("a", CandidateState::Shadow, "t"))?;
            Err::<(), _>(RegistryError::NoCandidates("stageb_r1".into()))
        });
        assert!(result.is_err());
        assert!(store.candidate_states().unwrap().is_empty());

        let ((), counts) = store
            .batch(|b| {
                b.upsert(&state("a", CandidateState::Shadow, "t"))?;
                b.upsert(&state("b", CandidateState::Retired, "t"))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(counts["candidate_registry_state"].inserted, 2);
        assert_eq!(store.candidate_states().unwrap().len(), 2);
    }

    #[test]
    fn open_on_disk_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry").join("experiments.db");
        let store = RegistryStore::open(&path).unwrap();
        let mode: String = store
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(path.exists());
    }
}
