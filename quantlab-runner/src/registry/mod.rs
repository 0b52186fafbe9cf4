//! Champion/challenger promotion registry.
//!
//! The registry owns the champion record, per-candidate lifecycle states and
//! the decision/event audit trail. One registry update per Stage B run:
//!
//! 1. score and rank the Stage B candidates and survivors
//! 2. decide PROMOTE / NO_PROMOTION against the current champion
//! 3. diff the new candidate-state snapshot against the stored one
//! 4. append ledgers, write champion side files, commit SQLite last
//!
//! Every id is a hash of semantic content, so a re-run over identical
//! inputs recomputes identical ids and every write dedupes.

pub mod decision;
pub mod index;
pub mod ledger;
pub mod records;
pub mod score;
pub mod states;
pub mod store;
pub mod update;

pub use decision::{decide, Decision, DecisionOutcome};
pub use index::PromotionIndex;
pub use ledger::{Ledger, LedgerContents, LedgerEntry};
pub use records::{
    CandidateStateEvent, CandidateStateRecord, ChampionRecord, PromotionDecision, PromotionEvent, RunCandidateRecord,
    RunRecord,
};
pub use score::{norm01, rank_candidates, rank_survivors, registry_score, RegistryCandidate};
pub use states::{assign_states, classify_transition, CandidateState, StateAssignment, Transition};
pub use store::{RegistryStore, StoreRecord, UpsertCounts, UpsertOutcome};
pub use update::{RegistryUpdate, RegistryUpdateReport};

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::stages::{exit_code, StageError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("stage B run {0} did not finish ok")]
    RunNotOk(String),

    #[error("stage B run {0} has no candidates")]
    NoCandidates(String),

    #[error(transparent)]
    Artifact(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RegistryError::Stage(e) => e.exit_code(),
            RegistryError::RunNotOk(_) | RegistryError::NoCandidates(_) => exit_code::FATAL_INPUT,
            _ => exit_code::REGISTRY,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            RegistryError::Stage(e) => e.reason(),
            RegistryError::RunNotOk(_) => "stage_b_run_not_ok",
            RegistryError::NoCandidates(_) => "stage_b_candidates_empty",
            RegistryError::Sqlite(_) => "registry_store_failed",
            _ => "registry_io_failed",
        }
    }
}

/// File layout under `<quant_root>/registry`.
#[derive(Debug, Clone)]
pub struct RegistryPaths {
    root: PathBuf,
}

impl RegistryPaths {
    pub fn new(quant_root: &Path) -> Self {
        Self {
            root: quant_root.join("registry"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db(&self) -> PathBuf {
        self.root.join("experiments.db")
    }

    pub fn ledgers_dir(&self) -> PathBuf {
        self.root.join("ledgers")
    }

    pub fn decisions_ledger(&self) -> PathBuf {
        self.ledgers_dir().join("promotion_decisions.ndjson")
    }

    pub fn events_ledger(&self) -> PathBuf {
        self.ledgers_dir().join("promotion_events.ndjson")
    }

    pub fn state_events_ledger(&self) -> PathBuf {
        self.ledgers_dir().join("candidate_state_events.ndjson")
    }

    pub fn current_champion(&self) -> PathBuf {
        self.root.join("champions").join("current_champion.json")
    }

    pub fn champion_history(&self, champion_id: &str) -> PathBuf {
        self.root
            .join("champions")
            .join("history")
            .join(format!("{champion_id}.json"))
    }

    pub fn promotion_index(&self) -> PathBuf {
        self.root.join("promotion_index.json")
    }

    pub fn lease(&self) -> PathBuf {
        self.root.join("registry.lease")
    }
}
