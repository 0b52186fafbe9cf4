//! Pipeline stages.
//!
//! - `stage_a`: panel → folds → fold metrics → aggregates → proxy survivors
//! - `stage_b`: Stage A artifacts → fold policy → robustness → strict gates
//!
//! Each stage reads only what the previous stage wrote plus the run config,
//! and writes its own artifacts with temp-then-rename.

pub mod stage_a;
pub mod stage_b;

pub use stage_a::{FoldsManifest, StageA, StageAOutput, StageAReport};
pub use stage_b::{StageB, StageBOutput, StageBReport, StageBRunReport};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use quantlab_core::data::PanelError;
use quantlab_core::folds::FoldError;

/// Process exit codes shared by every command.
pub mod exit_code {
    pub const FATAL_INPUT: i32 = 2;
    pub const POLICY_VIOLATION: i32 = 3;
    pub const RECONCILIATION: i32 = 4;
    pub const REGISTRY: i32 = 5;
    pub const OTHER: i32 = 1;
}

/// Fatal stage errors. Gate failures are not errors and never appear here.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("panel: {0}")]
    Panel(#[from] PanelError),

    #[error("folds: {0}")]
    Fold(#[from] FoldError),

    #[error("no fold metrics generated")]
    NoFoldMetrics,

    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    #[error("empty artifact: {0}")]
    EmptyArtifact(String),

    #[error("fold policy invalid: {}", .codes.join(","))]
    PolicyViolation { codes: Vec<String> },

    #[error(transparent)]
    Artifact(#[from] anyhow::Error),
}

impl StageError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StageError::PolicyViolation { .. } => exit_code::POLICY_VIOLATION,
            StageError::Artifact(_) => exit_code::OTHER,
            _ => exit_code::FATAL_INPUT,
        }
    }

    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            StageError::Panel(_) => "panel_load_failed",
            StageError::Fold(_) => "fold_build_failed",
            StageError::NoFoldMetrics => "no_fold_metrics",
            StageError::MissingArtifact(_) => "missing_artifact",
            StageError::EmptyArtifact(_) => "empty_artifact",
            StageError::PolicyViolation { .. } => "fold_policy_invalid",
            StageError::Artifact(_) => "artifact_io_failed",
        }
    }
}

/// Path and BLAKE3 hash of a written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    pub blake3: String,
}

impl ArtifactRef {
    pub fn of(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            path: path.display().to_string(),
            blake3: crate::artifacts::hash_file(path)?,
        })
    }
}

pub(crate) fn require_file(path: &Path) -> Result<(), StageError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StageError::MissingArtifact(path.display().to_string()))
    }
}
