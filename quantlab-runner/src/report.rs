//! Machine-readable failure output.
//!
//! Every failed command prints one JSON object to stdout:
//! `{ok: false, reason, error, checks, exit_code}`.

use serde::{Deserialize, Serialize};

use crate::lease::LeaseError;
use crate::reconcile::{Check, ReconcileReport};
use crate::registry::RegistryError;
use crate::stages::{exit_code, StageError};

/// An error that maps to a stable reason string and a process exit code.
pub trait Failure: std::fmt::Display {
    fn reason(&self) -> &'static str;
    fn exit_code(&self) -> i32;
}

impl Failure for StageError {
    fn reason(&self) -> &'static str {
        StageError::reason(self)
    }

    fn exit_code(&self) -> i32 {
        StageError::exit_code(self)
    }
}

impl Failure for RegistryError {
    fn reason(&self) -> &'static str {
        RegistryError::reason(self)
    }

    fn exit_code(&self) -> i32 {
        RegistryError::exit_code(self)
    }
}

impl Failure for LeaseError {
    fn reason(&self) -> &'static str {
        match self {
            LeaseError::Held { .. } => "registry_lease_held",
            LeaseError::Corrupt(_) => "registry_lease_corrupt",
            LeaseError::Io(_) | LeaseError::Json(_) => "registry_lease_io_failed",
        }
    }

    fn exit_code(&self) -> i32 {
        exit_code::REGISTRY
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub ok: bool,
    pub reason: String,
    pub error: String,
    pub checks: Vec<Check>,
    pub exit_code: i32,
}

impl FailureReport {
    pub fn from_error<E: Failure + ?Sized>(err: &E) -> Self {
        Self {
            ok: false,
            reason: err.reason().to_string(),
            error: err.to_string(),
            checks: Vec::new(),
            exit_code: err.exit_code(),
        }
    }

    /// Strict reconciliation with at least one failed check.
    pub fn from_reconcile(report: &ReconcileReport) -> Self {
        Self {
            ok: false,
            reason: "reconciliation_mismatch".into(),
            error: format!("failed checks: {}", report.failed.join(",")),
            checks: report.checks.clone(),
            exit_code: report.exit_code,
        }
    }

    /// Anything outside the typed taxonomy, e.g. a bad CLI argument.
    pub fn other(reason: &str, err: &anyhow::Error) -> Self {
        Self {
            ok: false,
            reason: reason.to_string(),
            error: format!("{err:#}"),
            checks: Vec::new(),
            exit_code: exit_code::OTHER,
        }
    }
}
