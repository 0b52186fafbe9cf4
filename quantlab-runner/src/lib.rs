//! QuantLab Runner — Stage A/B evaluation, robustness proxies, gates and the
//! champion registry.
//!
//! This crate builds on `quantlab-core` to provide:
//! - Pipeline configuration (TOML layered over defaults)
//! - Cross-fold candidate aggregates and the Stage A proxy gate
//! - PSR / DSR / CPCV-light / stress-lite robustness proxies
//! - The 20-gate Stage B evaluator with reason-coded failures
//! - Stage A and Stage B light runs with atomic parquet/JSON artifacts
//! - The champion/challenger registry (SQLite store, NDJSON ledgers)
//! - Artifact reconciliation and the registry lease

pub mod aggregate;
pub mod artifacts;
pub mod config;
pub mod gates;
pub mod lease;
pub mod reconcile;
pub mod registry;
pub mod report;
pub mod robustness;
pub mod stages;

pub use aggregate::CandidateAggregate;
pub use config::{ConfigError, PipelineConfig, PromotionConfig};
pub use gates::{Gate, GateContext, GateEvaluator, GateOutcome, GateThresholds, StageBRow};
pub use lease::{Lease, LeaseError, LeaseToken, LivenessProbe, PidProbe};
pub use reconcile::{Check, CheckStatus, ReconcileReport, Reconciler};
pub use registry::{RegistryError, RegistryPaths, RegistryUpdate, RegistryUpdateReport};
pub use report::{Failure, FailureReport};
pub use robustness::{RobustnessEngine, RobustnessMetrics};
pub use stages::{StageA, StageAOutput, StageB, StageBOutput, StageError};
