//! Walk-forward fold construction and fold-set validation.

pub mod builder;
pub mod policy;

pub use builder::{distinct_dates, FoldBuilder, FoldError, FoldPolicy};
pub use policy::{
    FoldManifestConfig, FoldPolicyReport, FoldPolicyValidator, PolicyCounts, PolicyIssue,
    PolicyRequirements,
};
