use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable BLAKE3 hash (hex) of a JSON value.
///
/// `serde_json` object maps are ordered by key, so the serialized form is
/// canonical: equal semantic content always hashes to the same string.
pub fn stable_hash(value: &serde_json::Value) -> String {
    blake3::hash(value.to_string().as_bytes()).to_hex().to_string()
}

/// `prefix` + the first `len` hex chars of `stable_hash(value)`.
pub fn short_id(prefix: &str, value: &serde_json::Value, len: usize) -> String {
    let hash = stable_hash(value);
    let len = len.min(hash.len());
    format!("{prefix}{}", &hash[..len])
}

/// Identifier of one pipeline run (Stage A run, Stage B run, registry run).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Default Stage A run id for an as-of end date: `stagea_tsplits_<date>`.
    pub fn stage_a(asof_end_date: chrono::NaiveDate) -> Self {
        Self(format!("stagea_tsplits_{asof_end_date}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
