//! File lease guarding the registry against concurrent updates.
//!
//! The lease file is created with create-new semantics and holds the
//! holder's token as JSON. A foreign lease is reclaimed only when it has
//! expired *and* the liveness probe reports its holder dead.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use quantlab_core::domain::stable_hash;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease {path} held by {owner} (pid {pid}) until {expires_at}")]
    Held {
        path: String,
        owner: String,
        pid: u32,
        expires_at: DateTime<Utc>,
    },

    #[error("lease file {0} is unreadable; remove it by hand once no update is running")]
    Corrupt(String),

    #[error("lease io: {0}")]
    Io(#[from] io::Error),

    #[error("lease json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    pub owner: String,
    pub pid: u32,
    pub nonce: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Decides whether a lease holder is still running.
pub trait LivenessProbe {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Checks `/proc/<pid>` where procfs exists. Elsewhere every holder is
/// assumed alive, so leases there are never reclaimed automatically.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidProbe;

impl LivenessProbe for PidProbe {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == std::process::id() {
            return true;
        }
        let proc_root = Path::new("/proc");
        if cfg!(target_os = "linux") && proc_root.join("self").exists() {
            proc_root.join(pid.to_string()).exists()
        } else {
            true
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lease<P = PidProbe> {
    path: PathBuf,
    probe: P,
}

impl Lease<PidProbe> {
    pub fn new(path: PathBuf) -> Self {
        Self { path, probe: PidProbe }
    }
}

impl<P: LivenessProbe> Lease<P> {
    pub fn with_probe(path: PathBuf, probe: P) -> Self {
        Self { path, probe }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Result<Option<LeaseToken>, LeaseError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|_| LeaseError::Corrupt(self.path.display().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn acquire(&self, owner: &str, ttl: Duration, now: DateTime<Utc>) -> Result<LeaseToken, LeaseError> {
        let pid = std::process::id();
        let token = LeaseToken {
            owner: owner.to_string(),
            pid,
            nonce: stable_hash(&json!({
                "owner": owner,
                "pid": pid,
                "acquired_at": now.timestamp_nanos_opt().unwrap_or_default(),
            }))[..16]
                .to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };

        if self.try_create(&token)? {
            info!(path = %self.path.display(), owner, "lease acquired");
            return Ok(token);
        }

        let Some(held) = self.holder()? else {
            // released between our create attempt and the read
            return if self.try_create(&token)? {
                Ok(token)
            } else {
                Err(self.held_error(&self.holder()?.unwrap_or(token)))
            };
        };
        if !held.is_expired(now) || self.probe.is_alive(held.pid) {
            return Err(self.held_error(&held));
        }

        warn!(
            path = %self.path.display(),
            stale_owner = %held.owner,
            stale_pid = held.pid,
            "reclaiming expired lease of a dead holder"
        );
        fs::remove_file(&self.path)?;
        if self.try_create(&token)? {
            Ok(token)
        } else {
            let current = self.holder()?.unwrap_or(held);
            Err(self.held_error(&current))
        }
    }

    /// Remove the lease if `token` still holds it. Returns whether it did.
    pub fn release(&self, token: &LeaseToken) -> Result<bool, LeaseError> {
        match self.holder() {
            Ok(Some(held)) if held == *token => {
                fs::remove_file(&self.path)?;
                info!(path = %self.path.display(), owner = %token.owner, "lease released");
                Ok(true)
            }
            Ok(_) | Err(LeaseError::Corrupt(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run `f` while holding the lease; the lease is released afterwards
    /// even if `f` returns an error value.
    pub fn hold<T>(
        &self,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
        f: impl FnOnce() -> T,
    ) -> Result<T, LeaseError> {
        let token = self.acquire(owner, ttl, now)?;
        let out = f();
        self.release(&token)?;
        Ok(out)
    }

    fn try_create(&self, token: &LeaseToken) -> Result<bool, LeaseError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                file.write_all(serde_json::to_string(token)?.as_bytes())?;
                file.sync_all()?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn held_error(&self, held: &LeaseToken) -> LeaseError {
        LeaseError::Held {
            path: self.path.display().to_string(),
            owner: held.owner.clone(),
            pid: held.pid,
            expires_at: held.expires_at,
        }
    }
}
