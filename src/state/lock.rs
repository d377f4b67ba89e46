//! Per-release locking.
//!
//! Every mutating operation on a release runs under that release's lock, so
//! two upgrades of the same release never interleave. Within a process the
//! lock is an async mutex per [`ReleaseKey`]; the file backend additionally
//! writes a lock file so separate processes sharing a state directory see
//! each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::ReleaseKey;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300; // 5 minutes

/// Information about a release lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Locked release.
    pub release: ReleaseKey,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock info for a release.
    #[must_use]
    pub fn new(release: &ReleaseKey, holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            release: release.clone(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// Registry of in-process release locks.
#[derive(Debug, Default)]
pub struct ReleaseLocks {
    locks: Mutex<HashMap<ReleaseKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReleaseLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock of `key`.
    ///
    /// Entries of other releases with no holder or waiter are dropped on the
    /// way, so the registry stays bounded by the releases in use.
    pub async fn acquire(&self, key: &ReleaseKey, holder: &str) -> ReleaseGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let guard = mutex.lock_owned().await;
        debug!("Acquired release lock for {key} ({holder})");

        ReleaseGuard {
            info: LockInfo::new(key, holder),
            lock_file: None,
            _guard: guard,
        }
    }
}

/// Held while a release is being mutated. Dropping it releases the lock.
#[derive(Debug)]
pub struct ReleaseGuard {
    info: LockInfo,
    lock_file: Option<PathBuf>,
    _guard: OwnedMutexGuard<()>,
}

impl ReleaseGuard {
    /// Returns the lock information.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Returns the locked release.
    #[must_use]
    pub const fn key(&self) -> &ReleaseKey {
        &self.info.release
    }

    /// Attaches a lock file that is removed when the guard drops.
    pub(crate) fn with_lock_file(mut self, path: PathBuf) -> Self {
        self.lock_file = Some(path);
        self
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(path) = self.lock_file.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove lock file {}: {e}", path.display());
            } else {
                debug!("Released release lock for {}", self.info.release);
            }
        }
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
