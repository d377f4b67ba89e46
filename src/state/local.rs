//! Local file-based release store.
//!
//! Layout under the base directory:
//!
//! ```text
//! .halyard/
//!   releases/<namespace>/<name>.json
//!   locks/<namespace>.<name>.lock
//! ```
//!
//! Records are written to a temporary file and renamed into place, so a
//! crash never leaves a half-written record behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{HalyardError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, ReleaseGuard, ReleaseLocks, LOCK_EXPIRY_SECS};
use super::store::ReleaseStore;
use super::types::{NewRevision, ReleaseKey, ReleaseRecord, ReleaseStatus, Revision};

/// Default state directory name.
pub const STATE_DIR: &str = ".halyard";

const RELEASES_DIR: &str = "releases";
const LOCKS_DIR: &str = "locks";

/// Local file-based release store.
#[derive(Debug)]
pub struct LocalReleaseStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
    /// In-process release locks.
    locks: ReleaseLocks,
    /// Revisions kept per release after each record.
    history_max: Option<usize>,
}

impl LocalReleaseStore {
    /// Creates a new local store rooted at `./.halyard`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| HalyardError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
            locks: ReleaseLocks::new(),
            history_max: None,
        }
    }

    /// Sets the number of revisions kept per release after each record.
    #[must_use]
    pub const fn with_history_max(mut self, history_max: usize) -> Self {
        self.history_max = Some(history_max);
        self
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, key: &ReleaseKey) -> Result<PathBuf> {
        Ok(self
            .base_dir
            .join(RELEASES_DIR)
            .join(path_component(&key.namespace)?)
            .join(format!("{}.json", path_component(&key.name)?)))
    }

    fn lock_path(&self, key: &ReleaseKey) -> Result<PathBuf> {
        Ok(self.base_dir.join(LOCKS_DIR).join(format!(
            "{}.{}.lock",
            path_component(&key.namespace)?,
            path_component(&key.name)?
        )))
    }

    async fn read_record(path: &Path) -> Result<Option<ReleaseRecord>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            HalyardError::State(StateError::Corrupted {
                message: format!("Failed to read {}: {e}", path.display()),
            })
        })?;

        let record: ReleaseRecord = serde_json::from_str(&content).map_err(|e| {
            HalyardError::State(StateError::Corrupted {
                message: format!("Failed to parse {}: {e}", path.display()),
            })
        })?;

        Ok(Some(record))
    }

    async fn write_record(&self, record: &ReleaseRecord) -> Result<()> {
        let path = self.record_path(&record.key)?;
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize release record: {e}")))?;
        write_atomic(&path, content.as_bytes()).await?;
        debug!("Saved release record {}", path.display());
        Ok(())
    }

    async fn remove_record(&self, key: &ReleaseKey) -> Result<()> {
        let path = self.record_path(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| StateError::storage(format!("Failed to delete {}: {e}", path.display())))?;
        }
        Ok(())
    }

    async fn read_lock_file(path: &Path) -> Result<Option<LockInfo>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            HalyardError::State(StateError::LockFailed {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            HalyardError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(info))
    }
}

/// Rejects key parts that would leave the state directory when joined.
fn path_component(value: &str) -> Result<&str> {
    let safe = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
        && !Path::new(value).is_absolute();
    if safe {
        Ok(value)
    } else {
        Err(StateError::storage(format!("'{value}' cannot be used as a release path component")).into())
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            StateError::storage(format!("Failed to create directory {}: {e}", parent.display()))
        })?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| StateError::storage(format!("Failed to create temp file: {e}")))?;
    file.write_all(content)
        .await
        .map_err(|e| StateError::storage(format!("Failed to write temp file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| StateError::storage(format!("Failed to sync temp file: {e}")))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StateError::storage(format!("Failed to rename {}: {e}", temp_path.display())))?;

    Ok(())
}

#[async_trait]
impl ReleaseStore for LocalReleaseStore {
    async fn load_record(&self, key: &ReleaseKey) -> Result<Option<ReleaseRecord>> {
        Self::read_record(&self.record_path(key)?).await
    }

    async fn list_records(&self) -> Result<Vec<ReleaseRecord>> {
        let releases_dir = self.base_dir.join(RELEASES_DIR);
        if !releases_dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut namespaces = fs::read_dir(&releases_dir).await?;
        while let Some(namespace) = namespaces.next_entry().await? {
            if !namespace.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(namespace.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(record) = Self::read_record(&path).await? {
                    records.push(record);
                }
            }
        }

        Ok(records)
    }

    async fn record(&self, key: &ReleaseKey, revision: NewRevision) -> Result<Revision> {
        let _write = self.write_lock.lock().await;

        let mut record = Self::read_record(&self.record_path(key)?)
            .await?
            .unwrap_or_else(|| ReleaseRecord::new(key.clone()));

        let revision = record.append(revision);
        if let Some(keep) = self.history_max {
            let pruned = record.prune(keep);
            if pruned > 0 {
                debug!("Pruned {pruned} old revision(s) of {key}");
            }
        }
        self.write_record(&record).await?;

        info!("Recorded revision {} of {key} ({})", revision.number, revision.status);
        Ok(revision)
    }

    async fn prune(&self, key: &ReleaseKey, keep: usize) -> Result<usize> {
        let _write = self.write_lock.lock().await;

        let mut record = Self::read_record(&self.record_path(key)?)
            .await?
            .ok_or_else(|| StateError::ReleaseNotFound {
                release: key.to_string(),
            })?;

        let removed = record.prune(keep);
        if removed > 0 {
            self.write_record(&record).await?;
        }
        Ok(removed)
    }

    async fn set_pending(&self, key: &ReleaseKey, status: ReleaseStatus) -> Result<()> {
        let _write = self.write_lock.lock().await;

        let mut record = Self::read_record(&self.record_path(key)?)
            .await?
            .unwrap_or_else(|| ReleaseRecord::new(key.clone()));
        record.set_pending(status);
        self.write_record(&record).await
    }

    async fn clear_pending(&self, key: &ReleaseKey) -> Result<()> {
        let _write = self.write_lock.lock().await;

        let Some(mut record) = Self::read_record(&self.record_path(key)?).await? else {
            return Ok(());
        };
        if record.revisions.is_empty() {
            return self.remove_record(key).await;
        }
        record.pending = None;
        self.write_record(&record).await
    }

    async fn lock(&self, key: &ReleaseKey) -> Result<ReleaseGuard> {
        let guard = self.locks.acquire(key, &generate_holder_id()).await;
        let path = self.lock_path(key)?;

        if let Some(existing) = Self::read_lock_file(&path).await? {
            if !existing.is_expired() {
                return Err(HalyardError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found for {key}, taking over");
        }

        let content = serde_json::to_string_pretty(guard.info())
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        write_atomic(&path, content.as_bytes()).await.map_err(|e| {
            HalyardError::State(StateError::LockFailed {
                message: e.to_string(),
            })
        })?;

        info!(
            "Acquired release lock for {key}: {} (expires in {}s)",
            guard.info().lock_id,
            LOCK_EXPIRY_SECS
        );

        Ok(guard.with_lock_file(path))
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
