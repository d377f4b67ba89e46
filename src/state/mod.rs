//! Release store module for Halyard.
//!
//! This module keeps the revision history of every release: what was
//! applied, with which values, and how each attempt ended. It provides:
//! - The [`ReleaseStore`] trait and its file and in-memory backends
//! - Per-release locking for mutating operations
//! - Release, revision and status types

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::{LocalReleaseStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, ReleaseGuard, ReleaseLocks, LOCK_EXPIRY_SECS};
pub use memory::InMemoryReleaseStore;
pub use store::ReleaseStore;
pub use types::{
    BundleRef, NewRevision, Operation, PendingOperation, ReleaseKey, ReleaseRecord, ReleaseStatus,
    ReleaseSummary, Revision, STATE_VERSION,
};
