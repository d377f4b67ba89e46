//! Release and revision types.
//!
//! A release owns an append-only log of revisions. Revisions are never
//! edited after creation; the only status change the store makes is moving
//! the previously deployed revision to `superseded` when a newer one takes
//! its place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::is_valid_name;
use crate::error::{ConfigError, Result};
use crate::render::{ManifestSet, Values};

/// Current version of the stored record format.
pub const STATE_VERSION: &str = "1.0";

/// Identifies a release: names are unique per namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseKey {
    /// Namespace the release lives in.
    pub namespace: String,
    /// Release name.
    pub name: String,
}

/// Release / revision status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    /// First install is in progress.
    PendingInstall,
    /// Upgrade is in progress.
    PendingUpgrade,
    /// Rollback is in progress.
    PendingRollback,
    /// The revision is live.
    Deployed,
    /// The apply attempt failed.
    Failed,
    /// Was deployed, replaced by a newer revision.
    Superseded,
    /// The release was removed from the cluster.
    Uninstalled,
}

/// Operation that produced a revision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// First install.
    Install,
    /// Upgrade of a deployed release.
    Upgrade,
    /// Restore of an earlier revision.
    Rollback,
    /// Removal of every resource.
    Uninstall,
}

/// Reference to the bundle a revision was rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRef {
    /// Bundle name.
    pub name: String,
    /// Bundle version.
    pub version: String,
}

/// Immutable snapshot of a release at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Owning release.
    pub release: ReleaseKey,
    /// Revision number, strictly increasing per release.
    pub number: u32,
    /// Status of this revision.
    pub status: ReleaseStatus,
    /// Operation that produced it.
    pub operation: Operation,
    /// Manifest set applied (or attempted).
    pub manifests: ManifestSet,
    /// Values used to render the manifests.
    pub values: Values,
    /// Source bundle, if rendered from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleRef>,
    /// Human-readable description or failure reason.
    #[serde(default)]
    pub description: String,
    /// When the revision was recorded.
    pub created_at: DateTime<Utc>,
}

/// Input to [`crate::state::ReleaseStore::record`].
#[derive(Debug, Clone)]
pub struct NewRevision {
    /// Final status of the attempt.
    pub status: ReleaseStatus,
    /// Operation performed.
    pub operation: Operation,
    /// Manifests applied or attempted.
    pub manifests: ManifestSet,
    /// Values used.
    pub values: Values,
    /// Source bundle.
    pub bundle: Option<BundleRef>,
    /// Description or failure reason.
    pub description: String,
}

/// An operation that has started but not yet been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// One of the `pending-*` statuses.
    pub status: ReleaseStatus,
    /// When it started.
    pub started_at: DateTime<Utc>,
}

/// The stored form of a release: its revision log plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Record format version.
    pub version: String,
    /// Release identity.
    pub key: ReleaseKey,
    /// Highest revision number ever issued (survives pruning).
    pub last_revision: u32,
    /// Revisions in ascending order.
    pub revisions: Vec<Revision>,
    /// In-flight operation, if any.
    #[serde(default)]
    pub pending: Option<PendingOperation>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// One-line view of a release for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    /// Release identity.
    pub key: ReleaseKey,
    /// Latest revision number.
    pub revision: u32,
    /// Effective status (pending operation or latest revision).
    pub status: ReleaseStatus,
    /// Bundle of the latest revision.
    pub bundle: Option<BundleRef>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl ReleaseKey {
    /// Creates a release key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Creates a release key from user input.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the namespace or name is not lowercase
    /// alphanumeric with hyphens, starting with a letter.
    pub fn parse(namespace: &str, name: &str) -> Result<Self> {
        for (field, value) in [("namespace", namespace), ("release", name)] {
            if !is_valid_name(value) {
                return Err(ConfigError::validation(
                    format!("{field} '{value}' must be lowercase alphanumeric with hyphens, starting with a letter"),
                    field,
                )
                .into());
            }
        }
        Ok(Self::new(namespace, name))
    }
}

impl ReleaseStatus {
    /// Returns true for the `pending-*` statuses.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback
        )
    }
}

impl Operation {
    /// Pending status shown while this operation runs.
    #[must_use]
    pub const fn pending_status(self) -> Option<ReleaseStatus> {
        match self {
            Self::Install => Some(ReleaseStatus::PendingInstall),
            Self::Upgrade => Some(ReleaseStatus::PendingUpgrade),
            Self::Rollback => Some(ReleaseStatus::PendingRollback),
            Self::Uninstall => None,
        }
    }
}

impl ReleaseRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(key: ReleaseKey) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            key,
            last_revision: 0,
            revisions: Vec::new(),
            pending: None,
            updated_at: Utc::now(),
        }
    }

    /// Returns the most recent revision.
    #[must_use]
    pub fn latest(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Returns the revision currently marked deployed.
    #[must_use]
    pub fn deployed(&self) -> Option<&Revision> {
        self.revisions
            .iter()
            .rev()
            .find(|r| r.status == ReleaseStatus::Deployed)
    }

    /// Returns a revision by number.
    #[must_use]
    pub fn revision(&self, number: u32) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.number == number)
    }

    /// Returns up to `limit` revisions, most recent first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Revision> {
        self.revisions.iter().rev().take(limit).cloned().collect()
    }

    /// Returns the effective status: the pending operation if one is in
    /// flight, otherwise the latest revision's status.
    #[must_use]
    pub fn status(&self) -> Option<ReleaseStatus> {
        self.pending
            .as_ref()
            .map(|p| p.status)
            .or_else(|| self.latest().map(|r| r.status))
    }

    /// Marks an operation as in flight.
    pub fn set_pending(&mut self, status: ReleaseStatus) {
        self.pending = Some(PendingOperation {
            status,
            started_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Appends a new revision and returns it.
    ///
    /// A `deployed` or `uninstalled` revision supersedes the previously
    /// deployed one, so at most one revision is ever `deployed`.
    pub fn append(&mut self, new: NewRevision) -> Revision {
        if matches!(new.status, ReleaseStatus::Deployed | ReleaseStatus::Uninstalled) {
            for revision in &mut self.revisions {
                if revision.status == ReleaseStatus::Deployed {
                    revision.status = ReleaseStatus::Superseded;
                }
            }
        }

        self.last_revision = self.last_revision.saturating_add(1);
        let revision = Revision {
            release: self.key.clone(),
            number: self.last_revision,
            status: new.status,
            operation: new.operation,
            manifests: new.manifests,
            values: new.values,
            bundle: new.bundle,
            description: new.description,
            created_at: Utc::now(),
        };

        self.revisions.push(revision.clone());
        self.pending = None;
        self.updated_at = revision.created_at;
        revision
    }

    /// Number of the most recent revision that ended `deployed` or
    /// `uninstalled`, or 0 if there is none.
    ///
    /// Failed attempts numbered above it may have left resources behind.
    #[must_use]
    pub fn settled_floor(&self) -> u32 {
        self.revisions
            .iter()
            .filter(|r| matches!(r.status, ReleaseStatus::Deployed | ReleaseStatus::Uninstalled))
            .map(|r| r.number)
            .max()
            .unwrap_or(0)
    }

    /// Removes the oldest revisions beyond `keep`.
    ///
    /// The deployed revision, the latest revision and everything from the
    /// settled floor onwards are never removed, so failed attempts stay
    /// visible to the next diff. Returns the number of revisions removed.
    pub fn prune(&mut self, keep: usize) -> usize {
        let removable = self.revisions.len().saturating_sub(keep.max(1));
        if removable == 0 {
            return 0;
        }

        let deployed = self.deployed().map(|r| r.number);
        let latest = self.latest().map(|r| r.number);
        let floor = self.settled_floor();
        let mut removed = 0usize;

        self.revisions.retain(|r| {
            let protected = Some(r.number) == deployed
                || Some(r.number) == latest
                || (floor > 0 && r.number >= floor)
                || (floor == 0 && r.status == ReleaseStatus::Failed);
            if removed < removable && !protected {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Builds a listing summary. Returns `None` for a record with no revisions.
    #[must_use]
    pub fn summary(&self) -> Option<ReleaseSummary> {
        let latest = self.latest()?;
        Some(ReleaseSummary {
            key: self.key.clone(),
            revision: latest.number,
            status: self.status().unwrap_or(latest.status),
            bundle: latest.bundle.clone(),
            updated_at: self.updated_at,
        })
    }
}

impl NewRevision {
    /// Creates a new revision input with no bundle and an empty description.
    #[must_use]
    pub fn new(status: ReleaseStatus, operation: Operation, manifests: ManifestSet, values: Values) -> Self {
        Self {
            status,
            operation,
            manifests,
            values,
            bundle: None,
            description: String::new(),
        }
    }

    /// Sets the source bundle.
    #[must_use]
    pub fn with_bundle(mut self, bundle: Option<BundleRef>) -> Self {
        self.bundle = bundle;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for BundleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::Uninstalled => "uninstalled",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Rollback => "rollback",
            Self::Uninstall => "uninstall",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_revision(status: ReleaseStatus) -> NewRevision {
        NewRevision::new(status, Operation::Upgrade, ManifestSet::empty(), Values::new())
    }

    fn record() -> ReleaseRecord {
        ReleaseRecord::new(ReleaseKey::new("default", "web"))
    }

    #[test]
    fn test_parse_release_key() {
        let key = ReleaseKey::parse("apps", "web").unwrap();
        assert_eq!(key.to_string(), "apps/web");

        for (namespace, name) in [("../../outside", "web"), ("apps", "../web"), ("a/b", "web"), ("apps", "")] {
            assert!(
                ReleaseKey::parse(namespace, name).is_err(),
                "{namespace}/{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_append_numbers_and_supersedes() {
        let mut rec = record();
        let first = rec.append(new_revision(ReleaseStatus::Deployed));
        let second = rec.append(new_revision(ReleaseStatus::Deployed));

        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(rec.revision(1).unwrap().status, ReleaseStatus::Superseded);
        assert_eq!(rec.deployed().unwrap().number, 2);
    }

    #[test]
    fn test_failed_revision_keeps_deployed() {
        let mut rec = record();
        rec.append(new_revision(ReleaseStatus::Deployed));
        rec.append(new_revision(ReleaseStatus::Failed));

        assert_eq!(rec.deployed().unwrap().number, 1);
        assert_eq!(rec.latest().unwrap().status, ReleaseStatus::Failed);
    }

    #[test]
    fn test_uninstalled_clears_deployed() {
        let mut rec = record();
        rec.append(new_revision(ReleaseStatus::Deployed));
        rec.append(new_revision(ReleaseStatus::Uninstalled));
        assert!(rec.deployed().is_none());
    }

    #[test]
    fn test_prune_protects_deployed_and_latest() {
        let mut rec = record();
        rec.append(new_revision(ReleaseStatus::Deployed));
        rec.append(new_revision(ReleaseStatus::Deployed));
        rec.append(new_revision(ReleaseStatus::Deployed));
        rec.append(new_revision(ReleaseStatus::Failed));
        rec.append(new_revision(ReleaseStatus::Failed));

        let removed = rec.prune(2);
        assert_eq!(removed, 2);
        let numbers: Vec<u32> = rec.revisions.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
    }

    #[test]
    fn test_prune_keeps_failed_attempts_since_floor() {
        let mut rec = record();
        rec.append(new_revision(ReleaseStatus::Deployed));
        rec.append(new_revision(ReleaseStatus::Failed));
        rec.append(new_revision(ReleaseStatus::Failed));
        rec.append(new_revision(ReleaseStatus::Failed));
        assert_eq!(rec.settled_floor(), 1);

        assert_eq!(rec.prune(2), 0);
        assert_eq!(rec.revisions.len(), 4);

        rec.append(new_revision(ReleaseStatus::Deployed));
        assert_eq!(rec.settled_floor(), 5);
        assert_eq!(rec.prune(2), 3);
        let numbers: Vec<u32> = rec.revisions.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![4, 5]);
    }

    #[test]
    fn test_prune_keeps_failed_installs() {
        let mut rec = record();
        rec.append(new_revision(ReleaseStatus::Failed));
        rec.append(new_revision(ReleaseStatus::Failed));
        rec.append(new_revision(ReleaseStatus::Failed));
        assert_eq!(rec.settled_floor(), 0);
        assert_eq!(rec.prune(1), 0);
    }

    #[test]
    fn test_numbers_survive_pruning() {
        let mut rec = record();
        for _ in 0..5 {
            rec.append(new_revision(ReleaseStatus::Deployed));
        }
        rec.prune(1);
        assert_eq!(rec.revisions.len(), 1);
        assert_eq!(rec.append(new_revision(ReleaseStatus::Deployed)).number, 6);
    }

    #[test]
    fn test_pending_status_wins() {
        let mut rec = record();
        rec.append(new_revision(ReleaseStatus::Deployed));
        rec.set_pending(ReleaseStatus::PendingUpgrade);
        assert_eq!(rec.status(), Some(ReleaseStatus::PendingUpgrade));

        rec.append(new_revision(ReleaseStatus::Deployed));
        assert_eq!(rec.status(), Some(ReleaseStatus::Deployed));
    }
}
