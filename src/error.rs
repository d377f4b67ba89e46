//! Error types for the Halyard release system.
//!
//! This module provides the error hierarchy for every stage of the release
//! lifecycle: configuration, rendering, release storage, the cluster API,
//! planning, and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Halyard release system.
#[derive(Debug, Error)]
pub enum HalyardError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Template rendering errors.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Release store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Cluster API errors.
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A `--set path=value` override could not be parsed.
    #[error("Invalid value override '{spec}': expected PATH=VALUE")]
    InvalidOverride {
        /// The offending override.
        spec: String,
    },
}

/// Template rendering errors. None of these ever reach the cluster.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A template referenced a value that is not defined.
    #[error("Missing value '{path}' referenced in template {template}")]
    MissingValue {
        /// Full reference path, e.g. `.Values.image.tag`.
        path: String,
        /// Template that contained the reference.
        template: String,
    },

    /// Two rendered resources share the same identity key.
    #[error("Duplicate resource {resource} in rendered manifest set")]
    DuplicateResource {
        /// Identity of the duplicated resource.
        resource: String,
    },

    /// A template expression is malformed.
    #[error("Template syntax error in {template} at line {line}: {message}")]
    TemplateSyntax {
        /// Template name.
        template: String,
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A rendered document is not a usable resource manifest.
    #[error("Invalid manifest in {template}: {message}")]
    InvalidManifest {
        /// Template name.
        template: String,
        /// Description of the problem.
        message: String,
    },

    /// The bundle directory or one of its files is missing.
    #[error("Bundle not found: {path}")]
    BundleNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The bundle is structurally invalid.
    #[error("Invalid bundle: {message}")]
    BundleInvalid {
        /// Description of the problem.
        message: String,
    },
}

/// Release store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// No release with this name exists.
    #[error("Release not found: {release}")]
    ReleaseNotFound {
        /// Release key (`namespace/name`).
        release: String,
    },

    /// The requested revision does not exist.
    #[error("Revision {revision} not found for release {release}")]
    RevisionNotFound {
        /// Release key.
        release: String,
        /// Requested revision number.
        revision: u32,
    },

    /// There is no earlier deployed revision to roll back to.
    #[error("Release {release} has no previous revision to roll back to")]
    NoPreviousRevision {
        /// Release key.
        release: String,
    },

    /// Stored state is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire release lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The release is locked by another process.
    #[error("Release is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Reading or writing the backing storage failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Cluster API errors.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    /// The object does not exist.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Identity of the missing resource.
        resource: String,
    },

    /// The API server refused the request.
    #[error("Cluster rejected {resource}: {status} - {message}")]
    Rejected {
        /// Identity of the resource.
        resource: String,
        /// HTTP-like status code.
        status: u16,
        /// Message returned by the server.
        message: String,
    },

    /// Authentication or authorization failed.
    #[error("Cluster authentication failed: {message}")]
    Unauthorized {
        /// Description of the failure.
        message: String,
    },

    /// Transport-level failure.
    #[error("Network error communicating with the cluster: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The server returned something we could not interpret.
    #[error("Invalid response from the cluster: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The revision a plan was computed against is no longer current.
    #[error("Diff conflict on {release}: planned against revision {expected:?}, found {found:?}")]
    DiffConflict {
        /// Release key.
        release: String,
        /// Deployed revision the plan was based on.
        expected: Option<u32>,
        /// Deployed revision found when re-checking.
        found: Option<u32>,
    },
}

/// Reconciliation errors.
#[derive(Debug, Clone, Error, serde::Serialize)]
pub enum ReconcileError {
    /// A resource could not be applied within the attempt cap.
    #[error("Failed to apply {resource} after {attempts} attempt(s): {cause}")]
    ApplyFailure {
        /// Identity of the failing resource.
        resource: String,
        /// Last observed cause.
        cause: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A resource did not become ready in time.
    #[error("Timed out after {timeout_secs}s waiting for {resource} to become ready: {detail}")]
    ReadinessTimeout {
        /// Identity of the resource.
        resource: String,
        /// Timeout that was exceeded.
        timeout_secs: u64,
        /// Last observed readiness detail.
        detail: String,
    },

    /// The run was cancelled between tiers.
    #[error("Apply cancelled after {completed_tiers} completed tier(s)")]
    Cancelled {
        /// Number of tiers that finished before cancellation.
        completed_tiers: usize,
    },

    /// The requested operation is not valid in the release's current state.
    #[error("Cannot {operation} release {release}: {reason}")]
    InvalidState {
        /// Release key.
        release: String,
        /// Attempted operation.
        operation: String,
        /// Why the operation is not allowed.
        reason: String,
    },
}

/// Result type alias for Halyard operations.
pub type Result<T> = std::result::Result<T, HalyardError>;

impl HalyardError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error is transient and the command may succeed
    /// when run again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Cluster(ClusterError::Network { .. })
                | Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
        )
    }

    /// Returns true if the error means a release or revision does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::ReleaseNotFound { .. } | StateError::RevisionNotFound { .. })
                | Self::Cluster(ClusterError::NotFound { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl RenderError {
    /// Creates an invalid manifest error.
    #[must_use]
    pub fn invalid_manifest(template: &str, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            template: template.to_string(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ClusterError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a rejection error for a resource.
    #[must_use]
    pub fn rejected(resource: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            resource: resource.into(),
            status,
            message: message.into(),
        }
    }
}

impl ReconcileError {
    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(
        release: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            release: release.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns the identity of the failing resource, if the error names one.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::ApplyFailure { resource, .. } | Self::ReadinessTimeout { resource, .. } => {
                Some(resource)
            }
            Self::Cancelled { .. } | Self::InvalidState { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let network = HalyardError::Cluster(ClusterError::network("connection reset"));
        assert!(network.is_retryable());

        let missing = HalyardError::Render(RenderError::MissingValue {
            path: String::from(".Values.image"),
            template: String::from("deployment.yaml"),
        });
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_apply_failure_names_resource() {
        let err = ReconcileError::ApplyFailure {
            resource: String::from("Deployment/default/web"),
            cause: String::from("admission denied"),
            attempts: 3,
        };
        assert_eq!(err.resource(), Some("Deployment/default/web"));
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
