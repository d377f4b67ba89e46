//! Configuration specification types.
//!
//! This module defines the structs that map to `halyard.yaml`. Every field
//! has a default, so an absent or empty file yields a working local setup.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "halyard.yaml";

/// Environment variable holding the API server token by default.
pub const DEFAULT_TOKEN_ENV: &str = "HALYARD_KUBE_TOKEN";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct HalyardConfig {
    /// Namespace used when none is given on the command line.
    #[validate(length(min = 1, max = 63))]
    pub namespace: String,
    /// Release store configuration.
    #[validate(nested)]
    pub state: StateConfig,
    /// Cluster access configuration.
    #[validate(nested)]
    pub cluster: ClusterConfig,
    /// Reconciler timing and retry configuration.
    #[validate(nested)]
    pub reconcile: ReconcileConfig,
}

/// Release store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct StateConfig {
    /// Backend type.
    pub backend: StateBackend,
    /// State directory for the local backend (defaults to `./.halyard`).
    pub path: Option<String>,
    /// Revisions kept per release.
    #[validate(range(min = 1, max = 1000))]
    pub history_max: usize,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based storage.
    #[default]
    Local,
    /// Process-local storage; nothing is persisted.
    Memory,
}

/// Cluster access configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct ClusterConfig {
    /// Backend type.
    pub backend: ClusterBackend,
    /// API server URL (kubernetes backend).
    #[validate(url)]
    pub server: Option<String>,
    /// Environment variable holding the bearer token.
    #[validate(length(min = 1))]
    pub token_env: String,
    /// Snapshot file for the local backend (defaults to `<state>/cluster.json`).
    pub snapshot: Option<String>,
    /// Request timeout in seconds.
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
    /// Field manager name for server-side apply.
    #[validate(length(min = 1, max = 128))]
    pub field_manager: String,
}

/// Cluster backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    /// Simulated cluster persisted to a local snapshot file.
    #[default]
    Local,
    /// A Kubernetes API server.
    Kubernetes,
}

/// Reconciler timing and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Attempts per resource before the plan is aborted.
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Retry delay cap in milliseconds.
    #[validate(range(min = 1))]
    pub backoff_max_ms: u64,
    /// Readiness wait per resource in seconds.
    #[validate(range(min = 1, max = 3600))]
    pub readiness_timeout_secs: u64,
    /// Delay between readiness polls in milliseconds.
    #[validate(range(min = 1, max = 60000))]
    pub poll_interval_ms: u64,
}

impl Default for HalyardConfig {
    fn default() -> Self {
        Self {
            namespace: String::from("default"),
            state: StateConfig::default(),
            cluster: ClusterConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Local,
            path: None,
            history_max: 10,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: ClusterBackend::Local,
            server: None,
            token_env: String::from(DEFAULT_TOKEN_ENV),
            snapshot: None,
            timeout_secs: 30,
            field_manager: String::from("halyard"),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
            readiness_timeout_secs: 120,
            poll_interval_ms: 1000,
        }
    }
}

impl std::fmt::Display for StateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::fmt::Display for ClusterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Kubernetes => write!(f, "kubernetes"),
        }
    }
}
