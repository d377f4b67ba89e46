//! Configuration validation.
//!
//! Field ranges are declared on the config types with `validator` derives;
//! this module runs them and adds the checks that span several fields.

use crate::error::{ConfigError, HalyardError, Result};
use tracing::{debug, warn};
use validator::Validate;

use super::spec::{ClusterBackend, HalyardConfig, StateBackend};

/// Validator for Halyard configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error, if any.
    pub fn validate(&self, config: &HalyardConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if let Err(errors) = config.validate() {
            for line in errors.to_string().lines().filter(|l| !l.trim().is_empty()) {
                let (field, message) = line
                    .split_once(": ")
                    .map_or(("config", line), |(f, m)| (f.trim(), m.trim()));
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        }

        Self::validate_namespace(config, &mut result);
        Self::validate_cluster(config, &mut result);
        Self::validate_reconcile(config, &mut result);
        Self::validate_state(config, &mut result);

        for warning in &result.warnings {
            warn!("{warning}");
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(HalyardError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_namespace(config: &HalyardConfig, result: &mut ValidationResult) {
        if !is_valid_name(&config.namespace) {
            result.errors.push(ValidationError {
                field: String::from("namespace"),
                message: format!(
                    "'{}' must be lowercase alphanumeric with hyphens, starting with a letter",
                    config.namespace
                ),
            });
        }
    }

    fn validate_cluster(config: &HalyardConfig, result: &mut ValidationResult) {
        if config.cluster.backend == ClusterBackend::Kubernetes && config.cluster.server.is_none() {
            result.errors.push(ValidationError {
                field: String::from("cluster.server"),
                message: String::from("required when cluster.backend is kubernetes"),
            });
        }
        if config.cluster.backend == ClusterBackend::Local && config.cluster.server.is_some() {
            result
                .warnings
                .push(String::from("cluster.server is ignored by the local cluster backend"));
        }
    }

    fn validate_reconcile(config: &HalyardConfig, result: &mut ValidationResult) {
        let reconcile = &config.reconcile;
        if reconcile.backoff_base_ms > reconcile.backoff_max_ms {
            result.errors.push(ValidationError {
                field: String::from("reconcile.backoff_base_ms"),
                message: format!(
                    "must not exceed reconcile.backoff_max_ms ({})",
                    reconcile.backoff_max_ms
                ),
            });
        }
        if reconcile.poll_interval_ms > reconcile.readiness_timeout_secs.saturating_mul(1000) {
            result.warnings.push(String::from(
                "reconcile.poll_interval_ms exceeds the readiness timeout; readiness is checked once",
            ));
        }
    }

    fn validate_state(config: &HalyardConfig, result: &mut ValidationResult) {
        if config.state.backend == StateBackend::Memory {
            result
                .warnings
                .push(String::from("state.backend is memory: release history is lost on exit"));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 53 {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    if name.ends_with('-') {
        return false;
    }

    !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
