//! Configuration module for Halyard.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `halyard.yaml`
//! - Environment and `.env` overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use spec::{
    ClusterBackend, ClusterConfig, HalyardConfig, ReconcileConfig, StateBackend, StateConfig,
    DEFAULT_CONFIG_FILE, DEFAULT_TOKEN_ENV,
};
pub use self::validator::{is_valid_name, ConfigValidator, ValidationError, ValidationResult};
