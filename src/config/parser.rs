//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling. Precedence, lowest
//! first: built-in defaults, `halyard.yaml`, `.env`, process environment.

use crate::error::{ConfigError, HalyardError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{HalyardConfig, DEFAULT_CONFIG_FILE};

/// Configuration parser for loading Halyard configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<HalyardConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HalyardError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HalyardError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string. Blank input yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<HalyardConfig> {
        debug!("Parsing YAML configuration");

        if content.lines().all(|l| l.trim().is_empty() || l.trim_start().starts_with('#')) {
            return Ok(HalyardConfig::default());
        }

        let config: HalyardConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            HalyardError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<HalyardConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Resolves the effective configuration.
    ///
    /// Uses `explicit` if given; otherwise searches upward from the current
    /// directory, then the user config directory; otherwise defaults.
    /// Returns the configuration and the file it came from, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a found file is invalid or an override is malformed.
    pub fn load_or_default(&self, explicit: Option<&Path>) -> Result<(HalyardConfig, Option<PathBuf>)> {
        self.load_dotenv()?;

        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let cwd = std::env::current_dir()?;
                find_config_file(&cwd).ok().or_else(user_config_file)
            }
        };

        match path {
            Some(path) => Ok((self.load_with_env(&path)?, Some(path))),
            None => {
                debug!("No configuration file found, using defaults");
                let mut config = HalyardConfig::default();
                Self::apply_env_overrides(&mut config)?;
                Ok((config, None))
            }
        }
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `HALYARD_HISTORY_MAX` is not a number.
    pub fn apply_env_overrides(config: &mut HalyardConfig) -> Result<()> {
        if let Ok(namespace) = std::env::var("HALYARD_NAMESPACE") {
            debug!("Overriding namespace from environment");
            config.namespace = namespace;
        }

        if let Ok(path) = std::env::var("HALYARD_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Ok(server) = std::env::var("HALYARD_KUBE_SERVER") {
            debug!("Overriding cluster.server from environment");
            config.cluster.server = Some(server);
        }

        if let Ok(raw) = std::env::var("HALYARD_HISTORY_MAX") {
            debug!("Overriding state.history_max from environment");
            config.state.history_max = raw.trim().parse().map_err(|_| {
                ConfigError::validation(format!("'{raw}' is not a number"), "HALYARD_HISTORY_MAX")
            })?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                HalyardError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads the API server token from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not set.
    pub fn cluster_token(config: &HalyardConfig) -> Result<String> {
        let name = &config.cluster.token_env;
        std::env::var(name).map_err(|_| {
            HalyardError::Config(ConfigError::MissingEnvVar { name: name.clone() })
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[DEFAULT_CONFIG_FILE, "halyard.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(HalyardError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

/// Returns `<user config dir>/halyard/halyard.yaml` if it exists.
fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("halyard").join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterBackend, StateBackend};
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_config() {
        let config = ConfigParser::new().parse_yaml("# nothing yet\n", None).unwrap();
        assert_eq!(config, HalyardConfig::default());
        assert_eq!(config.namespace, "default");
        assert_eq!(config.state.history_max, 10);
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r"
namespace: apps
cluster:
  backend: kubernetes
  server: https://k8s.example.com:6443
reconcile:
  max_attempts: 5
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.namespace, "apps");
        assert_eq!(config.cluster.backend, ClusterBackend::Kubernetes);
        assert_eq!(config.cluster.field_manager, "halyard");
        assert_eq!(config.reconcile.max_attempts, 5);
        assert_eq!(config.reconcile.backoff_base_ms, 500);
        assert_eq!(config.state.backend, StateBackend::Local);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = ConfigParser::new().parse_yaml("state: [", None).unwrap_err();
        assert!(matches!(err, HalyardError::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(DEFAULT_CONFIG_FILE), "namespace: apps\n").unwrap();
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigParser::new().load_file("/nonexistent/halyard.yaml").unwrap_err();
        assert!(matches!(err, HalyardError::Config(ConfigError::FileNotFound { .. })));
    }
}
