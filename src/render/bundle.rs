//! Template bundles.
//!
//! A bundle is a directory:
//!
//! ```text
//! my-app/
//!   Bundle.yaml        # name, version, description
//!   values.yaml        # default values (optional)
//!   templates/
//!     deployment.yaml
//!     service.yaml
//!     _helpers.yaml    # skipped: leading underscore
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{HalyardError, RenderError, Result};

use super::values::Values;

/// Bundle metadata file name.
pub const BUNDLE_FILE: &str = "Bundle.yaml";

/// Default values file name.
pub const VALUES_FILE: &str = "values.yaml";

/// Templates directory name.
pub const TEMPLATES_DIR: &str = "templates";

/// Bundle metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Bundle name.
    pub name: String,
    /// Bundle version.
    pub version: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version of the packaged application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// A single template file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// File name relative to the templates directory.
    pub name: String,
    /// Raw template source.
    pub source: String,
}

/// A loaded bundle: metadata, default values and templates.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Bundle metadata.
    pub metadata: BundleMetadata,
    /// Default values.
    pub defaults: Values,
    /// Templates, sorted by name.
    templates: Vec<Template>,
}

impl Bundle {
    /// Builds a bundle from in-memory parts.
    #[must_use]
    pub fn from_parts(metadata: BundleMetadata, defaults: Values, mut templates: Vec<Template>) -> Self {
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            metadata,
            defaults,
            templates,
        }
    }

    /// Loads a bundle from a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, metadata file or templates directory
    /// is missing, or a file cannot be parsed.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        info!("Loading bundle from: {}", dir.display());

        let metadata_path = dir.join(BUNDLE_FILE);
        if !metadata_path.is_file() {
            return Err(RenderError::BundleNotFound { path: metadata_path }.into());
        }

        let raw = std::fs::read_to_string(&metadata_path)?;
        let metadata: BundleMetadata = serde_yaml::from_str(&raw).map_err(|e| {
            HalyardError::Render(RenderError::BundleInvalid {
                message: format!("{}: {e}", metadata_path.display()),
            })
        })?;
        if metadata.name.trim().is_empty() {
            return Err(RenderError::BundleInvalid {
                message: String::from("bundle name must not be empty"),
            }
            .into());
        }

        let values_path = dir.join(VALUES_FILE);
        let defaults = if values_path.is_file() {
            Values::from_file(&values_path)?
        } else {
            debug!("No default values file at {}", values_path.display());
            Values::new()
        };

        let templates_dir = dir.join(TEMPLATES_DIR);
        if !templates_dir.is_dir() {
            return Err(RenderError::BundleNotFound { path: templates_dir }.into());
        }

        let mut templates = Vec::new();
        for entry in std::fs::read_dir(&templates_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !path.is_file() || !is_yaml || name.starts_with('_') {
                debug!("Skipping template entry: {}", path.display());
                continue;
            }
            let source = std::fs::read_to_string(&path)?;
            templates.push(Template { name, source });
        }

        debug!(
            "Loaded bundle {} {} with {} template(s)",
            metadata.name,
            metadata.version,
            templates.len()
        );

        Ok(Self::from_parts(metadata, defaults, templates))
    }

    /// Returns the templates in render order.
    #[must_use]
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Writes a new bundle skeleton to `parent/name`.
    ///
    /// Returns the files written.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle already exists (and `force` is not
    /// set) or a file cannot be written.
    pub fn scaffold(parent: impl AsRef<Path>, name: &str, force: bool) -> Result<Vec<PathBuf>> {
        let dir = parent.as_ref().join(name);
        let metadata_path = dir.join(BUNDLE_FILE);
        if metadata_path.exists() && !force {
            return Err(RenderError::BundleInvalid {
                message: format!("{} already exists; use --force to overwrite", metadata_path.display()),
            }
            .into());
        }

        std::fs::create_dir_all(dir.join(TEMPLATES_DIR))?;

        let mut written = Vec::with_capacity(SKELETON.len());
        for (rel, source) in SKELETON {
            let path = dir.join(rel);
            std::fs::write(&path, source.replace("__NAME__", name))?;
            written.push(path);
        }

        info!("Created bundle {name} in {}", dir.display());
        Ok(written)
    }
}

/// Files of a new bundle, relative to its directory.
const SKELETON: [(&str, &str); 4] = [
    (BUNDLE_FILE, include_str!("../../templates/bundle/Bundle.yaml")),
    (VALUES_FILE, include_str!("../../templates/bundle/values.yaml")),
    (
        "templates/deployment.yaml",
        include_str!("../../templates/bundle/templates/deployment.yaml"),
    ),
    (
        "templates/service.yaml",
        include_str!("../../templates/bundle/templates/service.yaml"),
    ),
];
