//! Values trees and the values source.
//!
//! A values tree is a nested mapping of scalars, lists and maps. The
//! [`ValuesSource`] produces the fully merged tree the renderer consumes:
//! bundle defaults, then user values files in order, then `--set` overrides
//! in order. Later layers win; maps merge recursively, everything else is
//! replaced.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use crate::error::{ConfigError, HalyardError, Result};

/// A values tree. The root is always a mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(Value);

/// Merges layered values into the tree handed to the renderer.
#[derive(Debug, Clone, Default)]
pub struct ValuesSource {
    /// Bundle defaults.
    defaults: Values,
    /// User-supplied value files, in precedence order.
    layers: Vec<Values>,
    /// `--set` overrides, in precedence order.
    overrides: Vec<(String, Value)>,
}

impl Default for Values {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl Values {
    /// Creates an empty values tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value. `null` becomes an empty tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is neither a mapping nor `null`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(_) => Ok(Self(value)),
            Value::Null => Ok(Self::new()),
            other => Err(HalyardError::Config(ConfigError::ParseError {
                message: format!("values must be a mapping, found {}", type_name(&other)),
                location: None,
            })),
        }
    }

    /// Parses a YAML document into a values tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or not a mapping.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let blank = content
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#') || line == "---");
        if blank {
            return Ok(Self::new());
        }

        let value: Value = serde_yaml::from_str(content).map_err(|e| {
            HalyardError::Config(ConfigError::ParseError {
                message: format!("YAML parse error in values: {e}"),
                location: None,
            })
        })?;
        Self::from_value(value)
    }

    /// Loads a values file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HalyardError::Config(ConfigError::ParseError {
                message: format!("Failed to read values file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            HalyardError::Config(ConfigError::ParseError { message, .. }) => {
                HalyardError::Config(ConfigError::ParseError {
                    message,
                    location: Some(path.display().to_string()),
                })
            }
            other => other,
        })
    }

    /// Returns the underlying JSON value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Deep-merges `other` on top of this tree.
    pub fn merge(&mut self, other: &Self) {
        merge_value(&mut self.0, &other.0);
    }

    /// Looks up a dotted path such as `image.tag` or `ports.0`.
    ///
    /// An empty path returns the whole tree.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Sets a dotted path, creating intermediate mappings as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut current = &mut self.0;
        for segment in parents {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let Some(map) = current.as_object_mut() else {
                return;
            };
            current = map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        if let Value::Object(map) = current {
            map.insert((*last).to_string(), value);
        }
    }
}

fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let nested = value.is_object() && base_map.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = base_map.get_mut(key) {
                        merge_value(existing, value);
                    }
                } else {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Parses a `--set path=value` override.
///
/// The value is typed the way YAML would read it: `3` is a number, `true`
/// a boolean, `null` null, anything else a string.
///
/// # Errors
///
/// Returns an error if there is no `=` or the path is empty.
pub fn parse_set_value(spec: &str) -> Result<(String, Value)> {
    let invalid = || {
        HalyardError::Config(ConfigError::InvalidOverride {
            spec: spec.to_string(),
        })
    };

    let (path, raw) = spec.split_once('=').ok_or_else(invalid)?;
    let path = path.trim();
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(invalid());
    }

    let value = match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) if !raw.trim().is_empty() => v,
        _ => Value::String(raw.to_string()),
    };

    Ok((path.to_string(), value))
}

impl ValuesSource {
    /// Creates a values source from bundle defaults.
    #[must_use]
    pub fn new(defaults: Values) -> Self {
        Self {
            defaults,
            layers: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// Adds a values layer on top of the existing ones.
    #[must_use]
    pub fn with_layer(mut self, values: Values) -> Self {
        self.layers.push(values);
        self
    }

    /// Loads a values file as a new layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn with_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let values = Values::from_file(path)?;
        Ok(self.with_layer(values))
    }

    /// Adds a `--set` style override.
    ///
    /// # Errors
    ///
    /// Returns an error if the override cannot be parsed.
    pub fn with_override(mut self, spec: &str) -> Result<Self> {
        self.overrides.push(parse_set_value(spec)?);
        Ok(self)
    }

    /// Produces the fully merged values tree.
    #[must_use]
    pub fn resolve(&self) -> Values {
        let mut merged = self.defaults.clone();
        for layer in &self.layers {
            merged.merge(layer);
        }
        for (path, value) in &self.overrides {
            merged.set(path, value.clone());
        }
        debug!(
            "Resolved values from {} layer(s) and {} override(s)",
            self.layers.len(),
            self.overrides.len()
        );
        merged
    }
}
