//! Placeholder expansion for bundle templates.
//!
//! The expression language is intentionally tiny:
//!
//! ```text
//! {{ .Values.image.tag }}
//! {{ .Values.service.type | default "ClusterIP" }}
//! {{ .Release.Name | upper | quote }}
//! ```
//!
//! References resolve against `.Values`, `.Release` (`Name`, `Namespace`,
//! `Revision`) and `.Bundle` (`Name`, `Version`). A reference that resolves
//! to nothing is an error unless a `default` filter supplies a value; there
//! is no silent empty substitution.

use serde_json::Value;

use crate::error::RenderError;

use super::values::Values;

/// Release information exposed to templates as `.Release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseContext {
    /// Release name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Revision number being rendered.
    pub revision: u32,
}

/// Everything a template can reference.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// Merged values tree.
    pub values: &'a Values,
    /// Release information.
    pub release: &'a ReleaseContext,
    /// Bundle name.
    pub bundle_name: &'a str,
    /// Bundle version.
    pub bundle_version: &'a str,
}

impl TemplateContext<'_> {
    fn resolve(&self, reference: &str) -> Option<Value> {
        if reference == ".Values" {
            return Some(self.values.as_value().clone());
        }
        if let Some(path) = reference.strip_prefix(".Values.") {
            return self.values.lookup(path).filter(|v| !v.is_null()).cloned();
        }
        match reference {
            ".Release.Name" => Some(Value::String(self.release.name.clone())),
            ".Release.Namespace" => Some(Value::String(self.release.namespace.clone())),
            ".Release.Revision" => Some(Value::from(self.release.revision)),
            ".Bundle.Name" => Some(Value::String(self.bundle_name.to_string())),
            ".Bundle.Version" => Some(Value::String(self.bundle_version.to_string())),
            _ => None,
        }
    }
}

/// Expands every `{{ ... }}` expression in `source`.
///
/// # Errors
///
/// Returns [`RenderError::MissingValue`] for unresolved references and
/// [`RenderError::TemplateSyntax`] for malformed expressions.
pub fn expand(source: &str, template: &str, ctx: &TemplateContext<'_>) -> Result<String, RenderError> {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;
    let mut consumed = 0usize;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let line = line_of(source, consumed + start);

        let Some(end) = after_open.find("}}") else {
            return Err(syntax(template, line, "unclosed '{{'"));
        };

        let expression = after_open[..end].trim();
        output.push_str(&evaluate(expression, template, line, ctx)?);

        let advanced = start + 2 + end + 2;
        consumed += advanced;
        rest = &rest[advanced..];
    }

    output.push_str(rest);
    Ok(output)
}

fn evaluate(
    expression: &str,
    template: &str,
    line: usize,
    ctx: &TemplateContext<'_>,
) -> Result<String, RenderError> {
    let stages = split_pipeline(expression);
    let Some((reference, filters)) = stages.split_first() else {
        return Err(syntax(template, line, "empty expression"));
    };

    if !reference.starts_with('.') || reference.contains(char::is_whitespace) {
        return Err(syntax(
            template,
            line,
            &format!("expected a reference like .Values.name, found '{reference}'"),
        ));
    }

    let mut current = ctx.resolve(reference);

    for filter in filters {
        let (name, argument) = filter
            .split_once(char::is_whitespace)
            .map_or((filter.as_str(), ""), |(n, a)| (n, a.trim()));

        current = match name {
            "default" => {
                if argument.is_empty() {
                    return Err(syntax(template, line, "'default' needs an argument"));
                }
                let fallback = parse_literal(argument)
                    .ok_or_else(|| syntax(template, line, &format!("invalid literal '{argument}'")))?;
                Some(current.filter(|v| !is_empty_value(v)).unwrap_or(fallback))
            }
            "quote" => current.map(|v| {
                Value::String(serde_json::to_string(&Value::String(scalar_text(&v))).unwrap_or_default())
            }),
            "upper" => current.map(|v| Value::String(scalar_text(&v).to_uppercase())),
            "lower" => current.map(|v| Value::String(scalar_text(&v).to_lowercase())),
            other => {
                return Err(syntax(template, line, &format!("unknown filter '{other}'")));
            }
        };
    }

    current
        .map(|v| scalar_text(&v))
        .ok_or_else(|| RenderError::MissingValue {
            path: reference.clone(),
            template: template.to_string(),
        })
}

/// Splits on `|` outside of double-quoted literals.
fn split_pipeline(expression: &str) -> Vec<String> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in expression.chars() {
        match ch {
            '\\' if in_quotes && !escaped => {
                escaped = true;
                current.push(ch);
                continue;
            }
            '"' if !escaped => in_quotes = !in_quotes,
            '|' if !in_quotes => {
                stages.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        escaped = false;
        current.push(ch);
    }
    stages.push(current.trim().to_string());
    stages.retain(|s| !s.is_empty());
    stages
}

fn parse_literal(raw: &str) -> Option<Value> {
    if raw.starts_with('"') {
        return serde_json::from_str::<String>(raw).ok().map(Value::String);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => Some(v),
        _ => None,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Scalars render as plain text, collections as inline JSON (valid YAML flow).
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::from("null"),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}

fn syntax(template: &str, line: usize, message: &str) -> RenderError {
    RenderError::TemplateSyntax {
        template: template.to_string(),
        line,
        message: message.to_string(),
    }
}
