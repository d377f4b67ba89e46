//! Bundle renderer.
//!
//! Rendering is a pure function of `(bundle, values, release context)`:
//! templates are expanded in name order, split into YAML documents, turned
//! into [`Resource`]s and collected into a duplicate-free [`ManifestSet`].

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{RenderError, Result};

use super::bundle::Bundle;
use super::resource::{ManifestSet, Resource};
use super::template::{expand, ReleaseContext, TemplateContext};
use super::values::Values;

/// Renders bundles into manifest sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct Renderer;

impl Renderer {
    /// Creates a new renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Renders a bundle with a fully merged values tree.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] for missing values, template syntax errors,
    /// invalid manifests or duplicate resources.
    pub fn render(&self, bundle: &Bundle, values: &Values, release: &ReleaseContext) -> Result<ManifestSet> {
        info!(
            "Rendering bundle {} {} for release {}/{}",
            bundle.metadata.name, bundle.metadata.version, release.namespace, release.name
        );

        let ctx = TemplateContext {
            values,
            release,
            bundle_name: &bundle.metadata.name,
            bundle_version: &bundle.metadata.version,
        };

        let mut resources = Vec::new();
        for template in bundle.templates() {
            let expanded = expand(&template.source, &template.name, &ctx)?;

            for document in split_documents(&expanded) {
                let content: Value = serde_yaml::from_str(&document).map_err(|e| {
                    RenderError::invalid_manifest(&template.name, format!("rendered YAML is invalid: {e}"))
                })?;
                if content.is_null() {
                    continue;
                }
                let resource = Resource::from_manifest(content, &release.namespace, &template.name)?;
                debug!("Rendered {} from {}", resource.id, template.name);
                resources.push(resource);
            }
        }

        let set = ManifestSet::new(resources)?;
        info!("Rendered {} resource(s)", set.len());
        Ok(set)
    }
}

/// Splits a multi-document YAML stream on `---` separator lines.
///
/// Documents with nothing but whitespace and comments are dropped.
fn split_documents(stream: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in stream.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            documents.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    documents.push(current);

    documents
        .into_iter()
        .filter(|doc| {
            doc.lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && !line.starts_with('#'))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HalyardError;
    use crate::render::bundle::{BundleMetadata, Template};
    use serde_json::json;

    const DEPLOYMENT: &str = r"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ .Release.Name }}
spec:
  replicas: {{ .Values.replicaCount }}
  template:
    spec:
      containers:
        - name: app
          image: {{ .Values.image | quote }}
";

    const SERVICE: &str = r"# service for the app
apiVersion: v1
kind: Service
metadata:
  name: {{ .Release.Name }}
spec:
  ports:
    - port: {{ .Values.service.port | default 80 }}
";

    fn bundle(templates: &[(&str, &str)]) -> Bundle {
        Bundle::from_parts(
            BundleMetadata {
                name: String::from("app"),
                version: String::from("0.1.0"),
                description: None,
                app_version: None,
            },
            Values::new(),
            templates
                .iter()
                .map(|(name, source)| Template {
                    name: (*name).to_string(),
                    source: (*source).to_string(),
                })
                .collect(),
        )
    }

    fn release() -> ReleaseContext {
        ReleaseContext {
            name: String::from("web"),
            namespace: String::from("default"),
            revision: 1,
        }
    }

    fn values(v: Value) -> Values {
        Values::from_value(v).unwrap()
    }

    #[test]
    fn test_render_deployment_and_service() {
        let bundle = bundle(&[("deployment.yaml", DEPLOYMENT), ("service.yaml", SERVICE)]);
        let set = Renderer::new()
            .render(&bundle, &values(json!({"replicaCount": 1, "image": "app:v1"})), &release())
            .expect("render succeeds");

        assert_eq!(set.len(), 2);
        let kinds: Vec<&str> = set.iter().map(|r| r.id.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Service", "Deployment"]);

        let deployment = set.iter().find(|r| r.id.kind == "Deployment").unwrap();
        assert_eq!(deployment.content["spec"]["replicas"], json!(1));
        assert_eq!(
            deployment.content.pointer("/spec/template/spec/containers/0/image"),
            Some(&json!("app:v1"))
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let bundle = bundle(&[("service.yaml", SERVICE), ("deployment.yaml", DEPLOYMENT)]);
        let vals = values(json!({"replicaCount": 2, "image": "app:v1"}));

        let first = Renderer::new().render(&bundle, &vals, &release()).unwrap();
        let second = Renderer::new().render(&bundle, &vals, &release()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_missing_value_fails_render() {
        let bundle = bundle(&[("deployment.yaml", DEPLOYMENT)]);
        let err = Renderer::new()
            .render(&bundle, &values(json!({"replicaCount": 1})), &release())
            .unwrap_err();

        assert!(matches!(
            err,
            HalyardError::Render(RenderError::MissingValue { ref path, .. }) if path == ".Values.image"
        ));
    }

    #[test]
    fn test_duplicate_resources_fail_render() {
        let bundle = bundle(&[("a.yaml", SERVICE), ("b.yaml", SERVICE)]);
        let err = Renderer::new().render(&bundle, &Values::new(), &release()).unwrap_err();
        assert!(matches!(err, HalyardError::Render(RenderError::DuplicateResource { .. })));
    }

    #[test]
    fn test_multi_document_template() {
        let source = "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n# nothing here\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let bundle = bundle(&[("config.yaml", source)]);
        let set = Renderer::new().render(&bundle, &Values::new(), &release()).unwrap();
        assert_eq!(set.len(), 2);
    }
}
