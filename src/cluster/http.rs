//! Kubernetes API server client.
//!
//! Applies use server-side apply (`PATCH` with
//! `application/apply-patch+yaml`), so the server merges our manifest with
//! fields owned by other managers instead of us replacing the object.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ClusterError, HalyardError, Result};
use crate::render::{Resource, ResourceId};

use super::api::{ClusterApi, LiveObject};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Content type for server-side apply.
const APPLY_PATCH_CONTENT_TYPE: &str = "application/apply-patch+yaml";

/// Kubernetes API client.
#[derive(Debug, Clone)]
pub struct KubeClient {
    /// HTTP client.
    client: Client,
    /// API server base URL, without trailing slash.
    server: String,
    /// Bearer token.
    token: Option<String>,
    /// Field manager name for server-side apply.
    field_manager: String,
}

impl KubeClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server: &str, token: Option<String>, field_manager: &str) -> Result<Self> {
        Self::with_timeout(server, token, field_manager, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        server: &str,
        token: Option<String>,
        field_manager: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ClusterError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
            token,
            field_manager: field_manager.to_string(),
        })
    }

    /// Builds the URL of an object.
    #[must_use]
    pub fn object_url(&self, id: &ResourceId) -> String {
        let group = if id.api_version.contains('/') {
            format!("/apis/{}", id.api_version)
        } else {
            format!("/api/{}", id.api_version)
        };
        let namespace = id
            .namespace
            .as_ref()
            .map_or_else(String::new, |ns| format!("/namespaces/{ns}"));

        format!(
            "{}{group}{namespace}/{}/{}",
            self.server,
            plural(&id.kind),
            id.name
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, resource: &ResourceId) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| {
            HalyardError::Cluster(ClusterError::network(format!("Request for {resource} failed: {e}")))
        })
    }
}

/// Lowercase plural used in resource paths.
fn plural(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower == "endpoints" {
        return lower;
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        return format!("{lower}es");
    }
    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    format!("{lower}s")
}

/// Maps a non-success response onto a cluster error.
async fn error_for(response: reqwest::Response, resource: &ResourceId) -> HalyardError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or(body);

    let error = match status {
        StatusCode::NOT_FOUND => ClusterError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClusterError::Unauthorized { message },
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            ClusterError::network(format!("{resource}: {status} - {message}"))
        }
        s => ClusterError::rejected(resource.to_string(), s.as_u16(), message),
    };
    HalyardError::Cluster(error)
}

async fn parse_object(response: reqwest::Response, id: &ResourceId) -> Result<LiveObject> {
    let content: Value = response.json().await.map_err(|e| {
        HalyardError::Cluster(ClusterError::InvalidResponse {
            message: format!("Failed to parse {id}: {e}"),
        })
    })?;
    Ok(LiveObject {
        id: id.clone(),
        content,
    })
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn apply(&self, resource: &Resource) -> Result<LiveObject> {
        let url = self.object_url(&resource.id);
        trace!("PATCH {url}");

        let body = serde_json::to_vec(&resource.content)
            .map_err(|e| HalyardError::internal(format!("Failed to encode {}: {e}", resource.id)))?;
        let builder = self
            .request(reqwest::Method::PATCH, &url)
            .query(&[("fieldManager", self.field_manager.as_str()), ("force", "true")])
            .header(header::CONTENT_TYPE, APPLY_PATCH_CONTENT_TYPE)
            .body(body);

        let response = self.send(builder, &resource.id).await?;
        if !response.status().is_success() {
            return Err(error_for(response, &resource.id).await);
        }

        debug!("Applied {}", resource.id);
        parse_object(response, &resource.id).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        let url = self.object_url(id);
        trace!("DELETE {url}");

        let response = self.send(self.request(reqwest::Method::DELETE, &url), id).await?;
        if !response.status().is_success() {
            return Err(error_for(response, id).await);
        }

        debug!("Deleted {id}");
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<LiveObject>> {
        let url = self.object_url(id);
        trace!("GET {url}");

        let response = self.send(self.request(reqwest::Method::GET, &url), id).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response, id).await);
        }

        parse_object(response, id).await.map(Some)
    }

    fn backend_type(&self) -> &'static str {
        "kubernetes"
    }
}
