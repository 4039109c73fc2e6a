//! HTTP client for the edge content worker.
//!
//! The worker exposes a single endpoint taking a JSON body with the shared
//! secret, an action, the subdomain key, and (for writes) the HTML. A read
//! miss is a normal outcome, not an error.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ContentStore;
use crate::error::{Result, SitewardError};

#[derive(Serialize)]
struct WorkerRequest<'a> {
    secret: &'a str,
    action: &'a str,
    subdomain: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
}

#[derive(Deserialize)]
struct WorkerResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    found: bool,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the edge key-value store holding published HTML.
///
/// Authenticates via a shared secret in the request body; every call carries
/// a bounded timeout so a slow edge cannot stall a reconciliation pass.
pub struct EdgeContentClient {
    http: reqwest::Client,
    endpoint: String,
    shared_secret: SecretString,
}

impl EdgeContentClient {
    /// Create a new client.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        shared_secret: impl Into<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SitewardError::internal(format!("content store client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            shared_secret: shared_secret.into(),
        })
    }

    async fn call(&self, action: &str, subdomain: &str, html: Option<&str>) -> Result<WorkerResponse> {
        let body = WorkerRequest {
            secret: self.shared_secret.expose_secret(),
            action,
            subdomain,
            html,
        };

        let response = self.http.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SitewardError::unauthorized(
                "content store rejected shared secret",
            ));
        }
        if !status.is_success() {
            return Err(SitewardError::ServiceUnavailable(format!(
                "content store returned {}",
                status
            )));
        }

        let parsed: WorkerResponse = response.json().await?;
        if !parsed.ok {
            return Err(SitewardError::internal(format!(
                "content store error: {}",
                parsed.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ContentStore for EdgeContentClient {
    async fn read(&self, subdomain: &str) -> Result<Option<String>> {
        tracing::debug!(subdomain = %subdomain, "reading published content");
        let response = self.call("get", subdomain, None).await?;
        if response.found {
            Ok(response.html)
        } else {
            Ok(None)
        }
    }

    async fn write(&self, subdomain: &str, html: &str) -> Result<()> {
        tracing::debug!(subdomain = %subdomain, bytes = html.len(), "writing published content");
        self.call("put", subdomain, Some(html)).await?;
        Ok(())
    }
}
