//! Reqwest-based processor client.
//!
//! Talks to the processor's REST API directly and maps the response into
//! [`ProcessorSubscription`] at the boundary. Going through the raw API
//! with a pinned response shape keeps the rest of the system insulated
//! from vendor SDK type churn.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::{ProcessorClient, ProcessorError, ProcessorSubscription};
use crate::error::Result;
use crate::ledger::SubscriptionStatus;

/// Wire shape of the vendor subscription object, reduced to the fields we
/// consume. Unknown fields are ignored by construction.
#[derive(Debug, Deserialize)]
struct VendorSubscription {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    current_period_start: u64,
    #[serde(default)]
    current_period_end: u64,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    canceled_at: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VendorErrorBody {
    #[serde(default)]
    error: VendorErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct VendorErrorDetail {
    #[serde(default)]
    message: String,
}

impl From<VendorSubscription> for ProcessorSubscription {
    fn from(v: VendorSubscription) -> Self {
        ProcessorSubscription {
            id: v.id,
            customer_id: v.customer,
            status: SubscriptionStatus::from_processor(&v.status),
            current_period_start: v.current_period_start,
            current_period_end: v.current_period_end,
            cancel_at_period_end: v.cancel_at_period_end,
            canceled_at: v.canceled_at,
        }
    }
}

/// Live processor client authenticated with a bearer API key.
pub struct StripeHttpClient {
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
}

impl StripeHttpClient {
    /// Create a new client.
    ///
    /// `api_base` is overridable so tests can point at a local stub.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::SitewardError::internal(format!("processor client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl ProcessorClient for StripeHttpClient {
    async fn fetch_subscription(&self, external_id: &str) -> Result<ProcessorSubscription> {
        tracing::debug!(subscription_id = %external_id, "fetching subscription from processor");

        let url = format!("{}/v1/subscriptions/{}", self.api_base, external_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessorError::Transport(format!("timeout fetching {}", external_id))
                } else {
                    ProcessorError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            200 => {
                let vendor: VendorSubscription = response
                    .json()
                    .await
                    .map_err(|e| ProcessorError::Api {
                        status: 200,
                        message: format!("unexpected response shape: {}", e),
                    })?;
                Ok(vendor.into())
            }
            404 => Err(ProcessorError::NotFound {
                id: external_id.to_string(),
            }
            .into()),
            401 | 403 => Err(ProcessorError::Unauthorized.into()),
            code => {
                let message = response
                    .json::<VendorErrorBody>()
                    .await
                    .map(|b| b.error.message)
                    .unwrap_or_default();
                Err(ProcessorError::Api {
                    status: code,
                    message,
                }
                .into())
            }
        }
    }
}
