//! The payment-processor boundary.
//!
//! The processor is always the source of truth for subscription state; the
//! ledger only caches it. Vendor response shapes are mapped into the narrow
//! [`ProcessorSubscription`] type immediately on receipt so the rest of the
//! system never touches vendor JSON.

mod stripe_http;

pub use stripe_http::StripeHttpClient;

use crate::error::Result;
use crate::ledger::SubscriptionStatus;
use async_trait::async_trait;

/// The authoritative subscription state, as this system cares about it.
///
/// Deliberately narrow: only the fields the reconciliation state machine
/// consumes survive the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSubscription {
    /// Processor-side subscription id.
    pub id: String,
    /// Processor-side customer id.
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: u64,
    pub current_period_end: u64,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<u64>,
}

/// Client for fetching authoritative subscription state.
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    /// Fetch a subscription by its processor-side id.
    ///
    /// # Errors
    /// Returns [`ProcessorError::NotFound`] when the processor no longer
    /// knows the subscription. Callers treat that as an implicit
    /// cancellation, not a failure.
    async fn fetch_subscription(&self, external_id: &str) -> Result<ProcessorSubscription>;
}

/// Errors from the processor boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// The processor does not know this subscription.
    #[error("subscription not found at processor: {id}")]
    NotFound { id: String },

    /// The processor rejected our credentials.
    #[error("processor rejected API key")]
    Unauthorized,

    /// Timeout or connection failure; retried at the next reconciliation pass.
    #[error("processor transport error: {0}")]
    Transport(String),

    /// The processor returned an unexpected response.
    #[error("processor API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
}

impl ProcessorError {
    pub(crate) fn status_code(&self) -> axum::http::StatusCode {
        match self {
            Self::NotFound { .. } => axum::http::StatusCode::NOT_FOUND,
            Self::Unauthorized => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(_) | Self::Api { .. } => axum::http::StatusCode::BAD_GATEWAY,
        }
    }

    /// Whether this error means the subscription is gone rather than
    /// temporarily unreachable.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = ProcessorError::NotFound {
            id: "sub_123".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!ProcessorError::Unauthorized.is_not_found());
        assert!(!ProcessorError::Transport("timeout".to_string()).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = ProcessorError::Api {
            status: 500,
            message: "upstream broke".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "processor API error (HTTP 500): upstream broke"
        );
    }
}
