//! Billing webhook handling.
//!
//! Signature verification, idempotency, and event routing for the payment
//! processor's webhooks. Webhooks are the fast path that keeps the ledger
//! current between reconciliation passes; the acknowledgement is decoupled
//! from handler outcome, so once a payload verifies and parses we return
//! 200 and rely on reconciliation to heal anything a failed handler left
//! behind. Retrying a side-effecting handler by NACKing would redeliver the
//! event against half-applied state.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::content::ContentStore;
use crate::error::{Result, SitewardError};
use crate::ledger::{LedgerStore, SubscriptionRecord, SubscriptionStatus};
use crate::publication::PublicationController;
use crate::tasks::TaskQueue;

/// Task type for the post-checkout notification.
pub const NOTIFY_CHECKOUT_TASK: &str = "notify.checkout_completed";

/// Webhook handler for billing events.
///
/// The webhook secret is stored using [`SecretString`] to prevent accidental
/// exposure in logs or debug output.
pub struct EventIngestor {
    ledger: Arc<dyn LedgerStore>,
    content: Arc<dyn ContentStore>,
    publisher: PublicationController,
    tasks: Arc<dyn TaskQueue>,
    webhook_secret: SecretString,
}

impl EventIngestor {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        content: Arc<dyn ContentStore>,
        publisher: PublicationController,
        tasks: Arc<dyn TaskQueue>,
        webhook_secret: impl Into<SecretString>,
    ) -> Self {
        Self {
            ledger,
            content,
            publisher,
            tasks,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the webhook signature and parse the event.
    ///
    /// # Arguments
    /// * `payload` - The raw request body
    /// * `signature` - The signature header value (`t=...,v1=...`)
    ///
    /// # Errors
    /// Returns an error if signature verification fails or the payload is
    /// not a well-formed event.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<BillingEvent> {
        let sig_parts = parse_signature_header(signature)?;

        // Reject replays outside a 5 minute window.
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as i64;

        if (now - sig_parts.timestamp).abs() > 300 {
            return Err(SitewardError::bad_request("Webhook timestamp too old"));
        }

        let signed_payload = format!(
            "{}.{}",
            sig_parts.timestamp,
            String::from_utf8_lossy(payload)
        );
        let expected_sig =
            compute_signature(self.webhook_secret.expose_secret(), signed_payload.as_bytes())?;

        let expected_bytes = hex::decode(&expected_sig)
            .map_err(|_| SitewardError::internal("Hex decode error"))?;
        let provided_bytes = hex::decode(&sig_parts.signature)
            .map_err(|_| SitewardError::bad_request("Invalid signature format"))?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(SitewardError::bad_request("Invalid webhook signature"));
        }

        // Log parse detail internally, return a generic message to the caller.
        let event: BillingEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "failed to parse webhook payload");
            SitewardError::bad_request("malformed event payload")
        })?;

        Ok(event)
    }

    /// Process a verified webhook event.
    ///
    /// Handles idempotency and routes to the per-type handler. Redelivered
    /// events short-circuit to [`EventOutcome::AlreadyProcessed`].
    pub async fn handle_event(&self, event: BillingEvent) -> Result<EventOutcome> {
        if self.ledger.is_event_processed(&event.id).await? {
            tracing::debug!(event_id = %event.id, "event already processed");
            return Ok(EventOutcome::AlreadyProcessed);
        }

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event).await?,
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.handle_subscription_updated(&event).await?
            }
            "customer.subscription.deleted" => self.handle_subscription_deleted(&event).await?,
            "invoice.paid" | "invoice.payment_succeeded" => {
                self.handle_invoice_paid(&event).await?
            }
            "invoice.payment_failed" => self.handle_payment_failed(&event).await?,
            _ => EventOutcome::Ignored,
        };

        // Only handled events consume the id; an ignored type stays
        // replayable in case a later version handles it.
        if !matches!(outcome, EventOutcome::Ignored) {
            self.ledger.mark_event_processed(&event.id).await?;
        }

        Ok(outcome)
    }

    /// Handle checkout.session.completed: the moment a visitor becomes a
    /// paying customer. Creates the user, subscription, and site rows, then
    /// publishes the draft HTML generated before checkout.
    async fn handle_checkout_completed(&self, event: &BillingEvent) -> Result<EventOutcome> {
        let session: CheckoutSession = serde_json::from_value(event.data.object.clone())
            .map_err(|_| SitewardError::bad_request("Invalid checkout session data"))?;

        let Some(subscription_id) = session.subscription else {
            // One-time payment checkout, nothing for us to track.
            return Ok(EventOutcome::Ignored);
        };

        let email = session
            .customer_details
            .email
            .or(session.customer_email)
            .ok_or_else(|| SitewardError::bad_request("Checkout session missing customer email"))?;

        let customer_id = session
            .customer
            .ok_or_else(|| SitewardError::bad_request("Checkout session missing customer id"))?;

        let subdomain = session
            .metadata
            .subdomain
            .ok_or_else(|| SitewardError::bad_request("Checkout session missing subdomain metadata"))?;

        let site_label = session
            .metadata
            .site_label
            .unwrap_or_else(|| subdomain.clone());

        tracing::info!(
            email = %email,
            subdomain = %subdomain,
            subscription = %subscription_id,
            "checkout completed"
        );

        let user = self.ledger.upsert_user(&email, &customer_id).await?;

        // Period bounds arrive with the subscription.created event; until
        // then the row carries zeros and an active status.
        let existing = self.ledger.find_subscription(&subscription_id).await?;
        let subscription = SubscriptionRecord {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |s| s.id),
            user_id: user.id,
            external_subscription_id: subscription_id.clone(),
            status: SubscriptionStatus::Active,
            current_period_start: existing.as_ref().map_or(0, |s| s.current_period_start),
            current_period_end: existing.as_ref().map_or(0, |s| s.current_period_end),
            cancel_at_period_end: false,
            canceled_at: None,
        };
        self.ledger.upsert_subscription(&subscription).await?;

        let existing_site = self.ledger.find_site(&subdomain).await?;
        let site = crate::ledger::SiteRecord {
            id: existing_site.as_ref().map_or_else(Uuid::new_v4, |s| s.id),
            user_id: user.id,
            subscription_id: Some(subscription.id),
            subdomain: subdomain.clone(),
            site_label: site_label.clone(),
            is_active: true,
            generation_inputs: existing_site
                .map(|s| s.generation_inputs)
                .unwrap_or(serde_json::Value::Null),
        };
        self.ledger.upsert_site(&site).await?;

        // Publish the pre-checkout draft. If the content store is down the
        // draft goes back so a redelivery or manual republish can retry.
        if let Some(html) = self.ledger.take_draft(&subdomain).await? {
            if let Err(e) = self.content.write(&subdomain, &html).await {
                tracing::error!(subdomain = %subdomain, error = %e, "failed to publish draft");
                self.ledger.save_draft(&subdomain, &html).await?;
                return Err(e);
            }
            tracing::info!(subdomain = %subdomain, "draft published");
        } else {
            tracing::debug!(subdomain = %subdomain, "no draft to publish");
        }

        // Notification failures never fail the checkout flow.
        let payload = serde_json::json!({ "email": email, "subdomain": subdomain });
        if let Err(e) = self.tasks.enqueue(NOTIFY_CHECKOUT_TASK, payload).await {
            tracing::warn!(error = %e, "failed to enqueue checkout notification");
        }

        Ok(EventOutcome::Processed)
    }

    /// Handle subscription created/updated: sync status and period bounds
    /// into the ledger.
    async fn handle_subscription_updated(&self, event: &BillingEvent) -> Result<EventOutcome> {
        let data: SubscriptionObject = serde_json::from_value(event.data.object.clone())
            .map_err(|_| SitewardError::bad_request("Invalid subscription data"))?;

        let Some(existing) = self.ledger.find_subscription(&data.id).await? else {
            // Ordering race with checkout.session.completed; the checkout
            // handler or the next reconciliation pass fills this in.
            tracing::debug!(subscription = %data.id, "subscription not yet in ledger, skipping");
            return Ok(EventOutcome::Processed);
        };

        let record = SubscriptionRecord {
            status: SubscriptionStatus::from_processor(&data.status),
            current_period_start: data.current_period_start,
            current_period_end: data.current_period_end,
            cancel_at_period_end: data.cancel_at_period_end,
            canceled_at: data.canceled_at,
            ..existing
        };
        self.ledger.upsert_subscription(&record).await?;

        tracing::debug!(
            subscription = %data.id,
            status = %record.status,
            "subscription synced"
        );

        Ok(EventOutcome::Processed)
    }

    /// Handle subscription deleted: mark canceled and take the site down.
    async fn handle_subscription_deleted(&self, event: &BillingEvent) -> Result<EventOutcome> {
        let data: SubscriptionObject = serde_json::from_value(event.data.object.clone())
            .map_err(|_| SitewardError::bad_request("Invalid subscription data"))?;

        let Some(existing) = self.ledger.find_subscription(&data.id).await? else {
            tracing::debug!(subscription = %data.id, "deleted subscription unknown to ledger");
            return Ok(EventOutcome::Processed);
        };

        let canceled_at = data.canceled_at.or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .ok()
        });

        let record = SubscriptionRecord {
            status: SubscriptionStatus::Canceled,
            canceled_at,
            ..existing
        };
        self.ledger.upsert_subscription(&record).await?;

        if let Some(site) = self.ledger.find_site_by_subscription(record.id).await? {
            if site.is_active {
                self.publisher
                    .deactivate(&site.subdomain, &site.site_label)
                    .await?;
            } else {
                tracing::debug!(subdomain = %site.subdomain, "site already inactive");
            }
        }

        Ok(EventOutcome::Processed)
    }

    /// Handle a paid invoice: the authoritative signal that the current
    /// period is paid for, so the status is forced to active and the period
    /// bounds advance.
    async fn handle_invoice_paid(&self, event: &BillingEvent) -> Result<EventOutcome> {
        let invoice: InvoiceObject = serde_json::from_value(event.data.object.clone())
            .map_err(|_| SitewardError::bad_request("Invalid invoice data"))?;

        let Some(subscription_id) = invoice.subscription else {
            return Ok(EventOutcome::Ignored);
        };

        let Some(existing) = self.ledger.find_subscription(&subscription_id).await? else {
            tracing::debug!(subscription = %subscription_id, "invoice for unknown subscription");
            return Ok(EventOutcome::Processed);
        };

        let record = SubscriptionRecord {
            status: SubscriptionStatus::Active,
            current_period_start: if invoice.period_start > 0 {
                invoice.period_start
            } else {
                existing.current_period_start
            },
            current_period_end: if invoice.period_end > 0 {
                invoice.period_end
            } else {
                existing.current_period_end
            },
            ..existing
        };
        self.ledger.upsert_subscription(&record).await?;

        tracing::info!(subscription = %subscription_id, "invoice paid, period advanced");

        Ok(EventOutcome::Processed)
    }

    /// Handle a failed invoice payment: record past_due and nothing else.
    ///
    /// The site stays up. The processor retries the charge on its own
    /// schedule; takedown happens only if the subscription is eventually
    /// canceled or a reconciliation pass finds it still unpaid.
    async fn handle_payment_failed(&self, event: &BillingEvent) -> Result<EventOutcome> {
        let invoice: InvoiceObject = serde_json::from_value(event.data.object.clone())
            .map_err(|_| SitewardError::bad_request("Invalid invoice data"))?;

        let Some(subscription_id) = invoice.subscription else {
            return Ok(EventOutcome::Ignored);
        };

        let Some(existing) = self.ledger.find_subscription(&subscription_id).await? else {
            tracing::debug!(subscription = %subscription_id, "failed invoice for unknown subscription");
            return Ok(EventOutcome::Processed);
        };

        let record = SubscriptionRecord {
            status: SubscriptionStatus::PastDue,
            ..existing
        };
        self.ledger.upsert_subscription(&record).await?;

        tracing::warn!(subscription = %subscription_id, "payment failed, subscription past due");

        Ok(EventOutcome::Processed)
    }
}

/// Parsed webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingEvent {
    /// Event ID, unique per delivery attempt group.
    pub id: String,
    /// Event type (e.g. "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: BillingEventData,
    /// Timestamp when the event was created.
    pub created: u64,
}

/// Webhook event data.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingEventData {
    /// The object that triggered the event.
    pub object: serde_json::Value,
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Event was processed successfully.
    Processed,
    /// Event was not relevant to this system.
    Ignored,
    /// Event id was seen before (idempotency).
    AlreadyProcessed,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: CustomerDetails,
    #[serde(default)]
    metadata: SessionMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionMetadata {
    #[serde(default)]
    subdomain: Option<String>,
    #[serde(default)]
    site_label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    #[serde(default = "default_status")]
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

fn default_status() -> String {
    "active".to_string()
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    period_start: u64,
    #[serde(default)]
    period_end: u64,
}

/// Parsed signature header parts.
struct SignatureParts {
    timestamp: i64,
    signature: String,
}

/// Parse the `t=...,v1=...` signature header.
fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| SitewardError::bad_request("Invalid signature header format"))?;

        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            _ => {} // Ignore other scheme versions
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp
            .ok_or_else(|| SitewardError::bad_request("Missing timestamp in signature"))?,
        signature: signature
            .ok_or_else(|| SitewardError::bad_request("Missing v1 signature"))?,
    })
}

/// Compute HMAC-SHA256 over `timestamp.body`, hex encoded.
fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SitewardError::internal("HMAC error"))?;
    mac.update(payload);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a valid signature header for a payload. Used by tests and by the
/// processor simulator in local development.
#[must_use = "the signature header must be attached to the request"]
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let sig = compute_signature(secret, signed_payload.as_bytes()).unwrap_or_default();
    format!("t={timestamp},v1={sig}")
}
