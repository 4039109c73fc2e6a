//! Ledger storage trait and record types.
//!
//! Implement [`LedgerStore`] to persist ledger state to your database.
//! A memory-backed implementation lives in [`crate::testing`].

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trait for the relational source of truth.
///
/// All writes are upserts keyed on a unique identifier; there is no
/// cross-call locking, so idempotency under concurrent or redelivered
/// events comes from these keys, not from transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Users

    /// Look up a user by email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Create or refresh a user keyed by email, returning the stored record.
    async fn upsert_user(&self, email: &str, external_customer_id: &str) -> Result<UserRecord>;

    // Subscriptions

    /// Look up a subscription by its external (processor-side) id.
    async fn find_subscription(&self, external_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Create or overwrite a subscription keyed by external id.
    async fn upsert_subscription(&self, subscription: &SubscriptionRecord) -> Result<()>;

    // Sites

    /// Look up a site by subdomain.
    async fn find_site(&self, subdomain: &str) -> Result<Option<SiteRecord>>;

    /// Look up the site owned by a subscription.
    async fn find_site_by_subscription(&self, subscription_id: Uuid) -> Result<Option<SiteRecord>>;

    /// Create or overwrite a site keyed by subdomain.
    async fn upsert_site(&self, site: &SiteRecord) -> Result<()>;

    /// Flip the publication flag for a site.
    ///
    /// Only the publication controller may call this; UI code never sets
    /// `is_active` directly.
    async fn set_site_active(&self, subdomain: &str, active: bool) -> Result<()>;

    /// Load every site joined with its subscription and owning user.
    async fn list_sites(&self) -> Result<Vec<SiteJoined>>;

    // HTML backups

    /// Fetch the last known-good published HTML for a subdomain.
    async fn get_backup(&self, subdomain: &str) -> Result<Option<HtmlBackup>>;

    /// Create or overwrite the backup row for a subdomain (at most one row).
    async fn upsert_backup(&self, subdomain: &str, html: &str) -> Result<()>;

    // Provisional drafts

    /// Stash draft HTML generated before checkout completes.
    async fn save_draft(&self, subdomain: &str, html: &str) -> Result<()>;

    /// Remove and return the draft for a subdomain, if any.
    async fn take_draft(&self, subdomain: &str) -> Result<Option<String>>;

    // Webhook idempotency

    /// Check whether a billing event id has already been processed.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Record a billing event id as processed.
    async fn mark_event_processed(&self, event_id: &str) -> Result<()>;
}

/// A paying customer, keyed by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    /// The processor-side customer reference.
    pub external_customer_id: String,
}

/// One recurring-billing record per user-site pairing.
///
/// The status is never guessed: it always reflects the last event processed
/// or the last reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Unique id at the payment processor.
    pub external_subscription_id: String,
    pub status: SubscriptionStatus,
    /// Current billing period start (Unix timestamp).
    pub current_period_start: u64,
    /// Current billing period end (Unix timestamp).
    pub current_period_end: u64,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<u64>,
}

/// One published site per subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Nullable for demo/manual sites with no billing attached.
    pub subscription_id: Option<Uuid>,
    /// Globally unique, immutable once created.
    pub subdomain: String,
    pub site_label: String,
    /// The publication flag; kept true iff the subscription status implies
    /// publishable, within the reconciliation cadence.
    pub is_active: bool,
    /// Snapshot of the generation inputs the site was built from.
    pub generation_inputs: serde_json::Value,
}

/// The last known-good published HTML for a subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlBackup {
    pub subdomain: String,
    pub html: String,
    pub created_at: u64,
}

/// A site joined with its subscription and owning user, as loaded by the
/// reconciliation job.
#[derive(Debug, Clone)]
pub struct SiteJoined {
    pub site: SiteRecord,
    pub subscription: Option<SubscriptionRecord>,
    pub owner_email: String,
}

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is active and paid.
    Active,
    /// Subscription is in trial period.
    Trialing,
    /// Payment failed; subscription still live but past due.
    PastDue,
    /// Subscription has been canceled.
    Canceled,
}

impl SubscriptionStatus {
    /// Parse from a processor status string.
    ///
    /// Unknown statuses map to `Canceled`; a status we cannot explain must
    /// never leave a site published.
    #[must_use]
    pub fn from_processor(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            _ => Self::Canceled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }

    /// Whether this status implies the site should be published.
    ///
    /// `past_due` is not publishable here, but nothing deactivates a site
    /// synchronously on a failed payment; the flip happens only when the
    /// processor cancels the subscription or a reconciliation pass runs,
    /// which is the customer's grace window.
    #[must_use]
    pub fn is_publishable(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
