//! In-memory implementations for tests and local development.
//!
//! These mirror the production implementations closely enough that the
//! webhook and reconciliation flows can be exercised end to end without a
//! database, an edge worker, or a payment processor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::content::ContentStore;
use crate::error::{Result, SitewardError};
use crate::ledger::{
    HtmlBackup, LedgerStore, SiteJoined, SiteRecord, SubscriptionRecord, UserRecord,
};
use crate::processor::{ProcessorClient, ProcessorError, ProcessorSubscription};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Memory-backed [`LedgerStore`].
#[derive(Default)]
pub struct MemoryLedger {
    users: RwLock<HashMap<String, UserRecord>>,
    subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
    sites: RwLock<HashMap<String, SiteRecord>>,
    backups: RwLock<HashMap<String, HtmlBackup>>,
    drafts: RwLock<HashMap<String, String>>,
    processed_events: RwLock<HashSet<String>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn upsert_user(&self, email: &str, external_customer_id: &str) -> Result<UserRecord> {
        let mut users = self.users.write().await;
        let record = users
            .entry(email.to_string())
            .and_modify(|u| u.external_customer_id = external_customer_id.to_string())
            .or_insert_with(|| UserRecord {
                id: Uuid::new_v4(),
                email: email.to_string(),
                external_customer_id: external_customer_id.to_string(),
            });
        Ok(record.clone())
    }

    async fn find_subscription(&self, external_id: &str) -> Result<Option<SubscriptionRecord>> {
        Ok(self.subscriptions.read().await.get(external_id).cloned())
    }

    async fn upsert_subscription(&self, subscription: &SubscriptionRecord) -> Result<()> {
        let mut subs = self.subscriptions.write().await;
        let mut record = subscription.clone();
        // The row id survives an upsert, like a conflict-target update would.
        if let Some(existing) = subs.get(&subscription.external_subscription_id) {
            record.id = existing.id;
        }
        subs.insert(record.external_subscription_id.clone(), record);
        Ok(())
    }

    async fn find_site(&self, subdomain: &str) -> Result<Option<SiteRecord>> {
        Ok(self.sites.read().await.get(subdomain).cloned())
    }

    async fn find_site_by_subscription(&self, subscription_id: Uuid) -> Result<Option<SiteRecord>> {
        Ok(self
            .sites
            .read()
            .await
            .values()
            .find(|s| s.subscription_id == Some(subscription_id))
            .cloned())
    }

    async fn upsert_site(&self, site: &SiteRecord) -> Result<()> {
        let mut sites = self.sites.write().await;
        let mut record = site.clone();
        if let Some(existing) = sites.get(&site.subdomain) {
            record.id = existing.id;
        }
        sites.insert(record.subdomain.clone(), record);
        Ok(())
    }

    async fn set_site_active(&self, subdomain: &str, active: bool) -> Result<()> {
        if let Some(site) = self.sites.write().await.get_mut(subdomain) {
            site.is_active = active;
        }
        Ok(())
    }

    async fn list_sites(&self) -> Result<Vec<SiteJoined>> {
        let sites = self.sites.read().await;
        let subs = self.subscriptions.read().await;
        let users = self.users.read().await;

        let mut joined: Vec<SiteJoined> = sites
            .values()
            .map(|site| {
                let subscription = site
                    .subscription_id
                    .and_then(|id| subs.values().find(|s| s.id == id).cloned());
                let owner_email = users
                    .values()
                    .find(|u| u.id == site.user_id)
                    .map(|u| u.email.clone())
                    .unwrap_or_default();
                SiteJoined {
                    site: site.clone(),
                    subscription,
                    owner_email,
                }
            })
            .collect();

        // Deterministic order keeps tests stable.
        joined.sort_by(|a, b| a.site.subdomain.cmp(&b.site.subdomain));
        Ok(joined)
    }

    async fn get_backup(&self, subdomain: &str) -> Result<Option<HtmlBackup>> {
        Ok(self.backups.read().await.get(subdomain).cloned())
    }

    async fn upsert_backup(&self, subdomain: &str, html: &str) -> Result<()> {
        self.backups.write().await.insert(
            subdomain.to_string(),
            HtmlBackup {
                subdomain: subdomain.to_string(),
                html: html.to_string(),
                created_at: now_unix(),
            },
        );
        Ok(())
    }

    async fn save_draft(&self, subdomain: &str, html: &str) -> Result<()> {
        self.drafts
            .write()
            .await
            .insert(subdomain.to_string(), html.to_string());
        Ok(())
    }

    async fn take_draft(&self, subdomain: &str) -> Result<Option<String>> {
        Ok(self.drafts.write().await.remove(subdomain))
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self.processed_events.read().await.contains(event_id))
    }

    async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
        self.processed_events
            .write()
            .await
            .insert(event_id.to_string());
        Ok(())
    }
}

/// Memory-backed [`ContentStore`] with optional per-subdomain failure
/// injection for exercising partial-outage paths.
#[derive(Default)]
pub struct MemoryContentStore {
    pages: RwLock<HashMap<String, String>>,
    failing: RwLock<HashSet<String>>,
}

impl MemoryContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads and writes for a subdomain fail with a 503-class error.
    pub async fn fail_subdomain(&self, subdomain: &str) {
        self.failing.write().await.insert(subdomain.to_string());
    }

    async fn check_failing(&self, subdomain: &str) -> Result<()> {
        if self.failing.read().await.contains(subdomain) {
            return Err(SitewardError::ServiceUnavailable(format!(
                "content store unavailable for {subdomain}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn read(&self, subdomain: &str) -> Result<Option<String>> {
        self.check_failing(subdomain).await?;
        Ok(self.pages.read().await.get(subdomain).cloned())
    }

    async fn write(&self, subdomain: &str, html: &str) -> Result<()> {
        self.check_failing(subdomain).await?;
        self.pages
            .write()
            .await
            .insert(subdomain.to_string(), html.to_string());
        Ok(())
    }
}

/// Scriptable [`ProcessorClient`] fake.
///
/// Subscriptions not inserted resolve to [`ProcessorError::NotFound`], the
/// same answer the real processor gives for a deleted subscription.
#[derive(Default)]
pub struct StaticProcessor {
    responses: RwLock<HashMap<String, std::result::Result<ProcessorSubscription, ProcessorError>>>,
}

impl StaticProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful lookup.
    pub async fn insert(&self, subscription: ProcessorSubscription) {
        self.responses
            .write()
            .await
            .insert(subscription.id.clone(), Ok(subscription));
    }

    /// Script a failure for a subscription id.
    pub async fn set_error(&self, external_id: &str, error: ProcessorError) {
        self.responses
            .write()
            .await
            .insert(external_id.to_string(), Err(error));
    }
}

#[async_trait]
impl ProcessorClient for StaticProcessor {
    async fn fetch_subscription(&self, external_id: &str) -> Result<ProcessorSubscription> {
        match self.responses.read().await.get(external_id) {
            Some(Ok(sub)) => Ok(sub.clone()),
            Some(Err(e)) => Err(e.clone().into()),
            None => Err(ProcessorError::NotFound {
                id: external_id.to_string(),
            }
            .into()),
        }
    }
}

/// Convenience constructor used across integration tests.
#[must_use]
pub fn memory_stores() -> (Arc<MemoryLedger>, Arc<MemoryContentStore>, Arc<StaticProcessor>) {
    (
        Arc::new(MemoryLedger::new()),
        Arc::new(MemoryContentStore::new()),
        Arc::new(StaticProcessor::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SubscriptionStatus;

    #[tokio::test]
    async fn test_upsert_user_is_idempotent_on_email() {
        let ledger = MemoryLedger::new();
        let first = ledger.upsert_user("a@b.c", "cus_1").await.unwrap();
        let second = ledger.upsert_user("a@b.c", "cus_2").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.external_customer_id, "cus_2");
    }

    #[tokio::test]
    async fn test_subscription_upsert_preserves_row_id() {
        let ledger = MemoryLedger::new();
        let user = ledger.upsert_user("a@b.c", "cus_1").await.unwrap();

        let record = SubscriptionRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            external_subscription_id: "sub_1".to_string(),
            status: SubscriptionStatus::Active,
            current_period_start: 100,
            current_period_end: 200,
            cancel_at_period_end: false,
            canceled_at: None,
        };
        ledger.upsert_subscription(&record).await.unwrap();

        let mut replay = record.clone();
        replay.id = Uuid::new_v4();
        replay.status = SubscriptionStatus::PastDue;
        ledger.upsert_subscription(&replay).await.unwrap();

        let stored = ledger.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn test_take_draft_removes() {
        let ledger = MemoryLedger::new();
        ledger.save_draft("acme", "<html></html>").await.unwrap();
        assert_eq!(
            ledger.take_draft("acme").await.unwrap().as_deref(),
            Some("<html></html>")
        );
        assert!(ledger.take_draft("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_processor_defaults_to_not_found() {
        let processor = StaticProcessor::new();
        let err = processor.fetch_subscription("sub_gone").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_content_store_failure_injection() {
        let content = MemoryContentStore::new();
        content.write("ok", "<p>hi</p>").await.unwrap();
        content.fail_subdomain("down").await;
        assert!(content.read("down").await.is_err());
        assert!(content.read("ok").await.is_ok());
    }
}
