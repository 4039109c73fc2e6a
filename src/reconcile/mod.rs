//! Periodic reconciliation between the ledger and the payment processor.
//!
//! Webhooks keep the ledger current in near real time, but deliveries get
//! dropped, handlers crash mid-flight, and operators edit rows by hand.
//! This job walks every site, asks the processor for the authoritative
//! subscription state, overwrites any ledger divergence, and flips sites
//! whose activation no longer matches what the customer is paying for.
//! One misbehaving site never stops the sweep; its error is recorded in
//! the summary and the loop moves on.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, SitewardError};
use crate::ledger::{LedgerStore, SiteJoined, SubscriptionRecord, SubscriptionStatus};
use crate::processor::ProcessorClient;
use crate::publication::{PublicationController, PublicationError};

/// Counters and per-site errors from one reconciliation pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileSummary {
    /// Sites with a linked subscription that were compared.
    pub checked: usize,
    /// Sites with no billing attached, left untouched.
    pub skipped: usize,
    pub deactivated: usize,
    pub reactivated: usize,
    /// Ledger subscription statuses overwritten from processor state.
    pub status_corrected: usize,
    /// Per-site failures, formatted as "subdomain: detail".
    pub errors: Vec<String>,
}

/// The reconciliation job.
#[derive(Clone)]
pub struct ReconcileJob {
    ledger: Arc<dyn LedgerStore>,
    publisher: PublicationController,
    processor: Arc<dyn ProcessorClient>,
}

impl ReconcileJob {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        publisher: PublicationController,
        processor: Arc<dyn ProcessorClient>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            processor,
        }
    }

    /// Run a full pass, applying corrections.
    pub async fn run(&self) -> Result<ReconcileSummary> {
        self.execute(true).await
    }

    /// Run a read-only pass that reports what `run` would change.
    pub async fn preview(&self) -> Result<ReconcileSummary> {
        self.execute(false).await
    }

    async fn execute(&self, mutate: bool) -> Result<ReconcileSummary> {
        // A failure to even load the site list is a setup error and aborts
        // the pass; everything after this point is isolated per site.
        let sites = self.ledger.list_sites().await?;

        tracing::info!(sites = sites.len(), dry_run = !mutate, "reconciliation pass started");

        let mut summary = ReconcileSummary::default();

        for joined in sites {
            let subdomain = joined.site.subdomain.clone();
            match self.reconcile_site(&joined, mutate, &mut summary).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(subdomain = %subdomain, error = %e, "site reconciliation failed");
                    summary.errors.push(format!("{subdomain}: {e}"));
                }
            }
        }

        tracing::info!(
            checked = summary.checked,
            skipped = summary.skipped,
            deactivated = summary.deactivated,
            reactivated = summary.reactivated,
            status_corrected = summary.status_corrected,
            errors = summary.errors.len(),
            dry_run = !mutate,
            "reconciliation pass finished"
        );

        Ok(summary)
    }

    async fn reconcile_site(
        &self,
        joined: &SiteJoined,
        mutate: bool,
        summary: &mut ReconcileSummary,
    ) -> Result<()> {
        let site = &joined.site;

        // Demo and manually provisioned sites have no billing to enforce.
        let Some(subscription) = joined.subscription.as_ref() else {
            tracing::debug!(subdomain = %site.subdomain, "no subscription linked, skipping");
            summary.skipped += 1;
            return Ok(());
        };

        summary.checked += 1;

        // The processor answer overrules the ledger unconditionally. A
        // subscription it no longer knows is treated as canceled, not as an
        // error; any other failure leaves this site for the next pass.
        let effective_status = match self
            .processor
            .fetch_subscription(&subscription.external_subscription_id)
            .await
        {
            Ok(remote) => {
                let diverged = remote.status != subscription.status
                    || remote.current_period_start != subscription.current_period_start
                    || remote.current_period_end != subscription.current_period_end
                    || remote.cancel_at_period_end != subscription.cancel_at_period_end;

                if diverged {
                    if remote.status != subscription.status {
                        tracing::info!(
                            subdomain = %site.subdomain,
                            ledger_status = %subscription.status,
                            processor_status = %remote.status,
                            "subscription status diverged"
                        );
                        summary.status_corrected += 1;
                    }
                    if mutate {
                        let record = SubscriptionRecord {
                            status: remote.status,
                            current_period_start: remote.current_period_start,
                            current_period_end: remote.current_period_end,
                            cancel_at_period_end: remote.cancel_at_period_end,
                            canceled_at: remote.canceled_at,
                            ..subscription.clone()
                        };
                        self.ledger.upsert_subscription(&record).await?;
                    }
                }
                remote.status
            }
            Err(SitewardError::Processor(e)) if e.is_not_found() => {
                tracing::info!(
                    subdomain = %site.subdomain,
                    subscription = %subscription.external_subscription_id,
                    "subscription gone at processor, treating as canceled"
                );
                if subscription.status != SubscriptionStatus::Canceled {
                    summary.status_corrected += 1;
                    if mutate {
                        let record = SubscriptionRecord {
                            status: SubscriptionStatus::Canceled,
                            ..subscription.clone()
                        };
                        self.ledger.upsert_subscription(&record).await?;
                    }
                }
                SubscriptionStatus::Canceled
            }
            Err(e) => return Err(e),
        };

        let should_be_active = effective_status.is_publishable();

        if should_be_active && !site.is_active {
            if mutate {
                match self.publisher.reactivate(&site.subdomain).await {
                    Ok(()) => summary.reactivated += 1,
                    Err(e) => return Err(e),
                }
            } else {
                // Preview still surfaces the missing-backup condition the
                // real pass would hit.
                if self.ledger.get_backup(&site.subdomain).await?.is_none() {
                    return Err(PublicationError::NoBackup {
                        subdomain: site.subdomain.clone(),
                    }
                    .into());
                }
                summary.reactivated += 1;
            }
        } else if !should_be_active && site.is_active {
            if mutate {
                self.publisher
                    .deactivate(&site.subdomain, &site.site_label)
                    .await?;
            }
            summary.deactivated += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentStore;
    use crate::ledger::SiteRecord;
    use crate::processor::{ProcessorError, ProcessorSubscription};
    use crate::testing::{memory_stores, MemoryContentStore, MemoryLedger, StaticProcessor};
    use uuid::Uuid;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        content: Arc<MemoryContentStore>,
        processor: Arc<StaticProcessor>,
        job: ReconcileJob,
    }

    fn fixture() -> Fixture {
        let (ledger, content, processor) = memory_stores();
        let publisher = PublicationController::new(ledger.clone(), content.clone());
        let job = ReconcileJob::new(ledger.clone(), publisher, processor.clone());
        Fixture {
            ledger,
            content,
            processor,
            job,
        }
    }

    async fn seed_site(
        f: &Fixture,
        subdomain: &str,
        external_id: &str,
        status: SubscriptionStatus,
        active: bool,
    ) -> SubscriptionRecord {
        let user = f
            .ledger
            .upsert_user(&format!("{subdomain}@example.com"), "cus_1")
            .await
            .unwrap();
        let sub = SubscriptionRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            external_subscription_id: external_id.to_string(),
            status,
            current_period_start: 100,
            current_period_end: 200,
            cancel_at_period_end: false,
            canceled_at: None,
        };
        f.ledger.upsert_subscription(&sub).await.unwrap();
        f.ledger
            .upsert_site(&SiteRecord {
                id: Uuid::new_v4(),
                user_id: user.id,
                subscription_id: Some(sub.id),
                subdomain: subdomain.to_string(),
                site_label: subdomain.to_string(),
                is_active: active,
                generation_inputs: serde_json::json!({}),
            })
            .await
            .unwrap();
        sub
    }

    fn remote(external_id: &str, status: SubscriptionStatus) -> ProcessorSubscription {
        ProcessorSubscription {
            id: external_id.to_string(),
            customer_id: "cus_1".to_string(),
            status,
            current_period_start: 100,
            current_period_end: 200,
            cancel_at_period_end: false,
            canceled_at: None,
        }
    }

    #[tokio::test]
    async fn test_converged_state_is_untouched() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Active, true).await;
        f.processor.insert(remote("sub_1", SubscriptionStatus::Active)).await;

        let summary = f.job.run().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.deactivated, 0);
        assert_eq!(summary.reactivated, 0);
        assert_eq!(summary.status_corrected, 0);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_canceled_subscription_deactivates_site() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Active, true).await;
        f.content.write("acme", "<html>real</html>").await.unwrap();
        f.processor.insert(remote("sub_1", SubscriptionStatus::Canceled)).await;

        let summary = f.job.run().await.unwrap();
        assert_eq!(summary.deactivated, 1);
        assert_eq!(summary.status_corrected, 1);

        let site = f.ledger.find_site("acme").await.unwrap().unwrap();
        assert!(!site.is_active);
        let stored = f.ledger.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Canceled);
        assert_eq!(
            f.ledger.get_backup("acme").await.unwrap().unwrap().html,
            "<html>real</html>"
        );
    }

    #[tokio::test]
    async fn test_paid_again_reactivates_from_backup() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Canceled, false).await;
        f.ledger.upsert_backup("acme", "<html>real</html>").await.unwrap();
        f.processor.insert(remote("sub_1", SubscriptionStatus::Active)).await;

        let summary = f.job.run().await.unwrap();
        assert_eq!(summary.reactivated, 1);

        let site = f.ledger.find_site("acme").await.unwrap().unwrap();
        assert!(site.is_active);
        assert_eq!(
            f.content.read("acme").await.unwrap().as_deref(),
            Some("<html>real</html>")
        );
    }

    #[tokio::test]
    async fn test_missing_backup_is_loud() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Canceled, false).await;
        f.processor.insert(remote("sub_1", SubscriptionStatus::Active)).await;

        let summary = f.job.run().await.unwrap();
        assert_eq!(summary.reactivated, 0);
        assert_eq!(
            summary.errors,
            vec!["acme: backup HTML not found for reactivation".to_string()]
        );

        // The site stays down rather than coming up empty.
        let site = f.ledger.find_site("acme").await.unwrap().unwrap();
        assert!(!site.is_active);
    }

    #[tokio::test]
    async fn test_not_found_at_processor_means_canceled() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Active, true).await;
        f.content.write("acme", "<html>real</html>").await.unwrap();
        // StaticProcessor answers NotFound for anything not scripted.

        let summary = f.job.run().await.unwrap();
        assert_eq!(summary.deactivated, 1);
        assert_eq!(summary.status_corrected, 1);

        let stored = f.ledger.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Canceled);
        let site = f.ledger.find_site("acme").await.unwrap().unwrap();
        assert!(!site.is_active);
    }

    #[tokio::test]
    async fn test_one_failing_site_does_not_stop_the_pass() {
        let f = fixture();
        seed_site(&f, "aaa", "sub_a", SubscriptionStatus::Active, true).await;
        seed_site(&f, "bbb", "sub_b", SubscriptionStatus::Active, true).await;
        f.content.write("bbb", "<html>b</html>").await.unwrap();

        f.processor
            .set_error("sub_a", ProcessorError::Transport("timeout".to_string()))
            .await;
        f.processor.insert(remote("sub_b", SubscriptionStatus::Canceled)).await;

        let summary = f.job.run().await.unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.deactivated, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("aaa: "));

        // The failing site was left exactly as it was.
        let site = f.ledger.find_site("aaa").await.unwrap().unwrap();
        assert!(site.is_active);
        // The healthy site was still corrected.
        let site = f.ledger.find_site("bbb").await.unwrap().unwrap();
        assert!(!site.is_active);
    }

    #[tokio::test]
    async fn test_sites_without_billing_are_skipped() {
        let f = fixture();
        let user = f.ledger.upsert_user("demo@example.com", "cus_x").await.unwrap();
        f.ledger
            .upsert_site(&SiteRecord {
                id: Uuid::new_v4(),
                user_id: user.id,
                subscription_id: None,
                subdomain: "demo".to_string(),
                site_label: "Demo".to_string(),
                is_active: true,
                generation_inputs: serde_json::json!({}),
            })
            .await
            .unwrap();

        let summary = f.job.run().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.checked, 0);
        assert!(f.ledger.find_site("demo").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_preview_reports_without_mutating() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Active, true).await;
        f.content.write("acme", "<html>real</html>").await.unwrap();
        f.processor.insert(remote("sub_1", SubscriptionStatus::Canceled)).await;

        let summary = f.job.preview().await.unwrap();
        assert_eq!(summary.deactivated, 1);
        assert_eq!(summary.status_corrected, 1);

        // Nothing actually changed.
        let site = f.ledger.find_site("acme").await.unwrap().unwrap();
        assert!(site.is_active);
        let stored = f.ledger.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(
            f.content.read("acme").await.unwrap().as_deref(),
            Some("<html>real</html>")
        );
        assert!(f.ledger.get_backup("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_preview_surfaces_missing_backup() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Canceled, false).await;
        f.processor.insert(remote("sub_1", SubscriptionStatus::Active)).await;

        let summary = f.job.preview().await.unwrap();
        assert_eq!(summary.reactivated, 0);
        assert_eq!(
            summary.errors,
            vec!["acme: backup HTML not found for reactivation".to_string()]
        );

        // Still inactive and untouched, same as the real pass would leave it.
        let site = f.ledger.find_site("acme").await.unwrap().unwrap();
        assert!(!site.is_active);
    }

    #[tokio::test]
    async fn test_period_bounds_overwritten_from_processor() {
        let f = fixture();
        seed_site(&f, "acme", "sub_1", SubscriptionStatus::Active, true).await;
        let mut updated = remote("sub_1", SubscriptionStatus::Active);
        updated.current_period_start = 500;
        updated.current_period_end = 900;
        f.processor.insert(updated).await;

        let summary = f.job.run().await.unwrap();
        // Status matched, so only the bounds were rewritten.
        assert_eq!(summary.status_corrected, 0);

        let stored = f.ledger.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(stored.current_period_start, 500);
        assert_eq!(stored.current_period_end, 900);
    }
}
