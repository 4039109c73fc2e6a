//! The publication controller: the only component allowed to flip a site
//! between published and unpublished, and the only mutator of published
//! content.
//!
//! Deactivation backs up the live HTML before overwriting it with the
//! placeholder, so reactivation never needs external regeneration. The
//! three writes (backup, content store, activation flag) are not atomic;
//! a crash between them is healed by the next reconciliation pass because
//! each step is individually idempotent.

use std::sync::Arc;

use crate::content::{is_placeholder, ContentStore};
use crate::error::Result;
use crate::ledger::LedgerStore;

/// Errors specific to publication state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublicationError {
    /// No backup row exists, so the site cannot be safely restored. The
    /// remediation is regeneration, not retry, which is why this is a
    /// distinct condition and never a silent no-op. Callers that report it
    /// prefix the subdomain themselves.
    #[error("backup HTML not found for reactivation")]
    NoBackup { subdomain: String },

    /// The subdomain has no site row.
    #[error("unknown site: {subdomain}")]
    UnknownSite { subdomain: String },
}

impl PublicationError {
    pub(crate) fn status_code(&self) -> axum::http::StatusCode {
        match self {
            Self::NoBackup { .. } => axum::http::StatusCode::CONFLICT,
            Self::UnknownSite { .. } => axum::http::StatusCode::NOT_FOUND,
        }
    }
}

/// Flips sites between published and unpublished.
#[derive(Clone)]
pub struct PublicationController {
    ledger: Arc<dyn LedgerStore>,
    content: Arc<dyn ContentStore>,
}

impl PublicationController {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerStore>, content: Arc<dyn ContentStore>) -> Self {
        Self { ledger, content }
    }

    /// Unpublish a site: back up the live HTML, swap in the placeholder,
    /// clear the activation flag.
    ///
    /// Safe to call on an already-inactive site: the backup write is
    /// skipped when the live page is empty or already the placeholder, so
    /// a repeat call can never clobber the last real content. The ordering
    /// (read, backup, overwrite, flip) must not change: the backup has to
    /// be durable before the placeholder goes live.
    pub async fn deactivate(&self, subdomain: &str, label: &str) -> Result<()> {
        tracing::info!(subdomain = %subdomain, "deactivating site");

        let live = self.content.read(subdomain).await?;
        match live {
            Some(html) if !html.is_empty() && !is_placeholder(&html) => {
                self.ledger.upsert_backup(subdomain, &html).await?;
                tracing::debug!(subdomain = %subdomain, bytes = html.len(), "backed up live content");
            }
            _ => {
                tracing::debug!(subdomain = %subdomain, "no live content to back up");
            }
        }

        self.content.write_placeholder(subdomain, label).await?;
        self.ledger.set_site_active(subdomain, false).await?;

        Ok(())
    }

    /// Republish a site from its backup.
    ///
    /// Fails with [`PublicationError::NoBackup`] when no backup row exists;
    /// the backup is retained after a successful restore so later
    /// deactivate/reactivate cycles keep working.
    pub async fn reactivate(&self, subdomain: &str) -> Result<()> {
        tracing::info!(subdomain = %subdomain, "reactivating site");

        let backup = self
            .ledger
            .get_backup(subdomain)
            .await?
            .ok_or_else(|| PublicationError::NoBackup {
                subdomain: subdomain.to_string(),
            })?;

        self.content.write(subdomain, &backup.html).await?;
        self.ledger.set_site_active(subdomain, true).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SiteRecord;
    use crate::testing::{MemoryContentStore, MemoryLedger};
    use uuid::Uuid;

    fn controller() -> (Arc<MemoryLedger>, Arc<MemoryContentStore>, PublicationController) {
        let ledger = Arc::new(MemoryLedger::new());
        let content = Arc::new(MemoryContentStore::new());
        let controller = PublicationController::new(ledger.clone(), content.clone());
        (ledger, content, controller)
    }

    async fn seed_site(ledger: &MemoryLedger, subdomain: &str, active: bool) {
        let user = ledger.upsert_user("owner@example.com", "cus_1").await.unwrap();
        ledger
            .upsert_site(&SiteRecord {
                id: Uuid::new_v4(),
                user_id: user.id,
                subscription_id: None,
                subdomain: subdomain.to_string(),
                site_label: "Acme".to_string(),
                is_active: active,
                generation_inputs: serde_json::json!({}),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deactivate_backs_up_and_swaps_placeholder() {
        let (ledger, content, controller) = controller();
        seed_site(&ledger, "acme-1", true).await;
        content.write("acme-1", "<html>real</html>").await.unwrap();

        controller.deactivate("acme-1", "Acme").await.unwrap();

        let backup = ledger.get_backup("acme-1").await.unwrap().unwrap();
        assert_eq!(backup.html, "<html>real</html>");

        let live = content.read("acme-1").await.unwrap().unwrap();
        assert!(is_placeholder(&live));

        let site = ledger.find_site("acme-1").await.unwrap().unwrap();
        assert!(!site.is_active);
    }

    #[tokio::test]
    async fn test_double_deactivate_keeps_real_backup() {
        let (ledger, content, controller) = controller();
        seed_site(&ledger, "acme-1", true).await;
        content.write("acme-1", "<html>real</html>").await.unwrap();

        controller.deactivate("acme-1", "Acme").await.unwrap();
        controller.deactivate("acme-1", "Acme").await.unwrap();

        // The second pass saw the placeholder and must not have backed it up.
        let backup = ledger.get_backup("acme-1").await.unwrap().unwrap();
        assert_eq!(backup.html, "<html>real</html>");
        assert!(!is_placeholder(&backup.html));
    }

    #[tokio::test]
    async fn test_backup_restore_round_trip() {
        let (ledger, content, controller) = controller();
        seed_site(&ledger, "acme-1", true).await;
        let original = "<html><body>hand-crafted</body></html>";
        content.write("acme-1", original).await.unwrap();

        controller.deactivate("acme-1", "Acme").await.unwrap();
        controller.reactivate("acme-1").await.unwrap();

        assert_eq!(content.read("acme-1").await.unwrap().unwrap(), original);
        let site = ledger.find_site("acme-1").await.unwrap().unwrap();
        assert!(site.is_active);

        // Backup is retained for the next cycle.
        assert!(ledger.get_backup("acme-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reactivate_without_backup_fails_loudly() {
        let (ledger, _content, controller) = controller();
        seed_site(&ledger, "acme-1", false).await;

        let err = controller.reactivate("acme-1").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("backup HTML not found for reactivation"), "{msg}");
    }

    #[tokio::test]
    async fn test_deactivate_with_no_live_content() {
        let (ledger, content, controller) = controller();
        seed_site(&ledger, "acme-1", true).await;

        controller.deactivate("acme-1", "Acme").await.unwrap();

        assert!(ledger.get_backup("acme-1").await.unwrap().is_none());
        assert!(is_placeholder(
            &content.read("acme-1").await.unwrap().unwrap()
        ));
    }
}
