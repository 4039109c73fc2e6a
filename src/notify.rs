//! Customer notifications, delivered off the request path via the task
//! queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::tasks::TaskRegistry;
use crate::webhook::NOTIFY_CHECKOUT_TASK;

/// Outbound customer notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sent after a completed checkout, once the site is live.
    async fn checkout_completed(&self, email: &str, subdomain: &str) -> Result<()>;
}

/// Notifier that only writes to the log. Stands in until a mail provider
/// is wired up, and doubles as the test implementation.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn checkout_completed(&self, email: &str, subdomain: &str) -> Result<()> {
        tracing::info!(email = %email, subdomain = %subdomain, "checkout completed notification");
        Ok(())
    }
}

#[derive(Deserialize)]
struct CheckoutNotification {
    email: String,
    subdomain: String,
}

/// Register the notification task handlers on a registry.
pub async fn register_handlers(registry: &TaskRegistry, notifier: Arc<dyn Notifier>) {
    registry
        .register(NOTIFY_CHECKOUT_TASK, move |data| {
            let notifier = notifier.clone();
            Box::pin(async move {
                let n: CheckoutNotification = serde_json::from_value(data.payload)?;
                notifier.checkout_completed(&n.email, &n.subdomain).await
            })
        })
        .await;
}
