//! Siteward keeps published customer sites in step with their billing
//! subscriptions.
//!
//! Customers buy a generated website through a checkout flow; the payment
//! processor reports what happens to that subscription afterwards. Siteward
//! owns the state machine in between: webhook events update the ledger and
//! publication state in near real time, and a periodic reconciliation pass
//! treats the processor as the source of truth and heals whatever the fast
//! path missed. A canceled subscription takes its site down behind a
//! placeholder page (with the last real HTML backed up first), and a
//! subscription paid again brings the site back from that backup.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use siteward::{
//!     AppState, ConfigBuilder, EventIngestor, PublicationController, ReconcileJob,
//! };
//! use siteward::tasks::InMemoryTaskQueue;
//! use siteward::testing::memory_stores;
//!
//! # async fn run() {
//! let config = ConfigBuilder::new().from_env().build();
//! let (ledger, content, processor) = memory_stores();
//!
//! let publisher = PublicationController::new(ledger.clone(), content.clone());
//! let ingestor = Arc::new(EventIngestor::new(
//!     ledger.clone(),
//!     content.clone(),
//!     publisher.clone(),
//!     Arc::new(InMemoryTaskQueue::default()),
//!     config.billing.webhook_secret.clone(),
//! ));
//! let reconciler = ReconcileJob::new(ledger, publisher, processor);
//!
//! let app = siteward::http::router(AppState {
//!     ingestor,
//!     reconciler,
//!     content,
//!     ops_token: config.reconcile.ops_token.clone(),
//!     max_body_size: config.server.max_body_size,
//! });
//! # let _ = app;
//! # }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod http;
pub mod ledger;
pub mod notify;
pub mod processor;
pub mod publication;
pub mod reconcile;
pub mod tasks;
pub mod testing;
pub mod webhook;

pub use config::{Config, ConfigBuilder};
pub use content::{ContentStore, EdgeContentClient};
pub use error::{Result, SitewardError};
pub use http::{router, AppState};
pub use ledger::{LedgerStore, SeaOrmLedger, SubscriptionStatus};
pub use processor::{ProcessorClient, StripeHttpClient};
pub use publication::{PublicationController, PublicationError};
pub use reconcile::{ReconcileJob, ReconcileSummary};
pub use tasks::{InMemoryTaskQueue, TaskQueue, TaskRegistry, TaskWorker};
pub use webhook::{BillingEvent, EventIngestor, EventOutcome};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing from the environment.
///
/// Respects `RUST_LOG` for filtering and `SITEWARD_LOG_JSON=true` for JSON
/// output.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("SITEWARD_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from a loaded [`Config`].
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
