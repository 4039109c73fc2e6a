//! Siteward service binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sea_orm::SqlxPostgresConnector;

use siteward::notify::{self, LogNotifier};
use siteward::tasks::{InMemoryTaskQueue, TaskRegistry, TaskWorker};
use siteward::{
    AppState, ConfigBuilder, EdgeContentClient, EventIngestor, PublicationController,
    ReconcileJob, SeaOrmLedger, StripeHttpClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new().from_env().build();
    siteward::init_tracing_with_config(&config);

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "starting siteward"
    );

    // The pool exists immediately; connections are established on first use
    // so a slow database does not block startup.
    let pool = sea_orm::sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_lazy(&config.database.url)
        .context("invalid database URL")?;
    let db = SqlxPostgresConnector::from_sqlx_postgres_pool(pool);

    let ledger = Arc::new(SeaOrmLedger::new(db));
    if let Err(e) = ledger.ensure_schema().await {
        // Non-fatal: the database may simply not be reachable yet.
        tracing::warn!(error = %e, "could not ensure schema at startup");
    }

    let content = Arc::new(
        EdgeContentClient::new(
            config.content_store.endpoint.clone(),
            config.content_store.shared_secret.clone(),
            Duration::from_secs(config.content_store.timeout_seconds),
        )
        .context("content store client")?,
    );

    let processor = Arc::new(
        StripeHttpClient::new(
            config.billing.api_base.clone(),
            config.billing.api_key.clone(),
            Duration::from_secs(config.reconcile.request_timeout_seconds),
        )
        .context("processor client")?,
    );

    let tasks = Arc::new(InMemoryTaskQueue::default());
    let registry = Arc::new(TaskRegistry::new());
    notify::register_handlers(&registry, Arc::new(LogNotifier)).await;

    let publisher = PublicationController::new(ledger.clone(), content.clone());
    let ingestor = Arc::new(EventIngestor::new(
        ledger.clone(),
        content.clone(),
        publisher.clone(),
        tasks.clone(),
        config.billing.webhook_secret.clone(),
    ));
    let reconciler = ReconcileJob::new(ledger.clone(), publisher, processor);

    let (worker, worker_shutdown_rx) = TaskWorker::new(tasks, registry);
    let worker_shutdown = worker.shutdown_handle();
    let worker_handle = tokio::spawn(worker.start(worker_shutdown_rx));

    // Scheduled reconciliation. Interval 0 leaves only the ops endpoint.
    if config.reconcile.interval_hours > 0 {
        let job = reconciler.clone();
        let hours = config.reconcile.interval_hours;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(hours * 3600));
            // The immediate first tick would reconcile on every restart.
            interval.tick().await;
            loop {
                interval.tick().await;
                match job.run().await {
                    Ok(summary) => {
                        if !summary.errors.is_empty() {
                            tracing::warn!(
                                errors = summary.errors.len(),
                                "scheduled reconciliation finished with errors"
                            );
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "scheduled reconciliation failed"),
                }
            }
        });
    }

    let app = siteward::router(AppState {
        ingestor,
        reconciler,
        content,
        ops_token: config.reconcile.ops_token.clone(),
        max_body_size: config.server.max_body_size,
    });

    let addr = config.server.addr().context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Let the in-flight task finish before exiting.
    let _ = worker_shutdown.send(()).await;
    let _ = worker_handle.await;

    tracing::info!("siteward stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
