//! HTTP surface: webhook intake, operator endpoints, and site serving.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::content::ContentStore;
use crate::error::{Result, SitewardError};
use crate::reconcile::ReconcileJob;
use crate::webhook::{EventIngestor, EventOutcome};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<EventIngestor>,
    pub reconciler: ReconcileJob,
    pub content: Arc<dyn ContentStore>,
    pub ops_token: SecretString,
    /// Maximum accepted request body size in bytes.
    pub max_body_size: usize,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/billing", post(billing_webhook))
        .route("/ops/reconcile", post(run_reconcile).get(preview_reconcile))
        .route("/sites/:subdomain", get(serve_site))
        .layer(DefaultBodyLimit::max(state.max_body_size))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
    outcome: &'static str,
}

/// Webhook intake.
///
/// Verification failures are the caller's problem and get a 4xx so the
/// processor retries with a fresh signature. Once the payload verifies and
/// parses, the delivery is acknowledged with 200 no matter what the handler
/// did; a handler failure is logged and left for reconciliation rather than
/// replayed against half-applied state.
async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| SitewardError::bad_request("Missing signature header"))?;

    let event = state.ingestor.verify_signature(&body, signature)?;
    let event_id = event.id.clone();
    let event_type = event.event_type.clone();

    let outcome = match state.ingestor.handle_event(event).await {
        Ok(outcome) => match outcome {
            EventOutcome::Processed => "processed",
            EventOutcome::Ignored => "ignored",
            EventOutcome::AlreadyProcessed => "already_processed",
        },
        Err(e) => {
            tracing::error!(
                event_id = %event_id,
                event_type = %event_type,
                error = %e,
                "webhook handler failed, acknowledging anyway"
            );
            "failed"
        }
    };

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            outcome,
        }),
    )
        .into_response())
}

fn require_ops_token(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| SitewardError::unauthorized("Missing bearer token"))?;

    let expected = state.ops_token.expose_secret().as_bytes();
    if expected.is_empty()
        || token.as_bytes().ct_eq(expected).unwrap_u8() != 1
    {
        return Err(SitewardError::unauthorized("Invalid ops token"));
    }
    Ok(())
}

/// Trigger a reconciliation pass.
async fn run_reconcile(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    require_ops_token(&state, &headers)?;
    let summary = state.reconciler.run().await?;
    Ok(Json(summary).into_response())
}

/// Report what a reconciliation pass would change, without changing it.
async fn preview_reconcile(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    require_ops_token(&state, &headers)?;
    let summary = state.reconciler.preview().await?;
    Ok(Json(summary).into_response())
}

/// Serve whatever is published at a subdomain.
///
/// No billing checks here: the content store already holds either the real
/// page or the placeholder, so serving is a plain key lookup.
async fn serve_site(
    State(state): State<AppState>,
    Path(subdomain): Path<String>,
) -> Result<Response> {
    match state.content.read(&subdomain).await? {
        Some(html) => Ok(Html(html).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Html(not_found_page().to_string()),
        )
            .into_response()),
    }
}

fn not_found_page() -> &'static str {
    "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Site not found</title></head>\n\
     <body><h1>Site not found</h1><p>There is no site at this address.</p></body>\n</html>\n"
}
