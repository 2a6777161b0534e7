//! HTTP surface: the Slack events webhook and a health probe.
//!
//! Slack expects a 200 within 3 seconds, so event handling is spawned off
//! the request path and the response is always an immediate 200. Failures
//! are logged and the event is dropped; Slack's own retry delivers again.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::events::classifier::RawEvent;
use crate::events::router::EventRouter;
use crate::{AppError, Result};

#[derive(Clone)]
struct AppState {
    router: Arc<EventRouter>,
}

/// Build the webhook router.
#[must_use]
pub fn app(router: Arc<EventRouter>) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/healthz", get(healthz))
        .with_state(AppState { router })
}

/// Bind the listener and serve until the token is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the port cannot be bound or the server fails.
pub async fn serve(port: u16, router: Arc<EventRouter>, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|err| AppError::Io(format!("failed to bind port {port}: {err}")))?;
    info!(port, "event webhook listening");
    axum::serve(listener, app(router))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|err| AppError::Io(format!("webhook server failed: {err}")))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Slack events endpoint: answers URL verification inline and acknowledges
/// event callbacks before processing them.
async fn slack_events(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    match payload.get("type").and_then(|v| v.as_str()) {
        Some("url_verification") => {
            let challenge = payload
                .get("challenge")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            Json(serde_json::json!({ "challenge": challenge })).into_response()
        }
        Some("event_callback") => {
            let Some(event) = payload.get("event").cloned() else {
                debug!("event_callback without event payload");
                return ().into_response();
            };
            let event: RawEvent = match serde_json::from_value(event) {
                Ok(event) => event,
                Err(err) => {
                    error!(error = %err, "undecodable event payload; dropping");
                    return ().into_response();
                }
            };
            let router = Arc::clone(&state.router);
            tokio::spawn(async move {
                if let Err(err) = router.handle(&event).await {
                    error!(error = %err, "event handling failed; dropping event");
                }
            });
            ().into_response()
        }
        other => {
            debug!(kind = ?other, "ignoring unknown webhook payload type");
            ().into_response()
        }
    }
}
