//! HTTP ingest endpoint for provider webhooks.
//!
//! Verification happens over the raw body bytes before any parsing. The
//! status code is the redelivery contract: 204 acknowledges (including
//! events that can never apply), 401 rejects bad signatures, 400 rejects
//! undecodable bodies, 500 asks the provider to redeliver.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use tracing::{error, info, warn};

use mailroom_core::ErrorKind;

use crate::{event::decode_event, processor::WebhookProcessor, signature::verify_signature};

/// Header carrying the hex HMAC-SHA1 body signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// State behind the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    /// Event processor.
    pub processor: Arc<WebhookProcessor>,
    /// Shared signing secret agreed with the provider.
    pub secret: Arc<str>,
}

/// Builds the webhook router.
pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhooks/provider", post(handle_event)).with_state(state)
}

async fn handle_event(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok())
    else {
        warn!("webhook without signature header");
        return StatusCode::UNAUTHORIZED;
    };

    if let Err(err) = verify_signature(state.secret.as_bytes(), &body, signature) {
        warn!(error = %err, "webhook signature rejected");
        return StatusCode::UNAUTHORIZED;
    }

    let event = match decode_event(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "webhook body rejected");
            return StatusCode::BAD_REQUEST;
        },
    };

    match state.processor.process(&event).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) if err.kind() == ErrorKind::Validation => {
            // Redelivering an inapplicable event would loop forever.
            info!(action = %event.action, error = %err, "webhook event suppressed");
            StatusCode::NO_CONTENT
        },
        Err(err) => {
            error!(action = %event.action, error = %err, "webhook event failed, redelivery requested");
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}
