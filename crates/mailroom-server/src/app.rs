//! Application wiring and request routing.
//!
//! Assembles the storage adapter, provider client and write orchestrator
//! into one Axum router: the webhook ingest endpoint plus a health probe
//! backed by the store's readiness check.

use std::{sync::Arc, time::Duration};

use axum::{http::StatusCode, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use mailroom_core::{storage::KvStore, RealClock};
use mailroom_sync::ProviderClient;
use mailroom_webhook::{WebhookProcessor, WebhookState};
use mailroom_writer::{NoopPublisher, WriterContext};

use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the application router on top of an opened store.
///
/// The cancellation token is shared with the provider client and the
/// webhook processor so shutdown aborts in-flight retry waits.
///
/// # Errors
///
/// Fails when the provider HTTP client cannot be constructed.
pub fn build_router(
    config: &Config,
    store: Arc<dyn KvStore>,
    cancel: CancellationToken,
) -> anyhow::Result<Router> {
    let clock = Arc::new(RealClock);
    let provider =
        Arc::new(ProviderClient::new(config.sync_config(), clock.clone(), cancel.clone())?);

    let ctx = WriterContext::new(
        store.clone(),
        provider,
        Arc::new(NoopPublisher),
        clock,
        config.writer_config(),
    );

    let state = WebhookState {
        processor: Arc::new(WebhookProcessor::new(ctx, cancel)),
        secret: Arc::from(config.webhook_secret.as_str()),
    };

    let health_store = store;
    let health = get(move || {
        let store = health_store.clone();
        async move {
            if store.ready().await {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    });

    Ok(mailroom_webhook::router(state)
        .route("/health", health)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http()))
}
