//! Router wiring smoke tests against a real on-disk store.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use mailroom_core::RedbKvStore;
use mailroom_server::{build_router, Config};

fn test_config() -> Config {
    Config { sync_enabled: false, webhook_secret: "shared".into(), ..Config::default() }
}

#[tokio::test]
async fn health_reports_store_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RedbKvStore::open(dir.path().join("mailroom.redb")).unwrap());
    let app = build_router(&test_config(), store, CancellationToken::new()).unwrap();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_route_is_wired_and_guarded() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RedbKvStore::open(dir.path().join("mailroom.redb")).unwrap());
    let app = build_router(&test_config(), store, CancellationToken::new()).unwrap();

    // No signature header: the pipeline must reject before any parsing.
    let response = app
        .clone()
        .oneshot(
            Request::post("/webhooks/provider")
                .body(Body::from(r#"{"action":"sub_group_created"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
