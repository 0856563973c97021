//! Provider client behavior against a mock HTTP server.

use std::{sync::Arc, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use mailroom_core::{
    Clock, DeliveryMode, ErrorKind, MailingListId, Member, MemberId, ModStatus, RealClock,
    RetryPolicy, Service, ServiceId, ServiceType, TestClock,
};
use mailroom_sync::{ProviderClient, SyncConfig};
use mailroom_writer::ProviderSync;

const DOMAIN: &str = "lists.aster.dev";

fn jwt_expiring_at(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"HS256\",\"typ\":\"JWT\"}");
    let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
    format!("{header}.{payload}.sig")
}

fn client_with(server: &MockServer, clock: Arc<dyn Clock>, attempts: u32) -> ProviderClient {
    let config = SyncConfig {
        base_url: server.uri(),
        email: "svc@aster.dev".into(),
        password: "hunter2".into(),
        retry: RetryPolicy::immediate(attempts),
        ..Default::default()
    };
    ProviderClient::new(config, clock, CancellationToken::new()).unwrap()
}

fn sample_service() -> Service {
    Service {
        uid: ServiceId::new(),
        service_type: ServiceType::Primary,
        project_uid: "proj-aster".into(),
        project_name: "Aster".into(),
        group_name: "aster".into(),
        prefix: None,
        owners: vec!["owner@aster.dev".into()],
        group_id: None,
        domain: DOMAIN.into(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn sample_member() -> Member {
    Member {
        uid: MemberId::new(),
        mailing_list_uid: MailingListId::new(),
        email: "dev@aster.dev".into(),
        first_name: "Dana".into(),
        last_name: "Developer".into(),
        organization: None,
        job_title: None,
        delivery_mode: DeliveryMode::Individual,
        mod_status: ModStatus::Member,
        member_id: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

async fn mount_login(server: &MockServer, token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/login"))
        .and(body_string_contains("email=svc%40aster.dev"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn token_is_fetched_once_and_reused() {
    let server = MockServer::start().await;
    let token = jwt_expiring_at(chrono::Utc::now().timestamp() + 3600);
    mount_login(&server, &token, 1).await;

    let expected_auth = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{token}:"))
    );
    Mock::given(method("POST"))
        .and(path("/v1/creategroup"))
        .and(header("Authorization", expected_auth.as_str()))
        .and(header("host", DOMAIN))
        .and(body_string_contains("group_name=aster"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_with(&server, Arc::new(RealClock), 1);
    let service = sample_service();

    assert_eq!(client.create_group(DOMAIN, &service).await.unwrap(), 7);
    assert_eq!(client.create_group(DOMAIN, &service).await.unwrap(), 7);
}

#[tokio::test]
async fn expired_token_triggers_relogin() {
    let server = MockServer::start().await;
    let clock = Arc::new(TestClock::starting_at(chrono::Utc::now()));
    let token = jwt_expiring_at(clock.now().timestamp() + 1800);
    mount_login(&server, &token, 2).await;

    Mock::given(method("POST"))
        .and(path("/v1/creategroup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .mount(&server)
        .await;

    let client = client_with(&server, clock.clone(), 1);
    let service = sample_service();

    client.create_group(DOMAIN, &service).await.unwrap();
    clock.advance(Duration::from_secs(7200));
    client.create_group(DOMAIN, &service).await.unwrap();
}

#[tokio::test]
async fn unauthorized_response_invalidates_the_cached_token() {
    let server = MockServer::start().await;
    let token = jwt_expiring_at(chrono::Utc::now().timestamp() + 3600);
    mount_login(&server, &token, 2).await;

    Mock::given(method("POST"))
        .and(path("/v1/creategroup"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/creategroup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .mount(&server)
        .await;

    let client = client_with(&server, Arc::new(RealClock), 1);
    let service = sample_service();

    let err = client.create_group(DOMAIN, &service).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // Fresh login, fresh token, success
    assert_eq!(client.create_group(DOMAIN, &service).await.unwrap(), 7);
}

#[tokio::test]
async fn rate_limiting_is_retried_until_success() {
    let server = MockServer::start().await;
    let token = jwt_expiring_at(chrono::Utc::now().timestamp() + 3600);
    mount_login(&server, &token, 1).await;

    Mock::given(method("POST"))
        .and(path("/v1/creategroup"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/creategroup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .mount(&server)
        .await;

    let client = client_with(&server, Arc::new(RealClock), 4);
    assert_eq!(client.create_group(DOMAIN, &sample_service()).await.unwrap(), 7);
}

#[tokio::test]
async fn status_codes_map_onto_error_kinds() {
    let cases = [
        (400, ErrorKind::Validation),
        (403, ErrorKind::Validation),
        (404, ErrorKind::NotFound),
        (409, ErrorKind::Conflict),
        (429, ErrorKind::ServiceUnavailable),
        (500, ErrorKind::ServiceUnavailable),
        (503, ErrorKind::ServiceUnavailable),
        (418, ErrorKind::Unexpected),
    ];

    for (status, kind) in cases {
        let server = MockServer::start().await;
        let token = jwt_expiring_at(chrono::Utc::now().timestamp() + 3600);
        mount_login(&server, &token, 1).await;

        Mock::given(method("POST"))
            .and(path("/v1/deletegroup"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = client_with(&server, Arc::new(RealClock), 1);
        let err = client.delete_group(DOMAIN, 7).await.unwrap_err();
        assert_eq!(err.kind(), kind, "status {status}");
    }
}

#[tokio::test]
async fn direct_add_returns_the_assigned_member_id() {
    let server = MockServer::start().await;
    let token = jwt_expiring_at(chrono::Utc::now().timestamp() + 3600);
    mount_login(&server, &token, 1).await;

    Mock::given(method("POST"))
        .and(path("/v1/directadd"))
        .and(body_string_contains("group_id=55"))
        .and(body_string_contains("dev%40aster.dev"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "added_members": [ { "id": 99 } ] })),
        )
        .mount(&server)
        .await;

    let client = client_with(&server, Arc::new(RealClock), 1);
    assert_eq!(client.add_member(DOMAIN, 55, &sample_member()).await.unwrap(), 99);
}

#[tokio::test]
async fn empty_direct_add_result_is_an_error() {
    let server = MockServer::start().await;
    let token = jwt_expiring_at(chrono::Utc::now().timestamp() + 3600);
    mount_login(&server, &token, 1).await;

    Mock::given(method("POST"))
        .and(path("/v1/directadd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "added_members": [] })))
        .mount(&server)
        .await;

    let client = client_with(&server, Arc::new(RealClock), 1);
    let err = client.add_member(DOMAIN, 55, &sample_member()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unexpected);
}
