//! The provider HTTP client.
//!
//! Form-encoded POST endpoints, virtual-hosted per tenant domain, with
//! token auth and bounded retries on transient faults. Implements the
//! orchestrator's provider seam so the write path never sees transport
//! detail.

use std::{sync::Arc, time::Duration};

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use mailroom_core::{
    backoff::retry, storage::BoxFuture, Clock, DeliveryMode, Error, MailingList, Member, ModStatus,
    Result, RetryPolicy, Service,
};
use mailroom_writer::ProviderSync;

use crate::{
    auth::{AuthConfig, AuthManager},
    decorator::{AuthDecorator, HostDecorator, RequestContext, RequestDecorator},
    http::check_status,
};

/// Provider connection settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Provider API endpoint, without a trailing slash.
    pub base_url: String,
    /// Account email used for login.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Retry policy for transient transport faults.
    pub retry: RetryPolicy,
    /// Subtracted from token expiry so tokens refresh early.
    pub token_safety_margin: Duration,
    /// Assumed lifetime for tokens without a readable expiry.
    pub fallback_token_ttl: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "https://groups.io/api".into(),
            email: String::new(),
            password: String::new(),
            retry: RetryPolicy::default(),
            token_safety_margin: Duration::from_secs(60),
            fallback_token_ttl: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct DirectAddResponse {
    added_members: Vec<IdResponse>,
}

/// HTTP implementation of the provider seam.
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    auth: Arc<AuthManager>,
    decorators: Vec<Arc<dyn RequestDecorator>>,
    cancel: CancellationToken,
}

impl ProviderClient {
    /// Builds a client from settings. The cancellation token aborts
    /// in-flight retry waits at shutdown.
    ///
    /// # Errors
    ///
    /// `Unexpected` when the underlying HTTP client cannot be built.
    pub fn new(
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| Error::unexpected(format!("http client construction failed: {err}")))?;

        let auth = Arc::new(AuthManager::new(
            http.clone(),
            config.base_url.clone(),
            AuthConfig {
                email: config.email,
                password: config.password,
                token_safety_margin: config.token_safety_margin,
                fallback_token_ttl: config.fallback_token_ttl,
            },
            clock,
        ));

        let decorators: Vec<Arc<dyn RequestDecorator>> =
            vec![Arc::new(HostDecorator), Arc::new(AuthDecorator::new(auth.clone()))];

        Ok(Self {
            http,
            base_url: config.base_url,
            retry: config.retry,
            auth,
            decorators,
            cancel,
        })
    }

    /// One decorated form POST, no retries.
    async fn attempt<T: DeserializeOwned>(
        &self,
        domain: &str,
        path: &str,
        form: &[(&str, String)],
        operation: &'static str,
    ) -> Result<T> {
        let mut request = self.http.post(format!("{}{path}", self.base_url)).form(form);
        let ctx = RequestContext { domain, authenticate: true };
        for decorator in &self.decorators {
            request = decorator.decorate(request, ctx).await?;
        }

        let response = request
            .send()
            .await
            .map_err(|err| Error::unavailable(format!("provider {operation} failed: {err}")))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Token revoked or expired server-side before our margin hit.
            self.auth.invalidate(domain).await;
        }
        let response = check_status(response, operation).await?;
        response
            .json()
            .await
            .map_err(|err| Error::unexpected(format!("malformed {operation} response: {err}")))
    }

    /// Decorated form POST with transient-fault retries.
    #[instrument(skip(self, form), fields(domain, path))]
    async fn post_form<T: DeserializeOwned>(
        &self,
        domain: &str,
        path: &str,
        form: Vec<(&'static str, String)>,
        operation: &'static str,
    ) -> Result<T> {
        retry(&self.retry, &self.cancel, || self.attempt(domain, path, &form, operation)).await
    }
}

fn delivery_value(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::Individual => "email_delivery_single",
        DeliveryMode::Digest => "email_delivery_digest",
        DeliveryMode::None => "email_delivery_none",
    }
}

fn mod_status_value(status: ModStatus) -> &'static str {
    match status {
        ModStatus::Member => "sub_modstatus_none",
        ModStatus::Moderator => "sub_modstatus_moderator",
        ModStatus::Owner => "sub_modstatus_owner",
    }
}

fn privacy_value(public: bool) -> &'static str {
    if public {
        "group_privacy_none"
    } else {
        "group_privacy_unlisted"
    }
}

impl ProviderSync for ProviderClient {
    fn create_group<'a>(
        &'a self,
        domain: &'a str,
        service: &'a Service,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let form = vec![
                ("group_name", service.group_name.clone()),
                ("desc", service.project_name.clone()),
                ("privacy", privacy_value(true).to_string()),
            ];
            let response: IdResponse =
                self.post_form(domain, "/v1/creategroup", form, "create group").await?;
            Ok(response.id)
        })
    }

    fn delete_group<'a>(&'a self, domain: &'a str, group_id: u64) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let form = vec![("group_id", group_id.to_string())];
            self.post_form::<IdResponse>(domain, "/v1/deletegroup", form, "delete group").await?;
            Ok(())
        })
    }

    fn create_subgroup<'a>(
        &'a self,
        domain: &'a str,
        group_id: u64,
        list: &'a MailingList,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let form = vec![
                ("group_id", group_id.to_string()),
                ("sub_group_name", list.group_name.clone()),
                ("desc", list.title.clone()),
                ("privacy", privacy_value(list.public).to_string()),
            ];
            let response: IdResponse =
                self.post_form(domain, "/v1/createsubgroup", form, "create subgroup").await?;
            Ok(response.id)
        })
    }

    fn delete_subgroup<'a>(
        &'a self,
        domain: &'a str,
        subgroup_id: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let form = vec![("group_id", subgroup_id.to_string())];
            self.post_form::<IdResponse>(domain, "/v1/deletegroup", form, "delete subgroup")
                .await?;
            Ok(())
        })
    }

    fn add_member<'a>(
        &'a self,
        domain: &'a str,
        subgroup_id: u64,
        member: &'a Member,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let form = vec![
                ("group_id", subgroup_id.to_string()),
                (
                    "emails",
                    format!("{} {} <{}>", member.first_name, member.last_name, member.email),
                ),
                ("delivery", delivery_value(member.delivery_mode).to_string()),
            ];
            let response: DirectAddResponse =
                self.post_form(domain, "/v1/directadd", form, "add member").await?;
            response
                .added_members
                .into_iter()
                .next()
                .map(|entry| entry.id)
                .ok_or_else(|| Error::unexpected("provider accepted no members"))
        })
    }

    fn remove_member<'a>(&'a self, domain: &'a str, member_id: u64) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let form = vec![("member_id", member_id.to_string())];
            self.post_form::<IdResponse>(domain, "/v1/deletemember", form, "remove member")
                .await?;
            Ok(())
        })
    }

    fn update_member<'a>(
        &'a self,
        domain: &'a str,
        member_id: u64,
        member: &'a Member,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let form = vec![
                ("member_id", member_id.to_string()),
                ("full_name", format!("{} {}", member.first_name, member.last_name)),
                ("delivery", delivery_value(member.delivery_mode).to_string()),
                ("mod_status", mod_status_value(member.mod_status).to_string()),
            ];
            self.post_form::<IdResponse>(domain, "/v1/updatemember", form, "update member")
                .await?;
            Ok(())
        })
    }
}
