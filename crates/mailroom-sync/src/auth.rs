//! Provider authentication with a per-domain token cache.
//!
//! The provider virtual-hosts one account per tenant domain, so tokens
//! are cached per domain. Expiry comes from the token itself when it is
//! a JWT; opaque tokens get a conservative fixed lifetime. A safety
//! margin is subtracted so a token is never presented moments before it
//! lapses.

use std::{collections::HashMap, sync::Arc, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use reqwest::header::HOST;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use mailroom_core::{Clock, Error, Result};

use crate::http::check_status;

/// Credentials and token-lifetime tuning.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Account email used for login.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Subtracted from a token's expiry so it is refreshed early.
    pub token_safety_margin: Duration,
    /// Assumed lifetime for tokens whose expiry cannot be read.
    pub fallback_token_ttl: Duration,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// Logs in on demand and caches one token per tenant domain.
pub struct AuthManager {
    http: reqwest::Client,
    base_url: String,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
    cache: RwLock<HashMap<String, CachedToken>>,
}

impl AuthManager {
    /// Creates a manager issuing logins against `base_url`.
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        config: AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { http, base_url, config, clock, cache: RwLock::new(HashMap::new()) }
    }

    /// Returns a live token for `domain`, logging in when the cache is
    /// empty or expired.
    ///
    /// # Errors
    ///
    /// Login faults mapped through the shared taxonomy; bad credentials
    /// surface as `Unauthorized`.
    pub async fn token(&self, domain: &str) -> Result<String> {
        let now = self.clock.now();
        if let Some(cached) = self.cache.read().await.get(domain) {
            if cached.expires_at > now {
                return Ok(cached.token.clone());
            }
        }

        let token = self.login(domain).await?;
        let expires_at = token_expiry(
            &token,
            now,
            self.config.token_safety_margin,
            self.config.fallback_token_ttl,
        );
        debug!(domain, %expires_at, "provider token refreshed");
        self.cache
            .write()
            .await
            .insert(domain.to_string(), CachedToken { token: token.clone(), expires_at });
        Ok(token)
    }

    /// Drops the cached token for `domain`, forcing the next call to log
    /// in again. Called when the provider rejects a token early.
    pub async fn invalidate(&self, domain: &str) {
        self.cache.write().await.remove(domain);
    }

    #[instrument(skip(self))]
    async fn login(&self, domain: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/v1/login", self.base_url))
            .header(HOST, domain)
            .form(&[
                ("email", self.config.email.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .map_err(|err| Error::unavailable(format!("provider login failed: {err}")))?;

        let response = check_status(response, "login").await?;
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|err| Error::unexpected(format!("malformed login response: {err}")))?;
        Ok(body.token)
    }
}

/// Computes when a token should be considered expired.
///
/// JWT tokens carry their own `exp` claim, read without signature
/// verification (the provider verifies; the cache only needs the
/// lifetime). Everything else gets `fallback_ttl`. The safety margin is
/// subtracted in both cases.
fn token_expiry(
    token: &str,
    now: DateTime<Utc>,
    safety_margin: Duration,
    fallback_ttl: Duration,
) -> DateTime<Utc> {
    let expiry = decode_jwt_expiry(token).unwrap_or_else(|| {
        now + chrono::Duration::from_std(fallback_ttl).unwrap_or(chrono::Duration::zero())
    });
    expiry - chrono::Duration::from_std(safety_margin).unwrap_or(chrono::Duration::zero())
}

/// Reads the `exp` claim out of a JWT payload, if the token is one.
fn decode_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp, 0)
}
