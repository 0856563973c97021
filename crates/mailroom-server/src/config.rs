//! Service configuration.
//!
//! Values are layered: compiled defaults, then `config.toml` in the
//! working directory, then environment variables. Each field documents
//! the environment variable that overrides it.

use std::{net::SocketAddr, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use mailroom_core::RetryPolicy;
use mailroom_sync::SyncConfig;
use mailroom_writer::WriterConfig;

const CONFIG_FILE: &str = "config.toml";

/// Runtime configuration for the mailroom service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interface to bind. Env: `HOST`.
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,

    /// Port to bind. Env: `PORT`.
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,

    /// Path of the embedded database file. Env: `DATABASE_PATH`.
    #[serde(default = "default_database_path", alias = "DATABASE_PATH")]
    pub database_path: String,

    /// Provider API endpoint, without a trailing slash. Env: `PROVIDER_BASE_URL`.
    #[serde(default = "default_provider_base_url", alias = "PROVIDER_BASE_URL")]
    pub provider_base_url: String,

    /// Provider account email. Env: `PROVIDER_EMAIL`.
    #[serde(default, alias = "PROVIDER_EMAIL")]
    pub provider_email: String,

    /// Provider account password. Env: `PROVIDER_PASSWORD`.
    #[serde(default, alias = "PROVIDER_PASSWORD")]
    pub provider_password: String,

    /// Shared secret for webhook signature verification. Env: `WEBHOOK_SECRET`.
    #[serde(default, alias = "WEBHOOK_SECRET")]
    pub webhook_secret: String,

    /// Whether writes are mirrored to the provider. Env: `SYNC_ENABLED`.
    #[serde(default = "default_sync_enabled", alias = "SYNC_ENABLED")]
    pub sync_enabled: bool,

    /// Maximum attempts for transient faults, including the first.
    /// Env: `RETRY_MAX_ATTEMPTS`.
    #[serde(default = "default_retry_max_attempts", alias = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: u32,

    /// Base backoff delay in milliseconds. Env: `RETRY_BASE_DELAY_MS`.
    #[serde(default = "default_retry_base_delay_ms", alias = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,

    /// Backoff delay cap in milliseconds. Env: `RETRY_MAX_DELAY_MS`.
    #[serde(default = "default_retry_max_delay_ms", alias = "RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,

    /// Jitter fraction applied to backoff delays. Env: `RETRY_JITTER_FACTOR`.
    #[serde(default = "default_retry_jitter_factor", alias = "RETRY_JITTER_FACTOR")]
    pub retry_jitter_factor: f64,

    /// Provider request timeout in seconds. Env: `PROVIDER_TIMEOUT_SECS`.
    #[serde(default = "default_provider_timeout_secs", alias = "PROVIDER_TIMEOUT_SECS")]
    pub provider_timeout_secs: u64,

    /// Log filter directives. Env: `RUST_LOG`.
    #[serde(default = "default_rust_log", alias = "RUST_LOG")]
    pub rust_log: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_path() -> String {
    "mailroom.redb".to_string()
}

fn default_provider_base_url() -> String {
    "https://groups.io/api".to_string()
}

fn default_sync_enabled() -> bool {
    true
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_retry_jitter_factor() -> f64 {
    0.25
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_rust_log() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: default_database_path(),
            provider_base_url: default_provider_base_url(),
            provider_email: String::new(),
            provider_password: String::new(),
            webhook_secret: String::new(),
            sync_enabled: default_sync_enabled(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_factor: default_retry_jitter_factor(),
            provider_timeout_secs: default_provider_timeout_secs(),
            rust_log: default_rust_log(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, `config.toml`, and environment.
    ///
    /// # Errors
    ///
    /// Fails when a layer cannot be parsed or validation rejects the
    /// merged result.
    pub fn load() -> anyhow::Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.webhook_secret.is_empty() {
            anyhow::bail!("WEBHOOK_SECRET must be set");
        }
        if self.sync_enabled && (self.provider_email.is_empty() || self.provider_password.is_empty())
        {
            anyhow::bail!("PROVIDER_EMAIL and PROVIDER_PASSWORD must be set when sync is enabled");
        }
        if self.provider_base_url.ends_with('/') {
            anyhow::bail!("PROVIDER_BASE_URL must not end with a slash");
        }
        if self.retry_max_attempts == 0 {
            anyhow::bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("RETRY_JITTER_FACTOR must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// Bind address for the HTTP listener.
    ///
    /// # Errors
    ///
    /// Fails when host and port do not form a valid socket address.
    pub fn server_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|err| anyhow::anyhow!("invalid server address {addr}: {err}"))
    }

    /// Retry policy shared by the writer and provider client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Settings for the write orchestrator.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig { sync_enabled: self.sync_enabled, retry: self.retry_policy() }
    }

    /// Settings for the provider HTTP client.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            base_url: self.provider_base_url.clone(),
            email: self.provider_email.clone(),
            password: self.provider_password.clone(),
            retry: self.retry_policy(),
            request_timeout: Duration::from_secs(self.provider_timeout_secs),
            ..SyncConfig::default()
        }
    }
}
