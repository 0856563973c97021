//! Shared dependencies for the resource writers.

use std::sync::Arc;

use mailroom_core::{
    storage::{
        get_json, ConstraintManager, IndexManager, KvStore, MAILING_LISTS_BUCKET, MEMBERS_BUCKET,
        SERVICES_BUCKET,
    },
    Clock, Error, ErrorKind, MailingList, MailingListId, Member, MemberId, Result, RetryPolicy,
    Revision, Service, ServiceId,
};

use crate::{provider::ProviderSync, publisher::EventPublisher};

/// Tunables for the write path.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Whether writes propagate to the external provider. When disabled
    /// entities persist locally and stay unsynchronized.
    pub sync_enabled: bool,

    /// Retry policy for transient storage and provider faults.
    pub retry: RetryPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self { sync_enabled: true, retry: RetryPolicy::default() }
    }
}

/// Dependency bundle shared by every writer.
///
/// Constructed once at startup and cloned cheaply; everything inside is
/// behind an `Arc`.
#[derive(Clone)]
pub struct WriterContext {
    /// Revisioned KV store holding all entity records.
    pub store: Arc<dyn KvStore>,
    /// Uniqueness-constraint reservations.
    pub constraints: ConstraintManager,
    /// Reverse-lookup index maintenance.
    pub indices: IndexManager,
    /// External provider client.
    pub provider: Arc<dyn ProviderSync>,
    /// Downstream change-notification sink.
    pub publisher: Arc<dyn EventPublisher>,
    /// Time source, swappable in tests.
    pub clock: Arc<dyn Clock>,
    /// Write-path tunables.
    pub config: WriterConfig,
}

impl WriterContext {
    /// Wires a context from its parts.
    pub fn new(
        store: Arc<dyn KvStore>,
        provider: Arc<dyn ProviderSync>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: WriterConfig,
    ) -> Self {
        Self {
            constraints: ConstraintManager::new(store.clone()),
            indices: IndexManager::new(store.clone()),
            store,
            provider,
            publisher,
            clock,
            config,
        }
    }

    /// Fetches a service record with its current revision.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such service exists.
    pub async fn fetch_service(&self, uid: ServiceId) -> Result<(Service, Revision)> {
        match get_json(self.store.as_ref(), SERVICES_BUCKET, &uid.to_string()).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(Error::not_found(format!("service {uid} not found")))
            },
            other => other,
        }
    }

    /// Fetches a mailing-list record with its current revision.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such list exists.
    pub async fn fetch_mailing_list(&self, uid: MailingListId) -> Result<(MailingList, Revision)> {
        match get_json(self.store.as_ref(), MAILING_LISTS_BUCKET, &uid.to_string()).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(Error::not_found(format!("mailing list {uid} not found")))
            },
            other => other,
        }
    }

    /// Fetches a member record with its current revision.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such member exists.
    pub async fn fetch_member(&self, uid: MemberId) -> Result<(Member, Revision)> {
        match get_json(self.store.as_ref(), MEMBERS_BUCKET, &uid.to_string()).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(Error::not_found(format!("member {uid} not found")))
            },
            other => other,
        }
    }
}

/// Rejects a change to an immutable field, naming the field and both
/// values.
pub(crate) fn check_immutable<T>(field: &str, stored: &T, requested: Option<&T>) -> Result<()>
where
    T: PartialEq + std::fmt::Display,
{
    if let Some(requested) = requested {
        if requested != stored {
            return Err(Error::validation(format!(
                "{field} is immutable: stored {stored}, requested {requested}"
            )));
        }
    }
    Ok(())
}
