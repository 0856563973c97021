//! Secondary-index emulation for reverse lookups.
//!
//! An index key is an auxiliary KV entry of the form
//! `idx/<relation>/<related-uid>/<entity-uid>` whose value is the entity
//! UID. Indices are never authoritative data: creation is idempotent and
//! deletion is best-effort, so reverse lookups may degrade gracefully
//! without ever blocking an otherwise-valid write.

use std::sync::Arc;

use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::{
    error::{Error, ErrorKind, Result},
    models::{MailingList, Member, Service},
};

use super::{KvStore, CONSTRAINTS_BUCKET};

/// Lookup entry mapping a provider group name to its service UID.
///
/// Used by the webhook pipeline to resolve inbound events, which identify
/// tenants by group name rather than by UID.
pub fn group_name_lookup_key(group_name: &str) -> String {
    format!("lookup/group-name/{group_name}")
}

/// Entities that expose reverse-lookup index keys.
///
/// `Sync` because the managers hold `&dyn Indexed` across await points
/// inside futures that must stay `Send`.
pub trait Indexed: Sync {
    /// The entity UID stored as every index value.
    fn entity_uid(&self) -> String;

    /// All applicable index keys. Relations whose related field is empty
    /// are skipped entirely.
    fn index_keys(&self) -> Vec<String>;
}

impl Indexed for Service {
    fn entity_uid(&self) -> String {
        self.uid.to_string()
    }

    fn index_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if !self.project_uid.is_empty() {
            keys.push(format!("idx/project/{}/{}", self.project_uid, self.uid));
        }
        if !self.group_name.is_empty() {
            keys.push(group_name_lookup_key(&self.group_name));
        }
        keys
    }
}

impl Indexed for MailingList {
    fn entity_uid(&self) -> String {
        self.uid.to_string()
    }

    fn index_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        keys.push(format!("idx/service/{}/{}", self.service_uid, self.uid));
        if !self.project_uid.is_empty() {
            keys.push(format!("idx/project/{}/{}", self.project_uid, self.uid));
        }
        if let Some(committee) = self.committee_uid.as_deref().filter(|c| !c.is_empty()) {
            keys.push(format!("idx/committee/{committee}/{}", self.uid));
        }
        keys
    }
}

impl Indexed for Member {
    fn entity_uid(&self) -> String {
        self.uid.to_string()
    }

    fn index_keys(&self) -> Vec<String> {
        vec![format!("idx/mailing-list/{}/{}", self.mailing_list_uid, self.uid)]
    }
}

/// Index creation aborted partway through.
///
/// Carries the keys that were created before the failure so the caller can
/// roll them back.
#[derive(Debug, ThisError)]
#[error("index creation aborted: {source}")]
pub struct IndexCreationError {
    /// Keys successfully created before the failure.
    pub created: Vec<String>,
    /// The storage fault that aborted creation.
    pub source: Error,
}

/// Creates and removes secondary-index keys.
#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn KvStore>,
}

impl IndexManager {
    /// Creates a manager over the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Creates all applicable index keys for an entity.
    ///
    /// Idempotent: a key that already exists is treated as satisfied and
    /// not counted as newly created. Returns the newly created keys.
    ///
    /// # Errors
    ///
    /// The first hard failure aborts; the error carries the keys created so
    /// far for rollback.
    pub async fn create_indices(
        &self,
        entity: &dyn Indexed,
    ) -> std::result::Result<Vec<String>, IndexCreationError> {
        let uid = entity.entity_uid();
        let mut created = Vec::new();

        for key in entity.index_keys() {
            match self.store.create(CONSTRAINTS_BUCKET, &key, uid.as_bytes().to_vec()).await {
                Ok(_) => created.push(key),
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    debug!(key, "index already present");
                },
                Err(err) => {
                    return Err(IndexCreationError { created, source: err.context("create index") });
                },
            }
        }

        Ok(created)
    }

    /// Best-effort removal of all applicable index keys for an entity.
    ///
    /// Missing keys are not an error; failures are logged and ignored.
    pub async fn delete_indices(&self, entity: &dyn Indexed) {
        for key in entity.index_keys() {
            self.delete_key(&key).await;
        }
    }

    /// Best-effort removal of a single index key.
    pub async fn delete_key(&self, key: &str) {
        let entry = match self.store.get(CONSTRAINTS_BUCKET, key).await {
            Ok(entry) => entry,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                warn!(key, error = %err, "index cleanup: fetch failed");
                return;
            },
        };

        if let Err(err) = self.store.delete(CONSTRAINTS_BUCKET, key, entry.revision).await {
            warn!(key, error = %err, "index cleanup: delete failed");
        }
    }

    /// Resolves the entity UID a lookup key points at.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such lookup entry exists.
    pub async fn resolve(&self, key: &str) -> Result<String> {
        let entry = self.store.get(CONSTRAINTS_BUCKET, key).await?;
        String::from_utf8(entry.value)
            .map_err(|_| Error::unexpected(format!("lookup key {key} holds a non-UTF-8 uid")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        models::{MailingListId, MailingListType, ServiceId},
        storage::MemoryKvStore,
    };

    fn sample_list(committee: Option<&str>) -> MailingList {
        MailingList {
            uid: MailingListId::new(),
            service_uid: ServiceId::new(),
            group_name: "dev".into(),
            title: String::new(),
            description: String::new(),
            list_type: MailingListType::Discussion,
            public: true,
            committee_uid: committee.map(Into::into),
            committee_name: None,
            project_uid: "proj-1".into(),
            project_name: "Project One".into(),
            subgroup_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn skips_empty_relations() {
        let mut list = sample_list(None);
        assert_eq!(list.index_keys().len(), 2);

        list.committee_uid = Some("tsc".into());
        assert_eq!(list.index_keys().len(), 3);

        list.committee_uid = Some(String::new());
        assert_eq!(list.index_keys().len(), 2);
    }

    #[tokio::test]
    async fn creation_is_idempotent() {
        let store = Arc::new(MemoryKvStore::new());
        let mgr = IndexManager::new(store);
        let list = sample_list(Some("tsc"));

        let created = mgr.create_indices(&list).await.unwrap();
        assert_eq!(created.len(), 3);

        // Second run finds everything satisfied
        let created = mgr.create_indices(&list).await.unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn delete_indices_is_silent_on_missing_keys() {
        let store = Arc::new(MemoryKvStore::new());
        let mgr = IndexManager::new(store.clone());
        let list = sample_list(Some("tsc"));

        mgr.create_indices(&list).await.unwrap();
        mgr.delete_indices(&list).await;
        assert!(store.is_empty(CONSTRAINTS_BUCKET));

        // Nothing left, still silent
        mgr.delete_indices(&list).await;
    }

    #[tokio::test]
    async fn resolve_returns_entity_uid() {
        let store = Arc::new(MemoryKvStore::new());
        let mgr = IndexManager::new(store);
        let list = sample_list(None);

        mgr.create_indices(&list).await.unwrap();
        let key = format!("idx/service/{}/{}", list.service_uid, list.uid);
        assert_eq!(mgr.resolve(&key).await.unwrap(), list.uid.to_string());
    }
}
