//! Uniqueness-constraint emulation over the KV store.
//!
//! A constraint key is a pure function of an entity's uniqueness-defining
//! fields, stored with the owning entity's UID as its value. Because two
//! entities with the same fields always derive the same key, atomic
//! create-if-absent is equivalent to a unique index.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::{Error, ErrorKind, Result},
    models::{MailingListId, ServiceId, ServiceType},
};

use super::{KvStore, CONSTRAINTS_BUCKET};

/// Derives the constraint key for a service.
///
/// Uniqueness tuple: `(project_uid, service_type)` — one service of each
/// type per project.
pub fn service_constraint_key(project_uid: &str, service_type: ServiceType) -> String {
    format!("constraint/services/{project_uid}/{service_type}")
}

/// Derives the constraint key for a mailing list.
///
/// Uniqueness tuple: `(service_uid, group_name)`.
pub fn mailing_list_constraint_key(service_uid: ServiceId, group_name: &str) -> String {
    format!("constraint/mailing-lists/{service_uid}/{group_name}")
}

/// Derives the constraint key for a member.
///
/// Uniqueness tuple: `(mailing_list_uid, normalized email)`.
pub fn member_constraint_key(mailing_list_uid: MailingListId, email: &str) -> String {
    format!(
        "constraint/members/{mailing_list_uid}/{}",
        crate::models::normalize_email(email)
    )
}

/// Reserves and releases uniqueness-constraint keys.
#[derive(Clone)]
pub struct ConstraintManager {
    store: Arc<dyn KvStore>,
}

impl ConstraintManager {
    /// Creates a manager over the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Attempts an atomic create-if-absent reservation.
    ///
    /// # Errors
    ///
    /// `Conflict` when the key already exists (another entity owns the same
    /// uniqueness tuple); storage faults pass through unchanged.
    pub async fn reserve(&self, key: &str, owner_uid: &str) -> Result<()> {
        match self.store.create(CONSTRAINTS_BUCKET, key, owner_uid.as_bytes().to_vec()).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::Conflict => Err(Error::conflict(
                "an entity with the same constraints already exists",
            )),
            Err(err) => Err(err.context("reserve constraint")),
        }
    }

    /// Best-effort, ownership-checked release of a constraint key.
    ///
    /// Deletes the key only when its current value still equals
    /// `owner_uid`; another entity may have legitimately re-reserved the
    /// same constraint value after this entity's delete began. Never fails:
    /// constraint cleanup is not a correctness requirement.
    pub async fn release(&self, key: &str, owner_uid: &str) {
        let entry = match self.store.get(CONSTRAINTS_BUCKET, key).await {
            Ok(entry) => entry,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                warn!(key, error = %err, "constraint release: fetch failed, leaving key");
                return;
            },
        };

        if entry.value != owner_uid.as_bytes() {
            debug!(key, "constraint re-reserved by another entity, leaving key");
            return;
        }

        if let Err(err) = self.store.delete(CONSTRAINTS_BUCKET, key, entry.revision).await {
            warn!(key, error = %err, "constraint release failed");
        }
    }

    /// Resolves the UID currently owning a constraint key.
    ///
    /// Used by the webhook pipeline to find an entity from its uniqueness
    /// tuple (e.g. a member from its list and email).
    ///
    /// # Errors
    ///
    /// `NotFound` when the constraint is unreserved; `Unexpected` when the
    /// stored value is not valid UTF-8.
    pub async fn resolve_owner(&self, key: &str) -> Result<String> {
        let entry = self.store.get(CONSTRAINTS_BUCKET, key).await?;
        String::from_utf8(entry.value)
            .map_err(|_| Error::unexpected(format!("constraint key {key} holds a non-UTF-8 owner")))
    }
}
