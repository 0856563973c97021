//! KV storage adapter with optimistic-concurrency revisions.
//!
//! The store is schemaless: named buckets of raw byte values, each key
//! carrying a store-wide monotonically increasing revision. Conditional
//! writes (`put_with_revision`, `delete`) compare the caller's expected
//! revision and fail with `Conflict` on mismatch; `create` is the atomic
//! create-if-absent primitive backing uniqueness constraints.
//!
//! Trait-based so the orchestrator can run against the production redb
//! store or lightweight in-memory doubles in tests.

pub mod constraint;
pub mod index;
pub mod memory;
pub mod redb_store;

use std::{future::Future, pin::Pin};

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::{Error, Result},
    models::Revision,
};

pub use constraint::ConstraintManager;
pub use index::{IndexManager, Indexed};
pub use memory::MemoryKvStore;
pub use redb_store::RedbKvStore;

/// Bucket holding service records keyed by UID.
pub const SERVICES_BUCKET: &str = "services";
/// Bucket holding mailing-list records keyed by UID.
pub const MAILING_LISTS_BUCKET: &str = "mailing-lists";
/// Bucket holding member records keyed by UID.
pub const MEMBERS_BUCKET: &str = "members";
/// Bucket holding constraint and secondary-index keys.
///
/// Reserved prefixes (`constraint/`, `idx/`, `lookup/`) never collide with
/// entity UIDs, which are random identifiers.
pub const CONSTRAINTS_BUCKET: &str = "constraints";

/// All buckets a store must provide.
pub const ALL_BUCKETS: [&str; 4] =
    [SERVICES_BUCKET, MAILING_LISTS_BUCKET, MEMBERS_BUCKET, CONSTRAINTS_BUCKET];

/// Boxed future alias for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A stored value together with its current revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// Raw stored bytes.
    pub value: Vec<u8>,
    /// Revision at which the value was written.
    pub revision: Revision,
}

/// Typed get/put/delete over named buckets with revision semantics.
///
/// Contract shared by all implementations:
/// - empty keys are a `Validation` error,
/// - an unknown/unopened bucket is `ServiceUnavailable` (infrastructure not
///   initialized),
/// - `get`/`put_with_revision`/`delete` on a missing key are `NotFound`,
/// - revision mismatches and `create` on an existing key are `Conflict`.
pub trait KvStore: Send + Sync + 'static {
    /// Fetches the value and current revision for a key.
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, Result<KvEntry>>;

    /// Atomically creates a key that must not yet exist.
    fn create<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>>;

    /// Writes a value unconditionally, returning the new revision.
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>>;

    /// Writes a value only if the current revision equals `expected`.
    fn put_with_revision<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
        expected: Revision,
    ) -> BoxFuture<'a, Result<Revision>>;

    /// Deletes a key only if the current revision equals `expected`.
    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expected: Revision,
    ) -> BoxFuture<'a, Result<()>>;

    /// Reports whether the underlying connection is live.
    fn ready(&self) -> BoxFuture<'_, bool>;
}

/// Rejects the empty key shared across all operations.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::validation("storage key must not be empty"));
    }
    Ok(())
}

/// Fetches and deserializes a JSON record.
///
/// # Errors
///
/// Propagates storage errors; a corrupt stored record is `Unexpected`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    bucket: &str,
    key: &str,
) -> Result<(T, Revision)> {
    let entry = store.get(bucket, key).await?;
    let value = serde_json::from_slice(&entry.value)
        .map_err(|e| Error::unexpected(format!("corrupt record at {bucket}/{key}: {e}")))?;
    Ok((value, entry.revision))
}

/// Serializes and writes a JSON record unconditionally.
pub async fn put_json<T: Serialize>(
    store: &dyn KvStore,
    bucket: &str,
    key: &str,
    value: &T,
) -> Result<Revision> {
    let bytes = serde_json::to_vec(value)?;
    store.put(bucket, key, bytes).await
}

/// Serializes and writes a JSON record guarded by an expected revision.
pub async fn put_json_with_revision<T: Serialize>(
    store: &dyn KvStore,
    bucket: &str,
    key: &str,
    value: &T,
    expected: Revision,
) -> Result<Revision> {
    let bytes = serde_json::to_vec(value)?;
    store.put_with_revision(bucket, key, bytes, expected).await
}
