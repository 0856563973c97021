//! In-memory KV store for tests and local development.
//!
//! Mirrors the production revision semantics exactly: a store-wide atomic
//! sequence, conditional writes, create-if-absent. Buckets must be declared
//! up front, matching the production store where a missing bucket means the
//! infrastructure was never initialized.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};

use crate::{
    error::{Error, Result},
    models::Revision,
};

use super::{validate_key, BoxFuture, KvEntry, KvStore, ALL_BUCKETS};

type Bucket = HashMap<String, (u64, Vec<u8>)>;

/// Thread-safe in-memory [`KvStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    buckets: RwLock<HashMap<String, Bucket>>,
    sequence: AtomicU64,
}

impl MemoryKvStore {
    /// Creates a store with the standard buckets present.
    pub fn new() -> Self {
        Self::with_buckets(&ALL_BUCKETS)
    }

    /// Creates a store with an explicit bucket set.
    pub fn with_buckets(names: &[&str]) -> Self {
        let buckets = names.iter().map(|n| ((*n).to_string(), Bucket::new())).collect();
        Self { buckets: RwLock::new(buckets), sequence: AtomicU64::new(0) }
    }

    /// Number of keys currently stored in a bucket, for test assertions.
    pub fn len(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .expect("bucket lock poisoned")
            .get(bucket)
            .map_or(0, HashMap::len)
    }

    /// Whether a bucket holds no keys.
    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }

    /// Keys currently present in a bucket, for test assertions.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .expect("bucket lock poisoned")
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn next_revision(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn missing_bucket(bucket: &str) -> Error {
        Error::unavailable(format!("bucket {bucket} is not initialized"))
    }
}

impl KvStore for MemoryKvStore {
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, Result<KvEntry>> {
        Box::pin(async move {
            validate_key(key)?;
            let buckets = self.buckets.read().expect("bucket lock poisoned");
            let entries = buckets.get(bucket).ok_or_else(|| Self::missing_bucket(bucket))?;
            let (revision, value) = entries
                .get(key)
                .ok_or_else(|| Error::not_found(format!("key {key} not found in {bucket}")))?;
            Ok(KvEntry { value: value.clone(), revision: Revision(*revision) })
        })
    }

    fn create<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            validate_key(key)?;
            let mut buckets = self.buckets.write().expect("bucket lock poisoned");
            let entries = buckets.get_mut(bucket).ok_or_else(|| Self::missing_bucket(bucket))?;
            if entries.contains_key(key) {
                return Err(Error::conflict(format!("key {key} already exists in {bucket}")));
            }
            let revision = self.next_revision();
            entries.insert(key.to_string(), (revision, value));
            Ok(Revision(revision))
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            validate_key(key)?;
            let mut buckets = self.buckets.write().expect("bucket lock poisoned");
            let entries = buckets.get_mut(bucket).ok_or_else(|| Self::missing_bucket(bucket))?;
            let revision = self.next_revision();
            entries.insert(key.to_string(), (revision, value));
            Ok(Revision(revision))
        })
    }

    fn put_with_revision<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
        expected: Revision,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            validate_key(key)?;
            let mut buckets = self.buckets.write().expect("bucket lock poisoned");
            let entries = buckets.get_mut(bucket).ok_or_else(|| Self::missing_bucket(bucket))?;
            let current = entries
                .get(key)
                .ok_or_else(|| Error::not_found(format!("key {key} not found in {bucket}")))?
                .0;
            if current != expected.0 {
                return Err(Error::conflict(format!(
                    "revision mismatch for {key}: expected {expected}, current {current}"
                )));
            }
            let revision = self.next_revision();
            entries.insert(key.to_string(), (revision, value));
            Ok(Revision(revision))
        })
    }

    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expected: Revision,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            validate_key(key)?;
            let mut buckets = self.buckets.write().expect("bucket lock poisoned");
            let entries = buckets.get_mut(bucket).ok_or_else(|| Self::missing_bucket(bucket))?;
            let current = entries
                .get(key)
                .ok_or_else(|| Error::not_found(format!("key {key} not found in {bucket}")))?
                .0;
            if current != expected.0 {
                return Err(Error::conflict(format!(
                    "revision mismatch for {key}: expected {expected}, current {current}"
                )));
            }
            entries.remove(key);
            Ok(())
        })
    }

    fn ready(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { !self.buckets.read().expect("bucket lock poisoned").is_empty() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryKvStore::new();
        let rev = store.put("services", "k1", b"v1".to_vec()).await.unwrap();

        let entry = store.get("services", "k1").await.unwrap();
        assert_eq!(entry.value, b"v1");
        assert_eq!(entry.revision, rev);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MemoryKvStore::new();
        let err = store.get("services", "nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn empty_key_is_validation() {
        let store = MemoryKvStore::new();
        let err = store.get("services", "").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unknown_bucket_is_unavailable() {
        let store = MemoryKvStore::with_buckets(&["only"]);
        let err = store.put("services", "k", Vec::new()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn create_is_exclusive() {
        let store = MemoryKvStore::new();
        store.create("constraints", "c1", b"owner-a".to_vec()).await.unwrap();

        let err = store.create("constraints", "c1", b"owner-b".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);

        // Loser's value never written
        let entry = store.get("constraints", "c1").await.unwrap();
        assert_eq!(entry.value, b"owner-a");
    }

    #[tokio::test]
    async fn conditional_put_rejects_stale_revision() {
        let store = MemoryKvStore::new();
        let rev = store.put("services", "k1", b"v1".to_vec()).await.unwrap();
        let newer = store.put_with_revision("services", "k1", b"v2".to_vec(), rev).await.unwrap();
        assert!(newer > rev);

        let err =
            store.put_with_revision("services", "k1", b"v3".to_vec(), rev).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);

        // Stored state untouched by the failed write
        assert_eq!(store.get("services", "k1").await.unwrap().value, b"v2");
    }

    #[tokio::test]
    async fn conditional_delete_semantics() {
        let store = MemoryKvStore::new();
        let rev = store.put("services", "k1", b"v1".to_vec()).await.unwrap();

        let err = store.delete("services", "k1", Revision(rev.0 + 5)).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);

        store.delete("services", "k1", rev).await.unwrap();

        let err = store.delete("services", "k1", rev).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn revisions_increase_monotonically() {
        let store = MemoryKvStore::new();
        let r1 = store.put("services", "a", Vec::new()).await.unwrap();
        let r2 = store.put("members", "b", Vec::new()).await.unwrap();
        let r3 = store.put("services", "a", Vec::new()).await.unwrap();
        assert!(r1 < r2 && r2 < r3);
    }
}
