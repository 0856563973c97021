//! Fault-injecting store wrapper.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use mailroom_core::{
    storage::{BoxFuture, KvEntry, KvStore},
    Error, Result, Revision,
};

/// Wraps a real store and fails exactly one chosen mutation.
///
/// Reads always pass through; `create`/`put`/`put_with_revision`/`delete`
/// increment a shared counter and the mutation whose ordinal matches the
/// configured one fails with `ServiceUnavailable`. Every other mutation
/// succeeds, so a saga can be aborted at an exact step while its rollback
/// still runs to completion. Sweeping the ordinal across a saga's steps
/// exercises every abort point.
pub struct FlakyStore {
    inner: Arc<dyn KvStore>,
    counter: AtomicU64,
    fail_on: AtomicU64,
}

impl FlakyStore {
    /// Wraps `inner`, failing the `fail_on`-th mutation (1-based). Zero
    /// disables injection.
    pub fn failing_on(inner: Arc<dyn KvStore>, fail_on: u64) -> Self {
        Self { inner, counter: AtomicU64::new(0), fail_on: AtomicU64::new(fail_on) }
    }

    /// Re-arms the injector: resets the counter and picks a new ordinal.
    pub fn rearm(&self, fail_on: u64) {
        self.counter.store(0, Ordering::SeqCst);
        self.fail_on.store(fail_on, Ordering::SeqCst);
    }

    /// Mutations attempted so far, including the failed one.
    pub fn mutations(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    fn charge(&self) -> Result<()> {
        let ordinal = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_on = self.fail_on.load(Ordering::SeqCst);
        if fail_on != 0 && ordinal == fail_on {
            return Err(Error::unavailable("injected storage fault"));
        }
        Ok(())
    }
}

impl KvStore for FlakyStore {
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, Result<KvEntry>> {
        self.inner.get(bucket, key)
    }

    fn create<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            self.charge()?;
            self.inner.create(bucket, key, value).await
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            self.charge()?;
            self.inner.put(bucket, key, value).await
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
            self.charge()?;
            self.inner.put_with_revision(bucket, key, value, expected).await
        })
    }

    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expected: Revision,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.charge()?;
            self.inner.delete(bucket, key, expected).await
        })
    }

    fn ready(&self) -> BoxFuture<'_, bool> {
        self.inner.ready()
    }
}
