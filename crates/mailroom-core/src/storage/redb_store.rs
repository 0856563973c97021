//! Production KV store backed by an embedded redb database.
//!
//! One redb table per bucket plus a meta table carrying the store-wide
//! revision sequence. Every stored value is prefixed with the 8-byte
//! big-endian revision it was written at. redb serializes write
//! transactions, which is what makes `create` and the conditional
//! operations atomic without any extra locking.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition, TableError};
use tracing::warn;

use crate::{
    error::{Error, Result},
    models::Revision,
};

use super::{
    validate_key, BoxFuture, KvEntry, KvStore, CONSTRAINTS_BUCKET, MAILING_LISTS_BUCKET,
    MEMBERS_BUCKET, SERVICES_BUCKET,
};

const SERVICES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("services");
const MAILING_LISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mailing-lists");
const MEMBERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("members");
const CONSTRAINTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("constraints");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SEQUENCE_KEY: &str = "revision-sequence";

/// Embedded [`KvStore`] implementation.
#[derive(Debug, Clone)]
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    /// Opens (or creates) the database file and initializes all buckets.
    ///
    /// # Errors
    ///
    /// Returns `ServiceUnavailable` when the file cannot be opened or the
    /// tables cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref())
            .map_err(|e| Error::unavailable(format!("failed to open store: {e}")))?;

        let txn = db.begin_write().map_err(store_err)?;
        {
            txn.open_table(SERVICES_TABLE).map_err(store_err)?;
            txn.open_table(MAILING_LISTS_TABLE).map_err(store_err)?;
            txn.open_table(MEMBERS_TABLE).map_err(store_err)?;
            txn.open_table(CONSTRAINTS_TABLE).map_err(store_err)?;
            txn.open_table(META_TABLE).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn table_def(bucket: &str) -> Result<TableDefinition<'static, &'static str, &'static [u8]>> {
        match bucket {
            SERVICES_BUCKET => Ok(SERVICES_TABLE),
            MAILING_LISTS_BUCKET => Ok(MAILING_LISTS_TABLE),
            MEMBERS_BUCKET => Ok(MEMBERS_TABLE),
            CONSTRAINTS_BUCKET => Ok(CONSTRAINTS_TABLE),
            _ => Err(Error::unavailable(format!("bucket {bucket} is not initialized"))),
        }
    }

    fn read_entry(&self, bucket: &str, key: &str) -> Result<KvEntry> {
        validate_key(key)?;
        let def = Self::table_def(bucket)?;

        let txn = self.db.begin_read().map_err(store_err)?;
        let table = match txn.open_table(def) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => {
                return Err(Error::unavailable(format!("bucket {bucket} is not initialized")));
            },
            Err(e) => return Err(store_err(e)),
        };

        let guard = table
            .get(key)
            .map_err(store_err)?
            .ok_or_else(|| Error::not_found(format!("key {key} not found in {bucket}")))?;

        decode_entry(guard.value())
    }

    /// Runs `op` against the bucket table inside one write transaction.
    ///
    /// `op` receives the freshly allocated revision and must return the
    /// value to produce on success; the transaction is only committed then.
    fn mutate<T>(
        &self,
        bucket: &str,
        key: &str,
        op: impl FnOnce(&mut redb::Table<'_, &'static str, &'static [u8]>, u64) -> Result<T>,
    ) -> Result<T> {
        validate_key(key)?;
        let def = Self::table_def(bucket)?;

        let txn = self.db.begin_write().map_err(store_err)?;
        let result = {
            let mut meta = txn.open_table(META_TABLE).map_err(store_err)?;
            let current = meta.get(SEQUENCE_KEY).map_err(store_err)?.map_or(0, |g| g.value());
            let revision = current + 1;
            meta.insert(SEQUENCE_KEY, revision).map_err(store_err)?;
            drop(meta);

            let mut table = txn.open_table(def).map_err(store_err)?;
            op(&mut table, revision)
        };

        match result {
            Ok(value) => {
                txn.commit().map_err(store_err)?;
                Ok(value)
            },
            Err(err) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "failed to abort storage transaction");
                }
                Err(err)
            },
        }
    }
}

impl KvStore for RedbKvStore {
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, Result<KvEntry>> {
        Box::pin(async move { self.read_entry(bucket, key) })
    }

    fn create<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            self.mutate(bucket, key, |table, revision| {
                if table.get(key).map_err(store_err)?.is_some() {
                    return Err(Error::conflict(format!("key {key} already exists in {bucket}")));
                }
                let encoded = encode_entry(revision, &value);
                table.insert(key, encoded.as_slice()).map_err(store_err)?;
                Ok(Revision(revision))
            })
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<Revision>> {
        Box::pin(async move {
            self.mutate(bucket, key, |table, revision| {
                let encoded = encode_entry(revision, &value);
                table.insert(key, encoded.as_slice()).map_err(store_err)?;
                Ok(Revision(revision))
            })
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
            self.mutate(bucket, key, |table, revision| {
                let current = match table.get(key).map_err(store_err)? {
                    Some(guard) => decode_entry(guard.value())?.revision,
                    None => {
                        return Err(Error::not_found(format!("key {key} not found in {bucket}")));
                    },
                };
                if current != expected {
                    return Err(Error::conflict(format!(
                        "revision mismatch for {key}: expected {expected}, current {current}"
                    )));
                }
                let encoded = encode_entry(revision, &value);
                table.insert(key, encoded.as_slice()).map_err(store_err)?;
                Ok(Revision(revision))
            })
        })
    }

    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expected: Revision,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.mutate(bucket, key, |table, _revision| {
                let current = match table.get(key).map_err(store_err)? {
                    Some(guard) => decode_entry(guard.value())?.revision,
                    None => {
                        return Err(Error::not_found(format!("key {key} not found in {bucket}")));
                    },
                };
                if current != expected {
                    return Err(Error::conflict(format!(
                        "revision mismatch for {key}: expected {expected}, current {current}"
                    )));
                }
                table.remove(key).map_err(store_err)?;
                Ok(())
            })
        })
    }

    fn ready(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.db.begin_read().is_ok() })
    }
}

fn store_err(err: impl std::fmt::Display) -> Error {
    Error::unavailable(format!("storage fault: {err}"))
}

fn encode_entry(revision: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.extend_from_slice(&revision.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

fn decode_entry(raw: &[u8]) -> Result<KvEntry> {
    if raw.len() < 8 {
        return Err(Error::unexpected("stored entry shorter than revision header"));
    }
    let mut header = [0_u8; 8];
    header.copy_from_slice(&raw[..8]);
    Ok(KvEntry { value: raw[8..].to_vec(), revision: Revision(u64::from_be_bytes(header)) })
}
