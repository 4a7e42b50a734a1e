use crate::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A [`Store`] keeping session records in process memory.
///
/// Clones share the same records. Nothing survives a restart, and every instance of a
/// replicated service has its own records, so this store is meant for tests,
/// development and single-process deployments.
///
/// Expired records are dropped when they are looked up, or when [`MemoryStore::cleanup`] is called.
/// There is no background sweep: call `cleanup` periodically if clients may never return,
/// otherwise their records stay in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, Record>>>,
    logger: Option<Arc<Mutex<Vec<Operation>>>>,
}

#[derive(Debug, Clone)]
struct Record {
    blob: Vec<u8>,
    expiry: DateTime<Utc>,
}

impl Record {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}

/// A call made to a [`MemoryStore`], as recorded by [`MemoryStore::new_with_logger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// [`Store::find`] was called.
    Find {
        /// The looked up token.
        token: String,
    },
    /// [`Store::commit`] was called.
    Commit {
        /// The written token.
        token: String,
        /// The expiry of the written record.
        expiry: DateTime<Utc>,
    },
    /// [`Store::delete`] was called.
    Delete {
        /// The deleted token.
        token: String,
    },
    /// [`Store::all`] was called.
    All,
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(&self, token: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.log(|| Operation::Find {
            token: token.to_owned(),
        });
        let now = Utc::now();

        {
            let records = self.records.read();
            match records.get(token) {
                Some(record) if record.is_active(now) => return Ok(Some(record.blob.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        log::trace!("Dropping expired session record on lookup");
        let mut records = self.records.write();
        // The record may have been replaced since the read lock was released.
        if records.get(token).is_some_and(|record| !record.is_active(now)) {
            records.remove(token);
        }
        Ok(records
            .get(token)
            .filter(|record| record.is_active(now))
            .map(|record| record.blob.clone()))
    }

    async fn commit(&self, token: &str, blob: &[u8], expiry: DateTime<Utc>) -> anyhow::Result<()> {
        self.log(|| Operation::Commit {
            token: token.to_owned(),
            expiry,
        });
        self.records.write().insert(
            token.to_owned(),
            Record {
                blob: blob.to_vec(),
                expiry,
            },
        );
        Ok(())
    }

    async fn delete(&self, token: &str) -> anyhow::Result<()> {
        self.log(|| Operation::Delete {
            token: token.to_owned(),
        });
        self.records.write().remove(token);
        Ok(())
    }

    async fn all(&self) -> anyhow::Result<Option<HashMap<String, Vec<u8>>>> {
        self.log(|| Operation::All);
        let now = Utc::now();
        Ok(Some(
            self.records
                .read()
                .iter()
                .filter(|(_, record)| record.is_active(now))
                .map(|(token, record)| (token.clone(), record.blob.clone()))
                .collect(),
        ))
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a new empty memory store that records every call made to it.
    /// The recorded calls are returned by [`MemoryStore::operations`].
    ///
    /// **This is meant for tests.** The log grows without bound.
    pub fn new_with_logger() -> Self {
        Self {
            records: Default::default(),
            logger: Some(Default::default()),
        }
    }

    /// Returns the calls made to this store so far, oldest first.
    /// Returns an empty list if the store was not created with [`MemoryStore::new_with_logger`].
    pub fn operations(&self) -> Vec<Operation> {
        self.logger
            .as_ref()
            .map(|logger| logger.lock().clone())
            .unwrap_or_default()
    }

    /// Returns the number of records in the memory store, including expired ones that were not cleaned up yet.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the memory store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns true if the store holds an active record for `token`.
    /// Does not count as a lookup in the operation log.
    pub fn contains(&self, token: &str) -> bool {
        let now = Utc::now();
        self.records
            .read()
            .get(token)
            .is_some_and(|record| record.is_active(now))
    }

    /// Drop all expired records and return how many were dropped.
    pub fn cleanup(&self) -> usize {
        log::trace!("Cleaning up memory store...");
        let now = Utc::now();
        let mut records = self.records.write();
        let initial_len = records.len();
        records.retain(|_, record| record.is_active(now));
        let removed = initial_len - records.len();
        log::trace!("Deleted {removed} expired sessions");
        removed
    }

    /// Empties the entire store, deleting all sessions.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    fn log(&self, operation: impl FnOnce() -> Operation) {
        if let Some(logger) = &self.logger {
            logger.lock().push(operation());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[async_std::test]
    async fn expired_records_are_not_found() {
        let store = MemoryStore::new();
        let expiry = Utc::now() + chrono::Duration::milliseconds(100);
        store.commit("token", b"blob", expiry).await.unwrap();
        assert_eq!(store.find("token").await.unwrap(), Some(b"blob".to_vec()));

        async_std::task::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.find("token").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[async_std::test]
    async fn cleanup_removes_only_expired_records() {
        let store = MemoryStore::new();
        let past = Utc::now() - chrono::Duration::seconds(1);
        let future = Utc::now() + chrono::Duration::hours(1);
        store.commit("old", b"a", past).await.unwrap();
        store.commit("new", b"b", future).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.cleanup(), 1);
        assert!(store.contains("new"));
        assert!(!store.contains("old"));
    }

    #[async_std::test]
    async fn all_skips_expired_records() {
        let store = MemoryStore::new();
        store
            .commit("old", b"a", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        store
            .commit("new", b"b", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        let all = store.all().await.unwrap().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("new"), Some(&b"b".to_vec()));
    }

    #[async_std::test]
    async fn deleting_a_missing_token_succeeds() {
        let store = MemoryStore::new_with_logger();
        store.delete("missing").await.unwrap();
        assert_eq!(
            store.operations(),
            vec![Operation::Delete {
                token: "missing".into()
            }]
        );
    }
}
