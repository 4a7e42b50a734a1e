use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub(crate) mod token_generator;

/// This is the backend-facing interface of the session manager.
/// It defines simple [CRUD]-methods on encoded sessions.
///
/// The token (or its hash, see [`SessionConfig::hash_token_in_store`](crate::SessionConfig::hash_token_in_store))
/// is the primary key, uniquely identifying a record.
/// Records are opaque blobs produced by a [`Codec`](crate::Codec).
///
/// Errors are passed to the caller verbatim, wrapped in [`Error::Store`](crate::Error::Store).
/// The manager never retries a failed operation.
/// Futures returned by a store are cancelled by dropping them, so stores should not rely on
/// running to completion, and should apply their own timeouts where the backend needs one.
///
/// [CRUD]: https://en.wikipedia.org/wiki/Create,_read,_update_and_delete
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the record with the given `token`.
    ///
    /// A missing, expired or otherwise unusable record must be reported as `Ok(None)`, never as an error.
    /// In particular, a record whose expiry is in the past must not be returned,
    /// even if the backend did not evict it yet.
    async fn find(&self, token: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Insert or replace the record with the given `token`.
    async fn commit(&self, token: &str, blob: &[u8], expiry: DateTime<Utc>) -> anyhow::Result<()>;

    /// Delete the record with the given `token`.
    /// Deleting a token that does not exist succeeds.
    async fn delete(&self, token: &str) -> anyhow::Result<()>;

    /// Return all records that are not expired, keyed by token.
    ///
    /// This operation is optional, stores that cannot enumerate their records keep the default
    /// implementation, which returns `Ok(None)`.
    async fn all(&self) -> anyhow::Result<Option<HashMap<String, Vec<u8>>>> {
        Ok(None)
    }
}
