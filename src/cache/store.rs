//! Cache Store Interface
//!
//! The response cache only issues get/put/delete calls against a store; TTL
//! bookkeeping and per-key atomicity belong to the store.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheError;

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Fetches a live entry. Expired entries are reported as `None`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    async fn put(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Returns whether an entry existed; a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every entry whose key was derived for `resource`.
    ///
    /// See [`crate::cache::key::belongs_to`] for the matching rule.
    async fn delete_resource(&self, resource: &str) -> Result<usize, CacheError>;
}
