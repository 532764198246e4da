//! Redis-backed cache store, enabled with the `redis-store` feature.
//!
//! Keys are namespaced as `{cache_name}::{key}` and expire through Redis TTLs.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::cache::key::FINGERPRINT_LEN;
use crate::cache::CacheStore;
use crate::error::CacheError;

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            connection,
            namespace: namespace.into(),
        }
    }

    /// Opens a managed connection to `url`.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::new(connection, namespace))
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}::{}", self.namespace, key)
    }

    /// Glob matching exactly the keys derived for `resource`.
    fn resource_pattern(&self, resource: &str) -> String {
        format!(
            "{}_{}",
            escape_glob(&self.make_key(resource)),
            "?".repeat(FINGERPRINT_LEN)
        )
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.connection.clone();
        let data: Option<Vec<u8>> = conn.get(self.make_key(key)).await?;
        Ok(data.map(Bytes::from))
    }

    async fn put(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::ZeroTtl);
        }
        let mut conn = self.connection.clone();
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.make_key(&key), value.to_vec(), ttl_secs)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(self.make_key(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_resource(&self, resource: &str) -> Result<usize, CacheError> {
        let pattern = self.resource_pattern(resource);
        let mut scan_conn = self.connection.clone();
        let keys: Vec<String> = {
            let mut iter = scan_conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(&keys).await?;
        Ok(removed.max(0) as usize)
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
