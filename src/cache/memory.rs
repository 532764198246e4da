//! In-Memory Store Module
//!
//! Process-local cache store combining HashMap storage with LRU tracking and
//! TTL expiration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::cache::key::belongs_to;
use crate::cache::{CacheEntry, CacheStore, LruTracker};
use crate::error::CacheError;

// == Table ==
#[derive(Debug)]
struct Table {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    max_entries: usize,
    evictions: u64,
}

impl Table {
    fn remove(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }
}

// == In-Memory Store ==
/// A [`CacheStore`] held in process memory.
///
/// Cloning is cheap; clones share one table.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    table: Arc<RwLock<Table>>,
}

impl InMemoryStore {
    // == Constructor ==
    /// Creates a store holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            table: Arc::new(RwLock::new(Table {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                max_entries,
                evictions: 0,
            })),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.max_entries)
    }

    // == Purge Expired ==
    /// Removes all expired entries and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let mut table = self.table.write().await;
        let expired: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            table.remove(key);
        }
        expired.len()
    }

    /// Current number of entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.table.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.entries.is_empty()
    }

    /// Entries dropped to make room since the store was created.
    pub async fn evictions(&self) -> u64 {
        self.table.read().await.evictions
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        // Write lock: a hit moves the key in the LRU order
        let mut table = self.table.write().await;
        match table.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                table.remove(key);
                Ok(None)
            }
            Some(entry) => {
                let value = entry.value.clone();
                table.lru.touch(key);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::ZeroTtl);
        }
        let mut table = self.table.write().await;

        if !table.entries.contains_key(&key) && table.entries.len() >= table.max_entries {
            match table.lru.evict_oldest() {
                Some(evicted) => {
                    table.entries.remove(&evicted);
                    table.evictions += 1;
                }
                None => {
                    return Err(CacheError::Unavailable(
                        "store is full and nothing can be evicted".to_string(),
                    ))
                }
            }
        }

        table.lru.touch(&key);
        table.entries.insert(key, CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.table.write().await.remove(key))
    }

    async fn delete_resource(&self, resource: &str) -> Result<usize, CacheError> {
        let mut table = self.table.write().await;
        let matching: Vec<String> = table
            .entries
            .keys()
            .filter(|key| belongs_to(key, resource))
            .cloned()
            .collect();

        for key in &matching {
            table.remove(key);
        }
        Ok(matching.len())
    }
}
