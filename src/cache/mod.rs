//! Cache Module
//!
//! Cache key derivation, the store interface and its implementations.

mod entry;
pub mod key;
mod lru;
mod memory;
#[cfg(feature = "redis-store")]
mod redis;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use key::{CacheKey, KeyDeriver};
pub use lru::LruTracker;
pub use memory::InMemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
pub use stats::{CacheStats, StatsSnapshot};
pub use store::CacheStore;
