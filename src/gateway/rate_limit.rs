//! Per-client rate limiting
//!
//! The gateway partitions clients by remote IP address. The limiter itself is
//! a collaborator behind [`RateLimiter`]; [`TokenBucketLimiter`] is the
//! process-local one installed from configuration.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::http::Extensions;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{Config, RateLimitSettings};
use crate::error::{GatewayError, Result};

/// Number of tracked clients above which idle buckets are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

// == Rate Limit Key ==
/// Partition key handed to the limiter: the caller's IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitKeyResolver;

impl RateLimitKeyResolver {
    /// Reads the peer address recorded by the connection layer.
    ///
    /// The server must be started with connect info; a missing address is a
    /// deployment error and is reported rather than defaulted.
    pub fn resolve(&self, extensions: &Extensions) -> Result<RateLimitKey> {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| RateLimitKey(addr.ip().to_string()))
            .ok_or_else(|| {
                GatewayError::Internal("remote address unavailable for rate limiting".to_string())
            })
    }
}

// == Limiter ==
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Consumes one request from `key`'s budget; false when exhausted.
    async fn check(&self, key: &RateLimitKey) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

#[derive(Debug)]
pub struct TokenBucketLimiter {
    settings: RateLimitSettings,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        let burst = f64::from(self.settings.burst);
        bucket.tokens = (bucket.tokens + elapsed * f64::from(self.settings.replenish_per_sec)).min(burst);
        bucket.updated = now;
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn check(&self, key: &RateLimitKey) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        if buckets.len() >= PRUNE_THRESHOLD {
            let burst = f64::from(self.settings.burst);
            let replenish = f64::from(self.settings.replenish_per_sec);
            // A bucket that would be full again carries no state worth keeping
            buckets.retain(|_, b| {
                b.tokens + now.saturating_duration_since(b.updated).as_secs_f64() * replenish < burst
            });
        }

        let bucket = buckets.entry(key.0.clone()).or_insert(Bucket {
            tokens: f64::from(self.settings.burst),
            updated: now,
        });
        self.refill(bucket, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Resolver and limiter pair installed as one pipeline stage.
#[derive(Clone)]
pub struct RateLimit {
    pub resolver: RateLimitKeyResolver,
    pub limiter: Arc<dyn RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            resolver: RateLimitKeyResolver,
            limiter,
        }
    }

    /// Token bucket stage when configured, `None` otherwise.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .rate_limit
            .map(|settings| Self::new(Arc::new(TokenBucketLimiter::new(settings))))
    }

    /// Resolves the caller and consumes one unit of its budget.
    pub async fn admit(&self, extensions: &Extensions) -> Result<()> {
        let key = self.resolver.resolve(extensions)?;
        if self.limiter.check(&key).await {
            Ok(())
        } else {
            Err(GatewayError::RateLimited(key.0))
        }
    }
}
