//! Invalidation Filter
//!
//! Writes purge cached reads of the resource they touch before being
//! forwarded. The purge is best-effort: it is waited on for a bounded time
//! and its failure never fails the write.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Request,
    http::Method,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::cache::{CacheStats, CacheStore, KeyDeriver};
use crate::config::Config;
use crate::error::GatewayError;

#[derive(Clone)]
pub struct InvalidationFilter {
    store: Arc<dyn CacheStore>,
    keys: KeyDeriver,
    mutating_methods: Arc<[Method]>,
    timeout: Duration,
    stats: Arc<CacheStats>,
}

impl InvalidationFilter {
    pub fn new(config: &Config, store: Arc<dyn CacheStore>, stats: Arc<CacheStats>) -> Self {
        Self {
            store,
            keys: KeyDeriver::from_config(config),
            mutating_methods: config.mutating_methods.clone().into(),
            timeout: config.invalidation_timeout(),
            stats,
        }
    }

    pub fn is_mutating(&self, method: &Method) -> bool {
        self.mutating_methods.contains(method)
    }

    /// Resource whose cached reads a write to `path` makes stale.
    pub fn target(&self, path: &str) -> String {
        self.keys.resource_id(path)
    }

    pub async fn handle(&self, request: Request, next: Next) -> Response {
        if self.is_mutating(request.method()) {
            // Failures are logged inside; the write goes through regardless
            let _ = self.invalidate(request.uri().path()).await;
        }
        next.run(request).await
    }

    /// Purges every cached read of the resource behind `path`.
    ///
    /// Returns the number of entries removed, or the failure that was logged.
    pub async fn invalidate(&self, path: &str) -> Result<usize, GatewayError> {
        let target = self.target(path);
        let store = self.store.clone();
        let resource = target.clone();
        let mut delete = tokio::spawn(async move { store.delete_resource(&resource).await });

        // On timeout the spawned delete keeps running; only the wait is abandoned
        let reason = match tokio::time::timeout(self.timeout, &mut delete).await {
            Ok(Ok(Ok(removed))) => {
                self.stats.record_invalidation();
                debug!(target = %target, removed, "invalidated cached reads");
                return Ok(removed);
            }
            Ok(Ok(Err(err))) => err.to_string(),
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("still pending after {}ms", self.timeout.as_millis()),
        };

        let err = GatewayError::InvalidationFailure { target, reason };
        self.stats.record_invalidation_failure();
        warn!(error = %err, "forwarding write without a confirmed invalidation");
        Err(err)
    }
}
