//! API Handlers
//!
//! Gateway-owned endpoints and the terminal forwarding handler.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
    Json,
};

use crate::cache::{CacheStats, CacheStore};
use crate::config::Config;
use crate::error::Result;
use crate::gateway::{
    AccessGate, CredentialVerifier, InvalidationFilter, RateLimit, RateLimiter, ResponseCache,
    Upstream,
};
use crate::models::{HealthResponse, StatsResponse};

/// Application state shared across all handlers and pipeline stages.
///
/// Every component is built from one [`Config`]; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub access: AccessGate,
    /// Present only when rate limiting is configured
    pub rate_limit: Option<RateLimit>,
    pub invalidation: InvalidationFilter,
    pub response_cache: ResponseCache,
    pub upstream: Arc<dyn Upstream>,
    pub stats: Arc<CacheStats>,
}

impl AppState {
    /// Wires every pipeline stage from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        let stats = Arc::new(CacheStats::new());
        Self {
            access: AccessGate::from_config(config),
            rate_limit: RateLimit::from_config(config),
            invalidation: InvalidationFilter::new(config, store.clone(), stats.clone()),
            response_cache: ResponseCache::new(config, store, stats.clone()),
            upstream,
            stats,
        }
    }

    /// Replaces the credential collaborator of the access gate.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.access = self.access.with_verifier(verifier);
        self
    }

    /// Installs a rate limiter regardless of configuration.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limit = Some(RateLimit::new(limiter));
        self
    }
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.stats.snapshot()))
}

/// Terminal stage: hands the request to the upstream service.
pub async fn forward_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    state.upstream.forward(request).await
}
