//! Response DTOs for the gateway admin endpoints

use serde::Serialize;

use crate::cache::StatsSnapshot;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Reads served from the cache
    pub hits: u64,
    /// Reads forwarded because no entry existed
    pub misses: u64,
    /// Responses written to the cache
    pub stores: u64,
    /// Reads forwarded because the store could not be consulted
    pub bypasses: u64,
    pub invalidations: u64,
    pub invalidation_failures: u64,
    /// Requests turned away by the access gate
    pub rejected: u64,
    pub rate_limited: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<StatsSnapshot> for StatsResponse {
    fn from(snapshot: StatsSnapshot) -> Self {
        Self {
            hits: snapshot.hits,
            misses: snapshot.misses,
            stores: snapshot.stores,
            bypasses: snapshot.bypasses,
            invalidations: snapshot.invalidations,
            invalidation_failures: snapshot.invalidation_failures,
            rejected: snapshot.rejected,
            rate_limited: snapshot.rate_limited,
            hit_rate: snapshot.hit_rate(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
