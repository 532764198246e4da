//! Gateway Pipeline Module
//!
//! Request-processing stages placed in front of the upstream service, in
//! pipeline order:
//! - Access gate: rejects unauthenticated requests to non-exempt paths
//! - Rate limit: per-client budget keyed by remote address
//! - Invalidation filter: purges cached reads of a resource on writes
//! - Response cache: serves reads from the store, populating it on misses
//! - Upstream: forwards whatever reaches the end of the pipeline

pub mod access;
pub mod invalidation;
pub mod rate_limit;
pub mod response_cache;
pub mod upstream;

pub use access::{AccessDecision, AccessGate, BasicAuthVerifier, CredentialVerifier, PathPattern};
pub use invalidation::InvalidationFilter;
pub use rate_limit::{
    RateLimit, RateLimitKey, RateLimitKeyResolver, RateLimiter, TokenBucketLimiter,
};
pub use response_cache::{CachedResponse, ResponseCache, X_CACHE};
pub use upstream::{HttpUpstream, Upstream};
