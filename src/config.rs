//! Configuration Module
//!
//! Handles loading and managing gateway configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use axum::http::Method;
use tracing::warn;

/// A `user:password` pair accepted by the Basic credential verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicUser {
    pub username: String,
    pub password: String,
}

/// Token bucket parameters for the per-client rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Maximum tokens a client can accumulate
    pub burst: u32,
    /// Tokens added per second
    pub replenish_per_sec: u32,
}

/// Gateway configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Base URL requests are forwarded to
    pub upstream_url: String,
    /// Upstream request timeout in seconds
    pub upstream_timeout: u64,
    /// Namespace of the response cache in the store
    pub cache_name: String,
    /// Lifetime of a cached response in seconds
    pub cache_ttl: u64,
    /// Maximum number of entries the in-memory store can hold
    pub max_entries: usize,
    /// Largest response body that will be cached
    pub max_cacheable_bytes: usize,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Path patterns that skip authentication
    pub exempt_paths: Vec<String>,
    /// Routing prefix stripped from paths to obtain resource ids
    pub route_prefix: String,
    /// Methods that invalidate cached reads of their resource
    pub mutating_methods: Vec<Method>,
    /// Maximum wait for an invalidation before the write is forwarded
    pub invalidation_timeout_ms: u64,
    /// Accepted Basic credentials
    pub users: Vec<BasicUser>,
    /// Per-client rate limiting, disabled when `None`
    pub rate_limit: Option<RateLimitSettings>,
    /// Shared store location; the in-memory store is used when `None`
    pub redis_url: Option<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 8080)
    /// - `UPSTREAM_URL` - Forwarding target (default: http://127.0.0.1:8081)
    /// - `UPSTREAM_TIMEOUT` - Upstream timeout in seconds (default: 30)
    /// - `CACHE_NAME` - Store namespace (default: productCache)
    /// - `CACHE_TTL` - Entry lifetime in seconds (default: 300)
    /// - `MAX_ENTRIES` - In-memory capacity (default: 1000)
    /// - `MAX_CACHEABLE_BYTES` - Largest cached body (default: 1 MB)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `EXEMPT_PATHS` - Comma separated patterns (default: /eureka/**,/health)
    /// - `ROUTE_PREFIX` - Resource prefix (default: /api/)
    /// - `MUTATING_METHODS` - Comma separated methods (default: POST)
    /// - `INVALIDATION_TIMEOUT_MS` - Invalidation wait (default: 500)
    /// - `GATEWAY_USERS` - Comma separated `user:password` pairs (default: none)
    /// - `RATE_LIMIT_BURST`, `RATE_LIMIT_REPLENISH` - Token bucket (default: off)
    /// - `REDIS_URL` - Shared store URL (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let rate_limit = match (
            parse_var::<u32>("RATE_LIMIT_BURST"),
            parse_var::<u32>("RATE_LIMIT_REPLENISH"),
        ) {
            (Some(burst), Some(replenish_per_sec)) if burst > 0 && replenish_per_sec > 0 => {
                Some(RateLimitSettings {
                    burst,
                    replenish_per_sec,
                })
            }
            (None, None) => None,
            _ => {
                warn!("RATE_LIMIT_BURST and RATE_LIMIT_REPLENISH must both be positive; rate limiting disabled");
                None
            }
        };

        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            upstream_url: env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            upstream_timeout: parse_var("UPSTREAM_TIMEOUT").unwrap_or(defaults.upstream_timeout),
            cache_name: env::var("CACHE_NAME").unwrap_or(defaults.cache_name),
            cache_ttl: parse_var("CACHE_TTL").unwrap_or(defaults.cache_ttl),
            max_entries: parse_var("MAX_ENTRIES").unwrap_or(defaults.max_entries),
            max_cacheable_bytes: parse_var("MAX_CACHEABLE_BYTES")
                .unwrap_or(defaults.max_cacheable_bytes),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            exempt_paths: env::var("EXEMPT_PATHS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.exempt_paths),
            route_prefix: env::var("ROUTE_PREFIX").unwrap_or(defaults.route_prefix),
            mutating_methods: env::var("MUTATING_METHODS")
                .map(|v| parse_methods(&v))
                .unwrap_or(defaults.mutating_methods),
            invalidation_timeout_ms: parse_var("INVALIDATION_TIMEOUT_MS")
                .unwrap_or(defaults.invalidation_timeout_ms),
            users: env::var("GATEWAY_USERS")
                .map(|v| parse_users(&v))
                .unwrap_or(defaults.users),
            rate_limit,
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
        }
    }

    /// Cache entry lifetime as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn invalidation_timeout(&self) -> Duration {
        Duration::from_millis(self.invalidation_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 8080,
            upstream_url: "http://127.0.0.1:8081".to_string(),
            upstream_timeout: 30,
            cache_name: "productCache".to_string(),
            cache_ttl: 300,
            max_entries: 1000,
            max_cacheable_bytes: 1024 * 1024,
            cleanup_interval: 1,
            exempt_paths: vec!["/eureka/**".to_string(), "/health".to_string()],
            route_prefix: "/api/".to_string(),
            mutating_methods: vec![Method::POST],
            invalidation_timeout_ms: 500,
            users: Vec::new(),
            rate_limit: None,
            redis_url: None,
        }
    }
}

// == Parsing Helpers ==
fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_methods(raw: &str) -> Vec<Method> {
    split_list(raw)
        .into_iter()
        .filter_map(|name| match Method::from_bytes(name.to_ascii_uppercase().as_bytes()) {
            Ok(method) => Some(method),
            Err(_) => {
                warn!(method = %name, "Ignoring unrecognised mutating method");
                None
            }
        })
        .collect()
}

fn parse_users(raw: &str) -> Vec<BasicUser> {
    split_list(raw)
        .into_iter()
        .filter_map(|pair| match pair.split_once(':') {
            Some((username, password)) if !username.is_empty() => Some(BasicUser {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => {
                warn!("Ignoring malformed GATEWAY_USERS entry");
                None
            }
        })
        .collect()
}
