//! Response Cache Layer
//!
//! Read-through cache for `GET` requests:
//!
//! ```text
//! START -> LOOKUP -> hit  -> SERVE_CACHED
//!                 -> miss -> FORWARD -> 2xx, non-empty -> STORE -> SERVE_FRESH
//!                                    -> empty body           -> SERVE_FRESH
//!                                    -> private, too large   -> SERVE_FRESH (streamed)
//!                                    -> failure              -> FAIL (unchanged)
//! ```
//!
//! A failing store never fails the request: lookups that error are served
//! straight from upstream and nothing is written back.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    body::HttpBody,
    http::{header, response::Parts, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStats, CacheStore, KeyDeriver};
use crate::config::Config;
use crate::error::{CacheError, GatewayError};
use crate::gateway::upstream::is_hop_by_hop;

/// Response header reporting how the cache handled the request.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

// == Cached Response ==
/// Encoded form of an upstream response held in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Captures status, shareable headers and body of an upstream response.
    ///
    /// Hop-by-hop headers and `Set-Cookie` are left out. Returns `None` when a
    /// kept header value is not text.
    pub fn from_parts(parts: &Parts, body: &[u8]) -> Option<Self> {
        let headers = parts
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name) && **name != header::SET_COOKIE)
            .map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            status: parts.status.as_u16(),
            headers,
            body: body.to_vec(),
        })
    }

    pub fn encode(&self) -> Result<Bytes, CacheError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Rebuilds the HTTP response exactly as it was stored.
    pub fn into_response(self) -> Result<Response, CacheError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|err| CacheError::Codec(err.to_string()))?;
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| CacheError::Codec(err.to_string()))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|err| CacheError::Codec(err.to_string()))?;
            headers.append(name, value);
        }
        Ok(response)
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// == Response Cache ==
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    keys: KeyDeriver,
    ttl: Duration,
    max_body_bytes: usize,
    stats: Arc<CacheStats>,
}

impl ResponseCache {
    pub fn new(config: &Config, store: Arc<dyn CacheStore>, stats: Arc<CacheStats>) -> Self {
        Self {
            store,
            keys: KeyDeriver::from_config(config),
            ttl: config.ttl(),
            max_body_bytes: config.max_cacheable_bytes,
            stats,
        }
    }

    /// Only side-effect-free reads are served from the cache.
    pub fn is_cacheable(method: &Method) -> bool {
        method == Method::GET
    }

    pub async fn handle(&self, request: Request, next: Next) -> Response {
        if !Self::is_cacheable(request.method()) {
            return next.run(request).await;
        }

        let key = self.keys.derive(request.uri(), request.headers());

        match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => match CachedResponse::decode(&bytes).and_then(|c| c.into_response()) {
                Ok(response) => {
                    self.stats.record_hit();
                    debug!(key = %key, "cache hit");
                    return mark(response, "HIT");
                }
                // Treated as a miss; the fresh response overwrites the entry
                Err(err) => warn!(key = %key, error = %err, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(err) => {
                let err = GatewayError::CacheUnavailable(err);
                warn!(key = %key, error = %err, "cache lookup failed");
                self.stats.record_bypass();
                return mark(next.run(request).await, "BYPASS");
            }
        }

        self.stats.record_miss();
        debug!(key = %key, "cache miss");
        let response = next.run(request).await;
        if !response.status().is_success() {
            return mark(response, "MISS");
        }

        if self.ttl.is_zero() {
            return mark(response, "MISS");
        }
        if !is_shareable(response.headers()) {
            debug!(key = %key, "response is private to its caller, not caching");
            return mark(response, "MISS");
        }
        if !self.fits(&response) {
            debug!(key = %key, "body size unknown or above cacheable size, streaming through");
            return mark(response, "MISS");
        }

        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(err) => return GatewayError::Upstream(err.to_string()).into_response(),
        };

        if bytes.is_empty() {
            debug!(key = %key, "empty upstream body, not caching");
        } else {
            match CachedResponse::from_parts(&parts, &bytes) {
                Some(cached) => self.store_entry(key, cached).await,
                None => debug!(key = %key, "non-text header value, not caching"),
            }
        }

        mark(Response::from_parts(parts, Body::from(bytes)), "MISS")
    }

    /// True when the body is known to be no larger than the cacheable limit,
    /// from the body's size hint or else its `Content-Length`.
    fn fits(&self, response: &Response) -> bool {
        let limit = self.max_body_bytes as u64;
        let declared = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        match response.body().size_hint().upper().or(declared) {
            Some(size) => size <= limit,
            None => false,
        }
    }

    async fn store_entry(&self, key: CacheKey, cached: CachedResponse) {
        let encoded = match cached.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key = %key, error = %err, "could not encode response for caching");
                return;
            }
        };

        let store = self.store.clone();
        let stats = self.stats.clone();
        let ttl = self.ttl;
        // Spawned so a client disconnect cannot tear down a write already in flight
        let write = tokio::spawn(async move {
            let key = key.into_string();
            match store.put(key.clone(), encoded, ttl).await {
                Ok(()) => {
                    stats.record_store();
                    debug!(key = %key, ttl_secs = ttl.as_secs(), "cached response");
                }
                Err(err) => warn!(key = %key, error = %err, "cache write failed"),
            }
        });

        if let Err(err) = write.await {
            warn!(error = %err, "cache write task aborted");
        }
    }
}

/// False when `Cache-Control` forbids a shared cache from keeping the response.
fn is_shareable(headers: &HeaderMap) -> bool {
    !headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|directive| directive.split('=').next().unwrap_or("").trim())
        .any(|name| name.eq_ignore_ascii_case("private") || name.eq_ignore_ascii_case("no-store"))
}

fn mark(mut response: Response, outcome: &'static str) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(outcome));
    response
}
