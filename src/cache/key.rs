//! Cache Key Derivation
//!
//! Maps an inbound read request to a stable cache key of the form
//! `{resource}_{fingerprint}`. The resource segment is shared with the
//! invalidation filter so a write to a resource purges every cached variant
//! of it.

use std::fmt;

use axum::http::{header, HeaderMap, HeaderName, Uri};
use sha2::{Digest, Sha256};

/// Headers that identify the caller and must not fragment the cache.
pub const CREDENTIAL_HEADERS: [HeaderName; 2] =
    [header::AUTHORIZATION, header::PROXY_AUTHORIZATION];

/// Length of the hex fingerprint suffix.
pub const FINGERPRINT_LEN: usize = 16;

// == Cache Key ==
/// Derived identifier used to look up and store a response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns true when `key` was derived for exactly `resource`.
///
/// A plain prefix test is not enough: `products_archive_<fp>` must not match
/// resource `products`.
pub fn belongs_to(key: &str, resource: &str) -> bool {
    key.len() == resource.len() + 1 + FINGERPRINT_LEN
        && key.starts_with(resource)
        && key.as_bytes()[resource.len()] == b'_'
        && key[resource.len() + 1..]
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
}

// == Key Deriver ==
/// Derives cache keys and resource ids with one shared normalisation rule.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    route_prefix: String,
}

impl KeyDeriver {
    /// A non-empty prefix always ends in `/`, so `/api` never matches `/apix`.
    pub fn new(route_prefix: impl Into<String>) -> Self {
        let mut route_prefix = collapse_slashes(&route_prefix.into());
        if !route_prefix.is_empty() && !route_prefix.ends_with('/') {
            route_prefix.push('/');
        }
        Self { route_prefix }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.route_prefix.clone())
    }

    /// Resource identifier of a request path.
    ///
    /// Repeated slashes are collapsed first. `/api/products/` with prefix
    /// `/api/` yields `products` and the prefix itself yields the empty id.
    /// Paths outside the prefix keep their leading slash (`/` stays `/`), so
    /// they never collide with a prefixed resource.
    pub fn resource_id(&self, path: &str) -> String {
        let path = collapse_slashes(path);
        match path.strip_prefix(self.route_prefix.as_str()) {
            Some(rest) if !self.route_prefix.is_empty() => rest.trim_end_matches('/').to_string(),
            _ => match path.trim_end_matches('/') {
                "" => "/".to_string(),
                trimmed => trimmed.to_string(),
            },
        }
    }

    /// Derives the cache key for a read request.
    pub fn derive(&self, uri: &Uri, headers: &HeaderMap) -> CacheKey {
        let resource = self.resource_id(uri.path());
        let fingerprint = fingerprint(uri.query().unwrap_or(""), headers);
        CacheKey(format!("{resource}_{fingerprint}"))
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

/// Stable digest of the query string and the non-credential header set.
fn fingerprint(query: &str, headers: &HeaderMap) -> String {
    let mut pairs: Vec<(&str, &[u8])> = headers
        .iter()
        .filter(|(name, _)| !CREDENTIAL_HEADERS.contains(*name))
        .map(|(name, value)| (name.as_str(), value.as_bytes()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"\n");
    for (name, value) in pairs {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value);
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..FINGERPRINT_LEN / 2])
}
