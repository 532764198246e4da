//! Access Gate
//!
//! Binary authenticated/unauthenticated decision per request path. Paths
//! matching an exempt pattern pass without credentials; everything else must
//! satisfy a [`CredentialVerifier`] before any routing or caching happens.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::config::{BasicUser, Config};

// == Path Patterns ==
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*`: exactly one segment
    Any,
    /// `**`: zero or more segments
    Rest,
}

/// Ant-style path pattern such as `/eureka/**` or `/services/*/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Self {
        let segments = split_path(raw)
            .map(|segment| match segment {
                "**" => Segment::Rest,
                "*" => Segment::Any,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = split_path(path).collect();
        match_segments(&self.segments, &path)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::Rest, rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((segment, rest)) => match path.split_first() {
            Some((head, tail)) => {
                let head_matches = match segment {
                    Segment::Literal(literal) => literal == head,
                    _ => true,
                };
                head_matches && match_segments(rest, tail)
            }
            None => false,
        },
    }
}

// == Credential Verification ==
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    /// Returns true when the request headers carry acceptable credentials.
    async fn verify(&self, headers: &HeaderMap) -> bool;
}

/// HTTP Basic verifier over a fixed user table.
///
/// With an empty table every request is rejected.
#[derive(Debug, Clone, Default)]
pub struct BasicAuthVerifier {
    users: HashMap<String, String>,
}

impl BasicAuthVerifier {
    pub fn new(users: impl IntoIterator<Item = BasicUser>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.username, user.password))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Extracts `(user, password)` from an `Authorization: Basic ...` header.
pub fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl CredentialVerifier for BasicAuthVerifier {
    async fn verify(&self, headers: &HeaderMap) -> bool {
        match parse_basic(headers) {
            Some((user, password)) => self.users.get(&user) == Some(&password),
            None => false,
        }
    }
}

// == Access Gate ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Path is exempt from authentication
    Permit,
    Authenticated,
    Rejected,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, AccessDecision::Rejected)
    }
}

#[derive(Clone)]
pub struct AccessGate {
    exempt: Arc<[PathPattern]>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl AccessGate {
    pub fn new(
        exempt: impl IntoIterator<Item = PathPattern>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            exempt: exempt.into_iter().collect(),
            verifier,
        }
    }

    /// Gate using the configured exempt paths and Basic users.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.exempt_paths.iter().map(|p| PathPattern::parse(p)),
            Arc::new(BasicAuthVerifier::new(config.users.clone())),
        )
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt.iter().any(|pattern| pattern.matches(path))
    }

    pub async fn decide(&self, path: &str, headers: &HeaderMap) -> AccessDecision {
        if self.is_exempt(path) {
            AccessDecision::Permit
        } else if self.verifier.verify(headers).await {
            AccessDecision::Authenticated
        } else {
            AccessDecision::Rejected
        }
    }
}
