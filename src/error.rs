//! Error types for the gateway cache
//!
//! Store-level failures (`CacheError`) are recovered inside the pipeline;
//! request-level failures (`GatewayError`) become HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised by a cache store.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Store could not be reached or refused the operation
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded
    #[error("Cache codec error: {0}")]
    Codec(String),

    /// Entries must outlive the write that creates them
    #[error("Cache entry TTL must be positive")]
    ZeroTtl,

    #[cfg(feature = "redis-store")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

// == Gateway Error Enum ==
/// Request-level error taxonomy of the gateway pipeline.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Caller did not present valid credentials
    #[error("Authentication required")]
    Unauthenticated,

    /// Caller exceeded its request budget
    #[error("Too many requests from {0}")]
    RateLimited(String),

    /// Upstream could not be reached or returned an unreadable response
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Upstream did not answer in time
    #[error("Upstream timed out")]
    UpstreamTimeout,

    /// Store was unreachable during a lookup; the request is served uncached
    #[error("Cache unavailable, bypassing: {0}")]
    CacheUnavailable(#[from] CacheError),

    /// Cache entries for a written resource could not be purged
    #[error("Invalidation of '{target}' failed: {reason}")]
    InvalidationFailure { target: String, reason: String },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::CacheUnavailable(_)
            | GatewayError::InvalidationFailure { .. }
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="gateway""#),
            );
        }
        response
    }
}

// == Result Type Alias ==
/// Convenience Result type for the gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;
