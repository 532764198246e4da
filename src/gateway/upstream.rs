//! Upstream forwarding
//!
//! The gateway hands every request that survives the pipeline to an
//! [`Upstream`]. [`HttpUpstream`] is a single-target pass-through; routing
//! tables and balancing are outside this crate.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderName, Uri},
    response::Response,
};
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Sends the request onward and returns whatever the backing service answered.
    ///
    /// Only transport-level problems are errors; 4xx/5xx answers are responses.
    async fn forward(&self, request: Request) -> Result<Response>;
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

/// Removes hop-by-hop headers before a message crosses the gateway.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

// == HTTP Upstream ==
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Internal(format!("building upstream client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Self::new(
            config.upstream_url.clone(),
            Duration::from_secs(config.upstream_timeout),
        )
    }

    /// Absolute upstream URL for an inbound request URI.
    pub fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|err| GatewayError::Internal(format!("reading request body: {err}")))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let url = self.target_url(&parts.uri);
        debug!(method = %parts.method, url = %url, "forwarding upstream");

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(map_client_error)?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let bytes = upstream.bytes().await.map_err(map_client_error)?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn map_client_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::UpstreamTimeout
    } else {
        GatewayError::Upstream(err.to_string())
    }
}
