//! Pipeline middleware
//!
//! Thin adapters from axum's `from_fn_with_state` signature to the gateway
//! stages held in [`AppState`].

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::handlers::AppState;
use crate::error::GatewayError;

/// Rejects unauthenticated requests to non-exempt paths before anything else
/// sees them.
pub async fn access_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let decision = state
        .access
        .decide(request.uri().path(), request.headers())
        .await;

    if decision.is_allowed() {
        next.run(request).await
    } else {
        state.stats.record_rejected();
        debug!(path = %request.uri().path(), "rejected unauthenticated request");
        GatewayError::Unauthenticated.into_response()
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(stage) = &state.rate_limit else {
        return next.run(request).await;
    };

    match stage.admit(request.extensions()).await {
        Ok(()) => next.run(request).await,
        Err(err) => {
            if matches!(err, GatewayError::RateLimited(_)) {
                state.stats.record_rate_limited();
            }
            err.into_response()
        }
    }
}

pub async fn invalidate_writes(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    state.invalidation.handle(request, next).await
}

pub async fn cache_reads(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.response_cache.handle(request, next).await
}
