//! API Routes
//!
//! Configures the Axum router: admin endpoints plus the caching pipeline in
//! front of the upstream.

use axum::{handler::Handler, middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{forward_handler, health_handler, stats_handler, AppState};
use super::middleware::{access_gate, cache_reads, invalidate_writes, rate_limit};

/// Creates the main router.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /stats` - Cache counters
/// - everything else is proxied to the upstream
///
/// # Middleware (outermost first)
/// - Tracing: logs all requests
/// - Access gate: 401 for unauthenticated, non-exempt requests
/// - Rate limit: 429 once a client's budget is spent (when configured)
/// - Invalidation, then response cache: proxied traffic only
pub fn create_router(state: AppState) -> Router {
    let pipeline = ServiceBuilder::new()
        .layer(from_fn_with_state(state.clone(), invalidate_writes))
        .layer(from_fn_with_state(state.clone(), cache_reads))
        .service(forward_handler.with_state(state.clone()));

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .fallback_service(pipeline)
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn_with_state(state.clone(), access_gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
