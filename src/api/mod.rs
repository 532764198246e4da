//! API Module
//!
//! Router assembly for the gateway.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Gateway cache counters
//! - anything else - forwarded upstream through the cache pipeline

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
