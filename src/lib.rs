//! Gateway Cache - a caching reverse proxy for read-heavy APIs
//!
//! Serves repeated GETs from a shared response cache and purges a resource's
//! cached reads whenever a write to it passes through.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use tasks::spawn_cleanup_task;
