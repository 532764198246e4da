//! Response models for the gateway's own endpoints
//!
//! Proxied traffic is passed through untouched; only `/health` and `/stats`
//! produce bodies owned by the gateway.

pub mod responses;

pub use responses::{HealthResponse, StatsResponse};
