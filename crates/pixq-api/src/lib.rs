//! Axum HTTP API server.
//!
//! This crate provides:
//! - Multipart image upload into object storage
//! - Transformation requests: chain building, persistence and head publication
//! - Job lookup and single-stage encode requests
//! - Liveness/readiness probes and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
