//! Axum HTTP API for the vedit pipeline.
//!
//! This crate provides:
//! - Job submission with chain, parameter and source validation
//! - Status, listing, cancel, retry and artifact download for job owners
//! - Queue depths for admins
//! - Bearer-token identity, rate limiting, security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use auth::{AuthUser, Claims, IdentityVerifier, JwtVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use services::JobService;
pub use state::AppState;
