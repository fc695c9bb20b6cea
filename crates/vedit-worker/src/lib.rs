//! Stage worker for the vedit pipeline.
//!
//! This crate provides:
//! - Pure admission and transition rules for the stage chain
//! - The per-delivery stage handler
//! - Per-stage consumer pools with delayed-retry promotion and stale claims
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod transition;

pub use config::{StageSettings, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::StageExecutor;
pub use handler::{HandleOutcome, StageHandler};
pub use logging::JobLogger;
pub use retry::{BackoffPolicy, RetryPolicy};
pub use transition::{admit, transition, Admission, NextAction, StageOutcome};
