//! Business logic services.

pub mod jobs;

pub use jobs::JobService;
