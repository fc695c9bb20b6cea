//! Request handlers.

pub mod admin;
pub mod health;
pub mod jobs;

pub use admin::*;
pub use health::*;
pub use jobs::*;
