//! Shared types for the order gateway
//!
//! Common types used across order-server and order-router: error types,
//! the error envelope, auth and order DTOs, and time helpers.

pub mod client;
pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use error::{AppError, AppResult, ErrorCode, ErrorResponse};
