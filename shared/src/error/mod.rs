//! Unified error system for the order gateway
//!
//! This module provides the error handling system shared by every crate:
//! - [`ErrorCode`]: Standardized error codes for all error types
//! - [`ErrorCategory`]: Classification of errors by domain
//! - [`AppError`]: Rich error type with codes, messages, and details
//! - [`ErrorResponse`]: The JSON envelope clients receive
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Quota errors
//! - 4xxx: Order errors
//! - 90xx: System errors
//! - 91xx: Routing errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode, ErrorResponse};
//!
//! let err = AppError::new(ErrorCode::TokenRevoked);
//! let err = AppError::validation("Items must be a non-empty list")
//!     .with_detail("field", "items");
//! let body = ErrorResponse::from_error(&err);
//! assert_eq!(body.kind, "validation_failed");
//! ```

mod category;
mod codes;
mod http;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{AppError, AppResult, ErrorResponse};
