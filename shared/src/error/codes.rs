//! Unified error codes for the order gateway
//!
//! This module defines all error codes used across order-server and order-router.
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Quota errors
//! - 4xxx: Order errors
//! - 90xx: System errors
//! - 91xx: Routing errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Invalid request
    InvalidRequest = 5,
    /// Request body over the size limit
    PayloadTooLarge = 6,
    /// HTTP method not allowed on this route
    MethodNotAllowed = 9,

    // ==================== 1xxx: Auth ====================
    /// No bearer token was presented
    NotAuthenticated = 1001,
    /// Invalid credentials (username/password)
    InvalidCredentials = 1002,
    /// Token has expired
    TokenExpired = 1003,
    /// Token signature or structure is invalid
    TokenMalformed = 1004,
    /// Token was revoked by logout
    TokenRevoked = 1008,
    /// Identity name is already registered
    DuplicateIdentity = 1009,
    /// Password too short
    PasswordTooShort = 1010,

    // ==================== 2xxx: Quota ====================
    /// A rate tier was exceeded
    QuotaExceeded = 2001,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Order status is not one of the known values
    OrderStatusInvalid = 4008,

    // ==================== 90xx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Shared ledger / credential store unreachable
    StoreUnavailable = 9002,

    // ==================== 91xx: Routing ====================
    /// No upstream instance is currently healthy
    NoHealthyUpstream = 9101,
    /// Every dispatch attempt failed
    UpstreamUnavailable = 9102,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Stable machine-readable name of this code
    pub const fn kind(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::PayloadTooLarge => "payload_too_large",
            ErrorCode::MethodNotAllowed => "method_not_allowed",

            ErrorCode::NotAuthenticated => "not_authenticated",
            ErrorCode::InvalidCredentials => "invalid_credentials",
            ErrorCode::TokenExpired => "token_expired",
            ErrorCode::TokenMalformed => "token_malformed",
            ErrorCode::TokenRevoked => "token_revoked",
            ErrorCode::DuplicateIdentity => "duplicate_identity",
            ErrorCode::PasswordTooShort => "password_too_short",

            ErrorCode::QuotaExceeded => "quota_exceeded",

            ErrorCode::OrderNotFound => "order_not_found",
            ErrorCode::OrderStatusInvalid => "order_status_invalid",

            ErrorCode::InternalError => "internal_error",
            ErrorCode::StoreUnavailable => "store_unavailable",

            ErrorCode::NoHealthyUpstream => "no_healthy_upstream",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
        }
    }

    /// Get the default message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::PayloadTooLarge => "Request body too large",
            ErrorCode::MethodNotAllowed => "Method not allowed",

            // Auth
            ErrorCode::NotAuthenticated => "Authentication required",
            ErrorCode::InvalidCredentials => "Invalid username or password",
            ErrorCode::TokenExpired => "Token has expired",
            ErrorCode::TokenMalformed => "Invalid token",
            ErrorCode::TokenRevoked => "Token has been revoked",
            ErrorCode::DuplicateIdentity => "Username already exists",
            ErrorCode::PasswordTooShort => "Password must be at least 6 characters",

            // Quota
            ErrorCode::QuotaExceeded => "Rate limit exceeded, try again later",

            // Order
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::OrderStatusInvalid => "Invalid order status",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::StoreUnavailable => "Backing store unavailable",

            // Routing
            ErrorCode::NoHealthyUpstream => "No healthy upstream instance available",
            ErrorCode::UpstreamUnavailable => "Upstream instances failed to respond",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::PayloadTooLarge),
            9 => Ok(ErrorCode::MethodNotAllowed),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1002 => Ok(ErrorCode::InvalidCredentials),
            1003 => Ok(ErrorCode::TokenExpired),
            1004 => Ok(ErrorCode::TokenMalformed),
            1008 => Ok(ErrorCode::TokenRevoked),
            1009 => Ok(ErrorCode::DuplicateIdentity),
            1010 => Ok(ErrorCode::PasswordTooShort),

            // Quota
            2001 => Ok(ErrorCode::QuotaExceeded),

            // Order
            4001 => Ok(ErrorCode::OrderNotFound),
            4008 => Ok(ErrorCode::OrderStatusInvalid),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::StoreUnavailable),

            // Routing
            9101 => Ok(ErrorCode::NoHealthyUpstream),
            9102 => Ok(ErrorCode::UpstreamUnavailable),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
