//! Quota enforcement
//!
//! - [`policy`] - tiers, rate strings and route classification
//! - [`enforcer`] - counting against the shared ledger
//! - [`middleware`] - the axum layer

pub mod enforcer;
pub mod middleware;
pub mod policy;

pub use enforcer::{QuotaEnforcer, QuotaError, Subject};
pub use middleware::{enforce_quota, extract_ip};
pub use policy::{PolicyError, QuotaPolicy, RouteClass, Tier};
