//! order-server - one instance of the order API
//!
//! Every request passes credential validation ([`auth`]) and quota
//! accounting ([`quota`]) before reaching the order handlers ([`api`]).
//! Sessions and quota counters live in shared stores ([`store`]) so any
//! number of instances behind the router behave as one.

pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
pub mod orders;
pub mod quota;
pub mod state;
pub mod store;
pub mod sweeper;

pub use config::Config;
pub use state::AppState;

// Security logging macro
#[macro_export]
macro_rules! security_log {
    ($level:expr, $event:expr, $($key:ident = $value:expr),*) => {
        tracing::info!(
            target: "security",
            level = $level,
            event = $event,
            $($key = $value),*
        );
    };
}
