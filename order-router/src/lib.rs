//! order-router - public load balancer in front of order-server instances
//!
//! - [`upstream`] - the fixed instance pool and its live state
//! - [`probe`] - background liveness probing
//! - [`retry`] - the retry policy
//! - [`dispatch`] - least-outstanding selection with failover
//! - [`proxy`] - the public HTTP listener

pub mod config;
pub mod dispatch;
pub mod probe;
pub mod proxy;
pub mod retry;
pub mod upstream;

pub use config::RouterConfig;
pub use dispatch::{Dispatched, Dispatcher, RoutingError};
pub use probe::{ProbeSettings, Prober};
pub use proxy::{RouterState, create_router};
pub use retry::RetryPolicy;
pub use upstream::client::{
    AttemptError, ForwardRequest, ForwardResponse, HttpUpstreamClient, UpstreamClient,
};
pub use upstream::{UpstreamDescriptor, UpstreamPool};
