//! Request dispatch with failover
//!
//! Each attempt goes to the least-loaded healthy instance not yet tried for
//! this request. A transient failure takes the instance out of rotation and
//! the request moves on after the policy's backoff. Non-transient responses
//! (401, 429 and other 4xx included) are returned as they are.

use http::StatusCode;
use shared::{AppError, ErrorCode};
use std::sync::Arc;
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::upstream::UpstreamPool;
use crate::upstream::client::{AttemptError, ForwardRequest, ForwardResponse, UpstreamClient};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no healthy upstream instance")]
    NoHealthyUpstream,

    #[error("upstream unavailable after {attempts} attempt(s): {last_error}")]
    UpstreamUnavailable {
        attempts: u32,
        last_error: AttemptError,
    },
}

impl From<RoutingError> for AppError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::NoHealthyUpstream => AppError::new(ErrorCode::NoHealthyUpstream),
            RoutingError::UpstreamUnavailable {
                attempts,
                last_error,
            } => AppError::new(ErrorCode::UpstreamUnavailable)
                .with_detail("attempts", attempts)
                .with_detail("last_error", last_error.to_string()),
        }
    }
}

/// Successful dispatch
#[derive(Debug)]
pub struct Dispatched {
    pub response: ForwardResponse,
    /// Name of the instance that answered
    pub instance: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

pub struct Dispatcher {
    pool: Arc<UpstreamPool>,
    client: Arc<dyn UpstreamClient>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<UpstreamPool>,
        client: Arc<dyn UpstreamClient>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            client,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<UpstreamPool> {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn dispatch(&self, request: ForwardRequest) -> Result<Dispatched, RoutingError> {
        if !self.pool.any_healthy() {
            tracing::warn!(
                method = %request.method,
                path = %request.path_and_query,
                "No healthy upstream"
            );
            return Err(RoutingError::NoHealthyUpstream);
        }

        let mut tried: Vec<usize> = Vec::with_capacity(self.policy.max_attempts as usize);
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            let Some(upstream) = self.pool.select(&tried) else {
                break;
            };
            tried.push(upstream.index());

            let result = {
                let _guard = upstream.begin();
                let forward = self.client.forward(&upstream, request.clone());
                tokio::time::timeout(self.policy.attempt_timeout, forward)
                    .await
                    .unwrap_or(Err(AttemptError::Timeout))
            };

            let error = match result {
                Ok(response) if !self.policy.is_retryable_status(response.status) => {
                    if attempt > 0 {
                        tracing::info!(
                            upstream = upstream.name(),
                            attempts = attempt + 1,
                            "Request succeeded after failover"
                        );
                    }
                    return Ok(Dispatched {
                        response,
                        instance: upstream.name().to_string(),
                        attempts: attempt + 1,
                    });
                }
                Ok(response) => AttemptError::Status(response.status),
                Err(e) => e,
            };

            if !self.policy.should_retry(&error) {
                tracing::warn!(
                    upstream = upstream.name(),
                    error = %error,
                    "Attempt failed, not retryable"
                );
                return Err(RoutingError::UpstreamUnavailable {
                    attempts: attempt + 1,
                    last_error: error,
                });
            }

            if upstream.mark_unhealthy() {
                tracing::warn!(
                    upstream = upstream.name(),
                    error = %error,
                    "Upstream taken out of rotation"
                );
            }
            last_error = Some(error);

            let has_next =
                attempt + 1 < self.policy.max_attempts && self.pool.select(&tried).is_some();
            if has_next {
                tokio::time::sleep(self.policy.calculate_delay(attempt)).await;
            }
        }

        let attempts = tried.len() as u32;
        let last_error =
            last_error.unwrap_or(AttemptError::Status(StatusCode::SERVICE_UNAVAILABLE));
        tracing::error!(
            attempts,
            error = %last_error,
            "Upstream unavailable, retry budget exhausted"
        );
        Err(RoutingError::UpstreamUnavailable {
            attempts,
            last_error,
        })
    }
}
