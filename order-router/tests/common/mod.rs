//! Scripted upstream client for dispatch and probe tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use http::{HeaderMap, Method, StatusCode};
use order_router::upstream::Upstream;
use order_router::{
    AttemptError, Dispatcher, ForwardRequest, ForwardResponse, RetryPolicy, UpstreamClient,
    UpstreamDescriptor, UpstreamPool,
};

/// How a scripted instance answers
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Respond(StatusCode),
    Refuse,
    Hang,
}

#[derive(Default)]
pub struct ScriptedClient {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedClient {
    pub fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        let client = Self::default();
        for (name, behavior) in behaviors {
            client.set(name, *behavior);
        }
        Arc::new(client)
    }

    pub fn set(&self, name: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(name.to_string(), behavior);
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn behavior(&self, name: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(Behavior::Respond(StatusCode::OK))
    }

    async fn act(&self, name: &str) -> Result<StatusCode, AttemptError> {
        *self.calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        match self.behavior(name) {
            Behavior::Respond(status) => Ok(status),
            Behavior::Refuse => Err(AttemptError::Connect("connection refused".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(AttemptError::Timeout)
            }
        }
    }
}

#[async_trait]
impl UpstreamClient for ScriptedClient {
    async fn forward(
        &self,
        upstream: &Upstream,
        _request: ForwardRequest,
    ) -> Result<ForwardResponse, AttemptError> {
        let status = self.act(upstream.name()).await?;
        Ok(ForwardResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(format!("{{\"instance\":\"{}\"}}", upstream.name())),
        })
    }

    async fn probe(&self, upstream: &Upstream) -> Result<(), AttemptError> {
        match self.act(upstream.name()).await? {
            status if status.is_success() => Ok(()),
            status => Err(AttemptError::Status(status)),
        }
    }
}

/// Pool of `n` instances named `i0..i<n>`
pub fn pool(n: usize) -> Arc<UpstreamPool> {
    Arc::new(UpstreamPool::new(
        (0..n)
            .map(|i| {
                UpstreamDescriptor::new(format!("i{i}"), format!("http://10.0.0.{i}:5000"))
            })
            .collect(),
    ))
}

/// Policy with no backoff so failover tests run instantly
pub fn quick_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts)
        .with_backoff(Duration::ZERO, 2, Duration::ZERO)
        .with_attempt_timeout(Duration::from_millis(200))
}

pub fn dispatcher(
    pool: &Arc<UpstreamPool>,
    client: &Arc<ScriptedClient>,
    policy: RetryPolicy,
) -> Dispatcher {
    Dispatcher::new(pool.clone(), client.clone(), policy)
}

pub fn get(path: &str) -> ForwardRequest {
    ForwardRequest {
        method: Method::GET,
        path_and_query: path.to_string(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}
