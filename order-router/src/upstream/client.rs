//! Transport to upstream instances

use async_trait::async_trait;
use axum::body::Bytes;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

use super::Upstream;

/// Path probed for liveness on every instance
pub const PROBE_PATH: &str = "/api/health";

/// Why one attempt against one instance failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("attempt timed out")]
    Timeout,

    #[error("upstream responded {0}")]
    Status(StatusCode),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout
        } else if e.is_connect() {
            AttemptError::Connect(e.to_string())
        } else if e.is_builder() {
            AttemptError::InvalidRequest(e.to_string())
        } else {
            AttemptError::Transport(e.to_string())
        }
    }
}

/// Buffered request, replayable on every attempt
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path and query, e.g. `/api/orders?page=2`
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Buffered upstream response
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send one request to `upstream`. Any HTTP response is `Ok`, whatever
    /// its status; the dispatcher decides what a status means.
    async fn forward(
        &self,
        upstream: &Upstream,
        request: ForwardRequest,
    ) -> Result<ForwardResponse, AttemptError>;

    /// One liveness check. Only a 2xx counts as alive.
    async fn probe(&self, upstream: &Upstream) -> Result<(), AttemptError>;
}

/// reqwest-backed client
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    http: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn forward(
        &self,
        upstream: &Upstream,
        request: ForwardRequest,
    ) -> Result<ForwardResponse, AttemptError> {
        let url = format!("{}{}", upstream.base_url(), request.path_and_query);
        let response = self
            .http
            .request(request.method, url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(ForwardResponse {
            status,
            headers,
            body,
        })
    }

    async fn probe(&self, upstream: &Upstream) -> Result<(), AttemptError> {
        let url = format!("{}{}", upstream.base_url(), PROBE_PATH);
        let response = self.http.get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AttemptError::Status(response.status()))
        }
    }
}
