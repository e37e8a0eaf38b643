//! Upstream pool
//!
//! The instance set is fixed when the router starts. Only liveness, the
//! probe failure count, the last probe time and the outstanding request
//! count change afterwards, all through atomics.

pub mod client;

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpstreamSpecError {
    #[error("no upstream instances configured")]
    Empty,

    #[error("invalid upstream '{0}': expected 'name=http://host:port' or 'http://host:port'")]
    Invalid(String),

    #[error("duplicate upstream name '{0}'")]
    DuplicateName(String),
}

/// Configured instance address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamDescriptor {
    pub name: String,
    pub base_url: String,
}

impl UpstreamDescriptor {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Parse a comma-separated list of `name=url` or bare `url` entries.
    /// Bare entries are named `instance-<n>`, counting from 1.
    pub fn parse_list(spec: &str) -> Result<Vec<Self>, UpstreamSpecError> {
        let mut descriptors: Vec<Self> = Vec::new();

        for (i, entry) in spec
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .enumerate()
        {
            let (name, url) = match entry.split_once('=') {
                Some((name, url)) => (name.trim().to_string(), url.trim()),
                None => (format!("instance-{}", i + 1), entry),
            };
            if name.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(UpstreamSpecError::Invalid(entry.to_string()));
            }
            if descriptors.iter().any(|d| d.name == name) {
                return Err(UpstreamSpecError::DuplicateName(name));
            }
            descriptors.push(Self::new(name, url));
        }

        if descriptors.is_empty() {
            return Err(UpstreamSpecError::Empty);
        }
        Ok(descriptors)
    }
}

/// One service instance and its live state
#[derive(Debug)]
pub struct Upstream {
    index: usize,
    name: String,
    base_url: String,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    /// Unix millis, 0 = never probed
    last_probe_ms: AtomicI64,
    outstanding: AtomicUsize,
}

impl Upstream {
    fn new(index: usize, descriptor: UpstreamDescriptor) -> Self {
        Self {
            index,
            name: descriptor.name,
            base_url: descriptor.base_url,
            // Optimistic until the first probe says otherwise
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            last_probe_ms: AtomicI64::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Count a request against this instance until the guard drops
    pub fn begin(self: &Arc<Self>) -> OutstandingGuard {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        OutstandingGuard {
            upstream: Arc::clone(self),
        }
    }

    /// Take the instance out of rotation until a probe succeeds.
    /// Returns `true` if it was healthy before.
    pub fn mark_unhealthy(&self) -> bool {
        self.healthy.swap(false, Ordering::AcqRel)
    }

    /// Record a successful probe. Returns `true` if the instance recovered.
    pub fn record_probe_success(&self, now_ms: i64) -> bool {
        self.last_probe_ms.store(now_ms, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        !self.healthy.swap(true, Ordering::AcqRel)
    }

    /// Record a failed probe. Returns `true` if this failure took the
    /// instance out of rotation.
    pub fn record_probe_failure(&self, now_ms: i64, threshold: u32) -> bool {
        self.last_probe_ms.store(now_ms, Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        failures >= threshold.max(1) && self.mark_unhealthy()
    }

    pub fn status(&self) -> UpstreamStatus {
        let last_probe = self.last_probe_ms.load(Ordering::Acquire);
        UpstreamStatus {
            name: self.name.clone(),
            url: self.base_url.clone(),
            healthy: self.is_healthy(),
            outstanding: self.outstanding(),
            consecutive_failures: self.consecutive_failures(),
            last_probe_ms: (last_probe > 0).then_some(last_probe),
        }
    }
}

/// Outstanding-request slot held for the duration of one attempt
#[derive(Debug)]
pub struct OutstandingGuard {
    upstream: Arc<Upstream>,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.upstream.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Row of `GET /router/status`
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    pub name: String,
    pub url: String,
    pub healthy: bool,
    pub outstanding: usize,
    pub consecutive_failures: u32,
    /// Unix millis of the last probe
    pub last_probe_ms: Option<i64>,
}

#[derive(Debug)]
pub struct UpstreamPool {
    upstreams: Vec<Arc<Upstream>>,
}

impl UpstreamPool {
    pub fn new(descriptors: Vec<UpstreamDescriptor>) -> Self {
        Self {
            upstreams: descriptors
                .into_iter()
                .enumerate()
                .map(|(i, d)| Arc::new(Upstream::new(i, d)))
                .collect(),
        }
    }

    pub fn upstreams(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    pub fn any_healthy(&self) -> bool {
        self.upstreams.iter().any(|u| u.is_healthy())
    }

    pub fn healthy_count(&self) -> usize {
        self.upstreams.iter().filter(|u| u.is_healthy()).count()
    }

    /// Healthy instance with the fewest outstanding requests, skipping the
    /// indices in `tried`. Ties go to the lowest index.
    pub fn select(&self, tried: &[usize]) -> Option<Arc<Upstream>> {
        self.upstreams
            .iter()
            .filter(|u| u.is_healthy() && !tried.contains(&u.index))
            .min_by_key(|u| u.outstanding())
            .cloned()
    }

    pub fn status(&self) -> Vec<UpstreamStatus> {
        self.upstreams.iter().map(|u| u.status()).collect()
    }
}
