//! Liveness prober
//!
//! Probes every instance on a fixed interval, independent of traffic. An
//! instance leaves rotation after `unhealthy_threshold` consecutive failed
//! probes and rejoins on the first successful one.

use futures::future::join_all;
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::upstream::client::{AttemptError, UpstreamClient};
use crate::upstream::{Upstream, UpstreamPool};

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
        }
    }
}

pub struct Prober {
    pool: Arc<UpstreamPool>,
    client: Arc<dyn UpstreamClient>,
    settings: ProbeSettings,
}

impl Prober {
    pub fn new(
        pool: Arc<UpstreamPool>,
        client: Arc<dyn UpstreamClient>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            pool,
            client,
            settings,
        }
    }

    /// Main loop: probe immediately, then every interval until shutdown
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            instances = self.pool.len(),
            interval_secs = self.settings.interval.as_secs(),
            "Prober started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.probe_all().await,
            }
        }

        tracing::info!("Prober stopped");
    }

    /// One probe round over every instance, concurrently
    pub async fn probe_all(&self) {
        join_all(self.pool.upstreams().iter().map(|u| self.probe_one(u))).await;
    }

    async fn probe_one(&self, upstream: &Upstream) {
        let probe = self.client.probe(upstream);
        let result = tokio::time::timeout(self.settings.timeout, probe)
            .await
            .unwrap_or(Err(AttemptError::Timeout));

        let now = now_millis();
        match result {
            Ok(()) => {
                if upstream.record_probe_success(now) {
                    tracing::info!(upstream = upstream.name(), "Upstream back in rotation");
                }
            }
            Err(e) => {
                let failures = upstream.consecutive_failures() + 1;
                if upstream.record_probe_failure(now, self.settings.unhealthy_threshold) {
                    tracing::warn!(
                        upstream = upstream.name(),
                        failures,
                        error = %e,
                        "Upstream taken out of rotation"
                    );
                } else {
                    tracing::debug!(
                        upstream = upstream.name(),
                        failures,
                        error = %e,
                        "Probe failed"
                    );
                }
            }
        }
    }
}
