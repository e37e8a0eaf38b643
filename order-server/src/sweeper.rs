//! Periodic ledger sweep
//!
//! Expired counters and revocation markers are already ignored on read; the
//! sweep only reclaims their storage.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::store::Ledger;

pub struct LedgerSweeper {
    ledger: Arc<dyn Ledger>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl LedgerSweeper {
    pub fn new(ledger: Arc<dyn Ledger>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            ledger,
            interval,
            shutdown,
        }
    }

    /// Main loop, returns once shutdown is requested
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Ledger sweeper started");

        let mut interval = tokio::time::interval(self.interval);
        // First tick completes immediately; nothing has expired yet
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => self.sweep_once().await,
            }
        }

        tracing::info!("Ledger sweeper stopped");
    }

    async fn sweep_once(&self) {
        match self.ledger.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Purged expired ledger entries"),
            Err(e) => tracing::warn!(error = %e, "Ledger sweep failed"),
        }
    }
}
