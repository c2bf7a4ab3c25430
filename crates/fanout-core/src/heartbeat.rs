//! Heartbeat monitor.
//!
//! Each sweep is mark-then-check: a client whose alive flag is still clear
//! from the previous sweep is evicted, every other client has its flag
//! cleared and gets a probe. A client therefore has one full interval to
//! answer before it is dropped.

use crate::client::ClientId;
use crate::hub::{EvictionReason, Hub};
use crate::transport::ProbeOutcome;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Clients probed successfully.
    pub probed: usize,
    /// Clients evicted by this sweep.
    pub evicted: Vec<ClientId>,
}

/// Periodically probes clients and evicts the unresponsive ones.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    hub: Arc<Hub>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HeartbeatMonitor {
    /// Monitor using the hub's heartbeat interval and write timeout.
    pub fn new(hub: Arc<Hub>) -> Self {
        let interval = hub.config().heartbeat_interval();
        let probe_timeout = hub.config().write_timeout();
        Self {
            hub,
            interval,
            probe_timeout,
        }
    }

    /// Override the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sweep interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep.
    pub async fn sweep(&self) -> SweepReport {
        let mut evictions = Vec::new();
        let mut candidates = Vec::new();

        for entry in self.hub.registry().entries() {
            if entry.take_alive() {
                candidates.push(entry);
            } else {
                evictions.push((entry.id.clone(), EvictionReason::HeartbeatTimeout));
            }
        }

        let timeout = self.probe_timeout;
        let results = join_all(
            candidates
                .iter()
                .map(|entry| tokio::time::timeout(timeout, entry.transport.probe())),
        )
        .await;

        let mut probed = 0;
        for (entry, result) in candidates.iter().zip(results) {
            match result {
                Ok(Ok(ProbeOutcome::AwaitResponse)) => probed += 1,
                Ok(Ok(ProbeOutcome::Confirmed)) => {
                    probed += 1;
                    entry.mark_alive();
                }
                Ok(Err(err)) => {
                    debug!(client_id = %entry.id, error = %err, "Heartbeat probe failed");
                    evictions.push((entry.id.clone(), EvictionReason::ProbeFailure));
                }
                Err(_) => {
                    debug!(client_id = %entry.id, "Heartbeat probe timed out");
                    evictions.push((entry.id.clone(), EvictionReason::ProbeFailure));
                }
            }
        }

        let evicted = evictions.iter().map(|(id, _)| id.clone()).collect();
        self.hub.evict_all(evictions).await;

        SweepReport { probed, evicted }
    }

    /// Sweep every interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_ms = self.interval.as_millis() as u64, "Heartbeat monitor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if !report.evicted.is_empty() {
                        info!(
                            probed = report.probed,
                            evicted = report.evicted.len(),
                            "Heartbeat sweep evicted clients"
                        );
                    }
                }
            }
        }
        debug!("Heartbeat monitor stopped");
    }
}
