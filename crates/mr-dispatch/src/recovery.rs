//! Periodic sweep of expired queue claims.
//!
//! Expired leases are already visible to dequeue; the sweep clears them so
//! status reports stop showing entries as held by a worker that is gone.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use mr_queue::DispatchQueue;

pub struct ClaimRecoveryTask {
    queue: DispatchQueue,
    check_interval: Duration,
}

impl ClaimRecoveryTask {
    pub fn new(queue: DispatchQueue, check_interval: Duration) -> Self {
        Self {
            queue,
            check_interval,
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            claim_timeout_secs = self.queue.claim_timeout().as_secs(),
            "Starting claim recovery task"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.recover_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Claim recovery task shutting down");
                    break;
                }
            }
        }
    }

    /// Perform a single sweep, returning how many entries were recovered
    pub async fn recover_once(&self) -> u64 {
        debug!("Checking for expired claims");
        match self.queue.recover_expired_claims().await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Failed to recover expired claims");
                0
            }
        }
    }
}
