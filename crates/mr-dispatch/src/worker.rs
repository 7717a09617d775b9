//! Background sender.
//!
//! Each poll claims up to `batch_size` entries and, for every one, builds
//! the campaign, creates and sends it through the proxy, then finalizes the
//! entry. A retryable failure hands the entry back with `retry_delay`; a
//! permanent one dead-letters it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use mr_common::{ContentRef, QueueEntry};
use mr_config::DispatcherConfig;
use mr_queue::{DispatchQueue, QueueError};
use mr_remote::{CampaignProxy, RemoteError};

use crate::builder::CampaignBuilder;

/// What happened to one claimed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { campaign_id: String },
    Retried { reason: String },
    Failed { reason: String },
    /// The entry vanished (cancelled) or the store failed while recording
    /// the outcome
    Unrecorded { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: u32,
    pub retried: u32,
    pub failed: u32,
    pub unrecorded: u32,
    pub warnings: usize,
}

impl BatchReport {
    pub fn claimed(&self) -> u32 {
        self.sent + self.retried + self.failed + self.unrecorded
    }

    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent { .. } => self.sent += 1,
            DispatchOutcome::Retried { .. } => self.retried += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
            DispatchOutcome::Unrecorded { .. } => self.unrecorded += 1,
        }
    }
}

pub struct DispatchWorker {
    queue: DispatchQueue,
    proxy: Arc<CampaignProxy>,
    builder: Arc<dyn CampaignBuilder>,
    batch_size: u32,
    poll_interval: Duration,
    retry_delay: Duration,
}

impl DispatchWorker {
    pub fn new(
        queue: DispatchQueue,
        proxy: Arc<CampaignProxy>,
        builder: Arc<dyn CampaignBuilder>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            proxy,
            builder,
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval(),
            retry_delay: config.retry_delay(),
        }
    }

    /// Poll until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            retry_delay_secs = self.retry_delay.as_secs(),
            "Starting dispatch worker"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_batch().await {
                        Ok(report) if report.claimed() > 0 => {
                            info!(
                                sent = report.sent,
                                retried = report.retried,
                                failed = report.failed,
                                unrecorded = report.unrecorded,
                                "Dispatch batch complete"
                            );
                        }
                        Ok(_) => debug!("No queue entries to dispatch"),
                        Err(e) => error!(error = %e, "Dispatch poll failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Dispatch worker shutting down");
                    break;
                }
            }
        }
    }

    /// Claim and dispatch one batch.
    ///
    /// Only a failure to claim aborts the batch; per-entry failures are
    /// recorded in the report.
    pub async fn process_batch(&self) -> Result<BatchReport, QueueError> {
        let mut report = BatchReport::default();
        let mut claims = self.queue.dequeue(Some(self.batch_size));

        while let Some(entry) = claims.next().await {
            let entry = entry?;
            let outcome = self.dispatch_entry(&entry).await;
            report.record(&outcome);
        }

        for warning in self.proxy.drain_warnings() {
            warn!(
                category = ?warning.category,
                origin = %warning.origin,
                message = %warning.message,
                "Campaign service warning"
            );
            report.warnings += 1;
        }

        Ok(report)
    }

    async fn send(&self, content_ref: &ContentRef) -> Result<String, RemoteError> {
        let draft = self.builder.build(content_ref).await?;
        let campaign_id = self.proxy.create_campaign(&draft).await?;
        self.proxy.send_campaign(&campaign_id).await?;
        Ok(campaign_id)
    }

    pub async fn dispatch_entry(&self, entry: &QueueEntry) -> DispatchOutcome {
        let content_ref = &entry.content_ref;
        debug!(content_ref = %content_ref, attempts = entry.attempts, "Dispatching");

        let outcome = match self.send(content_ref).await {
            Ok(campaign_id) => self
                .queue
                .finalize(content_ref, &campaign_id, Utc::now())
                .await
                .map(|_| DispatchOutcome::Sent { campaign_id }),
            Err(e) if e.is_retryable() => {
                warn!(
                    content_ref = %content_ref,
                    attempts = entry.attempts,
                    error = %e,
                    "Dispatch failed, will retry"
                );
                self.queue
                    .release(content_ref, self.retry_delay)
                    .await
                    .map(|_| DispatchOutcome::Retried { reason: e.to_string() })
            }
            Err(e) => self
                .queue
                .fail(content_ref, &e.to_string())
                .await
                .map(|_| DispatchOutcome::Failed { reason: e.to_string() }),
        };

        outcome.unwrap_or_else(|e| {
            error!(content_ref = %content_ref, error = %e, "Could not record dispatch outcome");
            DispatchOutcome::Unrecorded { reason: e.to_string() }
        })
    }
}
