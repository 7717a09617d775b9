//! Mailroom Dispatch Queue
//!
//! Pending send requests keyed by [`ContentRef`], with at most one entry per
//! subject. Dequeue hands out entries under a lease instead of deleting them:
//!
//! - `finalize` removes the entry and records the sent campaign
//! - `release` ends the lease early, optionally after a delay
//! - `fail` removes the entry and records a permanent failure
//! - a lease that simply expires makes the entry visible again
//!
//! Delivery is therefore at-least-once; a worker that dies mid-send leaves
//! its entry to be picked up by the next dequeue after the claim timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use mr_common::{
    storage_precision, CampaignRecord, ContentRef, FailedDispatch, Paginator, PreloadedPage, QueueEntry,
};
#[cfg(feature = "sqlite")]
use mr_config::StoreConfig;

pub mod error;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod status;
pub mod store;

pub use error::QueueError;
pub use memory::MemoryDispatchStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDispatchStore;
pub use status::StatusResolver;
pub use store::DispatchStore;

pub type Result<T> = std::result::Result<T, QueueError>;

/// `now + delay`, saturating at the largest representable instant
fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn now() -> DateTime<Utc> {
    storage_precision(Utc::now())
}

#[derive(Clone, Copy)]
struct DequeueCursor {
    taken: u32,
    last_sequence: i64,
    failed: bool,
}

#[derive(Clone)]
pub struct DispatchQueue {
    store: Arc<dyn DispatchStore>,
    claim_timeout: Duration,
}

impl DispatchQueue {
    pub fn new(store: Arc<dyn DispatchStore>, claim_timeout: Duration) -> Self {
        Self {
            store,
            claim_timeout,
        }
    }

    pub fn in_memory(claim_timeout: Duration) -> Self {
        Self::new(Arc::new(MemoryDispatchStore::new()), claim_timeout)
    }

    /// Open the SQLite store named in configuration and create its schema
    #[cfg(feature = "sqlite")]
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        let store = SqliteDispatchStore::new(pool);
        store.init_schema().await?;

        info!(
            url = %config.url,
            claim_timeout_secs = config.claim_timeout_secs,
            "Dispatch queue opened"
        );
        Ok(Self::new(Arc::new(store), config.claim_timeout()))
    }

    pub fn store(&self) -> &Arc<dyn DispatchStore> {
        &self.store
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    /// Resolver reading from the same store
    pub fn resolver(&self) -> StatusResolver {
        StatusResolver::new(self.store.clone())
    }

    pub async fn enqueue(&self, content_ref: &ContentRef) -> Result<QueueEntry> {
        let entry = self.store.insert_entry(content_ref, now()).await?;
        info!(content_ref = %content_ref, sequence = entry.sequence, "Queued for dispatch");
        Ok(entry)
    }

    /// Remove a pending entry. Returns false when nothing was queued.
    pub async fn cancel(&self, content_ref: &ContentRef) -> Result<bool> {
        let removed = self.store.remove_entry(content_ref).await?;
        if removed {
            info!(content_ref = %content_ref, "Dispatch cancelled");
        } else {
            debug!(content_ref = %content_ref, "Cancel ignored, nothing queued");
        }
        Ok(removed)
    }

    async fn claim_one(&self, after_sequence: i64) -> Result<Option<QueueEntry>> {
        let now = now();
        self.store
            .claim_next(after_sequence, now, after(now, self.claim_timeout))
            .await
    }

    /// Lazily claim visible entries in FIFO order, up to `limit` if given.
    ///
    /// Each pull claims one entry, so dropping the stream early leaves the
    /// rest of the queue untouched. The stream only moves forward through
    /// sequences: an entry released while the stream is being consumed is
    /// left for the next `dequeue`. The stream ends after the first error.
    pub fn dequeue(&self, limit: Option<u32>) -> BoxStream<'_, Result<QueueEntry>> {
        let start = DequeueCursor {
            taken: 0,
            last_sequence: 0,
            failed: false,
        };
        stream::unfold(start, move |cursor| async move {
            if cursor.failed || limit.is_some_and(|limit| cursor.taken >= limit) {
                return None;
            }
            match self.claim_one(cursor.last_sequence).await {
                Ok(Some(entry)) => {
                    debug!(
                        content_ref = %entry.content_ref,
                        sequence = entry.sequence,
                        attempts = entry.attempts,
                        "Claimed queue entry"
                    );
                    let next = DequeueCursor {
                        taken: cursor.taken + 1,
                        last_sequence: entry.sequence,
                        failed: false,
                    };
                    Some((Ok(entry), next))
                }
                Ok(None) => None,
                Err(e) => Some((Err(e), DequeueCursor { failed: true, ..cursor })),
            }
        })
        .boxed()
    }

    /// Claim up to `limit` entries at once
    pub async fn dequeue_batch(&self, limit: u32) -> Result<Vec<QueueEntry>> {
        self.dequeue(Some(limit)).try_collect().await
    }

    /// Record a successful send and drop the entry
    pub async fn finalize(
        &self,
        content_ref: &ContentRef,
        remote_campaign_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<CampaignRecord> {
        let record = self
            .store
            .finalize(content_ref, remote_campaign_id, storage_precision(sent_at))
            .await?;
        info!(
            content_ref = %content_ref,
            campaign_id = %remote_campaign_id,
            "Campaign recorded as sent"
        );
        Ok(record)
    }

    /// Hand a claimed entry back; it becomes visible again after `delay`
    pub async fn release(&self, content_ref: &ContentRef, delay: Duration) -> Result<()> {
        self.store.release(content_ref, after(now(), delay)).await?;
        debug!(
            content_ref = %content_ref,
            delay_ms = delay.as_millis() as u64,
            "Released queue entry"
        );
        Ok(())
    }

    /// Dead-letter a subject the remote service rejected permanently
    pub async fn fail(&self, content_ref: &ContentRef, reason: &str) -> Result<FailedDispatch> {
        let failure = self.store.fail(content_ref, reason, now()).await?;
        warn!(
            content_ref = %content_ref,
            attempts = failure.attempts,
            reason = %reason,
            "Dispatch failed permanently"
        );
        Ok(failure)
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.store.pending_count().await
    }

    pub async fn campaign_count(&self) -> Result<u64> {
        self.store.campaign_count().await
    }

    /// Sent campaigns, newest first
    pub async fn campaigns(&self, offset: u64, limit: u64) -> Result<Vec<CampaignRecord>> {
        self.store.campaigns(offset, limit).await
    }

    /// One page of campaign history, newest first, ready for a `Paginator`
    pub async fn campaign_page(&self, page: i64, per_page: usize) -> Result<PreloadedPage<CampaignRecord>> {
        let (offset, limit) = Paginator::<PreloadedPage<CampaignRecord>>::window(page, per_page);
        let total = self.campaign_count().await? as usize;
        let items = self.campaigns(offset as u64, limit as u64).await?;
        Ok(PreloadedPage { total, offset, items })
    }

    /// Make entries whose lease has run out visible again
    pub async fn recover_expired_claims(&self) -> Result<u64> {
        let recovered = self.store.recover_expired_claims(now()).await?;
        if recovered > 0 {
            info!(count = recovered, "Recovered expired claims");
        }
        Ok(recovered)
    }
}
