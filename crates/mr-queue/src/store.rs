//! Dispatch Store Trait
//!
//! Persistence seam behind the dispatch queue. Every mutation that touches
//! more than one table (finalize, fail) is atomic in the implementation.
//! Timestamps are supplied by the caller so stores never read the clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mr_common::{CampaignRecord, ContentRef, FailedDispatch, QueueEntry};

use crate::Result;

#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create tables and indexes if they don't exist
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Insert a new entry with the next sequence number.
    ///
    /// Fails with `AlreadyQueued` or `AlreadySent`.
    async fn insert_entry(&self, content_ref: &ContentRef, enqueued_at: DateTime<Utc>) -> Result<QueueEntry>;

    /// Remove the entry, returning whether one existed
    async fn remove_entry(&self, content_ref: &ContentRef) -> Result<bool>;

    /// Claim the oldest visible entry with a sequence above `after_sequence`
    /// until `lease_until`
    async fn claim_next(
        &self,
        after_sequence: i64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>>;

    /// Make a claimed entry visible again at `visible_at`
    async fn release(&self, content_ref: &ContentRef, visible_at: DateTime<Utc>) -> Result<()>;

    /// Clear every lease that expired at or before `now`
    async fn recover_expired_claims(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn find_entry(&self, content_ref: &ContentRef) -> Result<Option<QueueEntry>>;

    async fn pending_count(&self) -> Result<u64>;

    // ========================================================================
    // Outcomes
    // ========================================================================

    /// Remove the entry and record the sent campaign in one step
    async fn finalize(
        &self,
        content_ref: &ContentRef,
        remote_campaign_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<CampaignRecord>;

    /// Remove the entry and append a failure record in one step
    async fn fail(&self, content_ref: &ContentRef, reason: &str, failed_at: DateTime<Utc>) -> Result<FailedDispatch>;

    async fn find_campaign(&self, content_ref: &ContentRef) -> Result<Option<CampaignRecord>>;

    /// Most recent failure for the subject
    async fn find_failure(&self, content_ref: &ContentRef) -> Result<Option<FailedDispatch>>;

    async fn campaign_count(&self) -> Result<u64>;

    /// Sent campaigns, newest first
    async fn campaigns(&self, offset: u64, limit: u64) -> Result<Vec<CampaignRecord>>;
}
