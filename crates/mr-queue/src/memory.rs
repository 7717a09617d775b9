use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mr_common::{CampaignRecord, ContentRef, FailedDispatch, QueueEntry};

use crate::store::DispatchStore;
use crate::{QueueError, Result};

#[derive(Default)]
struct State {
    next_sequence: i64,
    /// Entries keyed by sequence, so iteration is FIFO
    entries: BTreeMap<i64, QueueEntry>,
    index: HashMap<ContentRef, i64>,
    /// Sent campaigns in finalize order
    campaigns: Vec<CampaignRecord>,
    sent: HashMap<ContentRef, usize>,
    failures: Vec<FailedDispatch>,
}

impl State {
    fn entry_mut(&mut self, content_ref: &ContentRef) -> Option<&mut QueueEntry> {
        let sequence = *self.index.get(content_ref)?;
        self.entries.get_mut(&sequence)
    }

    fn take_entry(&mut self, content_ref: &ContentRef) -> Option<QueueEntry> {
        let sequence = self.index.remove(content_ref)?;
        self.entries.remove(&sequence)
    }
}

/// Process-local store for tests and embedded use.
///
/// All state sits behind one mutex, which makes every operation atomic.
#[derive(Default)]
pub struct MemoryDispatchStore {
    state: Mutex<State>,
}

impl MemoryDispatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DispatchStore for MemoryDispatchStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_entry(&self, content_ref: &ContentRef, enqueued_at: DateTime<Utc>) -> Result<QueueEntry> {
        let mut state = self.state.lock();
        if state.index.contains_key(content_ref) {
            return Err(QueueError::AlreadyQueued(content_ref.clone()));
        }
        if state.sent.contains_key(content_ref) {
            return Err(QueueError::AlreadySent(content_ref.clone()));
        }

        state.next_sequence += 1;
        let entry = QueueEntry {
            content_ref: content_ref.clone(),
            sequence: state.next_sequence,
            enqueued_at,
            claimed_until: None,
            attempts: 0,
        };
        state.index.insert(content_ref.clone(), entry.sequence);
        state.entries.insert(entry.sequence, entry.clone());
        Ok(entry)
    }

    async fn remove_entry(&self, content_ref: &ContentRef) -> Result<bool> {
        Ok(self.state.lock().take_entry(content_ref).is_some())
    }

    async fn claim_next(
        &self,
        after_sequence: i64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let mut state = self.state.lock();
        let claimed = state
            .entries
            .range_mut(after_sequence.saturating_add(1)..)
            .map(|(_, entry)| entry)
            .find(|entry| !entry.is_claimed_at(now))
            .map(|entry| {
                entry.claimed_until = Some(lease_until);
                entry.attempts += 1;
                entry.clone()
            });
        Ok(claimed)
    }

    async fn release(&self, content_ref: &ContentRef, visible_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .entry_mut(content_ref)
            .ok_or_else(|| QueueError::NotQueued(content_ref.clone()))?;
        entry.claimed_until = Some(visible_at);
        Ok(())
    }

    async fn recover_expired_claims(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let mut recovered = 0;
        for entry in state.entries.values_mut() {
            if entry.claimed_until.is_some_and(|until| until <= now) {
                entry.claimed_until = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn find_entry(&self, content_ref: &ContentRef) -> Result<Option<QueueEntry>> {
        let state = self.state.lock();
        Ok(state
            .index
            .get(content_ref)
            .and_then(|sequence| state.entries.get(sequence))
            .cloned())
    }

    async fn pending_count(&self) -> Result<u64> {
        Ok(self.state.lock().entries.len() as u64)
    }

    async fn finalize(
        &self,
        content_ref: &ContentRef,
        remote_campaign_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<CampaignRecord> {
        let mut state = self.state.lock();
        if state.sent.contains_key(content_ref) {
            return Err(QueueError::AlreadySent(content_ref.clone()));
        }
        if state.take_entry(content_ref).is_none() {
            return Err(QueueError::NotQueued(content_ref.clone()));
        }

        let record = CampaignRecord {
            content_ref: content_ref.clone(),
            remote_campaign_id: remote_campaign_id.to_string(),
            sent_at,
        };
        let position = state.campaigns.len();
        state.campaigns.push(record.clone());
        state.sent.insert(content_ref.clone(), position);
        Ok(record)
    }

    async fn fail(&self, content_ref: &ContentRef, reason: &str, failed_at: DateTime<Utc>) -> Result<FailedDispatch> {
        let mut state = self.state.lock();
        let entry = state
            .take_entry(content_ref)
            .ok_or_else(|| QueueError::NotQueued(content_ref.clone()))?;

        let failure = FailedDispatch {
            content_ref: content_ref.clone(),
            reason: reason.to_string(),
            attempts: entry.attempts,
            failed_at,
        };
        state.failures.push(failure.clone());
        Ok(failure)
    }

    async fn find_campaign(&self, content_ref: &ContentRef) -> Result<Option<CampaignRecord>> {
        let state = self.state.lock();
        Ok(state
            .sent
            .get(content_ref)
            .and_then(|position| state.campaigns.get(*position))
            .cloned())
    }

    async fn find_failure(&self, content_ref: &ContentRef) -> Result<Option<FailedDispatch>> {
        let state = self.state.lock();
        Ok(state
            .failures
            .iter()
            .rev()
            .find(|failure| &failure.content_ref == content_ref)
            .cloned())
    }

    async fn campaign_count(&self) -> Result<u64> {
        Ok(self.state.lock().campaigns.len() as u64)
    }

    async fn campaigns(&self, offset: u64, limit: u64) -> Result<Vec<CampaignRecord>> {
        let state = self.state.lock();
        let mut records: Vec<&CampaignRecord> = state.campaigns.iter().rev().collect();
        // Stable sort keeps later finalizes first among equal timestamps
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(records
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
