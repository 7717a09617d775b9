use std::sync::Arc;

use mr_common::{ContentRef, DispatchStatus};
use tracing::debug;

use crate::store::DispatchStore;
use crate::Result;

/// Reports where a subject is in its delivery lifecycle.
///
/// Lookup order is queue, then campaign history, then failures, so a subject
/// re-queued after a failure reports as queued.
#[derive(Clone)]
pub struct StatusResolver {
    store: Arc<dyn DispatchStore>,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn DispatchStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, content_ref: &ContentRef) -> Result<DispatchStatus> {
        let status = if let Some(entry) = self.store.find_entry(content_ref).await? {
            DispatchStatus::Queued(entry)
        } else if let Some(record) = self.store.find_campaign(content_ref).await? {
            DispatchStatus::Sent(record)
        } else if let Some(failure) = self.store.find_failure(content_ref).await? {
            DispatchStatus::Failed(failure)
        } else {
            DispatchStatus::NotQueued
        };

        debug!(content_ref = %content_ref, status = status.label(), "Resolved dispatch status");
        Ok(status)
    }
}
