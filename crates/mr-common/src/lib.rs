use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

pub mod lazy;
pub mod logging;
pub mod naming;
pub mod paginator;

pub use lazy::{AttributeSource, Lazy};
pub use paginator::{Bullet, PageSource, Paginator, PreloadedPage};

// ============================================================================
// Subject Identity
// ============================================================================

/// Identifies the application object a campaign is sent for.
///
/// The pair is the join key between the dispatch queue, the campaign
/// history and the failure log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    pub type_tag: String,
    pub object_id: i64,
}

impl ContentRef {
    pub fn new(type_tag: impl Into<String>, object_id: i64) -> Self {
        Self {
            type_tag: type_tag.into(),
            object_id,
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_tag, self.object_id)
    }
}

// ============================================================================
// Queue and History Records
// ============================================================================

/// A pending send request for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub content_ref: ContentRef,
    /// Monotonic enqueue order, used for FIFO dequeue
    pub sequence: i64,
    pub enqueued_at: DateTime<Utc>,
    /// Set while a worker holds the entry; the entry is invisible to
    /// dequeue until this instant passes
    pub claimed_until: Option<DateTime<Utc>>,
    /// Number of times the entry has been handed to a worker
    pub attempts: u32,
}

impl QueueEntry {
    /// Whether a worker currently holds this entry
    pub fn is_claimed_at(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Durable record of a campaign that was sent for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRecord {
    pub content_ref: ContentRef,
    pub remote_campaign_id: String,
    pub sent_at: DateTime<Utc>,
}

/// A send that the remote service rejected permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDispatch {
    pub content_ref: ContentRef,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Delivery state of a subject, as reported by the status resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    NotQueued,
    Queued(QueueEntry),
    Sent(CampaignRecord),
    Failed(FailedDispatch),
}

impl DispatchStatus {
    pub fn is_queued(&self) -> bool {
        matches!(self, DispatchStatus::Queued(_))
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchStatus::Sent(_))
    }

    /// Label used in logs and by admin adapters
    pub fn label(&self) -> &'static str {
        match self {
            DispatchStatus::NotQueued => "NOT_QUEUED",
            DispatchStatus::Queued(_) => "QUEUED",
            DispatchStatus::Sent(_) => "SENT",
            DispatchStatus::Failed(_) => "FAILED",
        }
    }
}

/// Truncate a timestamp to the millisecond precision used by durable stores.
pub fn storage_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_content_ref_equality_and_display() {
        let a = ContentRef::new("post", 7);
        let b = ContentRef::new("post".to_string(), 7);
        assert_eq!(a, b);
        assert_ne!(a, ContentRef::new("page", 7));
        assert_ne!(a, ContentRef::new("post", 8));
        assert_eq!(a.to_string(), "post:7");
    }

    #[test]
    fn test_queue_entry_claim_window() {
        let now = Utc::now();
        let mut entry = QueueEntry {
            content_ref: ContentRef::new("post", 1),
            sequence: 1,
            enqueued_at: now,
            claimed_until: None,
            attempts: 0,
        };
        assert!(!entry.is_claimed_at(now));

        entry.claimed_until = Some(now + Duration::seconds(30));
        assert!(entry.is_claimed_at(now));
        assert!(!entry.is_claimed_at(now + Duration::seconds(31)));
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_value(DispatchStatus::NotQueued).unwrap();
        assert_eq!(json["status"], "NOT_QUEUED");
        assert_eq!(DispatchStatus::NotQueued.label(), "NOT_QUEUED");
    }

    #[test]
    fn test_storage_precision_drops_sub_millis() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let truncated = storage_precision(ts);
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_000_000);
    }
}
