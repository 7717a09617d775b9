//! Warning capture for remote calls.
//!
//! A [`WarningCapture`] hands a scoped [`WarningHandle`] to each call it
//! runs. Warnings raised through the handle are logged immediately and also
//! queued on the capture until the next `drain`. Once the scope ends (the
//! call returns, fails, panics or is dropped mid-await) the handle stops
//! queueing and only logs.

use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCategory {
    /// The service flagged a feature or parameter as deprecated
    Deprecation,
    /// Close to or over the service's rate limits
    RateLimit,
    /// The service returned fewer results than requested
    PartialResult,
    /// Request accepted with adjustments (e.g. truncated fields)
    Validation,
    General,
}

/// A warning queued while a capture scope was active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWarning {
    pub message: String,
    pub category: WarningCategory,
    /// `file:line:column` of the code that raised it
    pub origin: String,
    pub timestamp: DateTime<Utc>,
}

type Queue = Arc<Mutex<Vec<PendingWarning>>>;

#[derive(Clone, Default)]
pub struct WarningCapture {
    queue: Queue,
}

impl WarningCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `call` with a handle scoped to this capture
    pub async fn run<F, Fut, R>(&self, call: F) -> R
    where
        F: FnOnce(WarningHandle) -> Fut,
        Fut: Future<Output = R>,
    {
        let handle = WarningHandle {
            queue: Some(self.queue.clone()),
            active: Arc::new(AtomicBool::new(true)),
        };
        let _scope = ScopeGuard {
            active: handle.active.clone(),
        };
        call(handle).await
    }

    /// Take every queued warning, oldest first
    pub fn drain(&self) -> Vec<PendingWarning> {
        std::mem::take(&mut *self.queue.lock())
    }

    pub fn reset(&self) {
        self.queue.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Deactivates a handle however its scope ends
struct ScopeGuard {
    active: Arc<AtomicBool>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct WarningHandle {
    queue: Option<Queue>,
    active: Arc<AtomicBool>,
}

impl WarningHandle {
    /// A handle outside any capture; warnings are only logged
    pub fn detached() -> Self {
        Self {
            queue: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.queue.is_some() && self.active.load(Ordering::SeqCst)
    }

    #[track_caller]
    pub fn warn(&self, category: WarningCategory, message: impl Into<String>) {
        let origin = Location::caller().to_string();
        let message = message.into();

        warn!(category = ?category, origin = %origin, "{}", message);

        if let Some(queue) = &self.queue {
            if self.active.load(Ordering::SeqCst) {
                queue.lock().push(PendingWarning {
                    message,
                    category,
                    origin,
                    timestamp: Utc::now(),
                });
            }
        }
    }
}
