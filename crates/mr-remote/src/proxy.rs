//! Cached, warning-captured access to the campaign service.
//!
//! Reads go through child caches of the root cache (`campaigns`, `lists`).
//! Mutations run inside `Cache::clear`, so the read that follows them
//! recomputes, and the affected campaign key is flushed outright. A flush
//! failure after a successful mutation is logged, never returned.
//! Every outbound call is bounded by the configured request timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use mr_cache::Cache;
use mr_config::RemoteConfig;

use crate::service::{CampaignDraft, CampaignInfo, CampaignService, ListMember};
use crate::warning::{PendingWarning, WarningCapture, WarningHandle};
use crate::{RemoteError, Result};

pub struct CampaignProxy {
    service: Arc<dyn CampaignService>,
    campaigns: Cache,
    lists: Cache,
    warnings: WarningCapture,
    timeout: Duration,
}

impl CampaignProxy {
    pub fn new(service: Arc<dyn CampaignService>, cache: &Cache, timeout: Duration) -> Self {
        Self {
            service,
            campaigns: cache.get_child_cache("campaigns"),
            lists: cache.get_child_cache("lists"),
            warnings: WarningCapture::new(),
            timeout,
        }
    }

    pub fn from_config(service: Arc<dyn CampaignService>, cache: &Cache, config: &RemoteConfig) -> Self {
        Self::new(service, cache, config.request_timeout())
    }

    pub fn warnings(&self) -> &WarningCapture {
        &self.warnings
    }

    /// Take the warnings raised by calls since the last drain
    pub fn drain_warnings(&self) -> Vec<PendingWarning> {
        self.warnings.drain()
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(WarningHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        self.warnings
            .run(|handle| async move {
                match tokio::time::timeout(timeout, f(handle)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            operation,
                            timeout_ms = timeout.as_millis() as u64,
                            "Remote call timed out"
                        );
                        Err(RemoteError::Timeout(timeout))
                    }
                }
            })
            .await
    }

    /// Drop the cached info of a mutated campaign. Only called after the
    /// remote mutation succeeded, so failures are logged and swallowed; the
    /// lock armed by `clear` still makes the next read recompute.
    async fn flush_campaign(&self, campaign_id: &str) {
        if let Err(e) = self.campaigns.flush(&[campaign_id]).await {
            warn!(campaign_id = %campaign_id, error = %e, "Failed to flush cached campaign info");
        }
    }

    pub async fn campaign_info(&self, campaign_id: &str) -> Result<CampaignInfo> {
        self.campaigns
            .get(campaign_id, || {
                self.call("campaign_info", |warnings| async move {
                    debug!(campaign_id = %campaign_id, "Fetching campaign info");
                    self.service
                        .campaign_info(campaign_id, &warnings)
                        .await
                        .map(CampaignInfo::normalized)
                })
            })
            .await
    }

    pub async fn list_members(&self, list_id: &str) -> Result<Vec<ListMember>> {
        self.lists
            .get(list_id, || {
                self.call("list_members", |warnings| async move {
                    debug!(list_id = %list_id, "Fetching list members");
                    self.service.list_members(list_id, &warnings).await
                })
            })
            .await
    }

    pub async fn create_campaign(&self, draft: &CampaignDraft) -> Result<String> {
        let campaign_id = self
            .campaigns
            .clear(|| {
                self.call("create_campaign", |warnings| async move {
                    self.service.create_campaign(draft, &warnings).await
                })
            })
            .await?;

        info!(campaign_id = %campaign_id, list_id = %draft.list_id, "Campaign created");
        Ok(campaign_id)
    }

    pub async fn send_campaign(&self, campaign_id: &str) -> Result<()> {
        self.campaigns
            .clear(|| {
                self.call("send_campaign", |warnings| async move {
                    self.service.send_campaign(campaign_id, &warnings).await
                })
            })
            .await?;
        self.flush_campaign(campaign_id).await;

        info!(campaign_id = %campaign_id, "Campaign sent");
        Ok(())
    }

    pub async fn cancel_campaign(&self, campaign_id: &str) -> Result<()> {
        self.campaigns
            .clear(|| {
                self.call("cancel_campaign", |warnings| async move {
                    self.service.cancel_campaign(campaign_id, &warnings).await
                })
            })
            .await?;
        self.flush_campaign(campaign_id).await;

        info!(campaign_id = %campaign_id, "Campaign cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warning::WarningCategory;
    use async_trait::async_trait;
    use mr_cache::MemoryBackend;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct MockService {
        info_calls: AtomicU32,
        member_calls: AtomicU32,
        sends: AtomicU32,
        status: Mutex<String>,
        info_error: Mutex<Option<RemoteError>>,
        delay: Mutex<Option<Duration>>,
    }

    #[async_trait]
    impl CampaignService for MockService {
        async fn create_campaign(&self, draft: &CampaignDraft, warnings: &WarningHandle) -> Result<String> {
            if draft.subject.len() > 10 {
                warnings.warn(WarningCategory::Validation, "subject truncated");
            }
            Ok(format!("camp-{}", draft.list_id))
        }

        async fn send_campaign(&self, _campaign_id: &str, _warnings: &WarningHandle) -> Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            *self.status.lock() = "sent".to_string();
            Ok(())
        }

        async fn cancel_campaign(&self, _campaign_id: &str, _warnings: &WarningHandle) -> Result<()> {
            *self.status.lock() = "canceled".to_string();
            Ok(())
        }

        async fn campaign_info(&self, campaign_id: &str, warnings: &WarningHandle) -> Result<CampaignInfo> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.info_error.lock().take() {
                return Err(err);
            }
            warnings.warn(WarningCategory::Deprecation, "campaigns() v1 is deprecated");
            Ok(CampaignInfo {
                id: campaign_id.to_string(),
                status: self.status.lock().clone(),
                send_time: None,
                details: json!({"emailsSent": 0}),
            })
        }

        async fn list_members(&self, list_id: &str, _warnings: &WarningHandle) -> Result<Vec<ListMember>> {
            self.member_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ListMember {
                email: format!("reader@{}.example", list_id),
                status: "subscribed".to_string(),
            }])
        }
    }

    fn setup() -> (Arc<MockService>, Arc<MemoryBackend>, CampaignProxy) {
        let service = Arc::new(MockService {
            status: Mutex::new("save".to_string()),
            ..Default::default()
        });
        let backend = Arc::new(MemoryBackend::new());
        let cache = Cache::new(backend.clone(), "mailroom:");
        let proxy = CampaignProxy::new(service.clone(), &cache, Duration::from_secs(5));
        (service, backend, proxy)
    }

    #[tokio::test]
    async fn test_campaign_info_is_cached() {
        let (service, backend, proxy) = setup();

        let first = proxy.campaign_info("c1").await.unwrap();
        let second = proxy.campaign_info("c1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.details["emails_sent"], 0);
        assert_eq!(service.info_calls.load(Ordering::SeqCst), 1);
        assert!(backend.contains("mailroom:_campaigns_c1"));
    }

    #[tokio::test]
    async fn test_send_invalidates_campaign_info() {
        let (service, _backend, proxy) = setup();

        assert_eq!(proxy.campaign_info("c1").await.unwrap().status, "save");
        proxy.send_campaign("c1").await.unwrap();

        let refreshed = proxy.campaign_info("c1").await.unwrap();
        assert!(refreshed.is_sent());
        assert_eq!(service.info_calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_invalidates_campaign_info() {
        let (_service, _backend, proxy) = setup();
        proxy.campaign_info("c1").await.unwrap();
        proxy.cancel_campaign("c1").await.unwrap();
        assert_eq!(proxy.campaign_info("c1").await.unwrap().status, "canceled");
    }

    struct BrokenDelete(MemoryBackend);

    #[async_trait]
    impl mr_cache::CacheBackend for BrokenDelete {
        fn name(&self) -> &'static str {
            "broken-delete"
        }

        async fn get(&self, key: &str) -> mr_cache::Result<Option<Vec<u8>>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> mr_cache::Result<()> {
            self.0.set(key, value).await
        }

        async fn delete(&self, _key: &str) -> mr_cache::Result<()> {
            Err(mr_cache::CacheError::Backend("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_mutation_succeeds_when_flush_fails() {
        let service = Arc::new(MockService::default());
        let cache = Cache::new(Arc::new(BrokenDelete(MemoryBackend::new())), "mailroom:");
        let proxy = CampaignProxy::new(service.clone(), &cache, Duration::from_secs(5));

        proxy.send_campaign("c1").await.unwrap();
        proxy.cancel_campaign("c1").await.unwrap();
        assert_eq!(service.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_list_members_use_own_namespace() {
        let (service, backend, proxy) = setup();

        proxy.list_members("L1").await.unwrap();
        proxy.list_members("L1").await.unwrap();
        proxy.send_campaign("c1").await.unwrap();
        proxy.list_members("L1").await.unwrap();

        assert_eq!(service.member_calls.load(Ordering::SeqCst), 1);
        assert!(backend.contains("mailroom:_lists_L1"));
    }

    #[tokio::test]
    async fn test_failed_read_is_not_cached() {
        let (service, _backend, proxy) = setup();
        *service.info_error.lock() = Some(RemoteError::Transient("503".to_string()));

        let err = proxy.campaign_info("c1").await.unwrap_err();
        assert!(err.is_retryable());

        proxy.campaign_info("c1").await.unwrap();
        assert_eq!(service.info_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_transient() {
        let service = Arc::new(MockService::default());
        *service.delay.lock() = Some(Duration::from_millis(200));
        let cache = Cache::in_memory("t:");
        let proxy = CampaignProxy::new(service, &cache, Duration::from_millis(20));

        let err = proxy.campaign_info("c1").await.unwrap_err();
        assert_eq!(err, RemoteError::Timeout(Duration::from_millis(20)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_warnings_captured_per_call() {
        let (_service, _backend, proxy) = setup();

        proxy.campaign_info("c1").await.unwrap();
        proxy
            .create_campaign(&CampaignDraft {
                list_id: "L1".to_string(),
                subject: "A rather long subject".to_string(),
                from_name: "Editors".to_string(),
                from_email: "editors@example.com".to_string(),
                html: "<p>hi</p>".to_string(),
                text: None,
            })
            .await
            .unwrap();

        let warnings = proxy.drain_warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].category, WarningCategory::Deprecation);
        assert_eq!(warnings[1].category, WarningCategory::Validation);
        assert!(proxy.drain_warnings().is_empty());
    }
}
