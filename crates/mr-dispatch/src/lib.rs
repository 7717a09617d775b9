//! Mailroom Dispatcher
//!
//! Wires the cache, dispatch queue and campaign proxy together from
//! [`AppConfig`] and runs the background tasks:
//!
//! - [`DispatchWorker`]: claims queue entries and sends their campaigns
//! - [`ClaimRecoveryTask`]: sweeps expired claims
//!
//! Both stop on the shared shutdown broadcast.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use mr_cache::Cache;
use mr_common::{CampaignRecord, PreloadedPage};
use mr_config::AppConfig;
use mr_queue::{DispatchQueue, QueueError, StatusResolver};
use mr_remote::{CampaignProxy, CampaignService};

pub mod builder;
pub mod recovery;
pub mod webhook;
pub mod worker;

pub use builder::CampaignBuilder;
pub use recovery::ClaimRecoveryTask;
pub use webhook::WebhookKey;
pub use worker::{BatchReport, DispatchOutcome, DispatchWorker};

pub struct Dispatcher {
    cache: Arc<Cache>,
    queue: DispatchQueue,
    proxy: Arc<CampaignProxy>,
    webhook_key: WebhookKey,
    per_page: usize,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Open the configured cache and store, then start background tasks
    pub async fn start(
        config: &AppConfig,
        service: Arc<dyn CampaignService>,
        builder: Arc<dyn CampaignBuilder>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let cache = Cache::from_config(&config.cache).await?;
        let queue = DispatchQueue::from_config(&config.store).await?;
        Ok(Self::start_with(config, cache, queue, service, builder))
    }

    /// Start background tasks over an already opened cache and queue
    pub fn start_with(
        config: &AppConfig,
        cache: Cache,
        queue: DispatchQueue,
        service: Arc<dyn CampaignService>,
        builder: Arc<dyn CampaignBuilder>,
    ) -> Self {
        let proxy = Arc::new(CampaignProxy::from_config(service, &cache, &config.remote));
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::new();

        if config.dispatcher.enabled {
            let worker = DispatchWorker::new(queue.clone(), proxy.clone(), builder, &config.dispatcher);
            let shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move { worker.run(shutdown_rx).await }));

            let recovery = ClaimRecoveryTask::new(queue.clone(), config.dispatcher.recovery_interval());
            let shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move { recovery.run(shutdown_rx).await }));
        } else {
            info!("Dispatch worker disabled; queue is accepting entries only");
        }

        info!(
            cache_backend = cache.backend_name(),
            store = queue.store().name(),
            "Dispatcher started"
        );

        Self {
            cache: Arc::new(cache),
            queue,
            proxy,
            webhook_key: WebhookKey::from_config(&config.webhook),
            per_page: config.pagination.per_page,
            shutdown_tx,
            handles,
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn resolver(&self) -> StatusResolver {
        self.queue.resolver()
    }

    pub fn proxy(&self) -> &Arc<CampaignProxy> {
        &self.proxy
    }

    pub fn webhook_key(&self) -> &WebhookKey {
        &self.webhook_key
    }

    /// Campaign history page sized by `pagination.per_page`
    pub async fn campaign_page(&self, page: i64) -> Result<PreloadedPage<CampaignRecord>, QueueError> {
        self.queue.campaign_page(page, self.per_page).await
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// Signal background tasks and wait for them to finish
    pub async fn shutdown(self) {
        // No receivers only means the worker is disabled
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Dispatcher stopped");
    }
}
