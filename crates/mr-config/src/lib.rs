//! Mailroom Configuration System
//!
//! TOML-based configuration with environment variable override support.
//! Every section has defaults, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
    pub dispatcher: DispatcherConfig,
    pub pagination: PaginationConfig,
    pub webhook: WebhookConfig,
}

/// Durable queue and campaign history storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite connection URL
    pub url: String,
    pub max_connections: u32,
    /// How long a dequeued entry stays claimed before it becomes visible again
    pub claim_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/mailroom.db?mode=rwc".to_string(),
            max_connections: 5,
            claim_timeout_secs: 300,
        }
    }
}

impl StoreConfig {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }
}

/// Cache backing store selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process map living as long as the process
    Memory,
    /// Shared Redis cache with expiring entries
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: String,
    /// Expiration applied to Redis entries
    pub timeout_secs: u64,
    /// Namespace prefix of the root cache
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            timeout_secs: 300,
            key_prefix: "mailroom:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Campaign service call settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Upper bound on any single remote call
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Background dispatch worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// Maximum entries claimed per poll
    pub batch_size: u32,
    /// Delay before a transiently failed entry is visible again; 0 retries
    /// it on the next poll
    pub retry_delay_secs: u64,
    /// How often expired claims are swept back into the queue
    pub recovery_interval_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5_000,
            batch_size: 10,
            retry_delay_secs: 300,
            recovery_interval_secs: 60,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub per_page: usize,
    pub bullet_window: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            per_page: 20,
            bullet_window: 5,
        }
    }
}

/// Shared secret expected in the webhook request path.
/// Empty means a random key is generated at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub key: String,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject settings the queue and worker cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.url.is_empty() {
            return Err(ConfigError::ValidationError("store.url must be set".to_string()));
        }
        if self.store.claim_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "store.claim_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.cache.backend == CacheBackendKind::Redis && self.cache.redis_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "cache.redis_url is required for the redis backend".to_string(),
            ));
        }
        if self.remote.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "remote.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        // A dispatch makes two remote calls (create, send) under one lease
        let dispatch_budget_ms = self.remote.request_timeout_ms.saturating_mul(2);
        if self.store.claim_timeout_secs.saturating_mul(1000) <= dispatch_budget_ms {
            return Err(ConfigError::ValidationError(format!(
                "store.claim_timeout_secs ({}s) must exceed two remote calls ({}ms)",
                self.store.claim_timeout_secs, dispatch_budget_ms
            )));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.pagination.per_page == 0 || self.pagination.bullet_window == 0 {
            return Err(ConfigError::ValidationError(
                "pagination.per_page and pagination.bullet_window must be greater than zero"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Mailroom Configuration
# Environment variables (MAILROOM_*) override these settings

[store]
url = "sqlite://./data/mailroom.db?mode=rwc"
max_connections = 5
claim_timeout_secs = 300

[cache]
backend = "memory"  # memory or redis
redis_url = "redis://127.0.0.1:6379"
timeout_secs = 300
key_prefix = "mailroom:"

[remote]
request_timeout_ms = 30000

[dispatcher]
enabled = true
poll_interval_ms = 5000
batch_size = 10
retry_delay_secs = 300  # 0: retry on the next poll
recovery_interval_secs = 60

[pagination]
per_page = 20
bullet_window = 5

[webhook]
key = ""  # empty: generate a random key at startup
"#
        .to_string()
    }
}
