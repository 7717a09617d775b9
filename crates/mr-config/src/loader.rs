//! Configuration loader with file and environment variable support

use crate::{AppConfig, CacheBackendKind, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "mailroom.toml",
    "config.toml",
    "./config/mailroom.toml",
    "/etc/mailroom/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found), apply environment overrides,
    /// then validate.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => AppConfig::default(),
        };

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured path does not exist, searching defaults");
        }

        if let Ok(path) = env::var("MAILROOM_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: std::str::FromStr>(value: Option<String>, target: &mut T) {
    if let Some(parsed) = value.and_then(|v| v.parse().ok()) {
        *target = parsed;
    }
}

/// Apply `MAILROOM_*` overrides read through `lookup`.
///
/// Values that fail to parse are ignored and the file/default value stays.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Store
    if let Some(val) = lookup("MAILROOM_STORE_URL") {
        config.store.url = val;
    }
    parse_into(lookup("MAILROOM_STORE_MAX_CONNECTIONS"), &mut config.store.max_connections);
    parse_into(lookup("MAILROOM_CLAIM_TIMEOUT_SECS"), &mut config.store.claim_timeout_secs);

    // Cache
    if let Some(val) = lookup("MAILROOM_CACHE_BACKEND") {
        match val.to_ascii_lowercase().as_str() {
            "memory" => config.cache.backend = CacheBackendKind::Memory,
            "redis" => config.cache.backend = CacheBackendKind::Redis,
            other => warn!(backend = %other, "Unknown cache backend, keeping configured value"),
        }
    }
    if let Some(val) = lookup("MAILROOM_REDIS_URL") {
        config.cache.redis_url = val;
    }
    parse_into(lookup("MAILROOM_CACHE_TIMEOUT_SECS"), &mut config.cache.timeout_secs);
    if let Some(val) = lookup("MAILROOM_CACHE_PREFIX") {
        config.cache.key_prefix = val;
    }

    // Remote
    parse_into(lookup("MAILROOM_REMOTE_TIMEOUT_MS"), &mut config.remote.request_timeout_ms);

    // Dispatcher
    parse_into(lookup("MAILROOM_DISPATCHER_ENABLED"), &mut config.dispatcher.enabled);
    parse_into(lookup("MAILROOM_POLL_INTERVAL_MS"), &mut config.dispatcher.poll_interval_ms);
    parse_into(lookup("MAILROOM_BATCH_SIZE"), &mut config.dispatcher.batch_size);
    parse_into(lookup("MAILROOM_RETRY_DELAY_SECS"), &mut config.dispatcher.retry_delay_secs);
    parse_into(
        lookup("MAILROOM_RECOVERY_INTERVAL_SECS"),
        &mut config.dispatcher.recovery_interval_secs,
    );

    // Pagination
    parse_into(lookup("MAILROOM_PER_PAGE"), &mut config.pagination.per_page);
    parse_into(lookup("MAILROOM_BULLET_WINDOW"), &mut config.pagination.bullet_window);

    // Webhook
    if let Some(val) = lookup("MAILROOM_WEBHOOK_KEY") {
        config.webhook.key = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("MAILROOM_CACHE_BACKEND", "Redis"),
                ("MAILROOM_BATCH_SIZE", "50"),
                ("MAILROOM_WEBHOOK_KEY", "s3cret"),
                ("MAILROOM_CLAIM_TIMEOUT_SECS", "90"),
            ]),
        );

        assert_eq!(config.cache.backend, CacheBackendKind::Redis);
        assert_eq!(config.dispatcher.batch_size, 50);
        assert_eq!(config.webhook.key, "s3cret");
        assert_eq!(config.store.claim_timeout_secs, 90);
    }

    #[test]
    fn test_unparseable_override_ignored() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("MAILROOM_BATCH_SIZE", "lots"),
                ("MAILROOM_CACHE_BACKEND", "memcached"),
            ]),
        );

        assert_eq!(config.dispatcher.batch_size, 10);
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[pagination]\nper_page = 50\n").unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.pagination.per_page, 50);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invalid.toml");
        std::fs::write(&path, "[pagination]\nper_page = 0\n").unwrap();

        let result = ConfigLoader::with_path(&path).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
