//! Read-through cache for campaign service results.
//!
//! - `get` fills a missing key from a factory and stores the result.
//! - Keys live under a namespace prefix; `get_child_cache` derives a nested
//!   namespace (`"<prefix>_<key>_"`) that is flushed independently of its
//!   parent and siblings.
//! - `lock` arms a deferred invalidation: the next `get` on the same cache
//!   instance flushes the requested key before reading it. `clear` wraps a
//!   mutating call with that protocol so subsequent reads recompute.
//!
//! Concurrent misses on one key are single-flight: the first caller runs the
//! factory while the others wait on the key's fill lock and then read the
//! stored value.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use mr_config::{CacheBackendKind, CacheConfig};

pub mod backends;
pub mod error;

pub use backends::{CacheBackend, MemoryBackend, RedisBackend};
pub use error::CacheError;

pub type Result<T> = std::result::Result<T, CacheError>;

type FillLocks = DashMap<String, Arc<Mutex<()>>>;

pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    clear_lock: AtomicBool,
    /// Shared by the whole cache tree; keys are fully prefixed
    fill_locks: Arc<FillLocks>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            clear_lock: AtomicBool::new(false),
            fill_locks: Arc::new(DashMap::new()),
        }
    }

    /// Root cache over a fresh in-process store
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), prefix)
    }

    /// Build the root cache with the backend selected in configuration
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
            CacheBackendKind::Redis => {
                Arc::new(RedisBackend::connect(&config.redis_url, config.timeout()).await?)
            }
        };

        info!(
            backend = backend.name(),
            prefix = %config.key_prefix,
            "Cache initialized"
        );
        Ok(Self::new(backend, config.key_prefix.clone()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn fill_lock(&self, full_key: &str) -> Arc<Mutex<()>> {
        self.fill_locks
            .entry(full_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the fill lock entry once no other caller holds it
    fn release_fill_lock(&self, full_key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.fill_locks
            .remove_if(full_key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Return the value stored under `key`, filling it from `factory` on a
    /// miss. A failing factory stores nothing.
    pub async fn get<T, E, F, Fut>(&self, key: &str, factory: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let full_key = self.full_key(key);
        let lock = self.fill_lock(&full_key);

        let result = {
            let _guard = lock.lock().await;
            self.get_locked(&full_key, factory).await
        };

        self.release_fill_lock(&full_key, lock);
        result
    }

    async fn get_locked<T, E, F, Fut>(&self, full_key: &str, factory: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if self.clear_lock.swap(false, Ordering::SeqCst) {
            self.backend.delete(full_key).await?;
            debug!(key = %full_key, "Deferred invalidation flushed key");
        }

        if let Some(bytes) = self.backend.get(full_key).await? {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    debug!(key = %full_key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Discarding unreadable cache entry");
                }
            }
        }

        debug!(key = %full_key, "Cache miss, filling");
        let value = factory().await?;
        let bytes = serde_json::to_vec(&value).map_err(CacheError::from)?;
        self.backend.set(full_key, bytes).await?;
        Ok(value)
    }

    /// Plain-value form of [`get`](Self::get): `value` is stored on a miss
    /// and the cached value is returned on a hit.
    pub async fn get_or_insert<T>(&self, key: &str, value: T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.get(key, || async move { Ok::<T, CacheError>(value) }).await
    }

    /// Remove entries immediately
    pub async fn flush(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            let full_key = self.full_key(key);
            let lock = self.fill_lock(&full_key);
            let result = {
                let _guard = lock.lock().await;
                self.backend.delete(&full_key).await
            };
            self.release_fill_lock(&full_key, lock);
            result?;
            debug!(key = %full_key, "Flushed cache key");
        }
        Ok(())
    }

    /// Arm deferred invalidation for the next `get` on this cache
    pub fn lock(&self) {
        self.clear_lock.store(true, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.clear_lock.load(Ordering::SeqCst)
    }

    /// Run a mutating call so the next read recomputes.
    ///
    /// The lock is armed before the call and re-armed after it, so a read
    /// that raced the mutation cannot leave its stale value behind.
    pub async fn clear<F, Fut, R>(&self, call: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        self.lock();
        let result = call().await;
        self.lock();
        result
    }

    /// Nested cache scoped under `"<prefix>_<key>_"` with its own lock state
    pub fn get_child_cache(&self, key: &str) -> Cache {
        Cache {
            backend: self.backend.clone(),
            prefix: format!("{}_{}_", self.prefix, key),
            clear_lock: AtomicBool::new(false),
            fill_locks: self.fill_locks.clone(),
        }
    }
}
