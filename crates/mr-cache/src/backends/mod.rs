//! Backing stores for [`Cache`](crate::Cache).
//!
//! The store is picked once, when the root cache is built from
//! configuration; every child cache shares it.

use async_trait::async_trait;

use crate::Result;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Raw byte storage addressed by fully prefixed keys
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
