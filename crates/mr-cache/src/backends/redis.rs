//! Redis-backed store shared across processes.
//!
//! Entries are written with `SET key value EX ttl`, so stale campaign data
//! ages out even when nobody flushes it.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use tracing::{debug, info};

use super::CacheBackend;
use crate::{CacheError, Result};

pub struct RedisBackend {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisBackend {
    /// Connect to `redis_url`; `ttl` of zero stores entries without expiry
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = ::redis::Client::open(redis_url)
            .map_err(|e| CacheError::Backend(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;

        info!(ttl_secs = ttl.as_secs(), "Connected Redis cache backend");
        Ok(Self { conn, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !self.ttl.is_zero() {
            cmd.arg("EX").arg(self.ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        debug!(key = %key, "Stored cache entry in Redis");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = ::redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
