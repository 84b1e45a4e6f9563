//! Typed cache abstraction and its Redis implementation

use super::error::{CacheError, CacheResult};
use super::RedisPool;
use async_trait::async_trait;
use bb8::PooledConnection;
use bb8_redis::RedisConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Typed key-value cache. Values are stored as JSON.
#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    /// Store a value; `ttl = None` keeps it until explicitly deleted
    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

/// Redis-backed cache sharing one bb8 pool
#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

impl RedisCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub async fn get_connection(
        &self,
    ) -> CacheResult<PooledConnection<'_, RedisConnectionManager>> {
        self.pool.get().await.map_err(CacheError::from)
    }

    /// List keys matching a glob pattern using SCAN so large keyspaces don't block Redis
    pub async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    /// Delete every key matching a pattern, returning how many were removed
    pub async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_connection().await?;
        let removed: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut *conn).await?;
        debug!(pattern = %pattern, removed = removed, "Cache pattern invalidated");
        Ok(removed)
    }

    fn decode<T: DeserializeOwned>(key: &str, raw: Option<String>) -> CacheResult<Option<T>> {
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    Err(CacheError::from(e))
                }
            },
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T> Cache<T> for RedisCache
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        Self::decode(key, raw)
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.get_connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(json);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut *conn).await?;

        debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "Cache entry stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut *conn).await?;
        Ok(removed > 0)
    }
}
