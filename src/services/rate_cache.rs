//! Exchange rate cache
//!
//! Entries are never evicted on expiry: a stale rate is still the last-resort
//! answer when every provider is down. Freshness is decided by the resolver.

use crate::cache::keys::exchange_rate::CurrencyPairKey;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedRate {
    pub rate: BigDecimal,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRate {
    pub fn new(rate: BigDecimal, source: impl Into<String>) -> Self {
        Self {
            rate,
            source: source.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Storage for fetched rates. Failures inside an implementation are logged
/// and surface as a miss; a broken cache never fails a conversion.
#[async_trait]
pub trait RateCache: Send + Sync {
    async fn get(&self, key: &CurrencyPairKey) -> Option<CachedRate>;

    async fn put(&self, key: &CurrencyPairKey, rate: CachedRate);

    /// Drop every entry, returning how many were removed
    async fn clear(&self) -> usize;

    async fn entries(&self) -> Vec<(CurrencyPairKey, CachedRate)>;
}

/// Process-local cache
#[derive(Default)]
pub struct InMemoryRateCache {
    entries: RwLock<HashMap<CurrencyPairKey, CachedRate>>,
}

impl InMemoryRateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateCache for InMemoryRateCache {
    async fn get(&self, key: &CurrencyPairKey) -> Option<CachedRate> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &CurrencyPairKey, rate: CachedRate) {
        self.entries.write().await.insert(key.clone(), rate);
    }

    async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        removed
    }

    async fn entries(&self) -> Vec<(CurrencyPairKey, CachedRate)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
        entries
    }
}

#[cfg(feature = "cache")]
pub use redis_cache::RedisRateCache;

#[cfg(feature = "cache")]
mod redis_cache {
    use super::*;
    use crate::cache::{Cache, RedisCache};
    use futures::stream::{self, StreamExt};
    use tracing::warn;

    /// Upper bound on pairs returned by a cache listing
    const LISTING_LIMIT: usize = 500;

    /// Redis keeps stale entries around long enough to serve as fallback
    const RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Rate cache shared by every instance through Redis
    #[derive(Clone)]
    pub struct RedisRateCache {
        cache: RedisCache,
    }

    impl RedisRateCache {
        pub fn new(cache: RedisCache) -> Self {
            Self { cache }
        }
    }

    #[async_trait]
    impl RateCache for RedisRateCache {
        async fn get(&self, key: &CurrencyPairKey) -> Option<CachedRate> {
            match <RedisCache as Cache<CachedRate>>::get(&self.cache, &key.to_string()).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %key, error = %e, "Rate cache read failed");
                    None
                }
            }
        }

        async fn put(&self, key: &CurrencyPairKey, rate: CachedRate) {
            if let Err(e) = self
                .cache
                .set(&key.to_string(), &rate, Some(RETENTION))
                .await
            {
                warn!(key = %key, error = %e, "Rate cache write failed");
            }
        }

        async fn clear(&self) -> usize {
            match self.cache.delete_pattern(&CurrencyPairKey::pattern()).await {
                Ok(removed) => removed as usize,
                Err(e) => {
                    warn!(error = %e, "Rate cache clear failed");
                    0
                }
            }
        }

        async fn entries(&self) -> Vec<(CurrencyPairKey, CachedRate)> {
            let keys = match self.cache.keys(&CurrencyPairKey::pattern()).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "Rate cache listing failed");
                    return Vec::new();
                }
            };

            let mut entries: Vec<(CurrencyPairKey, CachedRate)> = stream::iter(keys)
                .filter_map(|raw_key| async move {
                    let key = CurrencyPairKey::parse(&raw_key)?;
                    match <RedisCache as Cache<CachedRate>>::get(&self.cache, &raw_key).await {
                        Ok(Some(rate)) => Some((key, rate)),
                        _ => None,
                    }
                })
                .take(LISTING_LIMIT)
                .collect()
                .await;
            entries.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
            entries
        }
    }
}
