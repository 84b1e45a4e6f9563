//! Pending-payment metadata store
//!
//! Conversion context captured when a payment is initiated, keyed by the
//! correlation token and consumed exactly once when the callback arrives.
//! Claiming swaps the record for a consumed marker in one atomic step, so a
//! second delivery of the same callback sees that the payment is being (or
//! has been) applied rather than finding nothing. `put` replaces a marker,
//! which is how a failed credit hands the record back.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPayment {
    pub user_id: i64,
    /// Currency the user paid in
    pub currency: String,
    pub original_amount: BigDecimal,
    /// Amount in the base currency that will be credited
    pub converted_amount: BigDecimal,
    pub exchange_rate: BigDecimal,
    pub base_currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<i64>,
    /// Gateway payment this record was registered for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<u64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PendingPayment {
    pub fn was_converted(&self) -> bool {
        !self.currency.eq_ignore_ascii_case(&self.base_currency)
    }

    /// Records written before payment ids were stored match any payment
    pub fn belongs_to_payment(&self, payment_id: &str) -> bool {
        self.payment_id
            .as_deref()
            .map_or(true, |stored| stored == payment_id.trim())
    }
}

/// Left behind once a callback has claimed the record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumedMarker {
    pub consumed_at: DateTime<Utc>,
}

impl ConsumedMarker {
    pub fn now() -> Self {
        Self {
            consumed_at: Utc::now(),
        }
    }
}

/// Value held under a correlation token. Untagged so records written
/// before markers existed still decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StoredPayment {
    Consumed(ConsumedMarker),
    Pending(PendingPayment),
}

impl StoredPayment {
    /// When the value was last written; what retention is measured from
    pub fn written_at(&self) -> DateTime<Utc> {
        match self {
            StoredPayment::Consumed(marker) => marker.consumed_at,
            StoredPayment::Pending(payment) => payment.created_at,
        }
    }
}

/// Result of claiming a correlation token
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The record, now replaced by a consumed marker
    Claimed(PendingPayment),
    /// Another callback claimed it first
    AlreadyClaimed,
    /// Never stored, or swept
    Missing,
}

impl From<Option<StoredPayment>> for Claim {
    /// Map the value a store held just before it was claimed
    fn from(previous: Option<StoredPayment>) -> Self {
        match previous {
            Some(StoredPayment::Pending(payment)) => Claim::Claimed(payment),
            Some(StoredPayment::Consumed(_)) => Claim::AlreadyClaimed,
            None => Claim::Missing,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Pending payment store unavailable: {0}")]
    Backend(String),

    #[error("Pending payment record is corrupt: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(feature = "database")]
impl From<crate::database::error::DatabaseError> for StoreError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(feature = "cache")]
impl From<crate::cache::CacheError> for StoreError {
    fn from(err: crate::cache::CacheError) -> Self {
        match err {
            crate::cache::CacheError::SerializationError(msg) => StoreError::Serialization(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<StoreError> for crate::error::AppError {
    fn from(err: StoreError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: matches!(err, StoreError::Backend(_)),
        }))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PendingPaymentStore: Send + Sync {
    /// Store or overwrite the record for a correlation token, replacing any
    /// consumed marker
    async fn put(&self, correlation_id: &str, payment: &PendingPayment) -> StoreResult<()>;

    /// Atomically swap the record for a consumed marker
    async fn claim(&self, correlation_id: &str) -> StoreResult<Claim>;

    /// The record to apply, if any. Leaves a consumed marker behind.
    async fn take(&self, correlation_id: &str) -> StoreResult<Option<PendingPayment>> {
        match self.claim(correlation_id).await? {
            Claim::Claimed(payment) => Ok(Some(payment)),
            Claim::AlreadyClaimed | Claim::Missing => Ok(None),
        }
    }

    /// Delete records and markers written before `cutoff`, returning how many went
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Single-process store
#[derive(Default)]
pub struct InMemoryPendingPaymentStore {
    records: Mutex<HashMap<String, StoredPayment>>,
}

impl InMemoryPendingPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unclaimed records; consumed markers are not counted
    pub async fn len(&self) -> usize {
        self.records
            .lock()
            .await
            .values()
            .filter(|stored| matches!(stored, StoredPayment::Pending(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PendingPaymentStore for InMemoryPendingPaymentStore {
    async fn put(&self, correlation_id: &str, payment: &PendingPayment) -> StoreResult<()> {
        self.records.lock().await.insert(
            correlation_id.to_string(),
            StoredPayment::Pending(payment.clone()),
        );
        Ok(())
    }

    async fn claim(&self, correlation_id: &str) -> StoreResult<Claim> {
        let mut records = self.records.lock().await;
        let pending = matches!(
            records.get(correlation_id),
            Some(StoredPayment::Pending(_))
        );
        let previous = if pending {
            records.insert(
                correlation_id.to_string(),
                StoredPayment::Consumed(ConsumedMarker::now()),
            )
        } else {
            records.get(correlation_id).cloned()
        };
        Ok(previous.into())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, stored| stored.written_at() >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(feature = "cache")]
pub use redis_store::RedisPendingPaymentStore;

#[cfg(feature = "cache")]
mod redis_store {
    use super::*;
    use crate::cache::keys::pending_payment::PendingPaymentKey;
    use crate::cache::{Cache, CacheError, RedisCache};
    use std::time::Duration;
    use tracing::debug;

    /// Store shared through Redis. A claim is one `SET ... XX GET` that
    /// writes the consumed marker and returns what it replaced.
    #[derive(Clone)]
    pub struct RedisPendingPaymentStore {
        cache: RedisCache,
        retention: Option<Duration>,
    }

    impl RedisPendingPaymentStore {
        pub fn new(cache: RedisCache) -> Self {
            Self {
                cache,
                retention: None,
            }
        }

        /// Let Redis expire records on its own after `retention`
        pub fn with_retention(mut self, retention: Duration) -> Self {
            self.retention = Some(retention);
            self
        }
    }

    #[async_trait]
    impl PendingPaymentStore for RedisPendingPaymentStore {
        async fn put(&self, correlation_id: &str, payment: &PendingPayment) -> StoreResult<()> {
            let key = PendingPaymentKey::new(correlation_id).to_string();
            self.cache.set(&key, payment, self.retention).await?;
            Ok(())
        }

        async fn claim(&self, correlation_id: &str) -> StoreResult<Claim> {
            let key = PendingPaymentKey::new(correlation_id).to_string();
            let marker = serde_json::to_string(&ConsumedMarker::now())?;

            let mut conn = self.cache.get_connection().await?;
            let previous: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(marker)
                .arg("XX")
                .arg("GET")
                .arg("KEEPTTL")
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::from)?;

            let previous = previous
                .map(|raw| serde_json::from_str::<StoredPayment>(&raw))
                .transpose()?;
            Ok(previous.into())
        }

        async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
            let mut purged = 0;
            for key in self.cache.keys(&PendingPaymentKey::pattern()).await? {
                let stored: Option<StoredPayment> =
                    match <RedisCache as Cache<StoredPayment>>::get(&self.cache, &key).await {
                        Ok(stored) => stored,
                        // Undecodable records can never be applied
                        Err(CacheError::SerializationError(_)) => None,
                        Err(e) => return Err(e.into()),
                    };
                let expired = stored.map(|s| s.written_at() < cutoff).unwrap_or(true);
                if expired
                    && <RedisCache as Cache<StoredPayment>>::delete(&self.cache, &key).await?
                {
                    purged += 1;
                }
            }
            debug!(purged = purged, "Purged expired pending payments from Redis");
            Ok(purged)
        }
    }
}
