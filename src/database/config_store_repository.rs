use crate::database::error::DatabaseError;
use crate::services::pending_payments::{
    Claim, ConsumedMarker, PendingPayment, PendingPaymentStore, StoredPayment, StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use tracing::debug;

const PENDING_PAYMENT_PREFIX: &str = "pending_payment:";

/// Row of the generic key-value `app_config` table
#[derive(Debug, Clone, FromRow)]
pub struct ConfigEntry {
    pub key: String,
    pub value: JsonValue,
    pub updated_at: DateTime<Utc>,
}

/// Repository over `app_config`. Also serves as the durable pending-payment store.
#[derive(Clone)]
pub struct ConfigStoreRepository {
    pool: PgPool,
}

impl ConfigStoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<ConfigEntry>, DatabaseError> {
        sqlx::query_as::<_, ConfigEntry>(
            "SELECT key, value, updated_at FROM app_config WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Insert or replace a value
    pub async fn set(&self, key: &str, value: &JsonValue) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO app_config (key, value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    /// Overwrite an existing value, returning the row as it was before.
    /// The row lock taken by the CTE makes concurrent replacements queue,
    /// so each caller sees the value the previous one wrote.
    pub async fn replace_entry(
        &self,
        key: &str,
        value: &JsonValue,
    ) -> Result<Option<ConfigEntry>, DatabaseError> {
        sqlx::query_as::<_, ConfigEntry>(
            "WITH previous AS (
                 SELECT key, value, updated_at FROM app_config WHERE key = $1 FOR UPDATE
             )
             UPDATE app_config AS c
             SET value = $2, updated_at = NOW()
             FROM previous
             WHERE c.key = previous.key
             RETURNING previous.key, previous.value, previous.updated_at",
        )
        .bind(key)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Delete keys under `prefix` last written before `cutoff`
    pub async fn delete_stale(
        &self,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM app_config WHERE key LIKE $1 AND updated_at < $2")
            .bind(format!("{}%", escape_like(prefix)))
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected())
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn pending_key(correlation_id: &str) -> String {
    format!("{}{}", PENDING_PAYMENT_PREFIX, correlation_id)
}

#[async_trait]
impl PendingPaymentStore for ConfigStoreRepository {
    async fn put(&self, correlation_id: &str, payment: &PendingPayment) -> StoreResult<()> {
        let value = serde_json::to_value(payment)?;
        self.set(&pending_key(correlation_id), &value).await?;
        Ok(())
    }

    async fn claim(&self, correlation_id: &str) -> StoreResult<Claim> {
        let marker = serde_json::to_value(ConsumedMarker::now())?;
        let previous = self
            .replace_entry(&pending_key(correlation_id), &marker)
            .await?
            .map(|entry| serde_json::from_value::<StoredPayment>(entry.value))
            .transpose()?;
        Ok(previous.into())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let purged = self.delete_stale(PENDING_PAYMENT_PREFIX, cutoff).await?;
        debug!(purged = purged, "Purged expired pending payments from app_config");
        Ok(purged)
    }
}
