use crate::database::error::DatabaseError;
use crate::services::credit_ledger::{
    normalize_page, validate_delta, CreditLedger, CurrencyConversion, LedgerEntry, LedgerError,
    LedgerPage, LedgerResult, NewLedgerEntry,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, user_id, amount, balance_after, entry_type, status, description, \
     reference_id, reference_type, original_currency, original_amount, exchange_rate, \
     converted_amount, base_currency, metadata, created_at";

#[derive(Debug, Clone, FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: i64,
    amount: BigDecimal,
    balance_after: BigDecimal,
    entry_type: String,
    status: String,
    description: String,
    reference_id: Option<String>,
    reference_type: Option<String>,
    original_currency: Option<String>,
    original_amount: Option<BigDecimal>,
    exchange_rate: Option<BigDecimal>,
    converted_amount: Option<BigDecimal>,
    base_currency: Option<String>,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let conversion = match (
            row.original_currency,
            row.original_amount,
            row.exchange_rate,
            row.converted_amount,
            row.base_currency,
        ) {
            (
                Some(original_currency),
                Some(original_amount),
                Some(exchange_rate),
                Some(converted_amount),
                Some(base_currency),
            ) => Some(CurrencyConversion {
                original_currency,
                original_amount,
                exchange_rate,
                converted_amount,
                base_currency,
            }),
            _ => None,
        };

        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            balance_after: row.balance_after,
            entry_type: row.entry_type.parse()?,
            status: row.status,
            description: row.description,
            reference_id: row.reference_id,
            reference_type: row.reference_type,
            conversion,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// Postgres ledger. Each delta runs in one transaction holding the user row lock.
#[derive(Clone)]
pub struct CreditLedgerRepository {
    pool: PgPool,
}

impl CreditLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_balance(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> LedgerResult<BigDecimal> {
        let balance: Option<BigDecimal> =
            sqlx::query_scalar("SELECT credit_balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        balance.ok_or(LedgerError::UserNotFound { user_id })
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewLedgerEntry,
        balance_after: &BigDecimal,
    ) -> Result<LedgerRow, DatabaseError> {
        let conversion = entry.conversion.as_ref();

        sqlx::query_as::<_, LedgerRow>(&format!(
            "INSERT INTO credit_ledger (
                 id, user_id, amount, balance_after, entry_type, status, description,
                 reference_id, reference_type, original_currency, original_amount,
                 exchange_rate, converted_amount, base_currency, metadata, created_at
             )
             VALUES ($1, $2, $3, $4, $5, 'completed', $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())
             RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(&entry.amount)
        .bind(balance_after)
        .bind(entry.entry_type.as_str())
        .bind(&entry.description)
        .bind(&entry.reference_id)
        .bind(&entry.reference_type)
        .bind(conversion.map(|c| c.original_currency.clone()))
        .bind(conversion.map(|c| c.original_amount.clone()))
        .bind(conversion.map(|c| c.exchange_rate.clone()))
        .bind(conversion.map(|c| c.converted_amount.clone()))
        .bind(conversion.map(|c| c.base_currency.clone()))
        .bind(&entry.metadata)
        .fetch_one(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl CreditLedger for CreditLedgerRepository {
    async fn apply_delta(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let current = Self::lock_balance(&mut tx, entry.user_id).await?;
        let balance_after = validate_delta(&entry, &current)?;

        let row = match Self::insert_entry(&mut tx, &entry, &balance_after).await {
            Ok(row) => row,
            Err(e) if e.is_unique_violation() && entry.is_unique_reference() => {
                drop(tx);
                let (reference_type, reference_id) = (
                    entry.reference_type.as_deref().unwrap_or_default(),
                    entry.reference_id.as_deref().unwrap_or_default(),
                );
                warn!(
                    reference_type = %reference_type,
                    reference_id = %reference_id,
                    "Ledger already holds this reference"
                );
                return match self.find_by_reference(reference_type, reference_id).await? {
                    Some(existing) => Err(LedgerError::DuplicateReference {
                        existing: Box::new(existing),
                    }),
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        sqlx::query("UPDATE users SET credit_balance = $1, updated_at = NOW() WHERE id = $2")
            .bind(&balance_after)
            .bind(entry.user_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        debug!(
            user_id = row.user_id,
            amount = %row.amount,
            balance_after = %row.balance_after,
            "Ledger entry committed"
        );
        row.try_into()
    }

    async fn get_history(&self, user_id: i64, page: u32, limit: u32) -> LedgerResult<LedgerPage> {
        let (page, limit, offset) = normalize_page(page, limit);

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        if exists.is_none() {
            return Err(LedgerError::UserNotFound { user_id });
        }

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_ledger WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM credit_ledger
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(LedgerPage {
            entries: rows
                .into_iter()
                .map(LedgerEntry::try_from)
                .collect::<LedgerResult<Vec<_>>>()?,
            total,
            page,
            limit,
        })
    }

    async fn balance(&self, user_id: i64) -> LedgerResult<BigDecimal> {
        let balance: Option<BigDecimal> =
            sqlx::query_scalar("SELECT credit_balance FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        balance.ok_or(LedgerError::UserNotFound { user_id })
    }

    async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> LedgerResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM credit_ledger
             WHERE reference_type = $1 AND reference_id = $2 AND entry_type = 'refill'",
            ENTRY_COLUMNS
        ))
        .bind(reference_type)
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(LedgerEntry::try_from).transpose()
    }
}
