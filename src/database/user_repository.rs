use crate::database::error::DatabaseError;
use crate::services::credit_ledger::LedgerResult;
use crate::services::user_directory::{UserDirectory, UserProfile};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: i64,
    preferred_currency: Option<String>,
}

/// Read access to the `users` table owned by the account service
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_user(&self, user_id: i64) -> LedgerResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, preferred_currency FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|row| UserProfile {
            id: row.id,
            preferred_currency: row.preferred_currency,
        }))
    }
}
