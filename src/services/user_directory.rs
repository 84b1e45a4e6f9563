//! Read-only view of user records needed by the payment flow

use crate::services::credit_ledger::{LedgerError, LedgerResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub preferred_currency: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: i64) -> LedgerResult<Option<UserProfile>>;

    /// Currency a user pays in when none is given explicitly
    async fn preferred_currency(&self, user_id: i64) -> LedgerResult<Option<String>> {
        Ok(self
            .find_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound { user_id })?
            .preferred_currency
            .filter(|c| !c.trim().is_empty()))
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<i64, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: i64, preferred_currency: Option<&str>) -> Self {
        self.users.get_mut().insert(
            user_id,
            UserProfile {
                id: user_id,
                preferred_currency: preferred_currency.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, user_id: i64) -> LedgerResult<Option<UserProfile>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}
