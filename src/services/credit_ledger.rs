//! Credit ledger
//!
//! The only way a user's credit balance changes. Each mutation reads the
//! balance, applies a signed delta and appends an immutable entry recording
//! the balance right after it, all as one atomic unit per user.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Refill,
    ReferralReward,
    ReferralBonus,
    Subscription,
    Adjustment,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::Refill => "refill",
            LedgerEntryType::ReferralReward => "referral_reward",
            LedgerEntryType::ReferralBonus => "referral_bonus",
            LedgerEntryType::Subscription => "subscription",
            LedgerEntryType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LedgerEntryType {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "refill" => Ok(LedgerEntryType::Refill),
            "referral_reward" => Ok(LedgerEntryType::ReferralReward),
            "referral_bonus" => Ok(LedgerEntryType::ReferralBonus),
            "subscription" => Ok(LedgerEntryType::Subscription),
            "adjustment" => Ok(LedgerEntryType::Adjustment),
            other => Err(LedgerError::Database(format!(
                "unknown ledger entry type '{}'",
                other
            ))),
        }
    }
}

/// Conversion context stored alongside a credited amount
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrencyConversion {
    pub original_currency: String,
    pub original_amount: BigDecimal,
    pub exchange_rate: BigDecimal,
    pub converted_amount: BigDecimal,
    pub base_currency: String,
}

/// Input to [`CreditLedger::apply_delta`]
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: i64,
    /// Signed: positive credits, negative debits
    pub amount: BigDecimal,
    pub entry_type: LedgerEntryType,
    pub description: String,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub conversion: Option<CurrencyConversion>,
    pub metadata: JsonValue,
}

impl NewLedgerEntry {
    pub fn new(
        user_id: i64,
        amount: BigDecimal,
        entry_type: LedgerEntryType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            entry_type,
            description: description.into(),
            reference_id: None,
            reference_type: None,
            conversion: None,
            metadata: JsonValue::Object(Default::default()),
        }
    }

    pub fn with_reference(
        mut self,
        reference_id: impl Into<String>,
        reference_type: impl Into<String>,
    ) -> Self {
        self.reference_id = Some(reference_id.into());
        self.reference_type = Some(reference_type.into());
        self
    }

    pub fn with_conversion(mut self, conversion: Option<CurrencyConversion>) -> Self {
        self.conversion = conversion;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    /// Refill entries carrying a reference may be written once per reference
    pub fn is_unique_reference(&self) -> bool {
        self.entry_type == LedgerEntryType::Refill && self.reference_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: i64,
    pub amount: BigDecimal,
    pub balance_after: BigDecimal,
    pub entry_type: LedgerEntryType,
    pub status: String,
    pub description: String,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub conversion: Option<CurrencyConversion>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("User {user_id} not found")]
    UserNotFound { user_id: i64 },

    #[error("Reference already recorded in ledger entry {}", existing.id)]
    DuplicateReference { existing: Box<LedgerEntry> },

    #[error("Insufficient credits: available {available}, required {required}")]
    InsufficientBalance {
        available: BigDecimal,
        required: BigDecimal,
    },

    #[error("Invalid ledger amount: {0}")]
    InvalidAmount(String),

    #[error("Ledger storage error: {0}")]
    Database(String),
}

#[cfg(feature = "database")]
impl From<crate::database::error::DatabaseError> for LedgerError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<LedgerError> for crate::error::AppError {
    fn from(err: LedgerError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError};

        match err {
            LedgerError::UserNotFound { user_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::UserNotFound { user_id }))
            }
            LedgerError::DuplicateReference { existing } => {
                AppError::new(AppErrorKind::Domain(DomainError::DuplicateCredit {
                    reference_id: existing.reference_id.unwrap_or_default(),
                }))
            }
            LedgerError::InsufficientBalance {
                available,
                required,
            } => AppError::new(AppErrorKind::Domain(DomainError::InsufficientCredits {
                available: available.to_string(),
                required: required.to_string(),
            })),
            LedgerError::InvalidAmount(reason) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: "amount".to_string(),
                    reason,
                }))
            }
            LedgerError::Database(message) => AppError::new(AppErrorKind::Infrastructure(
                InfrastructureError::Database {
                    message,
                    is_retryable: true,
                },
            )),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Apply a signed delta to the user's balance and record it.
    /// Concurrent calls for the same user are serialized.
    async fn apply_delta(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry>;

    /// Entries newest first. `page` is 1-based; `limit` is clamped to 1..=100.
    async fn get_history(&self, user_id: i64, page: u32, limit: u32) -> LedgerResult<LedgerPage>;

    async fn balance(&self, user_id: i64) -> LedgerResult<BigDecimal>;

    /// Refill entry already recorded under a gateway reference
    async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> LedgerResult<Option<LedgerEntry>>;
}

/// Clamp paging input, returning `(page, limit, offset)`
pub fn normalize_page(page: u32, limit: u32) -> (u32, u32, i64) {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let offset = (page as i64 - 1) * limit as i64;
    (page, limit, offset)
}

/// Checks shared by every ledger implementation before touching storage
pub fn validate_delta(entry: &NewLedgerEntry, current_balance: &BigDecimal) -> LedgerResult<BigDecimal> {
    if entry.amount.is_zero() {
        return Err(LedgerError::InvalidAmount("amount must be non-zero".to_string()));
    }

    let balance_after = current_balance + &entry.amount;
    if balance_after < BigDecimal::zero() {
        return Err(LedgerError::InsufficientBalance {
            available: current_balance.clone(),
            required: -entry.amount.clone(),
        });
    }

    Ok(balance_after)
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<i64, BigDecimal>,
    entries: Vec<LedgerEntry>,
}

impl LedgerState {
    fn refill_by_reference(&self, reference_type: &str, reference_id: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| {
            e.entry_type == LedgerEntryType::Refill
                && e.reference_type.as_deref() == Some(reference_type)
                && e.reference_id.as_deref() == Some(reference_id)
        })
    }
}

/// Ledger kept in process memory; one lock covers every user
#[derive(Default)]
pub struct InMemoryCreditLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user with an opening balance
    pub fn with_user(mut self, user_id: i64, balance: BigDecimal) -> Self {
        self.state.get_mut().balances.insert(user_id, balance);
        self
    }

    pub async fn add_user(&self, user_id: i64, balance: BigDecimal) {
        self.state.lock().await.balances.insert(user_id, balance);
    }

    /// Every entry for a user in insertion order
    pub async fn entries_for(&self, user_id: i64) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn apply_delta(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        let mut state = self.state.lock().await;

        let current = state
            .balances
            .get(&entry.user_id)
            .cloned()
            .ok_or(LedgerError::UserNotFound {
                user_id: entry.user_id,
            })?;

        if entry.is_unique_reference() {
            let (reference_type, reference_id) = (
                entry.reference_type.as_deref().unwrap_or_default(),
                entry.reference_id.as_deref().unwrap_or_default(),
            );
            if let Some(existing) = state.refill_by_reference(reference_type, reference_id) {
                return Err(LedgerError::DuplicateReference {
                    existing: Box::new(existing.clone()),
                });
            }
        }

        let balance_after = validate_delta(&entry, &current)?;

        let recorded = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            amount: entry.amount,
            balance_after: balance_after.clone(),
            entry_type: entry.entry_type,
            status: "completed".to_string(),
            description: entry.description,
            reference_id: entry.reference_id,
            reference_type: entry.reference_type,
            conversion: entry.conversion,
            metadata: entry.metadata,
            created_at: Utc::now(),
        };

        state.balances.insert(recorded.user_id, balance_after);
        state.entries.push(recorded.clone());
        Ok(recorded)
    }

    async fn get_history(&self, user_id: i64, page: u32, limit: u32) -> LedgerResult<LedgerPage> {
        let (page, limit, offset) = normalize_page(page, limit);
        let state = self.state.lock().await;

        if !state.balances.contains_key(&user_id) {
            return Err(LedgerError::UserNotFound { user_id });
        }

        let user_entries: Vec<&LedgerEntry> = state
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .collect();

        Ok(LedgerPage {
            total: user_entries.len() as i64,
            entries: user_entries
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect(),
            page,
            limit,
        })
    }

    async fn balance(&self, user_id: i64) -> LedgerResult<BigDecimal> {
        self.state
            .lock()
            .await
            .balances
            .get(&user_id)
            .cloned()
            .ok_or(LedgerError::UserNotFound { user_id })
    }

    async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .refill_by_reference(reference_type, reference_id)
            .cloned())
    }
}
