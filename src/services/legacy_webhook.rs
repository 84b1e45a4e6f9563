//! Deprecated `{orderId, paidAmount}` webhook
//!
//! Older gateway integrations post the paid amount directly. The amount is
//! credited as-is to the user in the order id's leading segment, with no
//! status query, no currency conversion and no signed token. Disabled unless
//! `LEGACY_WEBHOOK_ENABLED` is set.

use crate::services::correlation::leading_user_id;
use crate::services::credit_ledger::{
    CreditLedger, LedgerEntry, LedgerEntryType, LedgerError, NewLedgerEntry,
};
use bigdecimal::{BigDecimal, Zero};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const LEGACY_REFERENCE_TYPE: &str = "legacy_webhook";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyWebhookPayload {
    pub order_id: String,
    pub paid_amount: BigDecimal,
}

#[derive(Debug, Error)]
pub enum LegacyWebhookError {
    #[error("Legacy webhook is disabled")]
    Disabled,
    #[error("Order id does not start with a user id: {0}")]
    InvalidOrderId(String),
    #[error("Paid amount must be positive, got {0}")]
    InvalidAmount(BigDecimal),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<LegacyWebhookError> for crate::error::AppError {
    fn from(err: LegacyWebhookError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError};

        match err {
            LegacyWebhookError::Disabled => {
                AppError::new(AppErrorKind::Domain(DomainError::FeatureDisabled {
                    feature: "legacy_webhook".to_string(),
                }))
            }
            LegacyWebhookError::InvalidOrderId(order_id) => {
                AppError::new(AppErrorKind::Domain(DomainError::CorrelationFailed {
                    reason: format!("unrecognised order id '{}'", order_id),
                }))
            }
            LegacyWebhookError::InvalidAmount(amount) => {
                AppError::new(AppErrorKind::Domain(DomainError::InvalidCreditAmount {
                    amount: amount.to_string(),
                }))
            }
            LegacyWebhookError::Ledger(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LegacyCredit {
    pub entry: LedgerEntry,
    /// The order id had already been credited
    pub duplicate: bool,
}

pub struct LegacyWebhookProcessor {
    ledger: Arc<dyn CreditLedger>,
    enabled: bool,
}

impl LegacyWebhookProcessor {
    pub fn new(ledger: Arc<dyn CreditLedger>, enabled: bool) -> Self {
        Self { ledger, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn process(
        &self,
        payload: LegacyWebhookPayload,
    ) -> Result<LegacyCredit, LegacyWebhookError> {
        if !self.enabled {
            return Err(LegacyWebhookError::Disabled);
        }

        warn!(
            order_id = %payload.order_id,
            "Deprecated legacy payment webhook used"
        );

        let user_id = leading_user_id(&payload.order_id)
            .ok_or_else(|| LegacyWebhookError::InvalidOrderId(payload.order_id.clone()))?;

        if payload.paid_amount <= BigDecimal::zero() {
            return Err(LegacyWebhookError::InvalidAmount(payload.paid_amount));
        }

        let entry = NewLedgerEntry::new(
            user_id,
            payload.paid_amount.clone(),
            LedgerEntryType::Refill,
            format!("Credit refill (legacy webhook): {}", payload.paid_amount),
        )
        .with_reference(payload.order_id.trim(), LEGACY_REFERENCE_TYPE)
        .with_metadata(json!({ "source": LEGACY_REFERENCE_TYPE }));

        match self.ledger.apply_delta(entry).await {
            Ok(entry) => {
                info!(
                    user_id = user_id,
                    amount = %entry.amount,
                    balance_after = %entry.balance_after,
                    "Legacy webhook credited"
                );
                Ok(LegacyCredit {
                    entry,
                    duplicate: false,
                })
            }
            Err(LedgerError::DuplicateReference { existing }) => Ok(LegacyCredit {
                entry: *existing,
                duplicate: true,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
