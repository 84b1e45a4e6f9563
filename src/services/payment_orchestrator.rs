//! Payment Orchestrator
//!
//! Drives a credit refill from initiation to the ledger:
//!
//! ```text
//! initiated -> callback_received -> verified -> credited
//!                                \-> declined | error
//! ```
//!
//! Initiation converts the requested amount into the base currency, opens a
//! gateway session and stashes the conversion context under a signed
//! correlation token. The callback is only advisory: the gateway status query
//! decides whether funds were captured, the pending record is claimed once and
//! only for the gateway payment it was registered with, and the credit is
//! committed through the ledger, which refuses to credit the same gateway
//! payment twice.

use crate::config::{CreditsConfig, GatewayConfig};
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{CreatePaymentRequest, GatewayPaymentStatus};
use crate::services::correlation::{CorrelationError, CorrelationId, CorrelationSigner};
use crate::services::credit_ledger::{
    CreditLedger, CurrencyConversion, LedgerEntry, LedgerEntryType, LedgerError, NewLedgerEntry,
};
use crate::services::exchange_rate::{normalize_currency, ExchangeRateResolver};
use crate::services::pending_payments::{Claim, PendingPayment, PendingPaymentStore, StoreError};
use crate::services::user_directory::UserDirectory;
use bigdecimal::{BigDecimal, One, RoundingMode, Zero};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Callback response code for a successful payment
pub const RESPONSE_CODE_SUCCESS: &str = "00";
/// Callback response code for a resubmitted order; verified like a success
pub const RESPONSE_CODE_DUPLICATE: &str = "01";

/// Ledger reference type for credits backed by a gateway payment
pub const GATEWAY_REFERENCE_TYPE: &str = "payment_gateway";

const TEST_MODE_HINT: &str =
    "The gateway is in test mode: only the gateway's test cards are accepted.";

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub base_currency: String,
    /// Absolute URL the gateway sends the user back to
    pub callback_url: String,
    pub payment_description: String,
    pub test_mode: bool,
}

impl OrchestratorConfig {
    pub fn from_app_config(credits: &CreditsConfig, gateway: &GatewayConfig) -> Self {
        Self {
            base_currency: credits.base_currency.to_uppercase(),
            callback_url: credits.callback_url(),
            payment_description: credits.payment_description.clone(),
            test_mode: gateway.test_mode,
        }
    }
}

// ============================================================================
// State Machine Types
// ============================================================================

/// Lifecycle of a single payment attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentAttemptState {
    /// Gateway session opened, pending record stored
    Initiated,
    /// Gateway called back, status not yet checked
    CallbackReceived,
    /// Gateway status confirmed the payment as approved
    Verified,
    /// Ledger entry written
    Credited,
    Declined,
    Error,
}

impl std::fmt::Display for PaymentAttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentAttemptState::Initiated => write!(f, "initiated"),
            PaymentAttemptState::CallbackReceived => write!(f, "callback_received"),
            PaymentAttemptState::Verified => write!(f, "verified"),
            PaymentAttemptState::Credited => write!(f, "credited"),
            PaymentAttemptState::Declined => write!(f, "declined"),
            PaymentAttemptState::Error => write!(f, "error"),
        }
    }
}

impl PaymentAttemptState {
    pub fn valid_transitions(&self) -> Vec<PaymentAttemptState> {
        match self {
            PaymentAttemptState::Initiated => vec![PaymentAttemptState::CallbackReceived],
            PaymentAttemptState::CallbackReceived => vec![
                PaymentAttemptState::Verified,
                PaymentAttemptState::Declined,
                PaymentAttemptState::Error,
            ],
            PaymentAttemptState::Verified => {
                vec![PaymentAttemptState::Credited, PaymentAttemptState::Error]
            }
            PaymentAttemptState::Credited
            | PaymentAttemptState::Declined
            | PaymentAttemptState::Error => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// How the requested amount maps onto the base currency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionInfo {
    pub currency: String,
    pub original_amount: BigDecimal,
    pub converted_amount: BigDecimal,
    pub exchange_rate: BigDecimal,
    pub base_currency: String,
    /// False when the rate lookup failed and the amount was taken as-is
    pub rate_resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatedPayment {
    /// Signed correlation token
    pub order_id: String,
    /// Integer order id registered with the gateway
    pub gateway_order_id: u64,
    pub payment_id: String,
    pub payment_url: String,
    pub conversion_info: ConversionInfo,
}

/// Parameters of a gateway callback, whatever transport carried them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub order_id: Option<String>,
    pub response_code: Option<String>,
    pub payment_id: Option<String>,
    pub opaque: Option<String>,
}

impl CallbackParams {
    /// Pick the known parameter spellings out of a flat key/value map.
    /// `resposneCode` is a misspelling some gateway builds actually send.
    pub fn from_pairs(pairs: &HashMap<String, String>) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| pairs.get(*k))
                .map(|v| v.trim())
                .find(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            order_id: pick(&["orderID", "orderId", "order_id"]),
            response_code: pick(&["responseCode", "resposneCode", "response_code"]),
            payment_id: pick(&["paymentID", "paymentId", "payment_id"]),
            opaque: pick(&["opaque", "Opaque"]),
        }
    }
}

/// Terminal success of a callback
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Credited {
        entry: LedgerEntry,
        payment_details: JsonValue,
    },
    /// The gateway payment was credited by an earlier delivery
    AlreadyCredited {
        entry: LedgerEntry,
        payment_details: JsonValue,
    },
}

impl CallbackOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            CallbackOutcome::Credited { entry, .. } | CallbackOutcome::AlreadyCredited { entry, .. } => {
                entry
            }
        }
    }

    pub fn payment_details(&self) -> &JsonValue {
        match self {
            CallbackOutcome::Credited {
                payment_details, ..
            }
            | CallbackOutcome::AlreadyCredited {
                payment_details, ..
            } => payment_details,
        }
    }

    pub fn state(&self) -> PaymentAttemptState {
        PaymentAttemptState::Credited
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// Gateway credentials or URLs missing
    Configuration { message: String },
    /// Correlation token could not become a gateway order id
    IdGeneration { message: String },
    /// Transport or rejection from the gateway
    Gateway(PaymentError),
    PaymentDeclined { reason: String },
    /// Callback carried a failure response code
    PaymentFailed {
        response_code: String,
        reason: String,
    },
    /// Gateway status is neither approved nor declined
    PaymentError {
        response_code: String,
        reason: String,
    },
    /// Callback could not be tied to a user
    Correlation { reason: String },
    /// Another delivery claimed the pending record and has not credited yet
    InProgress { payment_id: String },
    InvalidAmount { amount: String },
    InvalidCurrency { currency: String },
    MissingParameter { name: String },
    Ledger(LedgerError),
    Store(StoreError),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration { message } => write!(f, "Configuration error: {}", message),
            Self::IdGeneration { message } => write!(f, "Order id generation failed: {}", message),
            Self::Gateway(err) => write!(f, "Payment gateway error: {}", err),
            Self::PaymentDeclined { reason } => write!(f, "Payment declined: {}", reason),
            Self::PaymentFailed {
                response_code,
                reason,
            } => write!(f, "Payment failed ({}): {}", response_code, reason),
            Self::PaymentError {
                response_code,
                reason,
            } => write!(f, "Payment not approved ({}): {}", response_code, reason),
            Self::Correlation { reason } => write!(f, "Payment correlation failed: {}", reason),
            Self::InProgress { payment_id } => {
                write!(f, "Payment {} is already being processed", payment_id)
            }
            Self::InvalidAmount { amount } => write!(f, "Invalid credit amount: {}", amount),
            Self::InvalidCurrency { currency } => write!(f, "Invalid currency: {}", currency),
            Self::MissingParameter { name } => write!(f, "Missing parameter: {}", name),
            Self::Ledger(err) => write!(f, "Ledger error: {}", err),
            Self::Store(err) => write!(f, "Pending payment store error: {}", err),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<PaymentError> for OrchestratorError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ConfigurationError { message } => {
                OrchestratorError::Configuration { message }
            }
            other => OrchestratorError::Gateway(other),
        }
    }
}

impl From<LedgerError> for OrchestratorError {
    fn from(err: LedgerError) -> Self {
        OrchestratorError::Ledger(err)
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        OrchestratorError::Store(err)
    }
}

impl From<CorrelationError> for OrchestratorError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::IdGeneration(message) => OrchestratorError::IdGeneration { message },
            other => OrchestratorError::Correlation {
                reason: other.to_string(),
            },
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::Configuration { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            OrchestratorError::IdGeneration { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::IdGeneration { message })
            }
            OrchestratorError::Gateway(err) => return err.into(),
            OrchestratorError::PaymentDeclined { reason } => {
                AppErrorKind::Domain(DomainError::PaymentDeclined { reason })
            }
            OrchestratorError::PaymentFailed {
                response_code,
                reason,
            } => AppErrorKind::Domain(DomainError::PaymentFailed {
                response_code,
                reason,
            }),
            OrchestratorError::PaymentError {
                response_code,
                reason,
            } => AppErrorKind::Domain(DomainError::PaymentNotApproved {
                response_code,
                reason,
            }),
            OrchestratorError::Correlation { reason } => {
                AppErrorKind::Domain(DomainError::CorrelationFailed { reason })
            }
            OrchestratorError::InProgress { payment_id } => {
                AppErrorKind::Domain(DomainError::PaymentInProgress { payment_id })
            }
            OrchestratorError::InvalidAmount { amount } => {
                AppErrorKind::Domain(DomainError::InvalidCreditAmount { amount })
            }
            OrchestratorError::InvalidCurrency { currency } => {
                AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency,
                    reason: "expected a 3-letter ISO 4217 code".to_string(),
                })
            }
            OrchestratorError::MissingParameter { name } => {
                AppErrorKind::Validation(ValidationError::MissingField { field: name })
            }
            OrchestratorError::Ledger(err) => return err.into(),
            OrchestratorError::Store(err) => return err.into(),
        };
        AppError::new(kind)
    }
}

impl OrchestratorError {
    /// Terminal state a failed callback ends in
    pub fn state(&self) -> PaymentAttemptState {
        match self {
            OrchestratorError::PaymentDeclined { .. } => PaymentAttemptState::Declined,
            _ => PaymentAttemptState::Error,
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    rates: Arc<ExchangeRateResolver>,
    pending: Arc<dyn PendingPaymentStore>,
    ledger: Arc<dyn CreditLedger>,
    users: Arc<dyn UserDirectory>,
    signer: CorrelationSigner,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        rates: Arc<ExchangeRateResolver>,
        pending: Arc<dyn PendingPaymentStore>,
        ledger: Arc<dyn CreditLedger>,
        users: Arc<dyn UserDirectory>,
        signer: CorrelationSigner,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            rates,
            pending,
            ledger,
            users,
            signer,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Open a gateway session for a credit refill
    pub async fn initiate_payment(
        &self,
        user_id: i64,
        amount: BigDecimal,
        currency: Option<&str>,
    ) -> OrchestratorResult<InitiatedPayment> {
        self.initiate(user_id, None, amount, currency).await
    }

    /// Same as [`initiate_payment`](Self::initiate_payment) with the plan
    /// being paid for carried in the token and the pending record
    pub async fn initiate_subscription_payment(
        &self,
        user_id: i64,
        plan_id: i64,
        amount: BigDecimal,
        currency: Option<&str>,
    ) -> OrchestratorResult<InitiatedPayment> {
        self.initiate(user_id, Some(plan_id), amount, currency).await
    }

    async fn initiate(
        &self,
        user_id: i64,
        plan_id: Option<i64>,
        amount: BigDecimal,
        currency: Option<&str>,
    ) -> OrchestratorResult<InitiatedPayment> {
        if !self.gateway.is_configured() {
            return Err(OrchestratorError::Configuration {
                message: "payment gateway credentials or URLs are not set".to_string(),
            });
        }

        if amount <= BigDecimal::zero() {
            return Err(OrchestratorError::InvalidAmount {
                amount: amount.to_string(),
            });
        }

        let correlation = self.signer.issue(user_id, plan_id)?;
        let gateway_order_id = correlation.gateway_order_id()?;
        let token = self.signer.token(&correlation);

        let currency = self.resolve_currency(user_id, currency).await?;
        let conversion = self.convert_to_base(&amount, &currency).await;

        let session = self
            .gateway
            .create_payment(CreatePaymentRequest {
                amount: amount.clone(),
                order_id: gateway_order_id,
                description: self.config.payment_description.clone(),
                callback_url: self.config.callback_url.clone(),
                opaque: Some(token.clone()),
            })
            .await?;

        let record = PendingPayment {
            user_id,
            currency: conversion.currency.clone(),
            original_amount: conversion.original_amount.clone(),
            converted_amount: conversion.converted_amount.clone(),
            exchange_rate: conversion.exchange_rate.clone(),
            base_currency: conversion.base_currency.clone(),
            plan_id,
            payment_id: Some(session.payment_id.clone()),
            gateway_order_id: Some(gateway_order_id),
            created_at: Utc::now(),
        };

        if let Err(e) = self.pending.put(&token, &record).await {
            // The gateway session exists but its callback could never be
            // converted correctly; fail so the user does not pay into it.
            error!(
                order_id = %token,
                payment_id = %session.payment_id,
                error = %e,
                "Failed to persist pending payment"
            );
            return Err(e.into());
        }

        info!(
            user_id = user_id,
            order_id = %token,
            gateway_order_id = gateway_order_id,
            payment_id = %session.payment_id,
            amount = %amount,
            currency = %conversion.currency,
            converted_amount = %conversion.converted_amount,
            state = %PaymentAttemptState::Initiated,
            "Payment initiated"
        );

        Ok(InitiatedPayment {
            order_id: token,
            gateway_order_id,
            payment_id: session.payment_id,
            payment_url: session.payment_url,
            conversion_info: conversion,
        })
    }

    /// Explicit currency, then the user's preference, then the base currency
    async fn resolve_currency(
        &self,
        user_id: i64,
        requested: Option<&str>,
    ) -> OrchestratorResult<String> {
        let raw = match requested.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => code.to_string(),
            None => self
                .users
                .preferred_currency(user_id)
                .await?
                .unwrap_or_else(|| self.config.base_currency.clone()),
        };

        normalize_currency(&raw).map_err(|_| OrchestratorError::InvalidCurrency { currency: raw })
    }

    /// Never fails: without a rate the amount is taken as already in base currency
    async fn convert_to_base(&self, amount: &BigDecimal, currency: &str) -> ConversionInfo {
        let base = &self.config.base_currency;

        let resolved = if currency.eq_ignore_ascii_case(base) {
            Some(BigDecimal::one())
        } else {
            match self.rates.get_rate(currency, base).await {
                Ok(rate) => Some(rate),
                Err(e) => {
                    warn!(
                        from = %currency,
                        to = %base,
                        error = %e,
                        "Exchange rate unavailable, treating amount as base currency"
                    );
                    None
                }
            }
        };

        let rate_resolved = resolved.is_some();
        let exchange_rate = resolved.unwrap_or_else(BigDecimal::one);
        let converted_amount = (amount * &exchange_rate).with_scale_round(2, RoundingMode::HalfUp);

        ConversionInfo {
            currency: currency.to_string(),
            original_amount: amount.clone(),
            converted_amount,
            exchange_rate,
            base_currency: base.clone(),
            rate_resolved,
        }
    }

    /// Verify a gateway callback and credit the user
    pub async fn handle_payment_callback(
        &self,
        params: CallbackParams,
    ) -> OrchestratorResult<CallbackOutcome> {
        let order_id = required(params.order_id.as_deref(), "orderID")?;
        let payment_id = required(params.payment_id.as_deref(), "paymentID")?;

        info!(
            order_id = %order_id,
            payment_id = %payment_id,
            response_code = params.response_code.as_deref().unwrap_or("-"),
            state = %PaymentAttemptState::CallbackReceived,
            "Payment callback received"
        );

        if let Some(code) = params.response_code.as_deref() {
            if code != RESPONSE_CODE_SUCCESS && code != RESPONSE_CODE_DUPLICATE {
                warn!(order_id = %order_id, response_code = %code, "Callback reports failed payment");
                return Err(OrchestratorError::PaymentFailed {
                    response_code: code.to_string(),
                    reason: "the payment was not completed".to_string(),
                });
            }
        }

        let status = self.gateway.get_payment_status(payment_id).await?;
        self.classify(&status, order_id)?;

        info!(
            order_id = %order_id,
            payment_id = %payment_id,
            state = %PaymentAttemptState::Verified,
            "Payment verified with gateway"
        );

        let (token, correlation) = self.correlate(&params, &status)?;
        self.check_gateway_order(&status, &correlation, payment_id)?;

        let pending = match self.pending.claim(&token).await? {
            Claim::Claimed(record) => {
                if let Err(e) = self.check_record(&record, &correlation, &token, payment_id) {
                    self.restore_pending(&token, &record).await;
                    return Err(e);
                }
                Some(record)
            }
            Claim::AlreadyClaimed => {
                return self.already_claimed(&token, payment_id, status).await;
            }
            Claim::Missing => {
                warn!(
                    order_id = %token,
                    payment_id = %payment_id,
                    "No pending payment record, crediting the amount reported by the gateway"
                );
                None
            }
        };

        let amount = match &pending {
            Some(record) => Some(record.converted_amount.clone()),
            None => status.settled_amount(),
        };
        let amount = match amount {
            Some(amount) if amount > BigDecimal::zero() => amount,
            other => {
                if let Some(record) = &pending {
                    self.restore_pending(&token, record).await;
                }
                return Err(OrchestratorError::InvalidAmount {
                    amount: other.map(|a| a.to_string()).unwrap_or_else(|| "missing".to_string()),
                });
            }
        };

        let entry = self.credit_entry(
            correlation.user_id,
            amount,
            payment_id,
            &token,
            pending.as_ref(),
            &status,
        );

        match self.ledger.apply_delta(entry).await {
            Ok(entry) => {
                crate::log_credit_event!(
                    user_id = entry.user_id,
                    amount = entry.amount,
                    balance_after = entry.balance_after,
                    payment_id = payment_id,
                    state = PaymentAttemptState::Credited,
                );
                Ok(CallbackOutcome::Credited {
                    entry,
                    payment_details: status.raw,
                })
            }
            Err(LedgerError::DuplicateReference { existing }) => {
                match &pending {
                    Some(record) if existing.amount != record.converted_amount => error!(
                        order_id = %token,
                        payment_id = %payment_id,
                        entry_id = %existing.id,
                        credited = %existing.amount,
                        expected = %record.converted_amount,
                        "Gateway payment was credited without its conversion context"
                    ),
                    _ => info!(
                        payment_id = %payment_id,
                        entry_id = %existing.id,
                        "Gateway payment already credited, ignoring redelivery"
                    ),
                }
                Ok(CallbackOutcome::AlreadyCredited {
                    entry: *existing,
                    payment_details: status.raw,
                })
            }
            Err(e) => {
                error!(
                    order_id = %token,
                    payment_id = %payment_id,
                    error = %e,
                    "Verified payment could not be credited"
                );
                if let Some(record) = &pending {
                    self.restore_pending(&token, record).await;
                }
                Err(e.into())
            }
        }
    }

    fn classify(&self, status: &GatewayPaymentStatus, order_id: &str) -> OrchestratorResult<()> {
        if status.is_approved() {
            return Ok(());
        }

        let response_code = status
            .response_code
            .clone()
            .unwrap_or_else(|| status.payment_state.to_string());

        if status.is_declined() {
            let mut reason = status.reason();
            if self.config.test_mode {
                reason = format!("{} {}", reason, TEST_MODE_HINT);
            }
            warn!(order_id = %order_id, response_code = %response_code, "Payment declined");
            return Err(OrchestratorError::PaymentDeclined { reason });
        }

        warn!(
            order_id = %order_id,
            payment_state = %status.payment_state,
            response_code = %response_code,
            "Payment not approved"
        );
        Err(OrchestratorError::PaymentError {
            response_code,
            reason: status.reason(),
        })
    }

    /// A numeric order id echoed by the gateway must be the one derived from
    /// the token, otherwise the payment being verified was registered for a
    /// different order.
    fn check_gateway_order(
        &self,
        status: &GatewayPaymentStatus,
        correlation: &CorrelationId,
        payment_id: &str,
    ) -> OrchestratorResult<()> {
        let echoed = match status
            .order_id
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
        {
            Some(echoed) => echoed,
            None => return Ok(()),
        };

        let expected = correlation.gateway_order_id()?;
        if echoed != expected {
            error!(
                payment_id = %payment_id,
                echoed_order_id = echoed,
                expected_order_id = expected,
                user_id = correlation.user_id,
                "Gateway payment belongs to a different order"
            );
            return Err(OrchestratorError::Correlation {
                reason: "payment does not belong to this order".to_string(),
            });
        }
        Ok(())
    }

    /// A claimed record must belong to the token's user and to the gateway
    /// payment being verified.
    fn check_record(
        &self,
        record: &PendingPayment,
        correlation: &CorrelationId,
        token: &str,
        payment_id: &str,
    ) -> OrchestratorResult<()> {
        if record.user_id != correlation.user_id {
            error!(
                order_id = %token,
                token_user = correlation.user_id,
                record_user = record.user_id,
                "Pending payment belongs to a different user"
            );
            return Err(OrchestratorError::Correlation {
                reason: "pending payment does not match the order".to_string(),
            });
        }

        if !record.belongs_to_payment(payment_id) {
            error!(
                order_id = %token,
                payment_id = %payment_id,
                registered_payment_id = ?record.payment_id,
                "Callback pairs the order with a different gateway payment"
            );
            return Err(OrchestratorError::Correlation {
                reason: "payment does not belong to this order".to_string(),
            });
        }
        Ok(())
    }

    /// Another delivery holds the record. Report its credit if it landed,
    /// otherwise ask the gateway to come back later; never fall back to the
    /// unconverted gateway amount.
    async fn already_claimed(
        &self,
        token: &str,
        payment_id: &str,
        status: GatewayPaymentStatus,
    ) -> OrchestratorResult<CallbackOutcome> {
        match self
            .ledger
            .find_by_reference(GATEWAY_REFERENCE_TYPE, payment_id)
            .await?
        {
            Some(entry) => {
                info!(
                    order_id = %token,
                    payment_id = %payment_id,
                    entry_id = %entry.id,
                    "Gateway payment already credited, ignoring redelivery"
                );
                Ok(CallbackOutcome::AlreadyCredited {
                    entry,
                    payment_details: status.raw,
                })
            }
            None => {
                warn!(
                    order_id = %token,
                    payment_id = %payment_id,
                    "Pending payment claimed by a concurrent callback, not yet credited"
                );
                Err(OrchestratorError::InProgress {
                    payment_id: payment_id.to_string(),
                })
            }
        }
    }

    /// Find the signed token among the callback parameters and the gateway's
    /// echo of the order. Every candidate that verifies must agree.
    fn correlate(
        &self,
        params: &CallbackParams,
        status: &GatewayPaymentStatus,
    ) -> OrchestratorResult<(String, CorrelationId)> {
        let candidates = [
            params.order_id.as_deref(),
            params.opaque.as_deref(),
            status.opaque.as_deref(),
            status.order_id.as_deref(),
        ];

        let mut found: Option<(String, CorrelationId)> = None;
        let mut last_error = None;

        for candidate in candidates.into_iter().flatten() {
            match self.signer.parse(candidate) {
                Ok(id) => match &found {
                    Some((_, existing)) if *existing != id => {
                        error!(
                            first_user = existing.user_id,
                            second_user = id.user_id,
                            "Callback carries conflicting correlation tokens"
                        );
                        return Err(OrchestratorError::Correlation {
                            reason: "conflicting order references".to_string(),
                        });
                    }
                    Some(_) => {}
                    None => found = Some((candidate.trim().to_string(), id)),
                },
                Err(e) => last_error = Some(e),
            }
        }

        found.ok_or_else(|| {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no order reference".to_string());
            error!(
                order_id = ?params.order_id,
                payment_id = ?params.payment_id,
                reason = %reason,
                "Cannot map callback to a user"
            );
            OrchestratorError::Correlation { reason }
        })
    }

    fn credit_entry(
        &self,
        user_id: i64,
        amount: BigDecimal,
        payment_id: &str,
        token: &str,
        pending: Option<&PendingPayment>,
        status: &GatewayPaymentStatus,
    ) -> NewLedgerEntry {
        let description = match pending {
            Some(record) if record.was_converted() => format!(
                "Credit refill: {} {} converted to {} {}",
                record.original_amount, record.currency, amount, record.base_currency
            ),
            Some(record) => format!("Credit refill: {} {}", amount, record.base_currency),
            None => format!("Credit refill: {} {}", amount, self.config.base_currency),
        };

        let conversion = pending
            .filter(|record| record.was_converted())
            .map(|record| CurrencyConversion {
                original_currency: record.currency.clone(),
                original_amount: record.original_amount.clone(),
                exchange_rate: record.exchange_rate.clone(),
                converted_amount: record.converted_amount.clone(),
                base_currency: record.base_currency.clone(),
            });

        NewLedgerEntry::new(user_id, amount, LedgerEntryType::Refill, description)
            .with_reference(payment_id, GATEWAY_REFERENCE_TYPE)
            .with_conversion(conversion)
            .with_metadata(json!({
                "order_id": token,
                "plan_id": pending.and_then(|r| r.plan_id),
                "metadata_found": pending.is_some(),
                "gateway": status.raw,
            }))
    }

    /// Put a taken record back so a redelivered callback can still use it
    async fn restore_pending(&self, token: &str, record: &PendingPayment) {
        if let Err(e) = self.pending.put(token, record).await {
            error!(order_id = %token, error = %e, "Failed to restore pending payment");
        }
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> OrchestratorResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OrchestratorError::MissingParameter {
            name: name.to_string(),
        })
}
