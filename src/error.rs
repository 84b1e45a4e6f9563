//! Unified error handling for the credit backend
//!
//! Every subsystem error converts into [`AppError`], which carries the HTTP
//! status mapping, a stable machine-readable code and a user-facing message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_DECLINED")]
    PaymentDeclined,
    #[serde(rename = "PAYMENT_FAILED")]
    PaymentFailed,
    #[serde(rename = "PAYMENT_NOT_APPROVED")]
    PaymentNotApproved,
    #[serde(rename = "CORRELATION_FAILED")]
    CorrelationFailed,
    #[serde(rename = "INVALID_CREDIT_AMOUNT")]
    InvalidCreditAmount,
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "INSUFFICIENT_CREDITS")]
    InsufficientCredits,
    #[serde(rename = "DUPLICATE_CREDIT")]
    DuplicateCredit,
    #[serde(rename = "PAYMENT_IN_PROGRESS")]
    PaymentInProgress,
    #[serde(rename = "FEATURE_DISABLED")]
    FeatureDisabled,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "ID_GENERATION_ERROR")]
    IdGenerationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "RATE_UNAVAILABLE")]
    RateUnavailable,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations in the payment/credit flow
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Gateway reports the card/payment as declined
    PaymentDeclined { reason: String },
    /// Callback carried a failure response code
    PaymentFailed {
        response_code: String,
        reason: String,
    },
    /// Gateway status is neither approved nor declined
    PaymentNotApproved {
        response_code: String,
        reason: String,
    },
    /// Callback could not be mapped back to a user
    CorrelationFailed { reason: String },
    /// Resolved credit amount is zero, negative or unparsable
    InvalidCreditAmount { amount: String },
    /// User referenced by a ledger operation doesn't exist
    UserNotFound { user_id: i64 },
    /// Debit would take the balance below zero
    InsufficientCredits { available: String, required: String },
    /// Gateway payment already produced a ledger entry
    DuplicateCredit { reference_id: String },
    /// Another delivery of the same callback is still being applied
    PaymentInProgress { payment_id: String },
    /// Endpoint switched off by configuration
    FeatureDisabled { feature: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Redis cache unavailable
    Cache { message: String },
    /// Missing or invalid configuration
    Configuration { message: String },
    /// Correlation id could not be turned into a gateway order id
    IdGeneration { message: String },
}

/// External service errors (payment gateway, rate providers)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment gateway rejected a request or returned garbage
    PaymentGateway { message: String, is_retryable: bool },
    /// Every exchange-rate provider failed and nothing is cached
    RateUnavailable { from: String, to: String },
    /// A rate provider answered with something unusable
    RateProvider { message: String },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Unsupported or malformed currency code
    InvalidCurrency { currency: String, reason: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentDeclined { .. } => 402, // Payment Required
                DomainError::PaymentFailed { .. } => 402,
                DomainError::PaymentNotApproved { .. } => 402,
                DomainError::CorrelationFailed { .. } => 422,
                DomainError::InvalidCreditAmount { .. } => 422,
                DomainError::UserNotFound { .. } => 404,
                DomainError::InsufficientCredits { .. } => 422,
                DomainError::DuplicateCredit { .. } => 409, // Conflict
                DomainError::PaymentInProgress { .. } => 409,
                DomainError::FeatureDisabled { .. } => 404,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502, // Bad Gateway
                ExternalError::RateUnavailable { .. } => 503,
                ExternalError::RateProvider { .. } => 502,
                ExternalError::Timeout { .. } => 504, // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentDeclined { .. } => ErrorCode::PaymentDeclined,
                DomainError::PaymentFailed { .. } => ErrorCode::PaymentFailed,
                DomainError::PaymentNotApproved { .. } => ErrorCode::PaymentNotApproved,
                DomainError::CorrelationFailed { .. } => ErrorCode::CorrelationFailed,
                DomainError::InvalidCreditAmount { .. } => ErrorCode::InvalidCreditAmount,
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
                DomainError::DuplicateCredit { .. } => ErrorCode::DuplicateCredit,
                DomainError::PaymentInProgress { .. } => ErrorCode::PaymentInProgress,
                DomainError::FeatureDisabled { .. } => ErrorCode::FeatureDisabled,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::IdGeneration { .. } => ErrorCode::IdGenerationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::RateUnavailable { .. } => ErrorCode::RateUnavailable,
                ExternalError::RateProvider { .. } => ErrorCode::RateUnavailable,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentDeclined { reason } => {
                    format!("Your payment was declined: {}", reason)
                }
                DomainError::PaymentFailed {
                    response_code,
                    reason,
                } => format!("Payment failed (code {}): {}", response_code, reason),
                DomainError::PaymentNotApproved {
                    response_code,
                    reason,
                } => format!(
                    "Payment was not approved (code {}): {}",
                    response_code, reason
                ),
                DomainError::CorrelationFailed { .. } => {
                    "We could not match this payment to your account. Please contact support"
                        .to_string()
                }
                DomainError::InvalidCreditAmount { amount } => {
                    format!("Payment amount '{}' cannot be credited", amount)
                }
                DomainError::UserNotFound { user_id } => {
                    format!("User '{}' not found", user_id)
                }
                DomainError::InsufficientCredits {
                    available,
                    required,
                } => format!(
                    "Insufficient credits. Available: {}, Required: {}",
                    available, required
                ),
                DomainError::DuplicateCredit { reference_id } => {
                    format!("Payment '{}' has already been credited", reference_id)
                }
                DomainError::PaymentInProgress { payment_id } => format!(
                    "Payment '{}' is already being processed, please retry shortly",
                    payment_id
                ),
                DomainError::FeatureDisabled { feature } => {
                    format!("'{}' is not enabled on this server", feature)
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Configuration { message } => format!(
                    "Payments are not configured on this server: {}",
                    message
                ),
                _ => "Service temporarily unavailable. Please try again later".to_string(),
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    message,
                    is_retryable,
                } => {
                    if *is_retryable {
                        "Payment gateway is temporarily unavailable. Please try again".to_string()
                    } else {
                        format!("Payment gateway error: {}", message)
                    }
                }
                ExternalError::RateUnavailable { from, to } => format!(
                    "Exchange rate {} -> {} is currently unavailable. Please try again later",
                    from, to
                ),
                ExternalError::RateProvider { .. } => {
                    "Exchange rates are temporarily unavailable".to_string()
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(DomainError::PaymentInProgress { .. }) => true,
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::IdGeneration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateUnavailable { .. } => true,
                ExternalError::RateProvider { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
