use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    /// Gateway credentials or URLs are not set
    #[error("Payment gateway not configured: {message}")]
    ConfigurationError { message: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Gateway request timed out after {timeout_secs}s")]
    TimeoutError { timeout_secs: u64 },

    /// Gateway answered but refused the request (non-success response code)
    #[error("Gateway rejected request: code={response_code:?}, message={message}")]
    GatewayRejected {
        response_code: Option<String>,
        message: String,
    },

    /// Non-2xx HTTP status or an undecodable body
    #[error("Provider error: {message}")]
    ProviderError {
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ConfigurationError { .. } => false,
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::TimeoutError { .. } => true,
            PaymentError::GatewayRejected { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 502,
            PaymentError::TimeoutError { .. } => 504,
            PaymentError::GatewayRejected { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ConfigurationError { .. } => {
                "Card payments are not available at the moment".to_string()
            }
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } | PaymentError::TimeoutError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            PaymentError::GatewayRejected { message, .. } => {
                format!("Payment gateway rejected the request: {}", message)
            }
            PaymentError::ProviderError { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError,
        };

        match err {
            PaymentError::ConfigurationError { message } => AppError::new(
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message }),
            ),
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: field.unwrap_or_else(|| "amount".to_string()),
                    reason: message,
                }))
            }
            PaymentError::TimeoutError { timeout_secs } => {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "Payment gateway".to_string(),
                    timeout_secs,
                }))
            }
            other => AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            })),
        }
    }
}
