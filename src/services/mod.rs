//! Services module for the credit and payment flow

pub mod correlation;
pub mod credit_ledger;
pub mod exchange_rate;
pub mod legacy_webhook;
pub mod payment_orchestrator;
pub mod pending_payments;
pub mod rate_cache;
pub mod rate_providers;
pub mod user_directory;

// Re-export orchestrator types
pub use crate::services::payment_orchestrator::{
    CallbackOutcome, CallbackParams, ConversionInfo, InitiatedPayment, OrchestratorConfig,
    OrchestratorError, OrchestratorResult, PaymentAttemptState, PaymentOrchestrator,
};
