//! Shared fixtures for the integration tests: a scripted gateway and an
//! application state backed by the in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use workmarket_backend::api::AppState;
use workmarket_backend::health::HealthChecker;
use workmarket_backend::payments::error::PaymentResult;
use workmarket_backend::payments::gateway::PaymentGateway;
use workmarket_backend::payments::types::{
    CreatePaymentRequest, CreatePaymentResponse, GatewayPaymentStatus,
};
use workmarket_backend::services::correlation::CorrelationSigner;
use workmarket_backend::services::credit_ledger::{CreditLedger, InMemoryCreditLedger};
use workmarket_backend::services::exchange_rate::{
    ExchangeRateResolver, ExchangeRateResolverConfig,
};
use workmarket_backend::services::legacy_webhook::LegacyWebhookProcessor;
use workmarket_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use workmarket_backend::services::pending_payments::InMemoryPendingPaymentStore;
use workmarket_backend::services::rate_cache::InMemoryRateCache;
use workmarket_backend::services::rate_providers::StaticRateProvider;
use workmarket_backend::services::user_directory::InMemoryUserDirectory;

pub const USER_ID: i64 = 42;
pub const SECRET: &str = "integration-test-correlation-secret";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

/// Gateway whose status answer the test controls
pub struct ScriptedGateway {
    status: Mutex<Value>,
    pub created: Mutex<Vec<CreatePaymentRequest>>,
    pub status_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(status: Value) -> Self {
        Self {
            status: Mutex::new(status),
            created: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub async fn set_status(&self, status: Value) {
        *self.status.lock().await = status;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn is_configured(&self) -> bool {
        true
    }

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        self.created.lock().await.push(request);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(CreatePaymentResponse {
            payment_id: format!("PAY-{}", id),
            payment_url: format!("https://gateway.test/Payments/Pay?id=PAY-{}", id),
        })
    }

    async fn get_payment_status(&self, _payment_id: &str) -> PaymentResult<GatewayPaymentStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayPaymentStatus::from_raw(self.status.lock().await.clone()))
    }
}

pub fn approved(deposited: &str) -> Value {
    json!({
        "PaymentState": "payment_approved",
        "ResponseCode": "00",
        "DepositedAmount": deposited,
        "Description": "Approved"
    })
}

pub fn declined() -> Value {
    json!({
        "PaymentState": "payment_declined",
        "ResponseCode": "05",
        "Description": "Card expired"
    })
}

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    pub ledger: Arc<InMemoryCreditLedger>,
    pub pending: Arc<InMemoryPendingPaymentStore>,
    pub signer: CorrelationSigner,
}

/// User 42 starts with 10 credits and pays in EUR; EUR -> USD is 1.08
pub fn test_app(status: Value) -> TestApp {
    test_app_with_ledger(status, |ledger| ledger as Arc<dyn CreditLedger>)
}

/// Same fixture with the ledger seen by the app wrapped by `wrap`;
/// `TestApp::ledger` stays the unwrapped in-memory ledger.
pub fn test_app_with_ledger(
    status: Value,
    wrap: impl FnOnce(Arc<InMemoryCreditLedger>) -> Arc<dyn CreditLedger>,
) -> TestApp {
    let gateway = Arc::new(ScriptedGateway::new(status));
    let ledger = Arc::new(InMemoryCreditLedger::new().with_user(USER_ID, dec("10")));
    let pending = Arc::new(InMemoryPendingPaymentStore::new());
    let users = Arc::new(InMemoryUserDirectory::new().with_user(USER_ID, Some("EUR")));
    let rates = Arc::new(
        ExchangeRateResolver::new(
            Arc::new(InMemoryRateCache::new()),
            ExchangeRateResolverConfig::default(),
        )
        .add_provider(Arc::new(
            StaticRateProvider::new("static")
                .with_rate("EUR", "USD", dec("1.08"))
                .with_rate("GBP", "USD", dec("1.27")),
        )),
    );

    let app_ledger = wrap(ledger.clone());

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway.clone(),
        rates.clone(),
        pending.clone(),
        app_ledger.clone(),
        users,
        CorrelationSigner::new(SECRET),
        OrchestratorConfig {
            base_currency: "USD".to_string(),
            callback_url: "https://api.test/api/payments/callback".to_string(),
            payment_description: "Credit refill".to_string(),
            test_mode: true,
        },
    ));

    let state = AppState {
        orchestrator,
        rates,
        ledger: app_ledger.clone(),
        legacy_webhook: Arc::new(LegacyWebhookProcessor::new(app_ledger, true)),
        health_checker: HealthChecker::new(true),
    };

    TestApp {
        state,
        gateway,
        ledger,
        pending,
        signer: CorrelationSigner::new(SECRET),
    }
}
