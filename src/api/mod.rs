//! HTTP surface of the credit core

pub mod credits;
pub mod payments;
pub mod rates;
pub mod render;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{info, warn};

use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::credit_ledger::CreditLedger;
use crate::services::exchange_rate::ExchangeRateResolver;
use crate::services::legacy_webhook::LegacyWebhookProcessor;
use crate::services::payment_orchestrator::PaymentOrchestrator;

// Application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub rates: Arc<ExchangeRateResolver>,
    pub ledger: Arc<dyn CreditLedger>,
    pub legacy_webhook: Arc<LegacyWebhookProcessor>,
    pub health_checker: HealthChecker,
}

/// Every route, wrapped in request-id and request-logging layers
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route("/api/payments/initiate", post(payments::initiate_payment))
        .route(
            "/api/payments/callback",
            get(payments::payment_callback_page).post(payments::payment_callback),
        )
        .route("/api/payments/webhook", post(payments::legacy_webhook))
        .route("/api/credits/{user_id}/history", get(credits::get_history))
        .route(
            "/api/rates/cache",
            get(rates::get_rate_cache).delete(rates::clear_rate_cache),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let status = state.health_checker.check_health().await;
    if status.is_ready() {
        Ok(Json(status))
    } else {
        warn!("Health check reports unhealthy dependencies");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)))
    }
}

async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.check_health().await.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn liveness() -> StatusCode {
    info!("Liveness probe");
    StatusCode::OK
}
