use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::api::{render, AppState};
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::credit_ledger::LedgerEntry;
use crate::services::legacy_webhook::LegacyWebhookPayload;
use crate::services::payment_orchestrator::{CallbackOutcome, CallbackParams, InitiatedPayment};

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub user_id: i64,
    pub amount: BigDecimal,
    pub currency: Option<String>,
    /// Set when paying for a subscription plan
    pub plan_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub success: bool,
    /// True when an earlier delivery already credited this payment
    pub already_credited: bool,
    pub message: String,
    pub entry: LedgerEntry,
    pub payment_details: JsonValue,
}

impl From<&CallbackOutcome> for CallbackResponse {
    fn from(outcome: &CallbackOutcome) -> Self {
        let already_credited = matches!(outcome, CallbackOutcome::AlreadyCredited { .. });
        Self {
            success: true,
            already_credited,
            message: if already_credited {
                "Payment was already credited".to_string()
            } else {
                "Payment successful, credits added".to_string()
            },
            entry: outcome.entry().clone(),
            payment_details: outcome.payment_details().clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LegacyWebhookResponse {
    pub success: bool,
    pub duplicate: bool,
    pub balance_after: BigDecimal,
}

/// POST /api/payments/initiate
pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatedPayment>, AppError> {
    let request_id = get_request_id_from_headers(&headers).unwrap_or_default();
    info!(
        request_id = %request_id,
        user_id = request.user_id,
        amount = %request.amount,
        currency = request.currency.as_deref().unwrap_or("-"),
        "Payment initiation requested"
    );

    let currency = request.currency.as_deref();
    let result = match request.plan_id {
        Some(plan_id) => {
            state
                .orchestrator
                .initiate_subscription_payment(request.user_id, plan_id, request.amount, currency)
                .await
        }
        None => {
            state
                .orchestrator
                .initiate_payment(request.user_id, request.amount, currency)
                .await
        }
    };

    result
        .map(Json)
        .map_err(|e| AppError::from(e).with_request_id(request_id))
}

/// GET /api/payments/callback
///
/// The user's browser lands here after paying, so the answer is a page.
pub async fn payment_callback_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let params = CallbackParams::from_pairs(&query);
    match state.orchestrator.handle_payment_callback(params).await {
        Ok(outcome) => render::callback_success_page(&outcome),
        Err(e) => {
            let request_id = get_request_id_from_headers(&headers).unwrap_or_default();
            warn!(request_id = %request_id, error = %e, "Payment callback rejected");
            render::callback_error_page(&AppError::from(e).with_request_id(request_id))
        }
    }
}

/// POST /api/payments/callback
///
/// Server-to-server notification; form or JSON body, merged over the query string.
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    let request_id = get_request_id_from_headers(request.headers()).unwrap_or_default();

    let mut pairs = query;
    pairs.extend(body_pairs(request).await);
    let params = CallbackParams::from_pairs(&pairs);

    match state.orchestrator.handle_payment_callback(params).await {
        Ok(outcome) => (StatusCode::OK, Json(CallbackResponse::from(&outcome))).into_response(),
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Payment callback rejected");
            AppError::from(e).with_request_id(request_id).into_response()
        }
    }
}

/// Flatten a form or JSON object body into string pairs; anything else is ignored
async fn body_pairs(request: Request) -> HashMap<String, String> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        match Json::<JsonValue>::from_request(request, &()).await {
            Ok(Json(JsonValue::Object(map))) => map
                .into_iter()
                .filter_map(|(key, value)| {
                    let value = match value {
                        JsonValue::String(s) => s,
                        JsonValue::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((key, value))
                })
                .collect(),
            Ok(_) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Unreadable JSON callback body");
                HashMap::new()
            }
        }
    } else {
        Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map(|Form(pairs)| pairs)
            .unwrap_or_default()
    }
}

/// POST /api/payments/webhook
pub async fn legacy_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LegacyWebhookPayload>,
) -> Result<Json<LegacyWebhookResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers).unwrap_or_default();

    match state.legacy_webhook.process(payload).await {
        Ok(credit) => Ok(Json(LegacyWebhookResponse {
            success: true,
            duplicate: credit.duplicate,
            balance_after: credit.entry.balance_after,
        })),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Legacy webhook failed");
            Err(AppError::from(e).with_request_id(request_id))
        }
    }
}
