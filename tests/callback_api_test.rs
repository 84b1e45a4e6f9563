//! Integration tests for the payment HTTP surface
//!
//! Tests cover:
//! - Payment initiation with currency conversion
//! - Browser (GET) and server (POST, JSON or form) callbacks
//! - Redelivered callbacks
//! - Callback rejections and their status codes, including orders paired
//!   with another payment's id
//! - Credit history, rate cache and legacy webhook endpoints

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{approved, dec, declined, test_app, TestApp, USER_ID};
use workmarket_backend::api::router;
use workmarket_backend::services::credit_ledger::CreditLedger;

fn app(test_app: &TestApp) -> Router {
    router(test_app.state.clone())
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

/// Initiate a EUR payment through the API and return the response body
async fn initiate(test_app: &TestApp, amount: &str) -> Value {
    let response = app(test_app)
        .oneshot(post_json(
            "/api/payments/initiate",
            json!({ "user_id": USER_ID, "amount": amount }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn test_initiate_converts_to_base_currency() {
    let test_app = test_app(approved("100"));
    let json = initiate(&test_app, "100").await;

    let conversion = &json["conversion_info"];
    assert_eq!(conversion["currency"], "EUR");
    assert_eq!(conversion["base_currency"], "USD");
    assert_eq!(conversion["rate_resolved"], true);
    assert_eq!(
        dec(conversion["converted_amount"].as_str().unwrap()),
        dec("108")
    );

    let order_id = json["order_id"].as_str().unwrap();
    assert!(order_id.starts_with("42-"));
    assert_eq!(json["payment_id"], "PAY-1");
    assert!(json["payment_url"].as_str().unwrap().contains("PAY-1"));

    // The gateway is charged in the user's currency, not the base one
    let created = test_app.gateway.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].amount, dec("100"));
    assert_eq!(created[0].opaque.as_deref(), Some(order_id));
    assert_eq!(test_app.pending.len().await, 1);
}

#[tokio::test]
async fn test_initiate_rejects_bad_currency() {
    let test_app = test_app(approved("100"));

    let response = app(&test_app)
        .oneshot(post_json(
            "/api/payments/initiate",
            json!({ "user_id": USER_ID, "amount": "10", "currency": "EURO" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(test_app.gateway.created.lock().await.is_empty());
}

#[tokio::test]
async fn test_post_json_callback_credits_once() {
    let test_app = test_app(approved("100"));
    let initiated = initiate(&test_app, "100").await;
    let order_id = initiated["order_id"].as_str().unwrap();

    let callback = json!({
        "orderID": order_id,
        "paymentID": "PAY-1",
        "responseCode": "00"
    });

    let response = app(&test_app)
        .oneshot(post_json("/api/payments/callback", callback.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["already_credited"], false);
    assert_eq!(json["entry"]["entry_type"], "refill");
    assert_eq!(json["entry"]["reference_id"], "PAY-1");
    assert_eq!(dec(json["entry"]["amount"].as_str().unwrap()), dec("108"));
    assert_eq!(test_app.ledger.balance(USER_ID).await.unwrap(), dec("118"));

    // Gateways redeliver; the second delivery must not credit again
    let response = app(&test_app)
        .oneshot(post_json("/api/payments/callback", callback))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["already_credited"], true);
    assert_eq!(test_app.ledger.balance(USER_ID).await.unwrap(), dec("118"));
    assert_eq!(test_app.ledger.entries_for(USER_ID).await.len(), 1);
}

#[tokio::test]
async fn test_post_form_callback() {
    let test_app = test_app(approved("100"));
    let initiated = initiate(&test_app, "100").await;
    let order_id = initiated["order_id"].as_str().unwrap();

    let body = format!("orderID={}&paymentID=PAY-1&responseCode=00", order_id);
    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/callback")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test_app.ledger.balance(USER_ID).await.unwrap(), dec("118"));
}

#[tokio::test]
async fn test_get_callback_renders_success_page() {
    let test_app = test_app(approved("100"));
    let initiated = initiate(&test_app, "100").await;
    let order_id = initiated["order_id"].as_str().unwrap();

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/payments/callback?orderID={}&paymentID=PAY-1&responseCode=00",
                    order_id
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));

    let page = body_text(response).await;
    assert!(page.contains("Payment successful"));
    assert!(page.contains("118"));
}

#[tokio::test]
async fn test_callback_missing_payment_id() {
    let test_app = test_app(approved("100"));
    let initiated = initiate(&test_app, "100").await;

    let response = app(&test_app)
        .oneshot(post_json(
            "/api/payments/callback",
            json!({ "orderID": initiated["order_id"], "responseCode": "00" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "VALIDATION_ERROR");
    assert_eq!(test_app.gateway.status_calls(), 0);
}

#[tokio::test]
async fn test_declined_callback() {
    let test_app = test_app(declined());
    let initiated = initiate(&test_app, "100").await;
    let order_id = initiated["order_id"].as_str().unwrap();

    let response = app(&test_app)
        .oneshot(post_json(
            "/api/payments/callback",
            json!({ "orderID": order_id, "paymentID": "PAY-1", "responseCode": "00" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "PAYMENT_DECLINED");
    assert_eq!(test_app.ledger.balance(USER_ID).await.unwrap(), dec("10"));

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/payments/callback?orderID={}&paymentID=PAY-1&responseCode=00",
                    order_id
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(body_text(response).await.contains("Payment was not completed"));
}

#[tokio::test]
async fn test_failed_response_code_skips_status_query() {
    let test_app = test_app(approved("100"));
    let initiated = initiate(&test_app, "100").await;

    let response = app(&test_app)
        .oneshot(post_json(
            "/api/payments/callback",
            json!({
                "orderID": initiated["order_id"],
                "paymentID": "PAY-1",
                "responseCode": "05"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(response).await["error"], "PAYMENT_FAILED");
    assert_eq!(test_app.gateway.status_calls(), 0);
}

#[tokio::test]
async fn test_forged_order_id_rejected() {
    let test_app = test_app(approved("100"));

    let response = app(&test_app)
        .oneshot(post_json(
            "/api/payments/callback",
            json!({ "orderID": "42-1-1", "paymentID": "PAY-1", "responseCode": "00" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "CORRELATION_FAILED");
    assert_eq!(test_app.ledger.balance(USER_ID).await.unwrap(), dec("10"));
}

#[tokio::test]
async fn test_browser_callback_with_foreign_payment_id_rejected() {
    let test_app = test_app(approved("1"));
    let unpaid = initiate(&test_app, "10000").await;
    let paid = initiate(&test_app, "1").await;
    assert_eq!(paid["payment_id"], "PAY-2");

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/payments/callback?orderID={}&paymentID=PAY-2&responseCode=00",
                    unpaid["order_id"].as_str().unwrap()
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(test_app.ledger.balance(USER_ID).await.unwrap(), dec("10"));
    assert_eq!(test_app.pending.len().await, 2);
}

#[tokio::test]
async fn test_credit_history() {
    let test_app = test_app(approved("100"));
    let initiated = initiate(&test_app, "100").await;

    app(&test_app)
        .oneshot(post_json(
            "/api/payments/callback",
            json!({
                "orderID": initiated["order_id"],
                "paymentID": "PAY-1",
                "responseCode": "00"
            }),
        ))
        .await
        .unwrap();

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .uri("/api/credits/42/history?page=1&limit=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["user_id"], 42);
    assert_eq!(json["total"], 1);
    assert_eq!(json["has_more"], false);
    assert_eq!(dec(json["balance"].as_str().unwrap()), dec("118"));
    assert_eq!(json["entries"][0]["conversion"]["original_currency"], "EUR");
}

#[tokio::test]
async fn test_credit_history_unknown_user() {
    let test_app = test_app(approved("100"));

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .uri("/api/credits/7/history")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_rate_cache_endpoints() {
    let test_app = test_app(approved("100"));
    initiate(&test_app, "100").await;

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .uri("/api/rates/cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["rates"][0]["pair"], "EUR/USD");
    assert_eq!(json["rates"][0]["fresh"], true);
    assert_eq!(json["providers"][0], "static");

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/rates/cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["cleared"], 1);
}

#[tokio::test]
async fn test_legacy_webhook_dedupes_on_order_id() {
    let test_app = test_app(approved("100"));
    let payload = json!({ "orderId": "42-1700000000", "paidAmount": "25" });

    let response = app(&test_app)
        .oneshot(post_json("/api/payments/webhook", payload.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["duplicate"], false);
    assert_eq!(dec(json["balance_after"].as_str().unwrap()), dec("35"));

    let response = app(&test_app)
        .oneshot(post_json("/api/payments/webhook", payload))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["duplicate"], true);
    assert_eq!(test_app.ledger.balance(USER_ID).await.unwrap(), dec("35"));
}

#[tokio::test]
async fn test_health_endpoints() {
    let test_app = test_app(approved("100"));

    let response = app(&test_app)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let response = app(&test_app)
        .oneshot(
            Request::builder()
                .uri("/health/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
