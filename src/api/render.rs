//! HTML pages shown to a user returning from the gateway

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::error::AppError;
use crate::services::payment_orchestrator::CallbackOutcome;

const PAGE_STYLE: &str = "body{font-family:system-ui,sans-serif;background:#f5f6f8;margin:0;\
display:flex;align-items:center;justify-content:center;min-height:100vh}\
.card{background:#fff;border-radius:12px;padding:32px 40px;max-width:420px;\
box-shadow:0 2px 12px rgba(0,0,0,.08);text-align:center}\
h1{font-size:22px;margin:0 0 12px}p{color:#444;line-height:1.5}\
.ok h1{color:#1f8a4c}.fail h1{color:#c0392b}.hint{font-size:14px;color:#777}";

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn page(class: &str, title: &str, message: &str, hint: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
<title>{title}</title><style>{style}</style></head>\
<body><div class=\"card {class}\"><h1>{title}</h1><p>{message}</p>\
<p class=\"hint\">{hint}</p></div></body></html>",
        title = escape_html(title),
        style = PAGE_STYLE,
        class = class,
        message = escape_html(message),
        hint = escape_html(hint),
    )
}

pub fn callback_success_page(outcome: &CallbackOutcome) -> Response {
    let entry = outcome.entry();
    let message = format!(
        "{} credits were added to your balance. New balance: {}.",
        entry.amount, entry.balance_after
    );
    let body = page(
        "ok",
        "Payment successful",
        &message,
        "You can close this page and return to the app.",
    );
    (StatusCode::OK, Html(body)).into_response()
}

pub fn callback_error_page(error: &AppError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = page(
        "fail",
        "Payment was not completed",
        &error.user_message(),
        "Return to the app and open your profile to check your balance or try again.",
    );
    (status, Html(body)).into_response()
}
