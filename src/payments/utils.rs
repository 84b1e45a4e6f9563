use crate::payments::error::{PaymentError, PaymentResult};
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// JSON-over-HTTP client for gateway calls. Each request is sent exactly
/// once: registration is not idempotent and the gateway retries callbacks.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self { client, timeout })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut request = self.client.request(method, url).timeout(self.timeout);
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::TimeoutError {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                PaymentError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                }
            }
        })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            if status.is_server_error() {
                warn!(status = %status, url = %url, "gateway server error");
            }
            return Err(PaymentError::ProviderError {
                message: format!(
                    "HTTP {}: {}",
                    status,
                    crate::logging::redact_sensitive_data(&text)
                ),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
            message: format!("invalid gateway JSON response: {}", e),
            provider_code: None,
            retryable: false,
        })
    }
}

/// Lowercase hex HMAC-SHA256 of `payload`
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// First non-empty value among `keys`, accepting JSON strings and numbers
pub fn json_string(value: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        Some(JsonValue::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// First decimal among `keys`; numbers go through their textual form so no float rounding creeps in
pub fn json_decimal(value: &JsonValue, keys: &[&str]) -> Option<BigDecimal> {
    json_string(value, keys).and_then(|raw| BigDecimal::from_str(&raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_is_deterministic_and_keyed() {
        let a = hmac_sha256_hex(b"secret", b"42-1700000000000-17");
        let b = hmac_sha256_hex(b"secret", b"42-1700000000000-17");
        let c = hmac_sha256_hex(b"other", b"42-1700000000000-17");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn server_error_is_reported_after_one_request() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/status",
            axum::routing::post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down")
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = PaymentHttpClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .request_json::<JsonValue>(
                reqwest::Method::POST,
                &format!("http://{}/status", addr),
                Some(&json!({"PaymentID": "PAY-1"})),
                &[],
            )
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn json_helpers_accept_strings_and_numbers() {
        let value = json!({
            "ResponseCode": 0,
            "DepositedAmount": "108.00",
            "Amount": 108.5,
            "Description": "  ",
        });

        assert_eq!(json_string(&value, &["ResponseCode"]).as_deref(), Some("0"));
        assert_eq!(json_string(&value, &["Description", "Missing"]), None);
        assert_eq!(
            json_decimal(&value, &["DepositedAmount"]),
            Some(BigDecimal::from_str("108.00").unwrap())
        );
        assert_eq!(
            json_decimal(&value, &["Missing", "Amount"]),
            Some(BigDecimal::from_str("108.5").unwrap())
        );
    }
}
