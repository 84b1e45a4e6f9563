//! Card payment gateway client (vPOS-style JSON API)
//!
//! Two calls: `InitPayment` registers an order and returns a payment id that
//! the user is redirected with; the status endpoint reports what happened to
//! that payment. Requests are sent once; retrying is left to the caller.

use crate::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{CreatePaymentRequest, CreatePaymentResponse, GatewayPaymentStatus};
use crate::payments::utils::{json_string, PaymentHttpClient};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response code the gateway uses for an accepted `InitPayment`
const INIT_SUCCESS_CODE: &str = "1";

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Whether credentials and URLs are present
    fn is_configured(&self) -> bool;

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse>;

    /// Only transport and decoding failures are errors; a declined or
    /// failed payment is reported through the returned status.
    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<GatewayPaymentStatus>;
}

pub struct VposGatewayClient {
    config: GatewayConfig,
    http: PaymentHttpClient,
}

impl VposGatewayClient {
    pub fn new(config: GatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn payment_url(&self, payment_id: &str) -> String {
        format!(
            "{}/Payments/Pay?id={}&lang={}",
            self.config.base_url, payment_id, self.config.language
        )
    }

    fn ensure_configured(&self) -> PaymentResult<()> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(PaymentError::ConfigurationError {
                message: "gateway base URL, status URL, client id, username and password must be set"
                    .to_string(),
            })
        }
    }

    fn credentials(&self) -> serde_json::Map<String, JsonValue> {
        let mut body = serde_json::Map::new();
        body.insert("ClientID".into(), self.config.client_id.clone().into());
        body.insert("Username".into(), self.config.username.clone().into());
        body.insert("Password".into(), self.config.password.clone().into());
        body
    }

    fn format_amount(amount: &BigDecimal) -> String {
        amount.with_scale_round(2, RoundingMode::HalfUp).to_string()
    }
}

#[async_trait]
impl PaymentGateway for VposGatewayClient {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        self.ensure_configured()?;

        if request.amount <= BigDecimal::zero() {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let mut body = self.credentials();
        body.insert("Amount".into(), Self::format_amount(&request.amount).into());
        body.insert("OrderID".into(), request.order_id.into());
        body.insert("Description".into(), request.description.clone().into());
        body.insert("BackURL".into(), request.callback_url.clone().into());
        if let Some(opaque) = &request.opaque {
            body.insert("Opaque".into(), opaque.clone().into());
        }
        let body = JsonValue::Object(body);

        info!(
            order_id = request.order_id,
            amount = %request.amount,
            "Registering payment with gateway"
        );

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/api/VPOS/InitPayment"),
                Some(&body),
                &[("Accept", "application/json")],
            )
            .await?;

        let response_code = json_string(&raw, &["ResponseCode", "responseCode"]);
        if response_code.as_deref() != Some(INIT_SUCCESS_CODE) {
            let message = json_string(&raw, &["ResponseMessage", "Description", "message"])
                .unwrap_or_else(|| "payment registration rejected".to_string());
            warn!(
                order_id = request.order_id,
                response_code = ?response_code,
                message = %message,
                "Gateway rejected payment registration"
            );
            return Err(PaymentError::GatewayRejected {
                response_code,
                message,
            });
        }

        let payment_id = json_string(&raw, &["PaymentID", "PaymentId", "paymentId"]).ok_or_else(
            || PaymentError::ProviderError {
                message: "gateway accepted payment but returned no PaymentID".to_string(),
                provider_code: response_code.clone(),
                retryable: false,
            },
        )?;

        Ok(CreatePaymentResponse {
            payment_url: self.payment_url(&payment_id),
            payment_id,
        })
    }

    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<GatewayPaymentStatus> {
        self.ensure_configured()?;

        if payment_id.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "payment id is required".to_string(),
                field: Some("payment_id".to_string()),
            });
        }

        let mut body = self.credentials();
        body.insert("PaymentID".into(), payment_id.trim().into());
        let body = JsonValue::Object(body);

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.config.status_url,
                Some(&body),
                &[("Accept", "application/json")],
            )
            .await?;

        let status = GatewayPaymentStatus::from_raw(raw);
        debug!(
            payment_id = %payment_id,
            payment_state = %status.payment_state,
            response_code = ?status.response_code,
            "Gateway payment status received"
        );
        Ok(status)
    }
}
