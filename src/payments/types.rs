use crate::payments::utils::{json_decimal, json_string};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// State of a payment as reported by the gateway status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentState {
    PaymentApproved,
    PaymentDeclined,
    PaymentPending,
    /// Any state string this client doesn't model
    #[serde(untagged)]
    Other(String),
}

impl GatewayPaymentState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "payment_approved" => GatewayPaymentState::PaymentApproved,
            "payment_declined" => GatewayPaymentState::PaymentDeclined,
            "payment_pending" | "payment_created" | "payment_processing" => {
                GatewayPaymentState::PaymentPending
            }
            _ => GatewayPaymentState::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayPaymentState::PaymentApproved => "payment_approved",
            GatewayPaymentState::PaymentDeclined => "payment_declined",
            GatewayPaymentState::PaymentPending => "payment_pending",
            GatewayPaymentState::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for GatewayPaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    /// Amount in the gateway's currency, two decimal places
    pub amount: BigDecimal,
    /// Numeric order id the gateway accepts
    pub order_id: u64,
    pub description: String,
    pub callback_url: String,
    /// Opaque value the gateway echoes back in callbacks and status queries
    pub opaque: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePaymentResponse {
    pub payment_id: String,
    pub payment_url: String,
}

/// Normalized answer of the gateway status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPaymentStatus {
    pub payment_state: GatewayPaymentState,
    pub response_code: Option<String>,
    pub description: Option<String>,
    pub deposited_amount: Option<BigDecimal>,
    pub amount: Option<BigDecimal>,
    pub order_status: Option<String>,
    /// Order id echoed back by the gateway
    pub order_id: Option<String>,
    pub opaque: Option<String>,
    pub currency: Option<String>,
    /// Untouched gateway payload
    pub raw: JsonValue,
}

impl GatewayPaymentStatus {
    /// Build from the gateway's JSON body. Field names differ in case between
    /// gateway versions, so both spellings are accepted.
    pub fn from_raw(raw: JsonValue) -> Self {
        let payment_state = json_string(&raw, &["PaymentState", "paymentState", "payment_state"])
            .map(|s| GatewayPaymentState::parse(&s))
            .unwrap_or_else(|| GatewayPaymentState::Other(String::new()));

        Self {
            payment_state,
            response_code: json_string(&raw, &["ResponseCode", "responseCode", "response_code"]),
            description: json_string(&raw, &["Description", "description", "ResponseMessage"]),
            deposited_amount: json_decimal(
                &raw,
                &["DepositedAmount", "depositedAmount", "deposited_amount"],
            ),
            amount: json_decimal(&raw, &["Amount", "amount"]),
            order_status: json_string(&raw, &["OrderStatus", "orderStatus", "order_status"]),
            order_id: json_string(&raw, &["OrderID", "OrderId", "orderId", "order_id"]),
            opaque: json_string(&raw, &["Opaque", "opaque"]),
            currency: json_string(&raw, &["Currency", "currency"]),
            raw,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.payment_state == GatewayPaymentState::PaymentApproved
    }

    pub fn is_declined(&self) -> bool {
        self.payment_state == GatewayPaymentState::PaymentDeclined
            || self
                .order_status
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case("declined"))
                .unwrap_or(false)
    }

    /// Deposited amount when the gateway reports a non-zero one, otherwise the order amount
    pub fn settled_amount(&self) -> Option<BigDecimal> {
        match &self.deposited_amount {
            Some(deposited) if !deposited.is_zero() => Some(deposited.clone()),
            _ => self.amount.clone(),
        }
    }

    pub fn reason(&self) -> String {
        self.description
            .clone()
            .or_else(|| self.order_status.clone())
            .unwrap_or_else(|| self.payment_state.to_string())
    }
}
