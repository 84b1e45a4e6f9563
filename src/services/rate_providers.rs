//! Rate providers for fetching exchange rates
//!
//! - HttpRateProvider: public exchange-rate APIs, one request per lookup
//! - StaticRateProvider: fixed table, used for pegged pairs and tests

use super::exchange_rate::{ExchangeRateError, ExchangeRateResult, RateData, RateProvider};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Public API endpoint that answers with a `rates` map keyed by currency
pub struct HttpRateProvider {
    name: String,
    /// `{from}` and `{to}` are substituted before the request
    url_template: String,
    client: reqwest::Client,
}

impl HttpRateProvider {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> ExchangeRateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ExchangeRateError::ProviderError(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            name: name.into(),
            url_template: url_template.into(),
            client,
        })
    }

    fn url(&self, from: &str, to: &str) -> String {
        self.url_template
            .replace("{from}", from)
            .replace("{to}", to)
    }

    /// Pull `rates[to]` (or `conversion_rates[to]`) out of a provider response
    fn extract_rate(body: &JsonValue, to: &str) -> ExchangeRateResult<BigDecimal> {
        if let Some(result) = body.get("result").and_then(JsonValue::as_str) {
            if result != "success" {
                return Err(ExchangeRateError::ProviderError(format!(
                    "provider reported result '{}'",
                    result
                )));
            }
        }

        let rates = body
            .get("rates")
            .or_else(|| body.get("conversion_rates"))
            .ok_or_else(|| ExchangeRateError::ProviderError("response has no rates".to_string()))?;

        let raw = match rates.get(to) {
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(JsonValue::String(s)) => s.clone(),
            _ => {
                return Err(ExchangeRateError::ProviderError(format!(
                    "response has no rate for {}",
                    to
                )))
            }
        };

        BigDecimal::from_str(&raw).map_err(|e| ExchangeRateError::InvalidRate(e.to_string()))
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> ExchangeRateResult<RateData> {
        let url = self.url(from, to);
        debug!(provider = %self.name, from = %from, to = %to, "Requesting exchange rate");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ExchangeRateError::ProviderError(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(format!("invalid JSON: {}", e)))?;

        let rate = Self::extract_rate(&body, to)?;

        Ok(RateData {
            currency_pair: format!("{}/{}", from, to),
            rate,
            source: self.name.clone(),
            last_updated: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Default public provider chain, in the order they are tried
pub fn default_providers(timeout: Duration) -> ExchangeRateResult<Vec<Arc<dyn RateProvider>>> {
    Ok(vec![
        Arc::new(HttpRateProvider::new(
            "open.er-api.com",
            "https://open.er-api.com/v6/latest/{from}",
            timeout,
        )?),
        Arc::new(HttpRateProvider::new(
            "exchangerate-api.com",
            "https://api.exchangerate-api.com/v4/latest/{from}",
            timeout,
        )?),
        Arc::new(HttpRateProvider::new(
            "frankfurter.app",
            "https://api.frankfurter.app/latest?from={from}&to={to}",
            timeout,
        )?),
    ])
}

/// Fixed rate table
pub struct StaticRateProvider {
    name: String,
    rates: HashMap<(String, String), BigDecimal>,
}

impl StaticRateProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: BigDecimal) -> Self {
        self.rates
            .insert((from.to_uppercase(), to.to_uppercase()), rate);
        self
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> ExchangeRateResult<RateData> {
        let rate = self
            .rates
            .get(&(from.to_uppercase(), to.to_uppercase()))
            .cloned()
            .ok_or_else(|| ExchangeRateError::RateUnavailable {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        Ok(RateData {
            currency_pair: format!("{}/{}", from, to),
            rate,
            source: self.name.clone(),
            last_updated: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
