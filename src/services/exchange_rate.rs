//! Exchange Rate Resolver
//!
//! Resolves the rate between two currencies for credit conversion. Order of
//! preference: identity (same currency), fresh cache entry, upstream providers
//! in registration order, stale cache entry. Only when all of those come up
//! empty does a lookup fail.

use crate::cache::keys::exchange_rate::CurrencyPairKey;
use crate::services::rate_cache::{CachedRate, RateCache};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, One, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exchange rate service error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeRateError {
    #[error("Exchange rate unavailable for {from} -> {to}")]
    RateUnavailable { from: String, to: String },

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Rate provider error: {0}")]
    ProviderError(String),
}

pub type ExchangeRateResult<T> = Result<T, ExchangeRateError>;

impl From<ExchangeRateError> for crate::error::AppError {
    fn from(err: ExchangeRateError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            ExchangeRateError::RateUnavailable { from, to } => {
                AppError::new(AppErrorKind::External(ExternalError::RateUnavailable { from, to }))
            }
            ExchangeRateError::InvalidCurrency(currency) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency,
                    reason: "expected a 3-letter ISO 4217 code".to_string(),
                }))
            }
            other => AppError::new(AppErrorKind::External(ExternalError::RateProvider {
                message: other.to_string(),
            })),
        }
    }
}

/// Upstream source of exchange rates
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Fetch the current rate for one unit of `from` expressed in `to`
    async fn fetch_rate(&self, from: &str, to: &str) -> ExchangeRateResult<RateData>;

    fn name(&self) -> &str;
}

/// Rate data returned by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateData {
    pub currency_pair: String,
    pub rate: BigDecimal,
    pub source: String,
    pub last_updated: DateTime<Utc>,
}

/// Cached pair as exposed for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRateInfo {
    pub pair: String,
    pub rate: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub age_seconds: u64,
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct ExchangeRateResolverConfig {
    /// How long a fetched rate is served without asking providers again
    pub cache_ttl: Duration,
}

impl Default for ExchangeRateResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

pub struct ExchangeRateResolver {
    cache: Arc<dyn RateCache>,
    providers: Vec<Arc<dyn RateProvider>>,
    config: ExchangeRateResolverConfig,
}

impl ExchangeRateResolver {
    pub fn new(cache: Arc<dyn RateCache>, config: ExchangeRateResolverConfig) -> Self {
        Self {
            cache,
            providers: Vec::new(),
            config,
        }
    }

    /// Add rate provider; providers are tried in the order they were added
    pub fn add_provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Get the rate for converting one unit of `from` into `to`
    pub async fn get_rate(&self, from: &str, to: &str) -> ExchangeRateResult<BigDecimal> {
        let from = normalize_currency(from)?;
        let to = normalize_currency(to)?;

        if from == to {
            return Ok(BigDecimal::one());
        }

        let key = CurrencyPairKey::new(&from, &to);
        let cached = self.cache.get(&key).await;

        if let Some(entry) = &cached {
            if entry.is_fresh(self.config.cache_ttl) {
                debug!(pair = %key, rate = %entry.rate, "Cache hit for rate");
                return Ok(entry.rate.clone());
            }
        }

        for provider in &self.providers {
            match provider.fetch_rate(&from, &to).await {
                Ok(data) if data.rate > BigDecimal::zero() => {
                    info!(
                        pair = %key,
                        rate = %data.rate,
                        provider = provider.name(),
                        "Fetched exchange rate"
                    );
                    self.cache
                        .put(&key, CachedRate::new(data.rate.clone(), provider.name()))
                        .await;
                    return Ok(data.rate);
                }
                Ok(data) => {
                    warn!(
                        pair = %key,
                        rate = %data.rate,
                        provider = provider.name(),
                        "Provider returned a non-positive rate, skipping"
                    );
                }
                Err(e) => {
                    warn!(
                        pair = %key,
                        provider = provider.name(),
                        error = %e,
                        "Provider failed to fetch rate"
                    );
                }
            }
        }

        if let Some(entry) = cached {
            warn!(
                pair = %key,
                rate = %entry.rate,
                age_seconds = entry.age().as_secs(),
                "All rate providers failed, serving expired cached rate"
            );
            return Ok(entry.rate);
        }

        warn!(pair = %key, "All rate providers failed and no cached rate exists");
        Err(ExchangeRateError::RateUnavailable { from, to })
    }

    /// Convert `amount` of `from` into `to`
    pub async fn convert(
        &self,
        amount: &BigDecimal,
        from: &str,
        to: &str,
    ) -> ExchangeRateResult<BigDecimal> {
        let rate = self.get_rate(from, to).await?;
        Ok(amount * rate)
    }

    pub async fn clear_cache(&self) -> usize {
        let removed = self.cache.clear().await;
        info!(removed = removed, "Exchange rate cache cleared");
        removed
    }

    pub async fn cached_rates(&self) -> Vec<CachedRateInfo> {
        self.cache
            .entries()
            .await
            .into_iter()
            .map(|(key, entry)| CachedRateInfo {
                pair: format!("{}/{}", key.from_currency, key.to_currency),
                rate: entry.rate.to_string(),
                source: entry.source.clone(),
                fetched_at: entry.fetched_at,
                age_seconds: entry.age().as_secs(),
                fresh: entry.is_fresh(self.config.cache_ttl),
            })
            .collect()
    }
}

/// Upper-case and check a currency code
pub fn normalize_currency(code: &str) -> ExchangeRateResult<String> {
    let code = code.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(ExchangeRateError::InvalidCurrency(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rate_cache::InMemoryRateCache;
    use crate::services::rate_providers::StaticRateProvider;
    use std::str::FromStr;

    fn resolver(cache: Arc<InMemoryRateCache>) -> ExchangeRateResolver {
        ExchangeRateResolver::new(cache, ExchangeRateResolverConfig::default()).add_provider(
            Arc::new(StaticRateProvider::new("static").with_rate(
                "EUR",
                "USD",
                BigDecimal::from_str("1.08").unwrap(),
            )),
        )
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency(" eur ").unwrap(), "EUR");
        assert!(normalize_currency("EURO").is_err());
        assert!(normalize_currency("E1R").is_err());
    }

    #[tokio::test]
    async fn test_identity_rate() {
        let resolver = ExchangeRateResolver::new(
            Arc::new(InMemoryRateCache::new()),
            ExchangeRateResolverConfig::default(),
        );
        assert_eq!(resolver.get_rate("usd", "USD").await.unwrap(), BigDecimal::one());
    }

    #[tokio::test]
    async fn test_fetch_populates_cache() {
        let cache = Arc::new(InMemoryRateCache::new());
        let resolver = resolver(cache.clone());

        let converted = resolver
            .convert(&BigDecimal::from(100), "EUR", "USD")
            .await
            .unwrap();
        assert_eq!(converted, BigDecimal::from_str("108.00").unwrap());

        let cached = cache.get(&CurrencyPairKey::new("EUR", "USD")).await.unwrap();
        assert_eq!(cached.source, "static");
        assert_eq!(resolver.cached_rates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_pair_is_unavailable() {
        let resolver = resolver(Arc::new(InMemoryRateCache::new()));
        let err = resolver.get_rate("GBP", "JPY").await.unwrap_err();
        assert!(matches!(err, ExchangeRateError::RateUnavailable { .. }));
    }
}
