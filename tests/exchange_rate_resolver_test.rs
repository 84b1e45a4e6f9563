//! Integration tests for exchange rate resolution
//!
//! Tests cover:
//! - Provider fallback order
//! - Cache hits and expiry
//! - Serving stale rates when every provider fails
//! - Input normalization

use async_trait::async_trait;
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::Utc;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use workmarket_backend::cache::keys::exchange_rate::CurrencyPairKey;
use workmarket_backend::services::exchange_rate::{
    ExchangeRateError, ExchangeRateResolver, ExchangeRateResolverConfig, ExchangeRateResult,
    RateData, RateProvider,
};
use workmarket_backend::services::rate_cache::{CachedRate, InMemoryRateCache, RateCache};
use workmarket_backend::services::rate_providers::StaticRateProvider;

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

/// Provider that always fails and counts how often it was asked
#[derive(Default)]
struct DownProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl RateProvider for DownProvider {
    async fn fetch_rate(&self, _from: &str, _to: &str) -> ExchangeRateResult<RateData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExchangeRateError::ProviderError("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "down"
    }
}

fn resolver(
    cache: Arc<InMemoryRateCache>,
    providers: Vec<Arc<dyn RateProvider>>,
) -> ExchangeRateResolver {
    providers.into_iter().fold(
        ExchangeRateResolver::new(cache, ExchangeRateResolverConfig::default()),
        |resolver, provider| resolver.add_provider(provider),
    )
}

#[tokio::test]
async fn test_falls_through_to_next_provider() {
    let down = Arc::new(DownProvider::default());
    let resolver = resolver(
        Arc::new(InMemoryRateCache::new()),
        vec![
            down.clone(),
            Arc::new(StaticRateProvider::new("backup").with_rate("EUR", "USD", dec("1.08"))),
        ],
    );

    assert_eq!(resolver.get_rate("EUR", "USD").await.unwrap(), dec("1.08"));
    assert_eq!(down.calls.load(Ordering::SeqCst), 1);

    let cached = resolver.cached_rates().await;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].source, "backup");
}

#[tokio::test]
async fn test_fresh_cache_skips_providers() {
    let down = Arc::new(DownProvider::default());
    let cache = Arc::new(InMemoryRateCache::new());
    cache
        .put(
            &CurrencyPairKey::new("GBP", "USD"),
            CachedRate::new(dec("1.27"), "earlier"),
        )
        .await;

    let resolver = resolver(cache, vec![down.clone()]);

    assert_eq!(resolver.get_rate("gbp", "usd").await.unwrap(), dec("1.27"));
    assert_eq!(down.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stale_rate_served_when_providers_fail() {
    let down = Arc::new(DownProvider::default());
    let cache = Arc::new(InMemoryRateCache::new());
    cache
        .put(
            &CurrencyPairKey::new("EUR", "USD"),
            CachedRate {
                rate: dec("1.05"),
                source: "earlier".to_string(),
                fetched_at: Utc::now() - chrono::Duration::days(2),
            },
        )
        .await;

    let resolver = resolver(cache, vec![down.clone()]);

    assert_eq!(resolver.get_rate("EUR", "USD").await.unwrap(), dec("1.05"));
    assert_eq!(down.calls.load(Ordering::SeqCst), 1);
    assert!(!resolver.cached_rates().await[0].fresh);
}

#[tokio::test]
async fn test_expired_rate_refreshed() {
    let cache = Arc::new(InMemoryRateCache::new());
    cache
        .put(
            &CurrencyPairKey::new("EUR", "USD"),
            CachedRate {
                rate: dec("1.05"),
                source: "earlier".to_string(),
                fetched_at: Utc::now() - chrono::Duration::hours(2),
            },
        )
        .await;

    let resolver = ExchangeRateResolver::new(
        cache,
        ExchangeRateResolverConfig {
            cache_ttl: Duration::from_secs(3600),
        },
    )
    .add_provider(Arc::new(
        StaticRateProvider::new("live").with_rate("EUR", "USD", dec("1.09")),
    ));

    assert_eq!(resolver.get_rate("EUR", "USD").await.unwrap(), dec("1.09"));
    let cached = resolver.cached_rates().await;
    assert_eq!(cached[0].source, "live");
    assert!(cached[0].fresh);
}

#[tokio::test]
async fn test_unavailable_without_cache() {
    let resolver = resolver(
        Arc::new(InMemoryRateCache::new()),
        vec![Arc::new(DownProvider::default())],
    );

    match resolver.get_rate("EUR", "JPY").await {
        Err(ExchangeRateError::RateUnavailable { from, to }) => {
            assert_eq!(from, "EUR");
            assert_eq!(to, "JPY");
        }
        other => panic!("expected RateUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_identity_and_invalid_codes() {
    let down = Arc::new(DownProvider::default());
    let resolver = resolver(Arc::new(InMemoryRateCache::new()), vec![down.clone()]);

    assert_eq!(resolver.get_rate("usd", "USD").await.unwrap(), BigDecimal::from(1));
    assert_eq!(
        resolver.convert(&dec("12.5"), "USD", "usd").await.unwrap(),
        dec("12.5")
    );
    assert!(matches!(
        resolver.get_rate("EU", "USD").await,
        Err(ExchangeRateError::InvalidCurrency(_))
    ));
    assert_eq!(down.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let resolver = resolver(
        Arc::new(InMemoryRateCache::new()),
        vec![Arc::new(
            StaticRateProvider::new("static")
                .with_rate("EUR", "USD", dec("1.08"))
                .with_rate("GBP", "USD", dec("1.27")),
        )],
    );

    resolver.get_rate("EUR", "USD").await.unwrap();
    resolver.get_rate("GBP", "USD").await.unwrap();
    assert_eq!(resolver.cached_rates().await.len(), 2);

    assert_eq!(resolver.clear_cache().await, 2);
    assert!(resolver.cached_rates().await.is_empty());
    assert_eq!(
        resolver.convert(&dec("10"), "GBP", "USD").await.unwrap(),
        dec("12.7")
    );
}

#[tokio::test]
async fn test_conversion_round_trip_with_reciprocal_rates() {
    let forward = dec("1.08");
    let inverse = (BigDecimal::from(1) / &forward).with_scale_round(10, RoundingMode::HalfUp);
    let resolver = resolver(
        Arc::new(InMemoryRateCache::new()),
        vec![Arc::new(
            StaticRateProvider::new("static")
                .with_rate("EUR", "USD", forward)
                .with_rate("USD", "EUR", inverse),
        )],
    );

    for amount in ["0.01", "1", "99.99", "100", "12345.67"] {
        let original = dec(amount);
        let usd = resolver.convert(&original, "EUR", "USD").await.unwrap();
        let back = resolver.convert(&usd, "USD", "EUR").await.unwrap();
        assert!(
            (&back - &original).abs() < dec("0.0001"),
            "{} EUR came back as {}",
            original,
            back
        );
    }
}
