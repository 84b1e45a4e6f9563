use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::api::AppState;
use crate::services::exchange_rate::CachedRateInfo;

/// Response for the cache introspection endpoint
#[derive(Debug, Serialize)]
pub struct RateCacheResponse {
    pub rates: Vec<CachedRateInfo>,
    pub count: usize,
    pub providers: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RateCacheClearedResponse {
    pub cleared: usize,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/rates/cache
pub async fn get_rate_cache(State(state): State<AppState>) -> Json<RateCacheResponse> {
    let mut rates = state.rates.cached_rates().await;
    rates.sort_by(|a, b| a.pair.cmp(&b.pair));

    Json(RateCacheResponse {
        count: rates.len(),
        rates,
        providers: state.rates.provider_names(),
        timestamp: Utc::now(),
    })
}

/// DELETE /api/rates/cache
pub async fn clear_rate_cache(State(state): State<AppState>) -> Json<RateCacheClearedResponse> {
    let cleared = state.rates.clear_cache().await;
    info!(cleared = cleared, "Rate cache cleared via API");

    Json(RateCacheClearedResponse {
        cleared,
        timestamp: Utc::now(),
    })
}
