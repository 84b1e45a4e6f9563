use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::AppState;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::credit_ledger::{LedgerEntry, LedgerError, DEFAULT_PAGE_SIZE};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreditHistoryResponse {
    pub user_id: i64,
    pub balance: BigDecimal,
    pub entries: Vec<LedgerEntry>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

/// GET /api/credits/{user_id}/history
pub async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CreditHistoryResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers).unwrap_or_default();
    let with_request_id = |e: LedgerError| AppError::from(e).with_request_id(request_id.clone());

    let page = state
        .ledger
        .get_history(
            user_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await
        .map_err(with_request_id)?;
    let balance = state.ledger.balance(user_id).await.map_err(with_request_id)?;

    debug!(user_id = user_id, entries = page.entries.len(), "Credit history served");

    let has_more = (page.page as i64) * (page.limit as i64) < page.total;
    Ok(Json(CreditHistoryResponse {
        user_id,
        balance,
        entries: page.entries,
        total: page.total,
        page: page.page,
        limit: page.limit,
        has_more,
    }))
}
