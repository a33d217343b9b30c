//! Stocks API
//!
//! Quote and history lookups:
//! - GET  /api/stocks/quote/:symbol
//! - POST /api/stocks/quotes {symbols: [...]}
//! - GET  /api/stocks/history/:symbol?range=&interval=

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::api::auth::Authenticated;
use crate::error::AppError;
use crate::types::{Interval, Quote, Range};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quote/:symbol", get(get_quote))
        .route("/quotes", post(get_quotes))
        .route("/history/:symbol", get(get_history))
}

#[derive(Debug, Deserialize)]
pub struct QuotesRequest {
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub range: Option<String>,
    pub interval: Option<String>,
}

async fn get_quote(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, AppError> {
    Ok(Json(state.market.get_quote(&symbol).await?))
}

async fn get_quotes(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(request): Json<QuotesRequest>,
) -> Result<Json<HashMap<String, Quote>>, AppError> {
    if request.symbols.is_empty() {
        return Err(AppError::BadRequest("symbols must not be empty".to_string()));
    }
    Ok(Json(state.market.get_multiple_quotes(&request.symbols).await))
}

async fn get_history(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, AppError> {
    let range = match query.range.as_deref() {
        Some(raw) => Range::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unsupported range: {raw}")))?,
        None => Range::OneMonth,
    };
    let interval = match query.interval.as_deref() {
        Some(raw) => Interval::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unsupported interval: {raw}")))?,
        None => Interval::OneDay,
    };

    let bars = state.market.get_historical(&symbol, range, interval).await?;
    Ok(Json(json!({
        "symbol": symbol.to_uppercase(),
        "range": range,
        "interval": interval,
        "bars": &*bars,
    })))
}
