//! Paper Trading API
//!
//! Account, positions, orders, journal, manual fills, and live-execution
//! control:
//! - GET  /api/paper-trading/account
//! - GET  /api/paper-trading/positions
//! - GET  /api/paper-trading/orders?limit=N
//! - GET  /api/paper-trading/transactions?limit=N
//! - GET  /api/paper-trading/portfolio
//! - POST /api/paper-trading/orders
//! - POST /api/paper-trading/account/reset
//! - POST /api/paper-trading/algorithms/:id/start
//! - POST /api/paper-trading/algorithms/:id/stop
//! - GET  /api/paper-trading/algorithms/running

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::api::auth::Authenticated;
use crate::error::AppError;
use crate::services::FillOutcome;
use crate::types::{Account, Order, OrderSide, OrderType, PortfolioView, Position, Transaction};
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/account", get(get_account))
        .route("/account/reset", post(reset_account))
        .route("/positions", get(list_positions))
        .route("/orders", get(list_orders).post(place_order))
        .route("/transactions", get(list_transactions))
        .route("/portfolio", get(get_portfolio))
        .route("/algorithms/:id/start", post(start_algorithm))
        .route("/algorithms/:id/stop", post(stop_algorithm))
        .route("/algorithms/running", get(running_algorithms))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    #[serde(rename = "type")]
    pub order_type: Option<OrderType>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartAlgorithmRequest {
    #[serde(default)]
    pub symbols: Vec<String>,
}

fn account_for(state: &AppState, user_id: &str) -> Result<Account, AppError> {
    state
        .store
        .get_or_create_account(user_id)
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn get_account(
    auth: Authenticated,
    State(state): State<AppState>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(account_for(&state, &auth.user.user_id)?))
}

async fn reset_account(
    auth: Authenticated,
    State(state): State<AppState>,
) -> Result<Json<Account>, AppError> {
    let account = account_for(&state, &auth.user.user_id)?;
    let account = state.bookkeeper.reset(&account.id)?;
    Ok(Json(account))
}

async fn list_positions(
    auth: Authenticated,
    State(state): State<AppState>,
) -> Result<Json<Vec<Position>>, AppError> {
    let account = account_for(&state, &auth.user.user_id)?;
    Ok(Json(state.store.list_positions(&account.id)))
}

async fn list_orders(
    auth: Authenticated,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let account = account_for(&state, &auth.user.user_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.store.list_orders(&account.id, limit)))
}

async fn list_transactions(
    auth: Authenticated,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let account = account_for(&state, &auth.user.user_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.store.list_transactions(&account.id, limit)))
}

/// Portfolio view with positions revalued at current quotes.
async fn get_portfolio(
    auth: Authenticated,
    State(state): State<AppState>,
) -> Result<Json<PortfolioView>, AppError> {
    let account = account_for(&state, &auth.user.user_id)?;

    let symbols: Vec<String> = state
        .store
        .list_positions(&account.id)
        .iter()
        .map(|p| p.symbol.clone())
        .collect();
    let quotes = state.market.get_multiple_quotes(&symbols).await;
    let prices: HashMap<String, f64> = quotes
        .into_iter()
        .map(|(symbol, quote)| (symbol, quote.price))
        .collect();

    let account = state.bookkeeper.recompute_market_values(&account.id, &prices)?;
    let positions = state.store.list_positions(&account.id);

    let total_market_value: Decimal = positions.iter().map(|p| p.market_value).sum();
    let total_unrealized_pl: Decimal = positions.iter().map(|p| p.unrealized_pl).sum();
    let total_return_percent = if account.initial_balance > Decimal::ZERO {
        ((account.total_value - account.initial_balance) / account.initial_balance
            * Decimal::ONE_HUNDRED)
            .round_dp(4)
    } else {
        Decimal::ZERO
    };

    Ok(Json(PortfolioView {
        account,
        positions,
        total_market_value,
        total_unrealized_pl,
        total_return_percent,
    }))
}

/// Manual order entry. Fills instantly at the last quoted price.
async fn place_order(
    auth: Authenticated,
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<FillOutcome>), AppError> {
    if request.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be a positive integer".to_string(),
        ));
    }
    let symbol = request.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(AppError::BadRequest("symbol must not be empty".to_string()));
    }

    let quote = state.market.get_quote(&symbol).await?;
    let account = account_for(&state, &auth.user.user_id)?;
    let order_type = request.order_type.unwrap_or(OrderType::Market);

    let outcome = match request.side {
        OrderSide::Buy => state.bookkeeper.apply_buy(
            &account.id,
            &symbol,
            request.quantity,
            quote.price,
            order_type,
            None,
        )?,
        OrderSide::Sell => state.bookkeeper.apply_sell(
            &account.id,
            &symbol,
            request.quantity,
            quote.price,
            order_type,
            None,
        )?,
    };

    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn start_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StartAlgorithmRequest>>,
) -> Result<Json<Value>, AppError> {
    let symbols = body.map(|Json(b)| b.symbols).unwrap_or_default();
    state.engine.start(&id, &auth.user.user_id, symbols)?;
    Ok(Json(json!({ "started": true, "algorithm_id": id })))
}

async fn stop_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    // Stopping requires the caller to own the algorithm; stop itself is
    // idempotent.
    state
        .store
        .get_algorithm_for_user(&id, &auth.user.user_id)
        .ok_or_else(|| AppError::NotFound(format!("Algorithm not found: {id}")))?;
    state.engine.stop(&id).await;
    Ok(Json(json!({ "stopped": true, "algorithm_id": id })))
}

async fn running_algorithms(
    _auth: Authenticated,
    State(state): State<AppState>,
) -> Json<Value> {
    Json(json!({ "running": state.engine.running() }))
}
