//! Backtest API
//!
//! Submission and polling of historical simulations:
//! - POST /api/backtest/run
//! - GET  /api/backtest/:id
//! - GET  /api/backtest/algorithm/:algorithm_id
//!
//! A run executes on a worker task; the submission response carries the id
//! and clients poll until the record is persisted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::auth::Authenticated;
use crate::error::AppError;
use crate::services::{BacktestParams, RunState};
use crate::types::{BacktestRecord, Interval};
use crate::AppState;

const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", post(run_backtest))
        .route("/:id", get(get_backtest))
        .route("/algorithm/:algorithm_id", get(list_for_algorithm))
}

/// Run request, in the original wire format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBacktestRequest {
    pub algorithm_id: String,
    pub symbol: String,
    /// YYYY-MM-DD
    pub start_date: String,
    /// YYYY-MM-DD
    pub end_date: String,
    pub initial_capital: Option<f64>,
    pub interval: Option<String>,
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("{field} must be YYYY-MM-DD, got {raw}")))
}

async fn run_backtest(
    auth: Authenticated,
    State(state): State<AppState>,
    Json(request): Json<RunBacktestRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let interval = match request.interval.as_deref() {
        Some(raw) => Interval::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unsupported interval: {raw}")))?,
        None => Interval::OneDay,
    };

    let params = BacktestParams {
        algorithm_id: request.algorithm_id,
        user_id: auth.user.user_id,
        symbol: request.symbol.trim().to_uppercase(),
        start_date: parse_date("startDate", &request.start_date)?,
        end_date: parse_date("endDate", &request.end_date)?,
        initial_capital: request.initial_capital.unwrap_or(DEFAULT_INITIAL_CAPITAL),
        interval,
    };

    let id = state.backtester.submit(params)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "status": "running" })),
    ))
}

async fn get_backtest(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if let Some(record) = state.store.get_backtest(&id, &auth.user.user_id) {
        let mut body = serde_json::to_value(&record)?;
        body["status"] = json!("completed");
        return Ok(Json(body));
    }

    match state.backtester.status(&id) {
        Some(RunState::Running) => Ok(Json(json!({ "id": id, "status": "running" }))),
        Some(RunState::Failed(error)) => {
            Ok(Json(json!({ "id": id, "status": "failed", "error": error })))
        }
        None => Err(AppError::NotFound(format!("Backtest not found: {id}"))),
    }
}

async fn list_for_algorithm(
    auth: Authenticated,
    State(state): State<AppState>,
    Path(algorithm_id): Path<String>,
) -> Result<Json<Vec<BacktestRecord>>, AppError> {
    state
        .store
        .get_algorithm_for_user(&algorithm_id, &auth.user.user_id)
        .ok_or_else(|| AppError::NotFound(format!("Algorithm not found: {algorithm_id}")))?;
    Ok(Json(state.store.list_backtests_for_algorithm(&algorithm_id)))
}
