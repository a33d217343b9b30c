use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream market data unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::UpstreamUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Reqwest(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AppError::SerdeJson(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Anyhow(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<crate::services::AuthError> for AppError {
    fn from(e: crate::services::AuthError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

impl From<crate::services::LedgerError> for AppError {
    fn from(e: crate::services::LedgerError) -> Self {
        use crate::services::LedgerError::*;
        match e {
            AccountNotFound(_) => AppError::NotFound(e.to_string()),
            InsufficientFunds { .. }
            | InsufficientShares { .. }
            | InvalidQuantity(_)
            | InvalidPrice(_) => AppError::BadRequest(e.to_string()),
            Database(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<crate::services::EngineError> for AppError {
    fn from(e: crate::services::EngineError) -> Self {
        use crate::services::EngineError::*;
        match e {
            NotFound(_) => AppError::NotFound(e.to_string()),
            AlreadyRunning(_) | NotActive(_) | NoRules(_) => AppError::BadRequest(e.to_string()),
            Database(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<crate::services::BacktestError> for AppError {
    fn from(e: crate::services::BacktestError) -> Self {
        use crate::services::BacktestError::*;
        match e {
            NotFound(_) => AppError::NotFound(e.to_string()),
            InvalidDates(_) => AppError::BadRequest(e.to_string()),
            NoData { .. } | Upstream(_) => AppError::UpstreamUnavailable(e.to_string()),
            Database(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<crate::services::MarketDataError> for AppError {
    fn from(e: crate::services::MarketDataError) -> Self {
        AppError::UpstreamUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
