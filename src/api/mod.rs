pub mod algorithms;
pub mod auth;
pub mod backtest;
pub mod health;
pub mod paper_trading;
pub mod stocks;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/algorithms", algorithms::router())
        .nest("/api/paper-trading", paper_trading::router())
        .nest("/api/stocks", stocks::router())
        .nest("/api/backtest", backtest::router())
}
