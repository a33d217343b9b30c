//! Vellum - rule-driven paper trading platform
//!
//! Evaluates user-authored trading algorithms against live quotes on a
//! periodic cadence, executes simulated fills against a virtual cash
//! ledger, and replays the same rule semantics over historical bars for
//! deterministic backtests.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use config::Config;
use services::{
    AuthService, BacktestService, Bookkeeper, ExecutionEngine, MarketDataService, SqliteStore,
};
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub market: Arc<MarketDataService>,
    pub bookkeeper: Arc<Bookkeeper>,
    pub engine: Arc<ExecutionEngine>,
    pub backtester: Arc<BacktestService>,
    pub auth: Arc<AuthService>,
}
