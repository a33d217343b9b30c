//! Backtest Types
//!
//! Write-once records of completed historical simulations, plus the
//! per-trade and equity-curve series stored in the results blob.

use crate::types::ledger::OrderSide;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One simulated fill during a backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub side: OrderSide,
    /// Bar time of the fill, milliseconds since the epoch.
    pub timestamp: i64,
    pub price: f64,
    pub quantity: i64,
    /// Realized profit/loss; set on sell-side trades only.
    pub pl: Option<f64>,
    /// What produced the trade: the firing rule, or the synthetic close.
    pub reason: String,
}

/// One sample of the simulated equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub balance: f64,
    pub position_value: f64,
    pub total_value: f64,
}

/// Aggregate performance metrics of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub final_capital: f64,
    pub total_return: f64,
    pub total_return_percent: f64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

/// Full result series persisted as the opaque JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResults {
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: BacktestMetrics,
}

/// Immutable snapshot of a completed backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub id: String,
    pub algorithm_id: String,
    pub user_id: String,
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub total_return_percent: f64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub results: BacktestResults,
    pub created_at: i64,
}
