//! Backtest Engine
//!
//! Replays an algorithm's rules over historical bars with an in-memory
//! ledger, producing an equity curve, a trade list, and performance
//! metrics. The same evaluator and executor as live execution drive the
//! simulation, so a strategy backtests with the semantics it will trade
//! with.
//!
//! Simulations run on a worker task; callers poll by id until the
//! write-once record lands in the store.

use crate::services::evaluator::{self, MarketContext, PositionSnapshot};
use crate::services::executor;
use crate::services::indicators;
use crate::services::market_data::{MarketDataError, MarketDataService};
use crate::services::store::SqliteStore;
use crate::types::{
    BacktestMetrics, BacktestRecord, BacktestResults, BacktestTrade, Bar, EquityPoint, Interval,
    OrderSide, Range, Rule,
};
use chrono::NaiveDate;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const ANNUALIZATION: f64 = 252.0;
const RISK_FREE_PER_STEP: f64 = 0.02 / ANNUALIZATION;

/// Backtest errors.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("Algorithm not found: {0}")]
    NotFound(String),

    #[error("Invalid date range: {0}")]
    InvalidDates(String),

    #[error("No historical data for {symbol} between {start} and {end}")]
    NoData {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error(transparent)]
    Upstream(#[from] MarketDataError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for BacktestError {
    fn from(e: rusqlite::Error) -> Self {
        BacktestError::Database(e.to_string())
    }
}

/// Parameters of a single run.
#[derive(Debug, Clone)]
pub struct BacktestParams {
    pub algorithm_id: String,
    pub user_id: String,
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub interval: Interval,
}

/// In-flight status of a submitted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Failed(String),
}

/// Open position in the simulated ledger. At most one per run.
#[derive(Debug, Clone)]
struct SimPosition {
    quantity: i64,
    average_price: f64,
}

/// Backtest runner and status tracker.
#[derive(Clone)]
pub struct BacktestService {
    store: Arc<SqliteStore>,
    market: Arc<MarketDataService>,
    /// Runs not yet persisted, by backtest id.
    running: Arc<DashMap<String, RunState>>,
}

impl BacktestService {
    pub fn new(store: Arc<SqliteStore>, market: Arc<MarketDataService>) -> Self {
        Self {
            store,
            market,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Validate the request and start the simulation on a worker task.
    /// Returns the backtest id to poll.
    pub fn submit(&self, params: BacktestParams) -> Result<String, BacktestError> {
        self.validate(&params)?;

        let id = uuid::Uuid::new_v4().to_string();
        self.running.insert(id.clone(), RunState::Running);

        let service = self.clone();
        let run_id = id.clone();
        tokio::spawn(async move {
            match service.run(&run_id, &params).await {
                Ok(record) => {
                    service.running.remove(&run_id);
                    info!(
                        "Backtest {} completed: {} trades, {:.2}% return",
                        run_id, record.total_trades, record.total_return_percent
                    );
                }
                Err(e) => {
                    warn!("Backtest {} failed: {}", run_id, e);
                    service
                        .running
                        .insert(run_id.clone(), RunState::Failed(e.to_string()));
                }
            }
        });

        Ok(id)
    }

    /// In-flight status for a run not yet persisted.
    pub fn status(&self, id: &str) -> Option<RunState> {
        self.running.get(id).map(|s| s.clone())
    }

    fn validate(&self, params: &BacktestParams) -> Result<(), BacktestError> {
        if self
            .store
            .get_algorithm_for_user(&params.algorithm_id, &params.user_id)
            .is_none()
        {
            return Err(BacktestError::NotFound(params.algorithm_id.clone()));
        }
        if params.start_date >= params.end_date {
            return Err(BacktestError::InvalidDates(
                "start date must be before end date".to_string(),
            ));
        }
        if params.end_date > chrono::Utc::now().date_naive() {
            return Err(BacktestError::InvalidDates(
                "end date must not be in the future".to_string(),
            ));
        }
        if params.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidDates(
                "initial capital must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Run the full simulation and persist the record.
    pub async fn run(
        &self,
        id: &str,
        params: &BacktestParams,
    ) -> Result<BacktestRecord, BacktestError> {
        self.validate(params)?;
        let rules = self.store.list_rules(&params.algorithm_id);

        let span_days = (params.end_date - params.start_date).num_days();
        let range = Range::covering_days(span_days);
        let bars = self
            .market
            .get_historical(&params.symbol, range, params.interval)
            .await?;

        let start_ms = params
            .start_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(i64::MIN);
        let end_ms = params
            .end_date
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(i64::MAX);
        let bars: Vec<Bar> = bars
            .iter()
            .filter(|b| b.timestamp >= start_ms && b.timestamp <= end_ms)
            .cloned()
            .collect();

        if bars.is_empty() {
            return Err(BacktestError::NoData {
                symbol: params.symbol.clone(),
                start: params.start_date,
                end: params.end_date,
            });
        }

        let results = simulate(&params.symbol, &bars, &rules, params.initial_capital);
        let metrics = results.metrics.clone();

        let record = BacktestRecord {
            id: id.to_string(),
            algorithm_id: params.algorithm_id.clone(),
            user_id: params.user_id.clone(),
            symbol: params.symbol.to_uppercase(),
            start_date: params.start_date,
            end_date: params.end_date,
            initial_capital: params.initial_capital,
            final_capital: metrics.final_capital,
            total_return: metrics.total_return,
            total_return_percent: metrics.total_return_percent,
            total_trades: metrics.total_trades,
            winning_trades: metrics.winning_trades,
            losing_trades: metrics.losing_trades,
            win_rate: metrics.win_rate,
            max_drawdown: metrics.max_drawdown,
            sharpe_ratio: metrics.sharpe_ratio,
            results,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        self.store.create_backtest(&record)?;
        Ok(record)
    }
}

/// Replay the rules over the bars against an in-memory ledger.
///
/// Pure with respect to its inputs: identical bars and rules always
/// produce identical trades, equity curve, and metrics.
pub fn simulate(
    symbol: &str,
    bars: &[Bar],
    rules: &[Rule],
    initial_capital: f64,
) -> BacktestResults {
    let mut balance = initial_capital;
    let mut position: Option<SimPosition> = None;
    let mut trades: Vec<BacktestTrade> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());

    for i in 0..bars.len() {
        let bar = &bars[i];
        let close = bar.close;

        // Equity sample reflects the ledger before this bar's trades.
        let position_value = position
            .as_ref()
            .map(|p| p.quantity as f64 * close)
            .unwrap_or(0.0);
        equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            balance,
            position_value,
            total_value: balance + position_value,
        });

        let indicator_values = rolling_indicators(bars, i);
        let (change, change_percent) = if i > 0 {
            let prev = bars[i - 1].close;
            let change = close - prev;
            (change, if prev != 0.0 { change / prev * 100.0 } else { 0.0 })
        } else {
            (0.0, 0.0)
        };

        for rule in rules {
            let context = MarketContext {
                symbol: symbol.to_string(),
                price: close,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                volume: bar.volume,
                change,
                change_percent,
                balance,
                position: position.as_ref().map(|p| {
                    PositionSnapshot::from_position_values(p.quantity, p.average_price, close)
                }),
                indicators: indicator_values.clone(),
            };

            if !evaluator::evaluate(rule, &context) {
                continue;
            }

            let Some(intent) = executor::resolve_action(
                &rule.action,
                balance,
                close,
                position.as_ref().map(|p| p.quantity),
            ) else {
                continue;
            };

            let reason = format!(
                "{} rule: {} {} {}",
                rule.rule_type.as_str(),
                rule.condition_field,
                rule.condition_operator,
                rule.condition_value
            );

            match intent.side {
                OrderSide::Buy => {
                    // The simulated ledger holds at most one open position;
                    // a buy while one is open is ignored.
                    if position.is_some() {
                        debug!("Ignoring buy while position open at bar {}", i);
                        continue;
                    }
                    let cost = intent.quantity as f64 * close;
                    if cost > balance {
                        continue;
                    }
                    balance -= cost;
                    position = Some(open_or_average(position.take(), intent.quantity, close));
                    trades.push(BacktestTrade {
                        side: OrderSide::Buy,
                        timestamp: bar.timestamp,
                        price: close,
                        quantity: intent.quantity,
                        pl: None,
                        reason,
                    });
                }
                OrderSide::Sell => {
                    let Some(mut open) = position.take() else {
                        continue;
                    };
                    let quantity = intent.quantity.min(open.quantity);
                    let proceeds = quantity as f64 * close;
                    let pl = proceeds - quantity as f64 * open.average_price;
                    balance += proceeds;
                    open.quantity -= quantity;
                    position = if open.quantity > 0 { Some(open) } else { None };
                    trades.push(BacktestTrade {
                        side: OrderSide::Sell,
                        timestamp: bar.timestamp,
                        price: close,
                        quantity,
                        pl: Some(pl),
                        reason,
                    });
                }
            }
        }
    }

    // Anything still open is closed at the final bar.
    if let Some(open) = position.take() {
        let last = &bars[bars.len() - 1];
        let proceeds = open.quantity as f64 * last.close;
        balance += proceeds;
        trades.push(BacktestTrade {
            side: OrderSide::Sell,
            timestamp: last.timestamp,
            price: last.close,
            quantity: open.quantity,
            pl: Some(proceeds - open.quantity as f64 * open.average_price),
            reason: "End of backtest period".to_string(),
        });
    }

    let metrics = compute_metrics(initial_capital, balance, &trades, &equity_curve);
    BacktestResults {
        trades,
        equity_curve,
        metrics,
    }
}

/// Weighted-average entry. With the one-open-position rule this only ever
/// sees a fresh open, but the formula is kept for when that rule is
/// parameterized away.
fn open_or_average(existing: Option<SimPosition>, quantity: i64, price: f64) -> SimPosition {
    match existing {
        Some(p) => {
            let held = p.quantity as f64;
            let added = quantity as f64;
            SimPosition {
                quantity: p.quantity + quantity,
                average_price: (p.average_price * held + price * added) / (held + added),
            }
        }
        None => SimPosition {
            quantity,
            average_price: price,
        },
    }
}

/// Rolling indicators over the trailing window ending at bar `i`.
fn rolling_indicators(bars: &[Bar], i: usize) -> HashMap<String, f64> {
    let window_start = i.saturating_sub(50);
    let closes: Vec<f64> = bars[window_start..=i].iter().map(|b| b.close).collect();

    let mut values = HashMap::new();
    if let Some(v) = indicators::sma_last(&closes, 20) {
        values.insert("sma_20".to_string(), v);
    }
    if let Some(v) = indicators::sma_last(&closes, 50) {
        values.insert("sma_50".to_string(), v);
    }
    if let Some(v) = indicators::rsi_last(&closes, 14) {
        values.insert("rsi".to_string(), v);
    }
    values
}

fn compute_metrics(
    initial_capital: f64,
    final_capital: f64,
    trades: &[BacktestTrade],
    equity_curve: &[EquityPoint],
) -> BacktestMetrics {
    let total_return = final_capital - initial_capital;
    let total_return_percent = if initial_capital != 0.0 {
        total_return / initial_capital * 100.0
    } else {
        0.0
    };

    // Entries and exits pair up; the trade count counts exits.
    let pls: Vec<f64> = trades.iter().filter_map(|t| t.pl).collect();
    let total_trades = pls.len() as i64;
    let wins: Vec<f64> = pls.iter().copied().filter(|pl| *pl > 0.0).collect();
    let losses: Vec<f64> = pls.iter().copied().filter(|pl| *pl < 0.0).collect();
    let winning_trades = wins.len() as i64;
    let losing_trades = losses.len() as i64;

    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };
    let avg_win = if wins.is_empty() {
        0.0
    } else {
        wins.iter().sum::<f64>() / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        (losses.iter().sum::<f64>() / losses.len() as f64).abs()
    };
    let profit_factor = if avg_loss != 0.0 { avg_win / avg_loss } else { 0.0 };

    BacktestMetrics {
        final_capital,
        total_return,
        total_return_percent,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        avg_win,
        avg_loss,
        profit_factor,
        max_drawdown: max_drawdown(equity_curve),
        sharpe_ratio: sharpe_ratio(equity_curve),
    }
}

/// Largest percentage decline from a running peak of total value.
fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd: f64 = 0.0;
    for point in equity_curve {
        peak = peak.max(point.total_value);
        if peak > 0.0 {
            let dd = (peak - point.total_value) / peak;
            max_dd = max_dd.max(dd);
        }
    }
    max_dd * 100.0
}

/// Annualized Sharpe ratio over per-step simple returns of total value.
fn sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    let mut returns = Vec::with_capacity(equity_curve.len() - 1);
    for pair in equity_curve.windows(2) {
        if pair[0].total_value != 0.0 {
            returns.push((pair[1].total_value - pair[0].total_value) / pair[0].total_value);
        }
    }
    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    let stdev = variance.sqrt();
    if stdev == 0.0 {
        return 0.0;
    }

    (mean - RISK_FREE_PER_STEP) / stdev * ANNUALIZATION.sqrt()
}
