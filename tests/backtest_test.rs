//! Backtest engine tests
//!
//! Crafted-bar simulations with known crossover points, determinism of
//! repeated runs, metric edge cases, and the service-level validation and
//! persistence path.

use std::sync::Arc;
use std::time::Duration;

use vellum::services::{
    simulate, BacktestError, BacktestParams, BacktestService, MarketDataService, SqliteStore,
};
use vellum::sources::ChartClient;
use vellum::types::{Bar, ConditionOperator, Interval, OrderSide, Rule, RuleType};

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            timestamp: i as i64 * 86_400_000,
            open: c,
            high: c + 1.0,
            low: c - 1.0,
            close: c,
            volume: 1_000_000.0,
        })
        .collect()
}

fn rule(
    order_index: i64,
    rule_type: RuleType,
    field: &str,
    operator: ConditionOperator,
    value: &str,
    action: &str,
) -> Rule {
    Rule {
        id: format!("rule-{order_index}"),
        algorithm_id: "algo-1".into(),
        rule_type,
        condition_field: field.into(),
        condition_operator: operator,
        condition_value: value.into(),
        action: action.into(),
        order_index,
        created_at: 0,
    }
}

fn sma_crossover_rules() -> Vec<Rule> {
    vec![
        rule(
            0,
            RuleType::Entry,
            "price",
            ConditionOperator::GreaterThan,
            "sma_20",
            "buy:max",
        ),
        rule(
            1,
            RuleType::Exit,
            "price",
            ConditionOperator::LessThan,
            "sma_20",
            "sell:all",
        ),
    ]
}

/// 20 flat bars at 100, 10 at 110 (upward crossing), 10 at 90 (downward
/// crossing), then flat 90 to bar 60.
fn crossover_closes() -> Vec<f64> {
    let mut closes = vec![100.0; 20];
    closes.extend(std::iter::repeat(110.0).take(10));
    closes.extend(std::iter::repeat(90.0).take(30));
    closes
}

// =============================================================================
// Simulation
// =============================================================================

#[test]
fn test_sma_crossover_trades_once() {
    let bars = bars_from_closes(&crossover_closes());
    let results = simulate("AAPL", &bars, &sma_crossover_rules(), 100_000.0);

    assert_eq!(results.equity_curve.len(), 60);
    assert_eq!(results.trades.len(), 2);

    // Entry at the first bar where price (110) exceeds the 20-bar average.
    let buy = &results.trades[0];
    assert_eq!(buy.side, OrderSide::Buy);
    assert_eq!(buy.price, 110.0);
    assert_eq!(buy.quantity, 909); // floor(100000 / 110)

    // Exit on the drop to 90.
    let sell = &results.trades[1];
    assert_eq!(sell.side, OrderSide::Sell);
    assert_eq!(sell.price, 90.0);
    assert_eq!(sell.quantity, 909);
    assert!((sell.pl.unwrap() - 909.0 * (90.0 - 110.0)).abs() < 1e-9);

    let metrics = &results.metrics;
    assert_eq!(metrics.total_trades, 1); // exits only
    assert_eq!(metrics.winning_trades, 0);
    assert_eq!(metrics.losing_trades, 1);
    assert_eq!(metrics.win_rate, 0.0);
    assert!(metrics.max_drawdown > 0.0);
    assert!(metrics.total_return < 0.0);
    assert!(
        (metrics.final_capital - (100_000.0 - 909.0 * 20.0)).abs() < 1e-6,
        "final capital should reflect the realized loss"
    );
}

#[test]
fn test_open_position_closed_at_end_of_period() {
    let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
    let rules = vec![rule(
        0,
        RuleType::Entry,
        "price",
        ConditionOperator::GreaterThan,
        "0",
        "buy:10",
    )];
    let results = simulate("AAPL", &bars_from_closes(&closes), &rules, 100_000.0);

    // One buy on the first bar; later buys are ignored while the position
    // is open; the run closes it synthetically on the final bar.
    assert_eq!(results.trades.len(), 2);
    assert_eq!(results.trades[0].side, OrderSide::Buy);
    assert_eq!(results.trades[0].price, 100.0);

    let close = &results.trades[1];
    assert_eq!(close.side, OrderSide::Sell);
    assert_eq!(close.reason, "End of backtest period");
    assert_eq!(close.price, 129.0);
    assert!((close.pl.unwrap() - 10.0 * 29.0).abs() < 1e-9);

    assert_eq!(results.metrics.total_trades, 1);
    assert_eq!(results.metrics.winning_trades, 1);
    assert_eq!(results.metrics.win_rate, 100.0);
    assert!(results.metrics.sharpe_ratio > 0.0);
}

#[test]
fn test_buy_ignored_while_position_open() {
    let closes = vec![100.0; 10];
    let rules = vec![rule(
        0,
        RuleType::Entry,
        "price",
        ConditionOperator::GreaterThanOrEqual,
        "100",
        "buy:1",
    )];
    let results = simulate("AAPL", &bars_from_closes(&closes), &rules, 100_000.0);

    let buys = results
        .trades
        .iter()
        .filter(|t| t.side == OrderSide::Buy)
        .count();
    assert_eq!(buys, 1);
}

#[test]
fn test_later_rule_sees_earlier_fill_same_bar() {
    // Rule 0 buys, rule 1 sells what rule 0 just bought, on the same bar.
    let rules = vec![
        rule(
            0,
            RuleType::Entry,
            "price",
            ConditionOperator::GreaterThan,
            "0",
            "buy:10",
        ),
        rule(
            1,
            RuleType::Exit,
            "position.quantity",
            ConditionOperator::GreaterThan,
            "5",
            "sell:all",
        ),
    ];
    let results = simulate("AAPL", &bars_from_closes(&[150.0, 150.0]), &rules, 100_000.0);

    assert_eq!(results.trades.len(), 4); // buy+sell per bar
    assert_eq!(results.trades[0].side, OrderSide::Buy);
    assert_eq!(results.trades[1].side, OrderSide::Sell);
    assert_eq!(results.trades[0].timestamp, results.trades[1].timestamp);
    // Flat fills at the same price: capital unchanged.
    assert!((results.metrics.final_capital - 100_000.0).abs() < 1e-9);
}

#[test]
fn test_simulation_is_deterministic() {
    let bars = bars_from_closes(&crossover_closes());
    let rules = sma_crossover_rules();

    let first = simulate("AAPL", &bars, &rules, 100_000.0);
    let second = simulate("AAPL", &bars, &rules, 100_000.0);

    assert_eq!(first.trades, second.trades);
    assert_eq!(first.equity_curve, second.equity_curve);
    assert_eq!(first.metrics, second.metrics);
}

#[test]
fn test_equity_curve_samples_before_trades() {
    let rules = vec![rule(
        0,
        RuleType::Entry,
        "price",
        ConditionOperator::GreaterThan,
        "0",
        "buy:max",
    )];
    let results = simulate("AAPL", &bars_from_closes(&[100.0, 100.0]), &rules, 100_000.0);

    // The first sample reflects the ledger before the first bar's buy.
    assert_eq!(results.equity_curve[0].balance, 100_000.0);
    assert_eq!(results.equity_curve[0].position_value, 0.0);
    assert_eq!(results.equity_curve[1].position_value, 100_000.0);
}

// =============================================================================
// Service
// =============================================================================

fn service_setup() -> (Arc<SqliteStore>, Arc<BacktestService>) {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store
        .ensure_user("user-1", "user@example.com", "user")
        .unwrap();

    let mut algorithm = vellum::types::Algorithm::new(
        "user-1".into(),
        "Momentum".into(),
        "Buys whatever is going up".into(),
    );
    algorithm.id = "algo-1".into();
    store.create_algorithm(&algorithm).unwrap();
    store
        .create_rule(&rule(
            0,
            RuleType::Entry,
            "price",
            ConditionOperator::GreaterThan,
            "0",
            "buy:10",
        ))
        .unwrap();

    // Unreachable upstream plus development fallback: deterministic
    // synthetic bars.
    let client = ChartClient::new(
        "http://127.0.0.1:9/unreachable".into(),
        Duration::from_millis(200),
    );
    let market = Arc::new(MarketDataService::new(client, true));
    let backtester = Arc::new(BacktestService::new(store.clone(), market));
    (store, backtester)
}

fn params(start_days_ago: i64, end_days_ago: i64) -> BacktestParams {
    let today = chrono::Utc::now().date_naive();
    BacktestParams {
        algorithm_id: "algo-1".into(),
        user_id: "user-1".into(),
        symbol: "AAPL".into(),
        start_date: today - chrono::Duration::days(start_days_ago),
        end_date: today - chrono::Duration::days(end_days_ago),
        initial_capital: 100_000.0,
        interval: Interval::OneDay,
    }
}

#[tokio::test]
async fn test_run_persists_record() {
    let (store, backtester) = service_setup();

    let record = backtester.run("bt-1", &params(40, 1)).await.unwrap();
    assert!(!record.results.equity_curve.is_empty());
    assert!(record.max_drawdown >= 0.0);
    assert_eq!(record.initial_capital, 100_000.0);

    let loaded = store.get_backtest("bt-1", "user-1").unwrap();
    assert_eq!(loaded.total_trades, record.total_trades);
    assert_eq!(loaded.results.trades, record.results.trades);
    assert_eq!(
        store.list_backtests_for_algorithm("algo-1").len(),
        1
    );
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let (_store, backtester) = service_setup();

    let first = backtester.run("bt-1", &params(40, 1)).await.unwrap();
    let second = backtester.run("bt-2", &params(40, 1)).await.unwrap();

    assert_eq!(first.results.metrics, second.results.metrics);
    assert_eq!(first.results.trades, second.results.trades);
    assert_eq!(first.results.equity_curve, second.results.equity_curve);
}

#[tokio::test]
async fn test_zero_bars_is_upstream_class_error() {
    let (_store, backtester) = service_setup();

    // Ten years ago: the fetched range cannot contain the window.
    let result = backtester.run("bt-1", &params(3700, 3660)).await;
    assert!(matches!(result, Err(BacktestError::NoData { .. })));
}

#[tokio::test]
async fn test_submit_validations() {
    let (_store, backtester) = service_setup();

    let mut bad = params(10, 20); // start after end
    assert!(matches!(
        backtester.submit(bad.clone()),
        Err(BacktestError::InvalidDates(_))
    ));

    bad = params(10, 1);
    bad.end_date = chrono::Utc::now().date_naive() + chrono::Duration::days(5);
    assert!(matches!(
        backtester.submit(bad),
        Err(BacktestError::InvalidDates(_))
    ));

    let mut unknown = params(10, 1);
    unknown.algorithm_id = "missing".into();
    assert!(matches!(
        backtester.submit(unknown),
        Err(BacktestError::NotFound(_))
    ));

    let mut broke = params(10, 1);
    broke.initial_capital = 0.0;
    assert!(matches!(
        backtester.submit(broke),
        Err(BacktestError::InvalidDates(_))
    ));
}
