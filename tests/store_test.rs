//! Ledger store tests
//!
//! Schema-level behavior: rule cascade on algorithm delete, the unique
//! (account, symbol) position key, transactional rollback, and the
//! backtest results blob round-trip.

use std::sync::Arc;

use rust_decimal_macros::dec;
use vellum::services::store::{ops, SqliteStore};
use vellum::types::{
    Algorithm, BacktestMetrics, BacktestRecord, BacktestResults, BacktestTrade, ConditionOperator,
    EquityPoint, OrderSide, Position, Rule, RuleType,
};

fn store_with_user() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store
        .ensure_user("user-1", "user@example.com", "user")
        .unwrap();
    store
}

fn add_algorithm(store: &SqliteStore, id: &str) {
    let mut algorithm = Algorithm::new("user-1".into(), format!("Algo {id}"), String::new());
    algorithm.id = id.into();
    store.create_algorithm(&algorithm).unwrap();
}

fn add_rule(store: &SqliteStore, algorithm_id: &str, order_index: i64) {
    store
        .create_rule(&Rule {
            id: format!("{algorithm_id}-rule-{order_index}"),
            algorithm_id: algorithm_id.into(),
            rule_type: RuleType::Entry,
            condition_field: "price".into(),
            condition_operator: ConditionOperator::GreaterThan,
            condition_value: "100".into(),
            action: "buy:1".into(),
            order_index,
            created_at: order_index,
        })
        .unwrap();
}

// =============================================================================
// Algorithms & Rules
// =============================================================================

#[test]
fn test_algorithm_delete_cascades_rules() {
    let store = store_with_user();
    add_algorithm(&store, "algo-1");
    add_rule(&store, "algo-1", 0);
    add_rule(&store, "algo-1", 1);
    assert_eq!(store.list_rules("algo-1").len(), 2);

    store.delete_algorithm("algo-1").unwrap();
    assert!(store.list_rules("algo-1").is_empty());
    assert!(store.get_algorithm_for_user("algo-1", "user-1").is_none());
}

#[test]
fn test_rules_listed_in_evaluation_order() {
    let store = store_with_user();
    add_algorithm(&store, "algo-1");
    add_rule(&store, "algo-1", 5);
    add_rule(&store, "algo-1", 1);
    add_rule(&store, "algo-1", 3);

    let order: Vec<i64> = store
        .list_rules("algo-1")
        .iter()
        .map(|r| r.order_index)
        .collect();
    assert_eq!(order, vec![1, 3, 5]);
    assert_eq!(store.next_rule_order_index("algo-1"), 6);
}

#[test]
fn test_algorithm_ownership_scoping() {
    let store = store_with_user();
    store
        .ensure_user("user-2", "other@example.com", "other")
        .unwrap();
    add_algorithm(&store, "algo-1");

    assert!(store.get_algorithm_for_user("algo-1", "user-1").is_some());
    assert!(store.get_algorithm_for_user("algo-1", "user-2").is_none());
}

// =============================================================================
// Positions & Transactions
// =============================================================================

#[test]
fn test_position_upsert_replaces_by_account_and_symbol() {
    let store = store_with_user();
    let account = store.get_or_create_account("user-1").unwrap();

    store
        .transaction::<_, rusqlite::Error>(|tx| {
            let first = Position::new(account.id.clone(), "AAPL".into(), 10, dec!(150.00));
            ops::upsert_position(tx, &first)?;
            let second = Position::new(account.id.clone(), "AAPL".into(), 25, dec!(155.00));
            ops::upsert_position(tx, &second)?;
            Ok(())
        })
        .unwrap();

    let positions = store.list_positions(&account.id);
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, 25);
    assert_eq!(positions[0].average_price, dec!(155.00));
}

#[test]
fn test_transaction_closure_rolls_back_on_error() {
    let store = store_with_user();
    let account = store.get_or_create_account("user-1").unwrap();

    #[derive(Debug)]
    struct Abort;
    impl From<rusqlite::Error> for Abort {
        fn from(_: rusqlite::Error) -> Self {
            Abort
        }
    }

    let result: Result<(), Abort> = store.transaction(|tx| {
        let position = Position::new(account.id.clone(), "AAPL".into(), 10, dec!(150.00));
        ops::upsert_position(tx, &position)?;
        Err(Abort)
    });
    assert!(result.is_err());

    // The position insert was rolled back with the failure.
    assert!(store.list_positions(&account.id).is_empty());
}

// =============================================================================
// Backtests
// =============================================================================

#[test]
fn test_backtest_record_round_trip() {
    let store = store_with_user();
    add_algorithm(&store, "algo-1");

    let results = BacktestResults {
        trades: vec![BacktestTrade {
            side: OrderSide::Sell,
            timestamp: 86_400_000,
            price: 110.0,
            quantity: 9,
            pl: Some(90.0),
            reason: "End of backtest period".into(),
        }],
        equity_curve: vec![EquityPoint {
            timestamp: 0,
            balance: 100_000.0,
            position_value: 0.0,
            total_value: 100_000.0,
        }],
        metrics: BacktestMetrics {
            final_capital: 100_090.0,
            total_return: 90.0,
            total_return_percent: 0.09,
            total_trades: 1,
            winning_trades: 1,
            losing_trades: 0,
            win_rate: 100.0,
            avg_win: 90.0,
            avg_loss: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            sharpe_ratio: 1.2,
        },
    };
    let record = BacktestRecord {
        id: "bt-1".into(),
        algorithm_id: "algo-1".into(),
        user_id: "user-1".into(),
        symbol: "AAPL".into(),
        start_date: "2025-01-02".parse().unwrap(),
        end_date: "2025-03-01".parse().unwrap(),
        initial_capital: 100_000.0,
        final_capital: 100_090.0,
        total_return: 90.0,
        total_return_percent: 0.09,
        total_trades: 1,
        winning_trades: 1,
        losing_trades: 0,
        win_rate: 100.0,
        max_drawdown: 0.0,
        sharpe_ratio: 1.2,
        results,
        created_at: 42,
    };

    store.create_backtest(&record).unwrap();

    let loaded = store.get_backtest("bt-1", "user-1").unwrap();
    assert_eq!(loaded.symbol, "AAPL");
    assert_eq!(loaded.start_date, record.start_date);
    assert_eq!(loaded.results.trades, record.results.trades);
    assert_eq!(loaded.results.metrics, record.results.metrics);

    // Scoped to the owning user.
    assert!(store.get_backtest("bt-1", "user-2").is_none());
    assert_eq!(store.list_backtests_for_algorithm("algo-1").len(), 1);
}
