//! Live execution engine tests
//!
//! Registry claim semantics (in-memory and lease-backed), start/stop
//! lifecycle and validation failures, and in-tick rule ordering against
//! the ledger.

use std::sync::Arc;
use std::time::Duration;

use vellum::services::{
    Bookkeeper, EngineError, ExecutionEngine, InMemoryRegistry, LeaseRegistry, MarketDataService,
    RunningRegistry, SqliteStore,
};
use vellum::sources::ChartClient;
use vellum::types::{Algorithm, ConditionOperator, OrderSide, Rule, RuleType};

fn add_algorithm(store: &SqliteStore, id: &str, user_id: &str, active: bool) {
    let mut algorithm = Algorithm::new(user_id.into(), format!("Algo {id}"), String::new());
    algorithm.id = id.into();
    algorithm.is_active = active;
    store.create_algorithm(&algorithm).unwrap();
}

fn add_rule(
    store: &SqliteStore,
    algorithm_id: &str,
    order_index: i64,
    field: &str,
    operator: ConditionOperator,
    value: &str,
    action: &str,
) {
    store
        .create_rule(&Rule {
            id: format!("{algorithm_id}-rule-{order_index}"),
            algorithm_id: algorithm_id.into(),
            rule_type: RuleType::Condition,
            condition_field: field.into(),
            condition_operator: operator,
            condition_value: value.into(),
            action: action.into(),
            order_index,
            created_at: 0,
        })
        .unwrap();
}

fn engine_setup() -> (Arc<SqliteStore>, Arc<ExecutionEngine>) {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store
        .ensure_user("user-1", "user@example.com", "user")
        .unwrap();

    let client = ChartClient::new(
        "http://127.0.0.1:9/unreachable".into(),
        Duration::from_millis(200),
    );
    let market = Arc::new(MarketDataService::new(client, true));
    let bookkeeper = Arc::new(Bookkeeper::new(store.clone()));
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        bookkeeper,
        market,
        Arc::new(InMemoryRegistry::new()),
        Duration::from_secs(60),
        "SPY".into(),
    ));
    (store, engine)
}

// =============================================================================
// Registries
// =============================================================================

#[test]
fn test_in_memory_registry_claim_cycle() {
    let registry = InMemoryRegistry::new();
    let symbols = vec!["AAPL".to_string()];

    assert!(registry.claim("algo-1", "user-1", &symbols));
    assert!(!registry.claim("algo-1", "user-2", &symbols));
    assert!(registry.contains("algo-1"));
    assert_eq!(registry.running(), vec!["algo-1".to_string()]);

    registry.release("algo-1");
    assert!(!registry.contains("algo-1"));
    assert!(registry.claim("algo-1", "user-1", &symbols));

    registry.heartbeat("algo-1");
    assert!(registry.last_check("algo-1").is_some());
    assert!(registry.last_check("algo-2").is_none());
}

#[test]
fn test_lease_registry_excludes_other_owner() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store
        .ensure_user("user-1", "user@example.com", "user")
        .unwrap();
    add_algorithm(&store, "algo-1", "user-1", true);

    let replica_a = LeaseRegistry::new(store.clone(), Duration::from_secs(300));
    let replica_b = LeaseRegistry::new(store.clone(), Duration::from_secs(300));
    let symbols = vec!["AAPL".to_string()];

    assert!(replica_a.claim("algo-1", "user-1", &symbols));
    assert!(!replica_b.claim("algo-1", "user-1", &symbols));
    assert!(replica_b.contains("algo-1"));

    replica_a.release("algo-1");
    assert!(replica_b.claim("algo-1", "user-1", &symbols));
}

#[test]
fn test_lease_registry_reclaims_stale_lease() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store
        .ensure_user("user-1", "user@example.com", "user")
        .unwrap();
    add_algorithm(&store, "algo-1", "user-1", true);

    let dead = LeaseRegistry::new(store.clone(), Duration::from_millis(1));
    let live = LeaseRegistry::new(store.clone(), Duration::from_millis(1));
    let symbols = vec!["AAPL".to_string()];

    assert!(dead.claim("algo-1", "user-1", &symbols));
    std::thread::sleep(Duration::from_millis(20));
    // The first owner never heartbeat; its lease is stale and reclaimable.
    assert!(live.claim("algo-1", "user-1", &symbols));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_validations() {
    let (store, engine) = engine_setup();

    assert!(matches!(
        engine.start("missing", "user-1", vec![]),
        Err(EngineError::NotFound(_))
    ));

    add_algorithm(&store, "inactive", "user-1", false);
    add_rule(
        &store,
        "inactive",
        0,
        "price",
        ConditionOperator::LessThan,
        "0",
        "buy:1",
    );
    assert!(matches!(
        engine.start("inactive", "user-1", vec![]),
        Err(EngineError::NotActive(_))
    ));

    add_algorithm(&store, "bare", "user-1", true);
    assert!(matches!(
        engine.start("bare", "user-1", vec![]),
        Err(EngineError::NoRules(_))
    ));

    // Owned by someone else looks like not-found.
    store
        .ensure_user("user-2", "other@example.com", "other")
        .unwrap();
    add_algorithm(&store, "foreign", "user-2", true);
    assert!(matches!(
        engine.start("foreign", "user-1", vec![]),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_start_stop_start_round_trip() {
    let (store, engine) = engine_setup();
    add_algorithm(&store, "algo-1", "user-1", true);
    // A rule that never fires keeps the ticks inert.
    add_rule(
        &store,
        "algo-1",
        0,
        "price",
        ConditionOperator::LessThan,
        "0",
        "buy:1",
    );

    engine.start("algo-1", "user-1", vec!["AAPL".into()]).unwrap();
    assert!(engine.is_running("algo-1"));
    assert!(matches!(
        engine.start("algo-1", "user-1", vec!["AAPL".into()]),
        Err(EngineError::AlreadyRunning(_))
    ));

    engine.stop("algo-1").await;
    assert!(!engine.is_running("algo-1"));
    assert!(engine.running().is_empty());

    // Stop is idempotent.
    engine.stop("algo-1").await;

    engine.start("algo-1", "user-1", vec!["AAPL".into()]).unwrap();
    assert_eq!(engine.running(), vec!["algo-1".to_string()]);

    engine.shutdown().await;
    assert!(engine.running().is_empty());
}

// =============================================================================
// Evaluation
// =============================================================================

#[tokio::test]
async fn test_rules_fire_in_order_within_one_tick() {
    let (store, engine) = engine_setup();
    add_algorithm(&store, "algo-1", "user-1", true);
    add_rule(
        &store,
        "algo-1",
        0,
        "price",
        ConditionOperator::GreaterThan,
        "0",
        "buy:10",
    );
    add_rule(
        &store,
        "algo-1",
        1,
        "position.quantity",
        ConditionOperator::GreaterThan,
        "5",
        "sell:all",
    );

    engine
        .evaluate_once("algo-1", "user-1", &["AAPL".to_string()])
        .await;

    let account = store.get_account_by_user("user-1").unwrap();
    // Both fills happened at the same quoted price, so the cash round-trips.
    assert_eq!(account.balance, account.initial_balance);
    assert!(store.get_position(&account.id, "AAPL").is_none());

    let orders = store.list_orders(&account.id, 10);
    assert_eq!(orders.len(), 2);
    // Newest first: the sell produced by rule 1 follows the buy from rule 0.
    assert_eq!(orders[0].side, OrderSide::Sell);
    assert_eq!(orders[0].quantity, 10);
    assert_eq!(orders[1].side, OrderSide::Buy);
    assert_eq!(orders[1].quantity, 10);
    assert_eq!(orders[0].algorithm_id.as_deref(), Some("algo-1"));
}

#[tokio::test]
async fn test_position_rule_does_not_fire_without_position() {
    let (store, engine) = engine_setup();
    add_algorithm(&store, "algo-1", "user-1", true);
    add_rule(
        &store,
        "algo-1",
        0,
        "position.quantity",
        ConditionOperator::GreaterThanOrEqual,
        "0",
        "sell:all",
    );

    engine
        .evaluate_once("algo-1", "user-1", &["AAPL".to_string()])
        .await;

    let account = store.get_account_by_user("user-1").unwrap();
    assert!(store.list_orders(&account.id, 10).is_empty());
    assert_eq!(account.balance, account.initial_balance);
}

#[tokio::test]
async fn test_infeasible_fill_is_swallowed() {
    let (store, engine) = engine_setup();
    add_algorithm(&store, "algo-1", "user-1", true);
    // A fixed buy far beyond the account's cash: rejected by the
    // bookkeeper, logged, and the tick carries on.
    add_rule(
        &store,
        "algo-1",
        0,
        "price",
        ConditionOperator::GreaterThan,
        "0",
        "buy:100000000",
    );

    engine
        .evaluate_once("algo-1", "user-1", &["AAPL".to_string()])
        .await;

    let account = store.get_account_by_user("user-1").unwrap();
    assert_eq!(account.balance, account.initial_balance);
    assert!(store.list_orders(&account.id, 10).is_empty());
}
