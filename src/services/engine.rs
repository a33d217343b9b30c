//! Live Execution Engine
//!
//! Runs one periodic task per started algorithm. Each tick fetches quotes
//! for the configured symbols, evaluates the algorithm's rules in order,
//! and submits resulting order intents to the bookkeeper. Errors inside a
//! tick are logged and swallowed; a panic is caught so the task keeps
//! ticking.
//!
//! Which algorithms are running is tracked behind the [`RunningRegistry`]
//! abstraction: the in-memory implementation serves single-process
//! deployments, and the lease-backed implementation coordinates replicas
//! through the ledger database.

use crate::services::bookkeeper::Bookkeeper;
use crate::services::evaluator::{self, MarketContext, PositionSnapshot};
use crate::services::executor;
use crate::services::market_data::MarketDataService;
use crate::services::store::SqliteStore;
use crate::services::indicators;
use crate::types::{Interval, OrderSide, OrderType, Range};
use dashmap::DashMap;
use futures_util::FutureExt;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Algorithm is already running: {0}")]
    AlreadyRunning(String),

    #[error("Algorithm not found: {0}")]
    NotFound(String),

    #[error("Algorithm is not active: {0}")]
    NotActive(String),

    #[error("Algorithm has no rules: {0}")]
    NoRules(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

// =============================================================================
// Running-algorithm registry
// =============================================================================

/// Tracks which algorithms are currently running.
///
/// `claim` must be atomic: exactly one caller wins for a given algorithm.
pub trait RunningRegistry: Send + Sync {
    /// Claim the algorithm. Returns false when another owner holds it.
    fn claim(&self, algorithm_id: &str, user_id: &str, symbols: &[String]) -> bool;
    /// Release the claim. Idempotent.
    fn release(&self, algorithm_id: &str);
    /// Refresh liveness after a completed tick.
    fn heartbeat(&self, algorithm_id: &str);
    fn contains(&self, algorithm_id: &str) -> bool;
    /// Identifiers of all currently running algorithms.
    fn running(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    #[allow(dead_code)]
    user_id: String,
    #[allow(dead_code)]
    symbols: Vec<String>,
    last_check: i64,
}

/// Process-local registry for single-instance deployments.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the algorithm's tick last completed, if it is running here.
    pub fn last_check(&self, algorithm_id: &str) -> Option<i64> {
        self.entries.get(algorithm_id).map(|e| e.last_check)
    }
}

impl RunningRegistry for InMemoryRegistry {
    fn claim(&self, algorithm_id: &str, user_id: &str, symbols: &[String]) -> bool {
        match self.entries.entry(algorithm_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(RegistryEntry {
                    user_id: user_id.to_string(),
                    symbols: symbols.to_vec(),
                    last_check: chrono::Utc::now().timestamp_millis(),
                });
                true
            }
        }
    }

    fn release(&self, algorithm_id: &str) {
        self.entries.remove(algorithm_id);
    }

    fn heartbeat(&self, algorithm_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(algorithm_id) {
            entry.last_check = chrono::Utc::now().timestamp_millis();
        }
    }

    fn contains(&self, algorithm_id: &str) -> bool {
        self.entries.contains_key(algorithm_id)
    }

    fn running(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

/// Database-lease registry for horizontally scaled deployments.
///
/// Each process claims rows in `algorithm_leases` under its own owner id
/// and refreshes a heartbeat every tick; leases whose heartbeat is older
/// than the liveness window are treated as abandoned and reclaimable.
pub struct LeaseRegistry {
    store: Arc<SqliteStore>,
    owner: String,
    liveness: Duration,
}

impl LeaseRegistry {
    pub fn new(store: Arc<SqliteStore>, liveness: Duration) -> Self {
        Self {
            store,
            owner: uuid::Uuid::new_v4().to_string(),
            liveness,
        }
    }

    fn stale_before(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.liveness.as_millis() as i64
    }
}

impl RunningRegistry for LeaseRegistry {
    fn claim(&self, algorithm_id: &str, user_id: &str, symbols: &[String]) -> bool {
        let symbols_json =
            serde_json::to_string(symbols).unwrap_or_else(|_| "[]".to_string());
        self.store
            .claim_lease(
                algorithm_id,
                &self.owner,
                user_id,
                &symbols_json,
                chrono::Utc::now().timestamp_millis(),
                self.stale_before(),
            )
            .unwrap_or(false)
    }

    fn release(&self, algorithm_id: &str) {
        if let Err(e) = self.store.release_lease(algorithm_id, &self.owner) {
            warn!("Failed to release lease for {}: {}", algorithm_id, e);
        }
    }

    fn heartbeat(&self, algorithm_id: &str) {
        let now = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.store.heartbeat_lease(algorithm_id, &self.owner, now) {
            warn!("Failed to heartbeat lease for {}: {}", algorithm_id, e);
        }
    }

    fn contains(&self, algorithm_id: &str) -> bool {
        self.running().iter().any(|id| id == algorithm_id)
    }

    fn running(&self) -> Vec<String> {
        self.store.list_leases(self.stale_before())
    }
}

// =============================================================================
// Engine
// =============================================================================

struct RunningTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

#[derive(Clone)]
struct TaskContext {
    algorithm_id: String,
    user_id: String,
    symbols: Vec<String>,
}

/// Per-algorithm live execution.
#[derive(Clone)]
pub struct ExecutionEngine {
    store: Arc<SqliteStore>,
    bookkeeper: Arc<Bookkeeper>,
    market: Arc<MarketDataService>,
    registry: Arc<dyn RunningRegistry>,
    /// Process-local task handles. The mutex also serializes start/stop.
    tasks: Arc<Mutex<HashMap<String, RunningTask>>>,
    tick: Duration,
    default_symbol: String,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        bookkeeper: Arc<Bookkeeper>,
        market: Arc<MarketDataService>,
        registry: Arc<dyn RunningRegistry>,
        tick: Duration,
        default_symbol: String,
    ) -> Self {
        Self {
            store,
            bookkeeper,
            market,
            registry,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            tick,
            default_symbol,
        }
    }

    /// Start live execution of an algorithm.
    ///
    /// Validates ownership, active flag, and rule count, claims the
    /// registry slot, evaluates once immediately, then ticks on the
    /// configured period.
    pub fn start(
        &self,
        algorithm_id: &str,
        user_id: &str,
        symbols: Vec<String>,
    ) -> Result<(), EngineError> {
        let mut tasks = self.tasks.lock().unwrap();

        let algorithm = self
            .store
            .get_algorithm_for_user(algorithm_id, user_id)
            .ok_or_else(|| EngineError::NotFound(algorithm_id.to_string()))?;
        if !algorithm.is_active {
            return Err(EngineError::NotActive(algorithm_id.to_string()));
        }
        if self.store.list_rules(algorithm_id).is_empty() {
            return Err(EngineError::NoRules(algorithm_id.to_string()));
        }

        let symbols: Vec<String> = if symbols.is_empty() {
            vec![self.default_symbol.clone()]
        } else {
            symbols.iter().map(|s| s.to_uppercase()).collect()
        };

        if !self.registry.claim(algorithm_id, user_id, &symbols) {
            return Err(EngineError::AlreadyRunning(algorithm_id.to_string()));
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = self.clone();
        let ctx = TaskContext {
            algorithm_id: algorithm_id.to_string(),
            user_id: user_id.to_string(),
            symbols,
        };

        let handle = tokio::spawn(async move {
            // The first tick fires immediately.
            let mut ticker = interval(engine.tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tick = AssertUnwindSafe(engine.evaluate_once(
                            &ctx.algorithm_id,
                            &ctx.user_id,
                            &ctx.symbols,
                        ))
                        .catch_unwind();
                        if let Err(panic) = tick.await {
                            error!(
                                "Tick panicked for algorithm {}: {:?}",
                                ctx.algorithm_id, panic
                            );
                        }
                        engine.registry.heartbeat(&ctx.algorithm_id);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Execution task for {} exited", ctx.algorithm_id);
        });

        tasks.insert(
            algorithm_id.to_string(),
            RunningTask {
                handle,
                shutdown: shutdown_tx,
            },
        );

        info!(
            "Started live execution for algorithm {} (user {})",
            algorithm_id, user_id
        );
        Ok(())
    }

    /// Stop an algorithm's recurring task. Idempotent. An in-flight
    /// evaluation is allowed to finish.
    pub async fn stop(&self, algorithm_id: &str) {
        let task = self.tasks.lock().unwrap().remove(algorithm_id);

        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if tokio::time::timeout(Duration::from_secs(10), task.handle)
                .await
                .is_err()
            {
                warn!("Execution task for {} did not drain in time", algorithm_id);
            }
            info!("Stopped live execution for algorithm {}", algorithm_id);
        }

        self.registry.release(algorithm_id);
    }

    /// Identifiers of currently running algorithms.
    pub fn running(&self) -> Vec<String> {
        self.registry.running()
    }

    pub fn is_running(&self, algorithm_id: &str) -> bool {
        self.registry.contains(algorithm_id)
    }

    /// Stop every running task, draining in-flight evaluations.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.tasks.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Run one evaluation pass for an algorithm over its symbols.
    ///
    /// Rules fire in ascending order_index order; each firing observes the
    /// ledger state produced by earlier firings in the same pass. All
    /// errors are logged and swallowed.
    pub async fn evaluate_once(&self, algorithm_id: &str, user_id: &str, symbols: &[String]) {
        let account = match self.store.get_or_create_account(user_id) {
            Ok(account) => account,
            Err(e) => {
                warn!("Skipping tick for {}: account load failed: {}", algorithm_id, e);
                return;
            }
        };

        let rules = self.store.list_rules(algorithm_id);
        if rules.is_empty() {
            return;
        }

        let quotes = self.market.get_multiple_quotes(symbols).await;

        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            let Some(quote) = quotes.get(&symbol) else {
                debug!("No quote for {} this tick", symbol);
                continue;
            };

            let indicator_values = self.live_indicators(&symbol).await;

            for rule in &rules {
                // Reload balance and position so this rule sees the fills
                // of earlier rules in the same pass.
                let Some(fresh) = self.store.get_account_by_user(user_id) else {
                    break;
                };
                let position = self.store.get_position(&account.id, &symbol);

                let mut context =
                    MarketContext::from_quote(quote, fresh.balance.to_f64().unwrap_or(0.0));
                context.indicators = indicator_values.clone();
                context.position = position
                    .as_ref()
                    .map(|p| PositionSnapshot::from_position(p, quote.price));

                if !evaluator::evaluate(rule, &context) {
                    continue;
                }
                debug!(
                    "Rule {} fired for {} on {}",
                    rule.id, algorithm_id, symbol
                );

                let Some(intent) = executor::resolve_action(
                    &rule.action,
                    context.balance,
                    quote.price,
                    position.as_ref().map(|p| p.quantity),
                ) else {
                    continue;
                };

                let filled = match intent.side {
                    OrderSide::Buy => self.bookkeeper.apply_buy(
                        &account.id,
                        &symbol,
                        intent.quantity,
                        quote.price,
                        OrderType::Market,
                        Some(algorithm_id.to_string()),
                    ),
                    OrderSide::Sell => self.bookkeeper.apply_sell(
                        &account.id,
                        &symbol,
                        intent.quantity,
                        quote.price,
                        OrderType::Market,
                        Some(algorithm_id.to_string()),
                    ),
                };

                if let Err(e) = filled {
                    warn!(
                        "Fill rejected for algorithm {} on {}: {}",
                        algorithm_id, symbol, e
                    );
                }
            }
        }

        self.registry.heartbeat(algorithm_id);
    }

    /// Compute live indicator values from recent daily bars. Missing
    /// history or a failed fetch just leaves the fields absent.
    async fn live_indicators(&self, symbol: &str) -> HashMap<String, f64> {
        let mut values = HashMap::new();
        match self
            .market
            .get_historical(symbol, Range::ThreeMonths, Interval::OneDay)
            .await
        {
            Ok(bars) => {
                let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
                if let Some(v) = indicators::sma_last(&closes, 20) {
                    values.insert("sma_20".to_string(), v);
                }
                if let Some(v) = indicators::sma_last(&closes, 50) {
                    values.insert("sma_50".to_string(), v);
                }
                if let Some(v) = indicators::rsi_last(&closes, 14) {
                    values.insert("rsi".to_string(), v);
                }
            }
            Err(e) => debug!("No indicator history for {}: {}", symbol, e),
        }
        values
    }
}
