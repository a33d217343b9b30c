//! SQLite ledger store.
//!
//! Persists users, accounts, positions, orders, the transaction journal,
//! algorithms, rules, and backtest records. Money columns are stored as
//! decimal text and parsed back into `rust_decimal::Decimal`.
//!
//! Multi-step fills must go through [`SqliteStore::transaction`] so that a
//! failure anywhere rolls back every effect; the per-statement helpers in
//! [`ops`] accept any `&Connection` (a `Transaction` derefs to one) for use
//! inside and outside that closure.

use crate::types::{
    Account, Algorithm, BacktestRecord, BacktestResults, ConditionOperator, Order, OrderSide,
    OrderStatus, OrderType, Position, Rule, RuleType, Transaction, TransactionType, User,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// SQLite-backed ledger store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the ledger database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Ledger store initialized");
        Ok(store)
    }

    /// Create an in-memory ledger store (for testing).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory ledger store initialized");
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watchlist (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                symbol TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(user_id, symbol)
            );

            CREATE TABLE IF NOT EXISTS trading_algorithms (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS algorithm_rules (
                id TEXT PRIMARY KEY,
                algorithm_id TEXT NOT NULL
                    REFERENCES trading_algorithms(id) ON DELETE CASCADE,
                rule_type TEXT NOT NULL,
                condition_field TEXT NOT NULL,
                condition_operator TEXT NOT NULL,
                condition_value TEXT NOT NULL,
                action TEXT NOT NULL,
                order_index INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_algorithm
                ON algorithm_rules(algorithm_id, order_index);

            CREATE TABLE IF NOT EXISTS paper_accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT UNIQUE NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                balance TEXT NOT NULL,
                initial_balance TEXT NOT NULL,
                total_value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES paper_accounts(id) ON DELETE CASCADE,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL,
                status TEXT NOT NULL,
                algorithm_id TEXT REFERENCES trading_algorithms(id) ON DELETE SET NULL,
                created_at INTEGER NOT NULL,
                filled_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_orders_account
                ON orders(account_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES paper_accounts(id) ON DELETE CASCADE,
                symbol TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                average_price TEXT NOT NULL,
                current_price TEXT NOT NULL,
                market_value TEXT NOT NULL,
                unrealized_pl TEXT NOT NULL,
                unrealized_pl_percent TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(account_id, symbol)
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES paper_accounts(id) ON DELETE CASCADE,
                tx_type TEXT NOT NULL,
                amount TEXT NOT NULL,
                balance_after TEXT NOT NULL,
                symbol TEXT,
                quantity INTEGER,
                price TEXT,
                order_id TEXT,
                description TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_account
                ON transactions(account_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS backtests (
                id TEXT PRIMARY KEY,
                algorithm_id TEXT NOT NULL
                    REFERENCES trading_algorithms(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                initial_capital REAL NOT NULL,
                final_capital REAL NOT NULL,
                total_return REAL NOT NULL,
                total_return_percent REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                winning_trades INTEGER NOT NULL,
                losing_trades INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                max_drawdown REAL NOT NULL,
                sharpe_ratio REAL NOT NULL,
                results_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_backtests_algorithm
                ON backtests(algorithm_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS algorithm_leases (
                algorithm_id TEXT PRIMARY KEY
                    REFERENCES trading_algorithms(id) ON DELETE CASCADE,
                owner TEXT NOT NULL,
                user_id TEXT NOT NULL,
                symbols_json TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                heartbeat_at INTEGER NOT NULL
            );",
        )?;

        info!("Ledger schema initialized");
        Ok(())
    }

    /// Run a closure inside a single SQLite transaction.
    ///
    /// The transaction commits when the closure returns `Ok` and rolls back
    /// on `Err` (or panic). The error type only needs a `rusqlite::Error`
    /// conversion so callers can thread their own domain errors through.
    pub fn transaction<T, E>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(E::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(E::from)?;
        Ok(out)
    }

    // ========== Users ==========

    /// Insert a user row if it does not exist yet.
    pub fn ensure_user(
        &self,
        id: &str,
        email: &str,
        display_name: &str,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO users (id, email, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, email, display_name, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, email, display_name, created_at FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    display_name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()
        .ok()
        .flatten()
    }

    // ========== Accounts ==========

    /// Get the user's paper account, creating it with the default balance on
    /// first access.
    pub fn get_or_create_account(&self, user_id: &str) -> Result<Account, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        if let Some(account) = ops::get_account_by_user(&conn, user_id)? {
            return Ok(account);
        }

        let account = Account::new(user_id.to_string());
        conn.execute(
            "INSERT INTO paper_accounts
                 (id, user_id, balance, initial_balance, total_value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account.id,
                account.user_id,
                account.balance.to_string(),
                account.initial_balance.to_string(),
                account.total_value.to_string(),
                account.created_at,
                account.updated_at,
            ],
        )?;
        info!("Created paper account {} for user {}", account.id, user_id);
        Ok(account)
    }

    pub fn get_account_by_user(&self, user_id: &str) -> Option<Account> {
        let conn = self.conn.lock().unwrap();
        ops::get_account_by_user(&conn, user_id).ok().flatten()
    }

    // ========== Positions ==========

    pub fn list_positions(&self, account_id: &str) -> Vec<Position> {
        let conn = self.conn.lock().unwrap();
        ops::list_positions(&conn, account_id).unwrap_or_default()
    }

    pub fn get_position(&self, account_id: &str, symbol: &str) -> Option<Position> {
        let conn = self.conn.lock().unwrap();
        ops::get_position(&conn, account_id, symbol).ok().flatten()
    }

    // ========== Orders & Transactions ==========

    pub fn list_orders(&self, account_id: &str, limit: usize) -> Vec<Order> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT id, account_id, symbol, side, order_type, quantity, price, status,
                    algorithm_id, created_at, filled_at
             FROM orders WHERE account_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![account_id, limit as i64], row_to_order)
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    pub fn list_transactions(&self, account_id: &str, limit: usize) -> Vec<Transaction> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT id, account_id, tx_type, amount, balance_after, symbol, quantity,
                    price, order_id, description, created_at
             FROM transactions WHERE account_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![account_id, limit as i64], row_to_transaction)
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    /// Transactions for an account in journal (creation) order.
    pub fn list_transactions_chronological(&self, account_id: &str) -> Vec<Transaction> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT id, account_id, tx_type, amount, balance_after, symbol, quantity,
                    price, order_id, description, created_at
             FROM transactions WHERE account_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![account_id], row_to_transaction)
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    // ========== Algorithms ==========

    pub fn create_algorithm(&self, algorithm: &Algorithm) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trading_algorithms
                 (id, user_id, name, description, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                algorithm.id,
                algorithm.user_id,
                algorithm.name,
                algorithm.description,
                algorithm.is_active,
                algorithm.created_at,
                algorithm.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get an algorithm only if it belongs to the given user.
    pub fn get_algorithm_for_user(&self, id: &str, user_id: &str) -> Option<Algorithm> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, name, description, is_active, created_at, updated_at
             FROM trading_algorithms WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            row_to_algorithm,
        )
        .optional()
        .ok()
        .flatten()
    }

    pub fn list_algorithms(&self, user_id: &str) -> Vec<Algorithm> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT id, user_id, name, description, is_active, created_at, updated_at
             FROM trading_algorithms WHERE user_id = ?1 ORDER BY created_at ASC",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![user_id], row_to_algorithm)
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    pub fn update_algorithm(&self, algorithm: &Algorithm) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE trading_algorithms
             SET name = ?2, description = ?3, is_active = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                algorithm.id,
                algorithm.name,
                algorithm.description,
                algorithm.is_active,
                algorithm.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Delete an algorithm; its rules cascade.
    pub fn delete_algorithm(&self, id: &str) -> Result<usize, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM trading_algorithms WHERE id = ?1", params![id])
    }

    // ========== Rules ==========

    pub fn create_rule(&self, rule: &Rule) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO algorithm_rules
                 (id, algorithm_id, rule_type, condition_field, condition_operator,
                  condition_value, action, order_index, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                rule.id,
                rule.algorithm_id,
                rule.rule_type.as_str(),
                rule.condition_field,
                rule.condition_operator.as_str(),
                rule.condition_value,
                rule.action,
                rule.order_index,
                rule.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_rule(&self, algorithm_id: &str, rule_id: &str) -> Option<Rule> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, algorithm_id, rule_type, condition_field, condition_operator,
                    condition_value, action, order_index, created_at
             FROM algorithm_rules WHERE id = ?1 AND algorithm_id = ?2",
            params![rule_id, algorithm_id],
            row_to_rule,
        )
        .optional()
        .ok()
        .flatten()
    }

    /// Rules for an algorithm, ascending by evaluation order.
    pub fn list_rules(&self, algorithm_id: &str) -> Vec<Rule> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT id, algorithm_id, rule_type, condition_field, condition_operator,
                    condition_value, action, order_index, created_at
             FROM algorithm_rules WHERE algorithm_id = ?1
             ORDER BY order_index ASC, created_at ASC",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![algorithm_id], row_to_rule)
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    pub fn next_rule_order_index(&self, algorithm_id: &str) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM algorithm_rules
             WHERE algorithm_id = ?1",
            params![algorithm_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    pub fn update_rule(&self, rule: &Rule) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE algorithm_rules
             SET rule_type = ?2, condition_field = ?3, condition_operator = ?4,
                 condition_value = ?5, action = ?6, order_index = ?7
             WHERE id = ?1",
            params![
                rule.id,
                rule.rule_type.as_str(),
                rule.condition_field,
                rule.condition_operator.as_str(),
                rule.condition_value,
                rule.action,
                rule.order_index,
            ],
        )?;
        Ok(())
    }

    pub fn delete_rule(&self, algorithm_id: &str, rule_id: &str) -> Result<usize, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM algorithm_rules WHERE id = ?1 AND algorithm_id = ?2",
            params![rule_id, algorithm_id],
        )
    }

    // ========== Backtests ==========

    pub fn create_backtest(&self, record: &BacktestRecord) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let results_json =
            serde_json::to_string(&record.results).unwrap_or_else(|_| "{}".to_string());
        conn.execute(
            "INSERT INTO backtests
                 (id, algorithm_id, user_id, symbol, start_date, end_date,
                  initial_capital, final_capital, total_return, total_return_percent,
                  total_trades, winning_trades, losing_trades, win_rate,
                  max_drawdown, sharpe_ratio, results_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18)",
            params![
                record.id,
                record.algorithm_id,
                record.user_id,
                record.symbol,
                record.start_date.to_string(),
                record.end_date.to_string(),
                record.initial_capital,
                record.final_capital,
                record.total_return,
                record.total_return_percent,
                record.total_trades,
                record.winning_trades,
                record.losing_trades,
                record.win_rate,
                record.max_drawdown,
                record.sharpe_ratio,
                results_json,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_backtest(&self, id: &str, user_id: &str) -> Option<BacktestRecord> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{BACKTEST_SELECT} WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            row_to_backtest,
        )
        .optional()
        .ok()
        .flatten()
    }

    pub fn list_backtests_for_algorithm(&self, algorithm_id: &str) -> Vec<BacktestRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&format!(
            "{BACKTEST_SELECT} WHERE algorithm_id = ?1 ORDER BY created_at DESC"
        )) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![algorithm_id], row_to_backtest)
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    // ========== Algorithm leases ==========

    /// Claim a lease on an algorithm for the given owner.
    ///
    /// Succeeds when no lease exists or the existing lease's heartbeat is
    /// older than `stale_before`. Returns false when another live owner
    /// holds the lease.
    pub fn claim_lease(
        &self,
        algorithm_id: &str,
        owner: &str,
        user_id: &str,
        symbols_json: &str,
        now: i64,
        stale_before: i64,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM algorithm_leases WHERE algorithm_id = ?1 AND heartbeat_at < ?2",
            params![algorithm_id, stale_before],
        )?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO algorithm_leases
                 (algorithm_id, owner, user_id, symbols_json, started_at, heartbeat_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![algorithm_id, owner, user_id, symbols_json, now],
        )?;
        Ok(inserted > 0)
    }

    pub fn release_lease(&self, algorithm_id: &str, owner: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM algorithm_leases WHERE algorithm_id = ?1 AND owner = ?2",
            params![algorithm_id, owner],
        )?;
        Ok(())
    }

    pub fn heartbeat_lease(
        &self,
        algorithm_id: &str,
        owner: &str,
        now: i64,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE algorithm_leases SET heartbeat_at = ?3
             WHERE algorithm_id = ?1 AND owner = ?2",
            params![algorithm_id, owner, now],
        )?;
        Ok(())
    }

    /// Algorithm ids with a live lease (heartbeat at or after `live_since`).
    pub fn list_leases(&self, live_since: i64) -> Vec<String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn
            .prepare("SELECT algorithm_id FROM algorithm_leases WHERE heartbeat_at >= ?1")
        {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![live_since], |row| row.get(0))
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }
}

const BACKTEST_SELECT: &str = "SELECT id, algorithm_id, user_id, symbol, start_date, end_date,
        initial_capital, final_capital, total_return, total_return_percent,
        total_trades, winning_trades, losing_trades, win_rate,
        max_drawdown, sharpe_ratio, results_json, created_at
 FROM backtests";

// =============================================================================
// Per-statement helpers, usable inside a transaction
// =============================================================================

/// Statement-level operations shared by the store methods and the
/// bookkeeper's transactional fills. All take a plain `&Connection`;
/// `rusqlite::Transaction` derefs to one.
pub mod ops {
    use super::*;

    pub fn get_account_by_user(
        conn: &Connection,
        user_id: &str,
    ) -> Result<Option<Account>, rusqlite::Error> {
        conn.query_row(
            "SELECT id, user_id, balance, initial_balance, total_value, created_at, updated_at
             FROM paper_accounts WHERE user_id = ?1",
            params![user_id],
            row_to_account,
        )
        .optional()
    }

    pub fn get_account(
        conn: &Connection,
        account_id: &str,
    ) -> Result<Option<Account>, rusqlite::Error> {
        conn.query_row(
            "SELECT id, user_id, balance, initial_balance, total_value, created_at, updated_at
             FROM paper_accounts WHERE id = ?1",
            params![account_id],
            row_to_account,
        )
        .optional()
    }

    pub fn update_account(conn: &Connection, account: &Account) -> Result<(), rusqlite::Error> {
        conn.execute(
            "UPDATE paper_accounts
             SET balance = ?2, total_value = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                account.id,
                account.balance.to_string(),
                account.total_value.to_string(),
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_position(
        conn: &Connection,
        account_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, rusqlite::Error> {
        conn.query_row(
            "SELECT id, account_id, symbol, quantity, average_price, current_price,
                    market_value, unrealized_pl, unrealized_pl_percent, updated_at
             FROM positions WHERE account_id = ?1 AND symbol = ?2",
            params![account_id, symbol],
            row_to_position,
        )
        .optional()
    }

    pub fn list_positions(
        conn: &Connection,
        account_id: &str,
    ) -> Result<Vec<Position>, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT id, account_id, symbol, quantity, average_price, current_price,
                    market_value, unrealized_pl, unrealized_pl_percent, updated_at
             FROM positions WHERE account_id = ?1 ORDER BY symbol ASC",
        )?;
        let rows = stmt.query_map(params![account_id], row_to_position)?;
        rows.collect()
    }

    /// Insert or replace a position row, keyed by (account, symbol).
    pub fn upsert_position(conn: &Connection, position: &Position) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO positions
                 (id, account_id, symbol, quantity, average_price, current_price,
                  market_value, unrealized_pl, unrealized_pl_percent, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(account_id, symbol) DO UPDATE SET
                quantity = excluded.quantity,
                average_price = excluded.average_price,
                current_price = excluded.current_price,
                market_value = excluded.market_value,
                unrealized_pl = excluded.unrealized_pl,
                unrealized_pl_percent = excluded.unrealized_pl_percent,
                updated_at = excluded.updated_at",
            params![
                position.id,
                position.account_id,
                position.symbol,
                position.quantity,
                position.average_price.to_string(),
                position.current_price.to_string(),
                position.market_value.to_string(),
                position.unrealized_pl.to_string(),
                position.unrealized_pl_percent.to_string(),
                position.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_position(
        conn: &Connection,
        account_id: &str,
        symbol: &str,
    ) -> Result<(), rusqlite::Error> {
        conn.execute(
            "DELETE FROM positions WHERE account_id = ?1 AND symbol = ?2",
            params![account_id, symbol],
        )?;
        Ok(())
    }

    pub fn delete_all_positions(
        conn: &Connection,
        account_id: &str,
    ) -> Result<(), rusqlite::Error> {
        conn.execute(
            "DELETE FROM positions WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    }

    pub fn insert_order(conn: &Connection, order: &Order) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO orders
                 (id, account_id, symbol, side, order_type, quantity, price, status,
                  algorithm_id, created_at, filled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                order.id,
                order.account_id,
                order.symbol,
                order.side.as_str(),
                order.order_type.as_str(),
                order.quantity,
                order.price.to_string(),
                order.status.as_str(),
                order.algorithm_id,
                order.created_at,
                order.filled_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_transaction(
        conn: &Connection,
        transaction: &Transaction,
    ) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO transactions
                 (id, account_id, tx_type, amount, balance_after, symbol, quantity,
                  price, order_id, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                transaction.id,
                transaction.account_id,
                transaction.tx_type.as_str(),
                transaction.amount.to_string(),
                transaction.balance_after.to_string(),
                transaction.symbol,
                transaction.quantity,
                transaction.price.as_ref().map(|p| p.to_string()),
                transaction.order_id,
                transaction.description,
                transaction.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_all_transactions(
        conn: &Connection,
        account_id: &str,
    ) -> Result<(), rusqlite::Error> {
        conn.execute(
            "DELETE FROM transactions WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn decimal_column(row: &Row<'_>, idx: usize) -> Result<Decimal, rusqlite::Error> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn invalid_enum(idx: usize, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized value: {value}").into(),
    )
}

fn row_to_account(row: &Row<'_>) -> Result<Account, rusqlite::Error> {
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        balance: decimal_column(row, 2)?,
        initial_balance: decimal_column(row, 3)?,
        total_value: decimal_column(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_position(row: &Row<'_>) -> Result<Position, rusqlite::Error> {
    Ok(Position {
        id: row.get(0)?,
        account_id: row.get(1)?,
        symbol: row.get(2)?,
        quantity: row.get(3)?,
        average_price: decimal_column(row, 4)?,
        current_price: decimal_column(row, 5)?,
        market_value: decimal_column(row, 6)?,
        unrealized_pl: decimal_column(row, 7)?,
        unrealized_pl_percent: decimal_column(row, 8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_order(row: &Row<'_>) -> Result<Order, rusqlite::Error> {
    let side: String = row.get(3)?;
    let order_type: String = row.get(4)?;
    let status: String = row.get(7)?;
    Ok(Order {
        id: row.get(0)?,
        account_id: row.get(1)?,
        symbol: row.get(2)?,
        side: OrderSide::parse(&side).ok_or_else(|| invalid_enum(3, side))?,
        order_type: OrderType::parse(&order_type).ok_or_else(|| invalid_enum(4, order_type))?,
        quantity: row.get(5)?,
        price: decimal_column(row, 6)?,
        status: OrderStatus::parse(&status).ok_or_else(|| invalid_enum(7, status))?,
        algorithm_id: row.get(8)?,
        created_at: row.get(9)?,
        filled_at: row.get(10)?,
    })
}

fn row_to_transaction(row: &Row<'_>) -> Result<Transaction, rusqlite::Error> {
    let tx_type: String = row.get(2)?;
    let price: Option<String> = row.get(7)?;
    let price = match price {
        Some(text) => Some(text.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?),
        None => None,
    };
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        tx_type: TransactionType::parse(&tx_type).ok_or_else(|| invalid_enum(2, tx_type))?,
        amount: decimal_column(row, 3)?,
        balance_after: decimal_column(row, 4)?,
        symbol: row.get(5)?,
        quantity: row.get(6)?,
        price,
        order_id: row.get(8)?,
        description: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn row_to_algorithm(row: &Row<'_>) -> Result<Algorithm, rusqlite::Error> {
    Ok(Algorithm {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_rule(row: &Row<'_>) -> Result<Rule, rusqlite::Error> {
    let rule_type: String = row.get(2)?;
    let operator: String = row.get(4)?;
    Ok(Rule {
        id: row.get(0)?,
        algorithm_id: row.get(1)?,
        rule_type: RuleType::parse(&rule_type).ok_or_else(|| invalid_enum(2, rule_type))?,
        condition_field: row.get(3)?,
        condition_operator: ConditionOperator::parse(&operator)
            .ok_or_else(|| invalid_enum(4, operator))?,
        condition_value: row.get(5)?,
        action: row.get(6)?,
        order_index: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn row_to_backtest(row: &Row<'_>) -> Result<BacktestRecord, rusqlite::Error> {
    let start_date: String = row.get(4)?;
    let end_date: String = row.get(5)?;
    let results_json: String = row.get(16)?;
    let results: BacktestResults = serde_json::from_str(&results_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(16, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let parse_date = |idx: usize, text: &str| {
        text.parse().map_err(|_| invalid_enum(idx, text.to_string()))
    };
    Ok(BacktestRecord {
        id: row.get(0)?,
        algorithm_id: row.get(1)?,
        user_id: row.get(2)?,
        symbol: row.get(3)?,
        start_date: parse_date(4, &start_date)?,
        end_date: parse_date(5, &end_date)?,
        initial_capital: row.get(6)?,
        final_capital: row.get(7)?,
        total_return: row.get(8)?,
        total_return_percent: row.get(9)?,
        total_trades: row.get(10)?,
        winning_trades: row.get(11)?,
        losing_trades: row.get(12)?,
        win_rate: row.get(13)?,
        max_drawdown: row.get(14)?,
        sharpe_ratio: row.get(15)?,
        results,
        created_at: row.get(17)?,
    })
}
