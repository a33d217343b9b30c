//! Portfolio Bookkeeper
//!
//! Applies fills to the ledger: order record, cash movement, position
//! upsert with weighted-average cost, and one journal entry per fill. All
//! four effects run inside a single database transaction, and fills against
//! the same account are serialized by a per-account lock; different
//! accounts never contend on the same lock.

use crate::services::store::{ops, SqliteStore};
use crate::types::{
    to_money, Account, Order, OrderSide, OrderType, Position, Transaction, TransactionType,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Insufficient shares: requested {requested}, holding {held}")]
    InsufficientShares { requested: i64, held: i64 },

    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error("Not a usable price: {0}")]
    InvalidPrice(f64),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

/// Everything a completed fill produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FillOutcome {
    pub order: Order,
    pub transaction: Transaction,
    pub account: Account,
    /// The position after the fill; `None` when the fill closed it.
    pub position: Option<Position>,
}

/// Transactional bookkeeping over the ledger store.
pub struct Bookkeeper {
    store: Arc<SqliteStore>,
    /// Per-account fill serialization.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Bookkeeper {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Buy `quantity` shares at `price`, atomically.
    ///
    /// Preconditions: quantity > 0 and balance covers the cost. On a
    /// precondition violation nothing is written.
    pub fn apply_buy(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
        order_type: OrderType,
        algorithm_id: Option<String>,
    ) -> Result<FillOutcome, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        let price = to_money(price).ok_or(LedgerError::InvalidPrice(price))?;
        let symbol = symbol.to_uppercase();

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap();

        let outcome = self.store.transaction::<_, LedgerError>(|tx| {
            let mut account = ops::get_account(tx, account_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

            let cost = (price * Decimal::from(quantity)).round_dp(2);
            if account.balance < cost {
                return Err(LedgerError::InsufficientFunds {
                    needed: cost,
                    available: account.balance,
                });
            }

            let order = Order::filled(
                account.id.clone(),
                symbol.clone(),
                OrderSide::Buy,
                order_type,
                quantity,
                price,
                algorithm_id.clone(),
            );
            ops::insert_order(tx, &order)?;

            account.balance -= cost;

            let position = match ops::get_position(tx, &account.id, &symbol)? {
                Some(mut position) => {
                    let held = Decimal::from(position.quantity);
                    let added = Decimal::from(quantity);
                    position.average_price = ((position.average_price * held + price * added)
                        / (held + added))
                        .round_dp(2);
                    position.quantity += quantity;
                    position.revalue(price);
                    position
                }
                None => Position::new(account.id.clone(), symbol.clone(), quantity, price),
            };
            ops::upsert_position(tx, &position)?;

            account.total_value = account.balance + total_market_value(tx, &account.id)?;
            ops::update_account(tx, &account)?;

            let transaction = journal_entry(
                &account,
                TransactionType::Buy,
                -cost,
                &order,
                format!("Bought {} {} @ {}", quantity, symbol, price),
            );
            ops::insert_transaction(tx, &transaction)?;

            Ok(FillOutcome {
                order,
                transaction,
                account,
                position: Some(position),
            })
        })?;

        info!(
            "Filled buy of {} {} @ {} for account {}",
            quantity, symbol, price, account_id
        );
        Ok(outcome)
    }

    /// Sell `quantity` shares at `price`, atomically.
    ///
    /// Preconditions: a position in the symbol holding at least `quantity`.
    /// Selling the full quantity deletes the row; the average price never
    /// changes on a sell.
    pub fn apply_sell(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
        order_type: OrderType,
        algorithm_id: Option<String>,
    ) -> Result<FillOutcome, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        let price = to_money(price).ok_or(LedgerError::InvalidPrice(price))?;
        let symbol = symbol.to_uppercase();

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap();

        let outcome = self.store.transaction::<_, LedgerError>(|tx| {
            let mut account = ops::get_account(tx, account_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

            let mut position = ops::get_position(tx, &account.id, &symbol)?.ok_or(
                LedgerError::InsufficientShares {
                    requested: quantity,
                    held: 0,
                },
            )?;
            if position.quantity < quantity {
                return Err(LedgerError::InsufficientShares {
                    requested: quantity,
                    held: position.quantity,
                });
            }

            let order = Order::filled(
                account.id.clone(),
                symbol.clone(),
                OrderSide::Sell,
                order_type,
                quantity,
                price,
                algorithm_id.clone(),
            );
            ops::insert_order(tx, &order)?;

            let proceeds = (price * Decimal::from(quantity)).round_dp(2);
            account.balance += proceeds;

            position.quantity -= quantity;
            let remaining = if position.quantity == 0 {
                ops::delete_position(tx, &account.id, &symbol)?;
                None
            } else {
                position.revalue(price);
                ops::upsert_position(tx, &position)?;
                Some(position)
            };

            account.total_value = account.balance + total_market_value(tx, &account.id)?;
            ops::update_account(tx, &account)?;

            let transaction = journal_entry(
                &account,
                TransactionType::Sell,
                proceeds,
                &order,
                format!("Sold {} {} @ {}", quantity, symbol, price),
            );
            ops::insert_transaction(tx, &transaction)?;

            Ok(FillOutcome {
                order,
                transaction,
                account,
                position: remaining,
            })
        })?;

        info!(
            "Filled sell of {} {} @ {} for account {}",
            quantity, symbol, price, account_id
        );
        Ok(outcome)
    }

    /// Refresh position valuations from current prices and recompute the
    /// account's total value. Cash and quantities are untouched.
    pub fn recompute_market_values(
        &self,
        account_id: &str,
        prices: &HashMap<String, f64>,
    ) -> Result<Account, LedgerError> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap();

        self.store.transaction::<_, LedgerError>(|tx| {
            let mut account = ops::get_account(tx, account_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

            for mut position in ops::list_positions(tx, &account.id)? {
                if let Some(price) = prices.get(&position.symbol).and_then(|p| to_money(*p)) {
                    position.revalue(price);
                    ops::upsert_position(tx, &position)?;
                }
            }

            account.total_value = account.balance + total_market_value(tx, &account.id)?;
            ops::update_account(tx, &account)?;
            Ok(account)
        })
    }

    /// Wipe positions and the journal, restoring the initial balance.
    pub fn reset(&self, account_id: &str) -> Result<Account, LedgerError> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap();

        let account = self.store.transaction::<_, LedgerError>(|tx| {
            let mut account = ops::get_account(tx, account_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

            ops::delete_all_positions(tx, &account.id)?;
            ops::delete_all_transactions(tx, &account.id)?;
            account.balance = account.initial_balance;
            account.total_value = account.initial_balance;
            ops::update_account(tx, &account)?;
            Ok(account)
        })?;

        info!("Reset account {}", account_id);
        Ok(account)
    }
}

fn journal_entry(
    account: &Account,
    tx_type: TransactionType,
    amount: Decimal,
    order: &Order,
    description: String,
) -> Transaction {
    Transaction {
        id: uuid::Uuid::new_v4().to_string(),
        account_id: account.id.clone(),
        tx_type,
        amount,
        balance_after: account.balance,
        symbol: Some(order.symbol.clone()),
        quantity: Some(order.quantity),
        price: Some(order.price),
        order_id: Some(order.id.clone()),
        description,
        created_at: chrono::Utc::now().timestamp_millis(),
    }
}

fn total_market_value(
    conn: &rusqlite::Connection,
    account_id: &str,
) -> Result<Decimal, rusqlite::Error> {
    Ok(ops::list_positions(conn, account_id)?
        .iter()
        .map(|p| p.market_value)
        .sum())
}
