//! Ledger Types
//!
//! Accounts, positions, orders, and the append-only transaction journal.
//! All cash amounts are fixed-point decimals rounded to cents; market-data
//! values stay as floats and are converted at the bookkeeping boundary.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Starting cash balance for a freshly created paper account.
pub fn default_starting_balance() -> Decimal {
    Decimal::new(10_000_000, 2) // 100,000.00
}

/// Convert a float market price to ledger money, rounded to cents.
///
/// Returns `None` for non-finite inputs.
pub fn to_money(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(2))
}

// =============================================================================
// Enums
// =============================================================================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type. Limit orders are accepted but filled immediately at the last
/// known price, same as market orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "market" => Some(OrderType::Market),
            "limit" => Some(OrderType::Limit),
            _ => None,
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Journal entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Buy,
    Sell,
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "buy",
            TransactionType::Sell => "sell",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(TransactionType::Buy),
            "sell" => Some(TransactionType::Sell),
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" => Some(TransactionType::Withdrawal),
            _ => None,
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A platform user. Provisioned lazily from verified token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub created_at: i64,
}

/// Virtual cash account, one per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    /// Available cash.
    pub balance: Decimal,
    /// Balance the account started with; only reset restores it.
    pub initial_balance: Decimal,
    /// balance + sum of position market values, refreshed on revaluation.
    pub total_value: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Account {
    pub fn new(user_id: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let starting = default_starting_balance();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            balance: starting,
            initial_balance: starting,
            total_value: starting,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Long holding of a symbol in an account. Unique per (account, symbol);
/// a row only exists while quantity > 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub quantity: i64,
    /// Weighted-average cost basis. Buys reweight it; sells never touch it.
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pl: Decimal,
    pub unrealized_pl_percent: Decimal,
    pub updated_at: i64,
}

impl Position {
    pub fn new(account_id: String, symbol: String, quantity: i64, price: Decimal) -> Self {
        let mut position = Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id,
            symbol,
            quantity,
            average_price: price,
            current_price: price,
            market_value: Decimal::ZERO,
            unrealized_pl: Decimal::ZERO,
            unrealized_pl_percent: Decimal::ZERO,
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        position.revalue(price);
        position
    }

    /// Refresh the derived valuation fields against a current price.
    pub fn revalue(&mut self, price: Decimal) {
        let quantity = Decimal::from(self.quantity);
        self.current_price = price;
        self.market_value = (price * quantity).round_dp(2);
        self.unrealized_pl = ((price - self.average_price) * quantity).round_dp(2);
        let cost = self.average_price * quantity;
        self.unrealized_pl_percent = if cost > Decimal::ZERO {
            (self.unrealized_pl / cost * Decimal::ONE_HUNDRED).round_dp(4)
        } else {
            Decimal::ZERO
        };
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

/// An order against the ledger. Paper orders are created pending and filled
/// in the same unit of work; there is no pending queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    /// Fill price.
    pub price: Decimal,
    pub status: OrderStatus,
    pub algorithm_id: Option<String>,
    pub created_at: i64,
    /// Set exactly when status is filled.
    pub filled_at: Option<i64>,
}

impl Order {
    /// Create an order already filled at the given price.
    pub fn filled(
        account_id: String,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        quantity: i64,
        price: Decimal,
        algorithm_id: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id,
            symbol,
            side,
            order_type,
            quantity,
            price,
            status: OrderStatus::Filled,
            algorithm_id,
            created_at: now,
            filled_at: Some(now),
        }
    }
}

/// Append-only journal entry. `amount` is signed: negative debits cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    /// Account balance immediately after this entry was applied.
    pub balance_after: Decimal,
    pub symbol: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<Decimal>,
    pub order_id: Option<String>,
    pub description: String,
    pub created_at: i64,
}

/// Aggregate view of an account and its holdings.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    pub account: Account,
    pub positions: Vec<Position>,
    pub total_market_value: Decimal,
    pub total_unrealized_pl: Decimal,
    pub total_return_percent: Decimal,
}
