//! Core domain types.

pub mod algorithm;
pub mod backtest;
pub mod ledger;
pub mod market;

pub use algorithm::{
    Algorithm, AlgorithmWithRules, ConditionOperator, CreateAlgorithmRequest, CreateRuleRequest,
    Rule, RuleType, UpdateAlgorithmRequest, UpdateRuleRequest,
};
pub use backtest::{
    BacktestMetrics, BacktestRecord, BacktestResults, BacktestTrade, EquityPoint,
};
pub use ledger::{
    to_money, Account, Order, OrderSide, OrderStatus, OrderType, PortfolioView, Position,
    Transaction, TransactionType, User,
};
pub use market::{Bar, Interval, Quote, Range};
