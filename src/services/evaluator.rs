//! Rule Evaluator
//!
//! Pure evaluation of a single rule against a market context snapshot.
//! Failures to resolve a field or parse a value make the rule evaluate to
//! false; evaluation never errors out to the caller.

use crate::types::{Position, Quote, Rule};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use tracing::debug;

/// Float view of a position for rule evaluation.
#[derive(Debug, Clone, Default)]
pub struct PositionSnapshot {
    pub quantity: f64,
    pub average_price: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_percent: f64,
}

impl PositionSnapshot {
    pub fn from_position(position: &Position, current_price: f64) -> Self {
        Self::from_position_values(
            position.quantity,
            position.average_price.to_f64().unwrap_or(0.0),
            current_price,
        )
    }

    pub fn from_position_values(quantity: i64, average_price: f64, current_price: f64) -> Self {
        let quantity = quantity as f64;
        let unrealized_pl = (current_price - average_price) * quantity;
        let cost = average_price * quantity;
        Self {
            quantity,
            average_price,
            unrealized_pl,
            unrealized_pl_percent: if cost > 0.0 {
                unrealized_pl / cost * 100.0
            } else {
                0.0
            },
        }
    }
}

/// Everything a rule can reference at evaluation time.
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub symbol: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub change: f64,
    pub change_percent: f64,
    pub balance: f64,
    pub position: Option<PositionSnapshot>,
    /// Computed indicators by key: `rsi`, `sma_20`, `sma_50`, ...
    pub indicators: HashMap<String, f64>,
}

impl MarketContext {
    pub fn from_quote(quote: &Quote, balance: f64) -> Self {
        Self {
            symbol: quote.symbol.clone(),
            price: quote.price,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            volume: quote.volume,
            change: quote.change,
            change_percent: quote.change_percent,
            balance,
            position: None,
            indicators: HashMap::new(),
        }
    }

    /// Resolve a condition field to its current value.
    pub fn resolve_field(&self, field: &str) -> Option<f64> {
        if let Some(position_field) = field.strip_prefix("position.") {
            let position = self.position.as_ref()?;
            return match position_field {
                "quantity" => Some(position.quantity),
                "averagePrice" => Some(position.average_price),
                "unrealizedPL" => Some(position.unrealized_pl),
                "unrealizedPLPercent" => Some(position.unrealized_pl_percent),
                _ => None,
            };
        }

        match field {
            "price" => Some(self.price),
            "open" => Some(self.open),
            "high" => Some(self.high),
            "low" => Some(self.low),
            "volume" => Some(self.volume),
            "change" => Some(self.change),
            "change_percent" | "changePercent" => Some(self.change_percent),
            "balance" => Some(self.balance),
            _ => self.indicators.get(field).copied(),
        }
    }
}

/// Evaluate one rule against the context. Returns whether the rule fires.
///
/// A rule referencing `position.*` never fires without a position. The
/// condition value is a decimal literal, or the name of another field
/// (resolving to 0 when that field is absent).
pub fn evaluate(rule: &Rule, context: &MarketContext) -> bool {
    let field_value = match context.resolve_field(&rule.condition_field) {
        Some(v) if v.is_finite() => v,
        _ => {
            debug!(
                "Rule {} did not fire: field {} unavailable",
                rule.id, rule.condition_field
            );
            return false;
        }
    };

    let compare_value = match rule.condition_value.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => context
            .resolve_field(&rule.condition_value)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0),
    };

    rule.condition_operator.apply(field_value, compare_value)
}
