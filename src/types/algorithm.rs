//! Algorithm Types
//!
//! User-authored trading algorithms and their ordered rules.

use serde::{Deserialize, Serialize};

/// Role of a rule within an algorithm. The engine treats all types the
/// same way at evaluation time; the type is descriptive metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Entry,
    Exit,
    StopLoss,
    TakeProfit,
    Condition,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Entry => "entry",
            RuleType::Exit => "exit",
            RuleType::StopLoss => "stop_loss",
            RuleType::TakeProfit => "take_profit",
            RuleType::Condition => "condition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(RuleType::Entry),
            "exit" => Some(RuleType::Exit),
            "stop_loss" => Some(RuleType::StopLoss),
            "take_profit" => Some(RuleType::TakeProfit),
            "condition" => Some(RuleType::Condition),
            _ => None,
        }
    }
}

/// Comparison operator applied between the resolved condition field and the
/// condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::GreaterThan => ">",
            ConditionOperator::LessThan => "<",
            ConditionOperator::GreaterThanOrEqual => ">=",
            ConditionOperator::LessThanOrEqual => "<=",
            ConditionOperator::Equal => "==",
            ConditionOperator::NotEqual => "!=",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(ConditionOperator::GreaterThan),
            "<" => Some(ConditionOperator::LessThan),
            ">=" => Some(ConditionOperator::GreaterThanOrEqual),
            "<=" => Some(ConditionOperator::LessThanOrEqual),
            "==" => Some(ConditionOperator::Equal),
            "!=" => Some(ConditionOperator::NotEqual),
            _ => None,
        }
    }

    /// Apply the operator. Equality is exact float comparison, as parsed.
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            ConditionOperator::GreaterThan => left > right,
            ConditionOperator::LessThan => left < right,
            ConditionOperator::GreaterThanOrEqual => left >= right,
            ConditionOperator::LessThanOrEqual => left <= right,
            ConditionOperator::Equal => left == right,
            ConditionOperator::NotEqual => left != right,
        }
    }
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A trading algorithm owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Algorithm {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Algorithm {
    pub fn new(user_id: String, name: String, description: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            name,
            description,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single condition/action rule. Rules are evaluated in ascending
/// `order_index` order; rules are cascade-deleted with their algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub algorithm_id: String,
    pub rule_type: RuleType,
    /// Field key resolved against the market context, e.g. `price`, `rsi`,
    /// `sma_20`, `position.quantity`, `balance`.
    pub condition_field: String,
    pub condition_operator: ConditionOperator,
    /// Decimal literal, or the name of another field to compare against.
    pub condition_value: String,
    /// `buy:<N|N%|max>` or `sell:<N|N%|all>`.
    pub action: String,
    pub order_index: i64,
    pub created_at: i64,
}

/// Algorithm together with its rules, as served by the detail endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmWithRules {
    #[serde(flatten)]
    pub algorithm: Algorithm,
    pub rules: Vec<Rule>,
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAlgorithmRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlgorithmRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub rule_type: RuleType,
    pub condition_field: String,
    pub condition_operator: ConditionOperator,
    pub condition_value: String,
    pub action: String,
    pub order_index: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    pub rule_type: Option<RuleType>,
    pub condition_field: Option<String>,
    pub condition_operator: Option<ConditionOperator>,
    pub condition_value: Option<String>,
    pub action: Option<String>,
    pub order_index: Option<i64>,
}
