//! Action Executor
//!
//! Turns a fired rule's action string into a concrete order intent. The
//! executor only decides side and quantity; the bookkeeper performs the
//! fill.
//!
//! Grammar: `<verb>:<qualifier>` with `buy:<N|N%|max>` and
//! `sell:<N|N%|all>`. Share counts always round down.

use crate::types::OrderSide;
use tracing::debug;

/// A sized order the engine intends to submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeIntent {
    pub side: OrderSide,
    pub quantity: i64,
}

/// Resolve an action string against the current balance, price, and held
/// quantity. Returns `None` for no-ops: zero-share buys, sells without a
/// position, and malformed actions.
pub fn resolve_action(
    action: &str,
    balance: f64,
    price: f64,
    position_quantity: Option<i64>,
) -> Option<TradeIntent> {
    let (verb, qualifier) = action.split_once(':')?;

    match verb {
        "buy" => {
            if price <= 0.0 {
                return None;
            }
            let quantity = match qualifier {
                "max" => (balance / price).floor() as i64,
                q if q.ends_with('%') => {
                    let percent: f64 = q.trim_end_matches('%').parse().ok()?;
                    (balance * percent / 100.0 / price).floor() as i64
                }
                q => q.parse::<f64>().ok()?.floor() as i64,
            };
            if quantity <= 0 {
                return None;
            }
            Some(TradeIntent {
                side: OrderSide::Buy,
                quantity,
            })
        }
        "sell" => {
            let held = match position_quantity {
                Some(held) if held > 0 => held,
                _ => return None,
            };
            let quantity = match qualifier {
                "all" => held,
                q if q.ends_with('%') => {
                    let percent: f64 = q.trim_end_matches('%').parse().ok()?;
                    (held as f64 * percent / 100.0).floor() as i64
                }
                q => {
                    let requested = q.parse::<f64>().ok()?.floor() as i64;
                    requested.min(held)
                }
            };
            if quantity <= 0 {
                return None;
            }
            Some(TradeIntent {
                side: OrderSide::Sell,
                quantity,
            })
        }
        other => {
            debug!("Ignoring action with unknown verb: {}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_fixed() {
        let intent = resolve_action("buy:10", 100_000.0, 150.0, None).unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.quantity, 10);
    }

    #[test]
    fn test_buy_fractional_count_floors() {
        let intent = resolve_action("buy:10.9", 100_000.0, 150.0, None).unwrap();
        assert_eq!(intent.quantity, 10);
    }

    #[test]
    fn test_buy_percent_of_balance() {
        // 25% of 10,000 = 2,500; at 100/share = 25 shares
        let intent = resolve_action("buy:25%", 10_000.0, 100.0, None).unwrap();
        assert_eq!(intent.quantity, 25);
    }

    #[test]
    fn test_buy_max() {
        let intent = resolve_action("buy:max", 1_000.0, 150.0, None).unwrap();
        assert_eq!(intent.quantity, 6);
    }

    #[test]
    fn test_buy_zero_shares_is_noop() {
        assert!(resolve_action("buy:max", 100.0, 150.0, None).is_none());
        assert!(resolve_action("buy:0", 100_000.0, 150.0, None).is_none());
    }

    #[test]
    fn test_sell_without_position_is_noop() {
        assert!(resolve_action("sell:all", 100_000.0, 150.0, None).is_none());
        assert!(resolve_action("sell:10", 100_000.0, 150.0, Some(0)).is_none());
    }

    #[test]
    fn test_sell_all() {
        let intent = resolve_action("sell:all", 0.0, 150.0, Some(42)).unwrap();
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.quantity, 42);
    }

    #[test]
    fn test_sell_clamped_to_held() {
        let intent = resolve_action("sell:100", 0.0, 150.0, Some(7)).unwrap();
        assert_eq!(intent.quantity, 7);
    }

    #[test]
    fn test_sell_percent_floors() {
        let intent = resolve_action("sell:50%", 0.0, 150.0, Some(7)).unwrap();
        assert_eq!(intent.quantity, 3);
    }

    #[test]
    fn test_malformed_actions() {
        assert!(resolve_action("hold:10", 1e5, 150.0, None).is_none());
        assert!(resolve_action("buy", 1e5, 150.0, None).is_none());
        assert!(resolve_action("buy:lots", 1e5, 150.0, None).is_none());
        assert!(resolve_action("sell:%", 1e5, 150.0, Some(10)).is_none());
    }
}
