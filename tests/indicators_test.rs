//! Indicator reference tests
//!
//! SMA, EMA, and RSI against hand-computed fixtures, including the
//! undefined prefixes before each indicator has enough history.

use vellum::services::indicators::{ema, indicator, rsi, sma, IndicatorKind};
use vellum::types::Bar;

const EPS: f64 = 1e-6;

fn close(expected: f64, actual: f64) {
    assert!(
        (expected - actual).abs() < EPS,
        "expected {expected}, got {actual}"
    );
}

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            timestamp: i as i64 * 86_400_000,
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 1000.0,
        })
        .collect()
}

// =============================================================================
// SMA
// =============================================================================

#[test]
fn test_sma_reference_values() {
    let closes = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
    let series = sma(&closes, 3);

    assert_eq!(series[0], None);
    assert_eq!(series[1], None);
    close(11.0, series[2].unwrap());
    close(12.0, series[3].unwrap());
    close(13.0, series[4].unwrap());
    close(14.0, series[5].unwrap());
}

#[test]
fn test_sma_period_equal_to_length() {
    let closes = [2.0, 4.0, 9.0];
    let series = sma(&closes, 3);
    close(5.0, series[2].unwrap());
}

// =============================================================================
// EMA
// =============================================================================

#[test]
fn test_ema_reference_values() {
    // period 3 => k = 0.5, seeded with sma([2,4,6]) = 4
    let closes = [2.0, 4.0, 6.0, 8.0, 10.0];
    let series = ema(&closes, 3);

    assert_eq!(series[1], None);
    close(4.0, series[2].unwrap());
    close(6.0, series[3].unwrap()); // (8-4)*0.5 + 4
    close(8.0, series[4].unwrap()); // (10-6)*0.5 + 6
}

#[test]
fn test_ema_seed_matches_sma() {
    let closes: Vec<f64> = (1..=30).map(|i| (i as f64).sin() * 10.0 + 100.0).collect();
    let ema_series = ema(&closes, 10);
    let sma_series = sma(&closes, 10);
    close(sma_series[9].unwrap(), ema_series[9].unwrap());
}

// =============================================================================
// RSI
// =============================================================================

#[test]
fn test_rsi_reference_values_wilder_smoothing() {
    // Alternating +1/-1 moves with period 2, traced by hand:
    //   deltas: +1, -1, +1, -1
    //   initial averages over first 2 deltas: gain 0.5, loss 0.5 -> RSI 50
    //   then Wilder smoothing:
    //     gain (0.5+1)/2 = 0.75, loss 0.25 -> RS 3 -> RSI 75
    //     gain 0.375, loss 0.625 -> RS 0.6 -> RSI 37.5
    let closes = [10.0, 11.0, 10.0, 11.0, 10.0];
    let series = rsi(&closes, 2);

    assert_eq!(series[0], None);
    assert_eq!(series[1], None);
    close(50.0, series[2].unwrap());
    close(75.0, series[3].unwrap());
    close(37.5, series[4].unwrap());
}

#[test]
fn test_rsi_pure_downtrend_is_zero() {
    let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
    let series = rsi(&closes, 14);
    close(0.0, series[19].unwrap());
}

#[test]
fn test_rsi_no_losses_is_100() {
    let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
    let series = rsi(&closes, 14);
    close(100.0, series[19].unwrap());
}

#[test]
fn test_rsi_stays_in_range() {
    let closes: Vec<f64> = (0..60)
        .map(|i| 100.0 + ((i * 37) % 11) as f64 - 5.0)
        .collect();
    for value in rsi(&closes, 14).into_iter().flatten() {
        assert!((0.0..=100.0).contains(&value));
    }
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn test_indicator_dispatch_over_bars() {
    let bars = bars_from_closes(&[10.0, 11.0, 12.0, 13.0, 14.0]);

    let sma_series = indicator(&bars, IndicatorKind::Sma, 3);
    close(11.0, sma_series[2].unwrap());

    let ema_series = indicator(&bars, IndicatorKind::Ema, 3);
    close(11.0, ema_series[2].unwrap());

    let rsi_series = indicator(&bars, IndicatorKind::Rsi, 2);
    close(100.0, rsi_series[2].unwrap());
}

#[test]
fn test_indicator_kind_parse() {
    assert_eq!(IndicatorKind::parse("sma"), Some(IndicatorKind::Sma));
    assert_eq!(IndicatorKind::parse("ema"), Some(IndicatorKind::Ema));
    assert_eq!(IndicatorKind::parse("rsi"), Some(IndicatorKind::Rsi));
    assert_eq!(IndicatorKind::parse("macd"), None);
}
