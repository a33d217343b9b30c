//! Technical indicators.
//!
//! Series are computed over bar closes and aligned with the input: entries
//! are `None` until the indicator has enough history to be defined.

use crate::types::Bar;

/// Indicator kind selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
}

impl IndicatorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sma" => Some(IndicatorKind::Sma),
            "ema" => Some(IndicatorKind::Ema),
            "rsi" => Some(IndicatorKind::Rsi),
            _ => None,
        }
    }
}

/// Compute an indicator series over a bar slice.
pub fn indicator(bars: &[Bar], kind: IndicatorKind, period: usize) -> Vec<Option<f64>> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    match kind {
        IndicatorKind::Sma => sma(&closes, period),
        IndicatorKind::Ema => ema(&closes, period),
        IndicatorKind::Rsi => rsi(&closes, period),
    }
}

/// Simple moving average. Defined from index `period - 1` onward.
pub fn sma(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }

    let mut window_sum: f64 = closes[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);

    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        out[i] = Some(window_sum / period as f64);
    }
    out
}

/// Exponential moving average, seeded with the SMA at index `period - 1`.
pub fn ema(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for i in period..closes.len() {
        prev = (closes[i] - prev) * k + prev;
        out[i] = Some(prev);
    }
    out
}

/// Relative strength index with Wilder smoothing. Defined from index
/// `period` onward.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for i in 1..closes.len() {
        let change = closes[i] - closes[i - 1];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Latest SMA value over a close window, if defined.
pub fn sma_last(closes: &[f64], period: usize) -> Option<f64> {
    sma(closes, period).last().copied().flatten()
}

/// Latest RSI value over a close window, if defined.
pub fn rsi_last(closes: &[f64], period: usize) -> Option<f64> {
    rsi(closes, period).last().copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_undefined_prefix() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let series = sma(&closes, 3);
        assert_eq!(series[0], None);
        assert_eq!(series[1], None);
        assert_eq!(series[2], Some(2.0));
        assert_eq!(series[3], Some(3.0));
        assert_eq!(series[4], Some(4.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let closes = [1.0, 2.0];
        assert!(sma(&closes, 3).iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let closes = [1.0, 2.0, 3.0, 4.0];
        let series = ema(&closes, 3);
        assert_eq!(series[2], Some(2.0));
        // k = 0.5; ema = (4 - 2) * 0.5 + 2 = 3
        assert_eq!(series[3], Some(3.0));
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let series = rsi(&closes, 14);
        assert_eq!(series[14], Some(100.0));
        assert_eq!(series[19], Some(100.0));
    }

    #[test]
    fn test_rsi_defined_from_period_onward() {
        let closes: Vec<f64> = (0..16).map(|i| 100.0 + (i % 3) as f64).collect();
        let series = rsi(&closes, 14);
        assert!(series[13].is_none());
        assert!(series[14].is_some());
        assert!(series[15].is_some());
    }

    #[test]
    fn test_last_value_helpers() {
        let closes: Vec<f64> = (1..=25).map(|i| i as f64).collect();
        assert_eq!(sma_last(&closes, 20), Some(15.5));
        assert_eq!(rsi_last(&closes, 14), Some(100.0));
        assert_eq!(sma_last(&closes[..5], 20), None);
    }
}
