//! Market Data Types
//!
//! Quotes, historical bars, and the range/interval vocabulary accepted by
//! the upstream chart API.

use serde::{Deserialize, Serialize};

/// Latest trade snapshot for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// Last traded price.
    pub price: f64,
    pub previous_close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    /// Quote time in milliseconds since the epoch.
    pub timestamp: i64,
    /// price - previous_close
    pub change: f64,
    pub change_percent: f64,
}

impl Quote {
    /// Build a quote from its raw fields, deriving change figures.
    pub fn new(
        symbol: String,
        price: f64,
        previous_close: f64,
        open: f64,
        high: f64,
        low: f64,
        volume: f64,
        timestamp: i64,
    ) -> Self {
        let change = price - previous_close;
        let change_percent = if previous_close != 0.0 {
            change / previous_close * 100.0
        } else {
            0.0
        };
        Self {
            symbol,
            price,
            previous_close,
            open,
            high,
            low,
            volume,
            timestamp,
            change,
            change_percent,
        }
    }
}

/// One historical OHLCV sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar time in milliseconds since the epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Supported historical-data ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Range {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Range {
    pub fn as_str(&self) -> &'static str {
        match self {
            Range::OneDay => "1d",
            Range::FiveDays => "5d",
            Range::OneMonth => "1mo",
            Range::ThreeMonths => "3mo",
            Range::SixMonths => "6mo",
            Range::OneYear => "1y",
            Range::TwoYears => "2y",
            Range::FiveYears => "5y",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1d" => Some(Range::OneDay),
            "5d" => Some(Range::FiveDays),
            "1mo" => Some(Range::OneMonth),
            "3mo" => Some(Range::ThreeMonths),
            "6mo" => Some(Range::SixMonths),
            "1y" => Some(Range::OneYear),
            "2y" => Some(Range::TwoYears),
            "5y" => Some(Range::FiveYears),
            _ => None,
        }
    }

    /// Smallest standard range covering the given number of days.
    pub fn covering_days(days: i64) -> Self {
        match days {
            d if d <= 1 => Range::OneDay,
            d if d <= 5 => Range::FiveDays,
            d if d <= 31 => Range::OneMonth,
            d if d <= 93 => Range::ThreeMonths,
            d if d <= 186 => Range::SixMonths,
            d if d <= 366 => Range::OneYear,
            d if d <= 732 => Range::TwoYears,
            _ => Range::FiveYears,
        }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supported bar intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "15m" => Some(Interval::FifteenMinutes),
            "30m" => Some(Interval::ThirtyMinutes),
            "1h" => Some(Interval::OneHour),
            "1d" => Some(Interval::OneDay),
            _ => None,
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_change_fields() {
        let quote = Quote::new("AAPL".into(), 153.0, 150.0, 151.0, 154.0, 149.5, 1e6, 0);
        assert_eq!(quote.change, 3.0);
        assert!((quote.change_percent - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_quote_zero_previous_close() {
        let quote = Quote::new("X".into(), 10.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0);
        assert_eq!(quote.change_percent, 0.0);
    }

    #[test]
    fn test_range_round_trip() {
        for s in ["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y"] {
            assert_eq!(Range::parse(s).unwrap().as_str(), s);
        }
        assert!(Range::parse("10y").is_none());
    }

    #[test]
    fn test_range_covering_days() {
        assert_eq!(Range::covering_days(1), Range::OneDay);
        assert_eq!(Range::covering_days(4), Range::FiveDays);
        assert_eq!(Range::covering_days(60), Range::ThreeMonths);
        assert_eq!(Range::covering_days(365), Range::OneYear);
        assert_eq!(Range::covering_days(3000), Range::FiveYears);
    }

    #[test]
    fn test_interval_round_trip() {
        for s in ["1m", "5m", "15m", "30m", "1h", "1d"] {
            assert_eq!(Interval::parse(s).unwrap().as_str(), s);
        }
        assert!(Interval::parse("2m").is_none());
    }
}
