//! Market Data Service
//!
//! Serves current quotes and historical bars from the upstream chart API,
//! with a per-operation TTL cache in front. In development mode an
//! unreachable upstream degrades to deterministic synthetic data so the
//! rest of the platform stays exercisable offline; in production the
//! upstream error is surfaced.

use crate::sources::{ChartClient, ChartData};
use crate::types::{Bar, Interval, Quote, Range};
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Quotes go stale in a minute; a window of bars is good for an hour.
const QUOTE_TTL: Duration = Duration::from_secs(60);
const HISTORY_TTL: Duration = Duration::from_secs(3600);

/// Market data errors.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Upstream unavailable for {symbol}: {message}")]
    Upstream { symbol: String, message: String },
}

/// Cache key for one historical-bars fetch.
type HistoryKey = (String, Range, Interval);

struct Cached<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn until(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> Option<T> {
        (self.expires_at > Instant::now()).then(|| self.value.clone())
    }
}

/// Process-local cache keyed the way the service fetches: quotes by
/// symbol, bar history by (symbol, range, interval). Entries are stored
/// immutably and replaced wholesale; a read that finds an expired entry
/// evicts it.
struct MarketCache {
    quotes: DashMap<String, Cached<Quote>>,
    history: DashMap<HistoryKey, Cached<Arc<Vec<Bar>>>>,
}

impl MarketCache {
    fn new() -> Self {
        Self {
            quotes: DashMap::new(),
            history: DashMap::new(),
        }
    }

    fn quote(&self, symbol: &str) -> Option<Quote> {
        let live = self.quotes.get(symbol)?.live();
        if live.is_none() {
            self.quotes.remove(symbol);
        }
        live
    }

    fn store_quote(&self, quote: Quote) {
        self.quotes
            .insert(quote.symbol.clone(), Cached::until(quote, QUOTE_TTL));
    }

    fn history(&self, key: &HistoryKey) -> Option<Arc<Vec<Bar>>> {
        let live = self.history.get(key)?.live();
        if live.is_none() {
            self.history.remove(key);
        }
        live
    }

    fn store_history(&self, key: HistoryKey, bars: Arc<Vec<Bar>>) {
        self.history.insert(key, Cached::until(bars, HISTORY_TTL));
    }
}

/// Market data service with TTL caching and optional synthetic fallback.
pub struct MarketDataService {
    client: ChartClient,
    cache: MarketCache,
    /// Degrade to deterministic synthetic data on upstream failure.
    synthetic_fallback: bool,
}

impl MarketDataService {
    pub fn new(client: ChartClient, synthetic_fallback: bool) -> Self {
        Self {
            client,
            cache: MarketCache::new(),
            synthetic_fallback,
        }
    }

    /// Get the latest quote for a symbol.
    ///
    /// The day session fields (open/high/low/volume) are derived from the
    /// day's minute bars; price and previous close come from the chart
    /// metadata.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let symbol = symbol.to_uppercase();
        if let Some(quote) = self.cache.quote(&symbol) {
            return Ok(quote);
        }

        let quote = match self
            .client
            .fetch_chart(&symbol, Range::OneDay, Interval::OneMinute)
            .await
        {
            Ok(data) => quote_from_chart(&symbol, &data),
            Err(e) => {
                if self.synthetic_fallback {
                    warn!("Upstream quote fetch failed for {symbol}, using synthetic: {e}");
                    synthetic::quote(&symbol)
                } else {
                    return Err(MarketDataError::Upstream {
                        symbol,
                        message: e.to_string(),
                    });
                }
            }
        };

        self.cache.store_quote(quote.clone());
        Ok(quote)
    }

    /// Get historical bars, ascending by timestamp.
    pub async fn get_historical(
        &self,
        symbol: &str,
        range: Range,
        interval: Interval,
    ) -> Result<Arc<Vec<Bar>>, MarketDataError> {
        let symbol = symbol.to_uppercase();
        let key = (symbol.clone(), range, interval);
        if let Some(bars) = self.cache.history(&key) {
            debug!("History cache hit for {symbol} {range} {interval}");
            return Ok(bars);
        }

        let bars = match self.client.fetch_chart(&symbol, range, interval).await {
            Ok(ChartData { bars, .. }) => Arc::new(bars),
            Err(e) => {
                if self.synthetic_fallback {
                    warn!("Upstream history fetch failed for {symbol}, using synthetic: {e}");
                    Arc::new(synthetic::bars(&symbol, range, interval))
                } else {
                    return Err(MarketDataError::Upstream {
                        symbol,
                        message: e.to_string(),
                    });
                }
            }
        };

        self.cache.store_history(key, bars.clone());
        Ok(bars)
    }

    /// Fetch quotes for several symbols concurrently.
    ///
    /// Symbols whose fetch fails are omitted from the result.
    pub async fn get_multiple_quotes(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let fetches = symbols.iter().map(|s| async move {
            let symbol = s.to_uppercase();
            match self.get_quote(&symbol).await {
                Ok(quote) => Some((symbol, quote)),
                Err(e) => {
                    warn!("Dropping quote for {symbol}: {e}");
                    None
                }
            }
        });

        join_all(fetches).await.into_iter().flatten().collect()
    }
}

/// Build a quote from chart metadata plus the day's bars.
fn quote_from_chart(symbol: &str, data: &ChartData) -> Quote {
    let price = data.meta.regular_market_price;
    let (open, high, low, volume) = if data.bars.is_empty() {
        (price, price, price, 0.0)
    } else {
        (
            data.bars[0].open,
            data.bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            data.bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            data.bars.iter().map(|b| b.volume).sum(),
        )
    };

    Quote::new(
        symbol.to_string(),
        price,
        data.meta.chart_previous_close,
        open,
        high,
        low,
        volume,
        data.meta.regular_market_time * 1000,
    )
}

/// Deterministic synthetic market data for development mode.
///
/// Seeded from the request key so repeated calls (and repeated backtests)
/// see identical data within a process lifetime.
mod synthetic {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::hash::{Hash, Hasher};

    fn seed(parts: &[&str]) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for part in parts {
            part.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn base_price(symbol: &str) -> f64 {
        let mut rng = StdRng::seed_from_u64(seed(&[symbol]));
        rng.gen_range(20.0..500.0)
    }

    pub fn quote(symbol: &str) -> Quote {
        let mut rng = StdRng::seed_from_u64(seed(&[symbol, "quote"]));
        let previous_close = base_price(symbol);
        let price = previous_close * rng.gen_range(0.97..1.03);
        let open = previous_close * rng.gen_range(0.99..1.01);
        Quote::new(
            symbol.to_string(),
            round2(price),
            round2(previous_close),
            round2(open),
            round2(price.max(open) * 1.01),
            round2(price.min(open) * 0.99),
            rng.gen_range(1e5..5e7_f64).round(),
            chrono::Utc::now().timestamp_millis(),
        )
    }

    pub fn bars(symbol: &str, range: Range, interval: Interval) -> Vec<Bar> {
        let mut rng = StdRng::seed_from_u64(seed(&[
            symbol,
            range.as_str(),
            interval.as_str(),
        ]));

        let interval_secs = match interval {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::ThirtyMinutes => 1800,
            Interval::OneHour => 3600,
            Interval::OneDay => 86_400,
        };
        let range_days: i64 = match range {
            Range::OneDay => 1,
            Range::FiveDays => 5,
            Range::OneMonth => 30,
            Range::ThreeMonths => 90,
            Range::SixMonths => 180,
            Range::OneYear => 365,
            Range::TwoYears => 730,
            Range::FiveYears => 1825,
        };
        let count = ((range_days * 86_400) / interval_secs).clamp(2, 500);

        let now = chrono::Utc::now().timestamp();
        let start = now - count * interval_secs;
        let mut close = base_price(symbol);
        let mut bars = Vec::with_capacity(count as usize);

        for i in 0..count {
            let open = close;
            close *= rng.gen_range(0.98..1.0205);
            let high = open.max(close) * rng.gen_range(1.0..1.01);
            let low = open.min(close) * rng.gen_range(0.99..1.0);
            bars.push(Bar {
                timestamp: (start + i * interval_secs) * 1000,
                open: round2(open),
                high: round2(high),
                low: round2(low),
                close: round2(close),
                volume: rng.gen_range(1e4..1e7_f64).round(),
            });
        }
        bars
    }

    fn round2(v: f64) -> f64 {
        (v * 100.0).round() / 100.0
    }
}
