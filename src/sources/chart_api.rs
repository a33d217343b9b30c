//! Upstream chart API client.
//!
//! Fetches quote metadata and historical OHLCV bars from the chart endpoint
//! (`{base}/chart/{SYMBOL}?range=&interval=`). The wire format is the
//! Yahoo-style chart JSON; no API key required.

use crate::types::{Bar, Interval, Range};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Chart API errors.
#[derive(Debug, Error)]
pub enum ChartApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Upstream returned status {0}")]
    Status(u16),

    #[error("Upstream error: {code} - {description}")]
    Api { code: String, description: String },

    #[error("Malformed upstream response: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: RawMeta,
    timestamp: Option<Vec<i64>>,
    indicators: RawIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    symbol: String,
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawIndicators {
    quote: Vec<RawQuote>,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<u64>>>,
}

/// Quote-level metadata from a chart response.
#[derive(Debug, Clone)]
pub struct ChartMeta {
    pub symbol: String,
    pub regular_market_price: f64,
    pub chart_previous_close: f64,
    /// Unix seconds.
    pub regular_market_time: i64,
}

/// Parsed chart response: quote metadata plus ascending bars.
#[derive(Debug, Clone)]
pub struct ChartData {
    pub meta: ChartMeta,
    pub bars: Vec<Bar>,
}

/// Normalize a symbol for the chart API. Share classes use hyphens
/// instead of dots (BRK-B, not BRK.B).
fn normalize_symbol(symbol: &str) -> String {
    symbol.to_uppercase().replace('.', "-")
}

/// HTTP client for the upstream chart API.
pub struct ChartClient {
    client: Client,
    base_url: String,
}

impl ChartClient {
    /// Create a new client with the given base URL and per-request timeout.
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Fetch chart data for a symbol over the given range and interval.
    ///
    /// Bars are returned ascending by timestamp (milliseconds); samples with
    /// a null or non-positive close are dropped.
    pub async fn fetch_chart(
        &self,
        symbol: &str,
        range: Range,
        interval: Interval,
    ) -> Result<ChartData, ChartApiError> {
        let url = format!(
            "{}/chart/{}?range={}&interval={}",
            self.base_url,
            normalize_symbol(symbol),
            range.as_str(),
            interval.as_str(),
        );

        debug!("Fetching chart data: {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ChartApiError::Status(response.status().as_u16()));
        }

        let data: ChartResponse = response.json().await?;

        if let Some(error) = data.chart.error {
            return Err(ChartApiError::Api {
                code: error.code,
                description: error.description,
            });
        }

        let result = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or(ChartApiError::Malformed("empty result array"))?;

        let meta = ChartMeta {
            symbol: result.meta.symbol.clone(),
            regular_market_price: result
                .meta
                .regular_market_price
                .ok_or(ChartApiError::Malformed("missing regularMarketPrice"))?,
            chart_previous_close: result.meta.chart_previous_close.unwrap_or_default(),
            regular_market_time: result
                .meta
                .regular_market_time
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        };

        let timestamps = result.timestamp.unwrap_or_default();
        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or(ChartApiError::Malformed("missing quote data"))?;

        let opens = quote.open.unwrap_or_default();
        let highs = quote.high.unwrap_or_default();
        let lows = quote.low.unwrap_or_default();
        let closes = quote.close.unwrap_or_default();
        let volumes = quote.volume.unwrap_or_default();

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &timestamp) in timestamps.iter().enumerate() {
            let close = match closes.get(i).and_then(|v| *v) {
                Some(c) if c > 0.0 => c,
                _ => continue,
            };
            bars.push(Bar {
                timestamp: timestamp * 1000,
                open: opens.get(i).and_then(|v| *v).unwrap_or(close),
                high: highs.get(i).and_then(|v| *v).unwrap_or(close),
                low: lows.get(i).and_then(|v| *v).unwrap_or(close),
                close,
                volume: volumes.get(i).and_then(|v| *v).unwrap_or(0) as f64,
            });
        }
        bars.sort_by_key(|b| b.timestamp);

        Ok(ChartData { meta, bars })
    }
}
