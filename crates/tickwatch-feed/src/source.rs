//! Price source boundary and adapters.
//!
//! A [`PriceSource`] returns recent daily history for a symbol. Turning that
//! history into a [`Quote`] is shared by every source via
//! [`PriceSnapshot::to_quote`].

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tickwatch_core::{BoxFuture, Quote};
use tracing::debug;

/// Default timeout for quote requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Recent daily history for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSnapshot {
    /// Daily closes, oldest first.
    pub closes: Vec<f64>,
    /// Daily volumes aligned with `closes` where available.
    pub volumes: Vec<u64>,
    /// Live price, if the source reports one.
    pub live_price: Option<f64>,
    pub market_cap: Option<u64>,
}

impl PriceSnapshot {
    /// Derive a quote from this snapshot.
    ///
    /// Current price is the live price when present and positive, otherwise
    /// the most recent close. Previous close is the second-to-last close, or
    /// the last when only one exists.
    pub fn to_quote(&self, symbol: &str, timestamp: DateTime<Utc>) -> FeedResult<Quote> {
        let last_close = *self
            .closes
            .last()
            .ok_or_else(|| FeedError::NoData(symbol.to_string()))?;

        let current = match self.live_price {
            Some(price) if price > 0.0 => price,
            _ => last_close,
        };
        let previous_close = if self.closes.len() >= 2 {
            self.closes[self.closes.len() - 2]
        } else {
            last_close
        };

        let volume = self.volumes.last().copied().unwrap_or(0);
        let market_cap = self.market_cap.unwrap_or(0);

        Ok(Quote::from_prices(
            symbol,
            current,
            previous_close,
            volume,
            market_cap,
            timestamp,
        )?)
    }
}

/// Source of recent price history.
pub trait PriceSource: Send + Sync {
    /// Fetch recent daily closes and volumes for a symbol.
    fn snapshot<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, FeedResult<PriceSnapshot>>;
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartSeries>,
}

#[derive(Debug, Deserialize)]
struct ChartSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Parse a chart endpoint response body. Null samples are skipped.
pub fn parse_chart(symbol: &str, body: &str) -> FeedResult<PriceSnapshot> {
    let envelope: ChartEnvelope = serde_json::from_str(body)
        .map_err(|e| FeedError::Parse(format!("{symbol}: {e}")))?;

    if let Some(err) = envelope.chart.error {
        return Err(FeedError::Http(format!(
            "{symbol}: {} {}",
            err.code.unwrap_or_default(),
            err.description.unwrap_or_default()
        )));
    }

    let result = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| FeedError::NoData(symbol.to_string()))?;

    let (closes, volumes) = match result.indicators.quote.into_iter().next() {
        Some(series) => (
            series.close.into_iter().flatten().collect(),
            series
                .volume
                .into_iter()
                .flatten()
                .map(|v| v.max(0.0) as u64)
                .collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    Ok(PriceSnapshot {
        closes,
        volumes,
        live_price: result.meta.regular_market_price,
        market_cap: result.meta.market_cap.map(|v| v.max(0.0) as u64),
    })
}

/// Chart-endpoint price source over HTTP.
pub struct HttpPriceSource {
    client: Client,
    base_url: String,
}

impl HttpPriceSource {
    /// Create a source against `base_url` (e.g. "https://query1.finance.yahoo.com").
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tickwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_chart(&self, symbol: &str) -> FeedResult<PriceSnapshot> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        debug!(%symbol, %url, "Fetching chart");

        let response = self
            .client
            .get(&url)
            .query(&[("range", "5d"), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| FeedError::Http(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Http(format!("Failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(FeedError::Http(format!("HTTP {status}: {body}")));
        }

        parse_chart(symbol, &body)
    }
}

impl PriceSource for HttpPriceSource {
    fn snapshot<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, FeedResult<PriceSnapshot>> {
        Box::pin(self.fetch_chart(symbol))
    }
}

/// Scripted price source for testing.
///
/// Queued responses are consumed first; afterwards the symbol's standing
/// response (if any) is returned. Unknown symbols fail.
#[derive(Debug, Default)]
pub struct ScriptedPriceSource {
    queued: Mutex<HashMap<String, VecDeque<Result<PriceSnapshot, String>>>>,
    standing: Mutex<HashMap<String, Result<PriceSnapshot, String>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request for `symbol` with two closes.
    pub fn with_prices(self, symbol: &str, previous_close: f64, current: f64) -> Self {
        self.set(
            symbol,
            Ok(PriceSnapshot {
                closes: vec![previous_close, current],
                volumes: vec![1_000, 2_000],
                live_price: None,
                market_cap: None,
            }),
        );
        self
    }

    /// Fail every request for `symbol`.
    pub fn with_failure(self, symbol: &str, message: &str) -> Self {
        self.set(symbol, Err(message.to_string()));
        self
    }

    pub fn set(&self, symbol: &str, response: Result<PriceSnapshot, String>) {
        self.standing.lock().insert(symbol.to_string(), response);
    }

    pub fn push(&self, symbol: &str, response: Result<PriceSnapshot, String>) {
        self.queued
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .push_back(response);
    }

    /// Number of snapshot requests made for `symbol`.
    pub fn calls(&self, symbol: &str) -> u32 {
        self.calls.lock().get(symbol).copied().unwrap_or(0)
    }

    fn next_response(&self, symbol: &str) -> FeedResult<PriceSnapshot> {
        *self.calls.lock().entry(symbol.to_string()).or_insert(0) += 1;

        let queued = self
            .queued
            .lock()
            .get_mut(symbol)
            .and_then(|queue| queue.pop_front());
        let response = match queued {
            Some(response) => response,
            None => self
                .standing
                .lock()
                .get(symbol)
                .cloned()
                .unwrap_or_else(|| Err(format!("no scripted response for {symbol}"))),
        };
        response.map_err(FeedError::Http)
    }
}

impl PriceSource for ScriptedPriceSource {
    fn snapshot<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, FeedResult<PriceSnapshot>> {
        let response = self.next_response(symbol);
        Box::pin(async move { response })
    }
}
