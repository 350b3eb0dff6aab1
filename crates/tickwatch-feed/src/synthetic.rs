//! Synthetic quote generation.
//!
//! Used when live data is unavailable (or when synthetic mode is forced).
//! A uniform move in [-5%, +5%] is applied to a per-symbol base price.

use crate::error::FeedResult;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tickwatch_core::Quote;

/// Base price for symbols missing from the table.
pub const DEFAULT_BASE_PRICE: f64 = 100.0;

/// Maximum absolute synthetic move, in percent.
pub const MAX_SYNTHETIC_MOVE_PCT: f64 = 5.0;

/// Built-in base prices.
pub fn default_base_prices() -> HashMap<String, f64> {
    HashMap::from([
        ("AAPL".to_string(), 150.0),
        ("TSLA".to_string(), 200.0),
        ("0700.HK".to_string(), 300.0),
        ("0941.HK".to_string(), 50.0),
    ])
}

/// Generator of fabricated quotes.
#[derive(Debug, Clone)]
pub struct SyntheticQuotes {
    base_prices: HashMap<String, f64>,
    default_price: f64,
}

impl Default for SyntheticQuotes {
    fn default() -> Self {
        Self::new(default_base_prices())
    }
}

impl SyntheticQuotes {
    /// Symbols are matched case-insensitively. Non-positive or non-finite
    /// base prices are dropped.
    pub fn new(base_prices: HashMap<String, f64>) -> Self {
        let base_prices = base_prices
            .into_iter()
            .filter(|(_, price)| price.is_finite() && *price > 0.0)
            .map(|(symbol, price)| (symbol.trim().to_uppercase(), price))
            .collect();
        Self {
            base_prices,
            default_price: DEFAULT_BASE_PRICE,
        }
    }

    pub fn base_price(&self, symbol: &str) -> f64 {
        self.base_prices
            .get(&symbol.trim().to_uppercase())
            .copied()
            .unwrap_or(self.default_price)
    }

    /// Generate a synthetic quote for `symbol`.
    pub fn generate(&self, symbol: &str, timestamp: DateTime<Utc>) -> FeedResult<Quote> {
        let base = self.base_price(symbol);
        let move_pct = (fastrand::f64() * 2.0 - 1.0) * MAX_SYNTHETIC_MOVE_PCT;
        let current = base * (1.0 + move_pct / 100.0);
        let volume = fastrand::u64(1_000_000..=10_000_000);
        let market_cap = fastrand::u64(1_000_000_000..=1_000_000_000_000);

        let quote = Quote::from_prices(symbol, current, base, volume, market_cap, timestamp)?;
        Ok(quote.into_synthetic())
    }
}
