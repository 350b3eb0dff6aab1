//! Price quote for a single symbol.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One price sample for a symbol.
///
/// Produced fresh by every fetch and never persisted on its own; only
/// `current_price` and the fetch time are folded into instrument state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub current_price: f64,
    pub previous_close: f64,
    /// `current_price - previous_close`.
    pub change: f64,
    /// `change / previous_close * 100`.
    pub change_percent: f64,
    pub volume: u64,
    pub market_cap: u64,
    pub timestamp: DateTime<Utc>,
    /// Fabricated sample used when the live source is unavailable.
    #[serde(default)]
    pub is_synthetic: bool,
}

impl Quote {
    /// Build a live quote, deriving `change` and `change_percent`.
    ///
    /// Both prices must be finite and positive.
    pub fn from_prices(
        symbol: impl Into<String>,
        current_price: f64,
        previous_close: f64,
        volume: u64,
        market_cap: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let symbol = symbol.into();
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(CoreError::InvalidPrice(format!(
                "{symbol}: current price {current_price}"
            )));
        }
        if !previous_close.is_finite() || previous_close <= 0.0 {
            return Err(CoreError::InvalidPrice(format!(
                "{symbol}: previous close {previous_close}"
            )));
        }

        let change = current_price - previous_close;
        let change_percent = change / previous_close * 100.0;

        Ok(Self {
            symbol,
            current_price,
            previous_close,
            change,
            change_percent,
            volume,
            market_cap,
            timestamp,
            is_synthetic: false,
        })
    }

    /// Mark this quote as synthetic.
    #[must_use]
    pub fn into_synthetic(mut self) -> Self {
        self.is_synthetic = true;
        self
    }

    /// Whether the price moved up (or stayed flat) since the previous close.
    pub fn is_up(&self) -> bool {
        self.change >= 0.0
    }
}
