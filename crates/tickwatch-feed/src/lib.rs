//! Quote acquisition for tickwatch.
//!
//! Provides:
//! - `PriceSource`: raw recent-history boundary, with an HTTP chart adapter
//! - `RetryPolicy`: exponential backoff between fetch attempts
//! - `SyntheticQuotes`: fabricated quotes for degraded operation
//! - `QuoteProvider`: the abstract quote interface consumed by the monitor

pub mod error;
pub mod provider;
pub mod retry;
pub mod source;
pub mod synthetic;

pub use error::{FeedError, FeedResult};
pub use provider::{FeedSettings, QuoteProvider, ResilientQuoteProvider};
pub use retry::RetryPolicy;
pub use source::{HttpPriceSource, PriceSnapshot, PriceSource, ScriptedPriceSource};
pub use synthetic::{default_base_prices, SyntheticQuotes};
