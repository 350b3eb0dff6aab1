//! Quote provider with retries and synthetic fallback.

use crate::error::{FeedError, FeedResult};
use crate::retry::RetryPolicy;
use crate::source::PriceSource;
use crate::synthetic::SyntheticQuotes;
use std::sync::Arc;
use std::time::Duration;
use tickwatch_core::{BoxFuture, Quote, SharedClock};
use tracing::{debug, info, warn};

/// Abstract quote interface consumed by the monitor.
pub trait QuoteProvider: Send + Sync {
    /// Fetch a quote, making up to `max_attempts` attempts.
    fn fetch<'a>(&'a self, symbol: &'a str, max_attempts: u32) -> BoxFuture<'a, FeedResult<Quote>>;
}

/// Degradation switches for [`ResilientQuoteProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    /// Synthesize every quote without touching the live source.
    pub synthetic_mode: bool,
    /// Synthesize a quote after all live attempts fail.
    pub synthetic_fallback: bool,
    pub base_delay: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            synthetic_mode: false,
            synthetic_fallback: true,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Provider that retries a [`PriceSource`] and degrades to synthetic data.
pub struct ResilientQuoteProvider {
    source: Arc<dyn PriceSource>,
    synthetic: SyntheticQuotes,
    settings: FeedSettings,
    clock: SharedClock,
}

impl ResilientQuoteProvider {
    pub fn new(
        source: Arc<dyn PriceSource>,
        synthetic: SyntheticQuotes,
        settings: FeedSettings,
        clock: SharedClock,
    ) -> Self {
        Self {
            source,
            synthetic,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> FeedSettings {
        self.settings
    }

    async fn fetch_with_retry(&self, symbol: &str, max_attempts: u32) -> FeedResult<Quote> {
        if self.settings.synthetic_mode {
            debug!(%symbol, "Synthetic mode, skipping live source");
            return self.synthetic.generate(symbol, self.clock.now());
        }

        let policy = RetryPolicy::new(max_attempts.max(1), self.settings.base_delay);
        let mut last_error = String::new();

        for attempt in 0..policy.max_attempts {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!(%symbol, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            let result = match self.source.snapshot(symbol).await {
                Ok(snapshot) => snapshot.to_quote(symbol, self.clock.now()),
                Err(e) => Err(e),
            };

            match result {
                Ok(quote) => {
                    debug!(
                        %symbol,
                        price = quote.current_price,
                        change_pct = quote.change_percent,
                        attempt,
                        "Quote fetched"
                    );
                    return Ok(quote);
                }
                Err(e) => {
                    warn!(
                        %symbol,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Quote fetch attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        if self.settings.synthetic_fallback {
            info!(%symbol, "Live quote unavailable, using synthetic quote");
            return self.synthetic.generate(symbol, self.clock.now());
        }

        Err(FeedError::Unavailable {
            symbol: symbol.to_string(),
            attempts: policy.max_attempts,
            last_error,
        })
    }
}

impl QuoteProvider for ResilientQuoteProvider {
    fn fetch<'a>(&'a self, symbol: &'a str, max_attempts: u32) -> BoxFuture<'a, FeedResult<Quote>> {
        Box::pin(self.fetch_with_retry(symbol, max_attempts))
    }
}
