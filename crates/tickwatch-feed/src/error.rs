//! Feed error types.

use thiserror::Error;
use tickwatch_core::CoreError;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("No price history for {0}")]
    NoData(String),

    #[error("Invalid quote: {0}")]
    InvalidQuote(#[from] CoreError),

    #[error("Quote unavailable for {symbol} after {attempts} attempt(s): {last_error}")]
    Unavailable {
        symbol: String,
        attempts: u32,
        last_error: String,
    },
}

pub type FeedResult<T> = Result<T, FeedError>;
