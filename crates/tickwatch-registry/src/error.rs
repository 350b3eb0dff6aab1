//! Registry error types.

use thiserror::Error;
use tickwatch_core::CoreError;
use tickwatch_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Instrument already tracked: {0}")]
    Duplicate(String),

    #[error("Instrument not found: {0}")]
    NotFound(String),

    #[error("Invalid instrument: {0}")]
    Invalid(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] PersistenceError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
