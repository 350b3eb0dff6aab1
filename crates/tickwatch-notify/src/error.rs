//! Notification error types.

use thiserror::Error;
use tickwatch_core::{ChannelKind, CoreError};
use tickwatch_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Provider rejected request (errcode {code}): {message}")]
    Provider { code: i64, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Channel not found: {0}")]
    NotFound(String),

    #[error("Channel type cannot change from {from} to {to}")]
    KindMismatch { from: ChannelKind, to: ChannelKind },

    #[error("Invalid channel: {0}")]
    Invalid(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] PersistenceError),
}

pub type NotifyResult<T> = Result<T, NotifyError>;
