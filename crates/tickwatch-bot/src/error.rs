//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] tickwatch_core::CoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] tickwatch_feed::FeedError),

    #[error("Registry error: {0}")]
    Registry(#[from] tickwatch_registry::RegistryError),

    #[error("Notify error: {0}")]
    Notify(#[from] tickwatch_notify::NotifyError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickwatch_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] tickwatch_persistence::PersistenceError),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
