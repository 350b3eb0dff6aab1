//! Prometheus metrics and structured logging for tickwatch.
//!
//! - Prometheus counters for cycles, quote fetches, alerts and deliveries
//! - Structured logging with tracing (JSON in production)
//! - Periodic status summaries built from the counters

pub mod error;
pub mod logging;
pub mod metrics;
pub mod status;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use status::{StatusReporter, StatusSnapshot, StatusTotals};
