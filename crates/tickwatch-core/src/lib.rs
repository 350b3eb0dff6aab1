//! Core domain types for the tickwatch threshold monitor.
//!
//! This crate provides the types shared by every other tickwatch crate:
//! - `Instrument`: a tracked symbol with thresholds and monitoring state
//! - `Quote`: one price sample for a symbol (live or synthetic)
//! - `Channel`: a notification destination (`direct` or `webhook`)
//! - `CycleResult`: the outcome counters of one monitoring pass
//! - `evaluate`: the pure threshold check
//! - `MarketCalendar`: market-hours lookup per market identifier
//! - `Clock`: time source abstraction for deterministic tests

pub mod channel;
pub mod clock;
pub mod cycle;
pub mod error;
pub mod evaluator;
pub mod instrument;
pub mod market_hours;
pub mod quote;

use std::future::Future;
use std::pin::Pin;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use channel::{Channel, ChannelConfig, ChannelKind, DirectConfig, WebhookConfig};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use cycle::CycleResult;
pub use error::{CoreError, Result};
pub use evaluator::{evaluate, format_percent, AlertDecision, Direction};
pub use instrument::Instrument;
pub use market_hours::{default_market_configs, MarketCalendar, MarketHours, MarketHoursConfig};
pub use quote::Quote;
