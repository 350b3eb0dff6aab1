//! tickwatch threshold monitor.
//!
//! Wires the quote provider, instrument registry and channel dispatcher
//! into a scheduled monitoring loop:
//! - `MonitorCycle`: one fetch/evaluate/dispatch pass over enabled instruments
//! - `Scheduler`: periodic cycles, status reports and the daily reload
//! - `Application`: store-backed operations driven by the CLI

pub mod app;
pub mod config;
pub mod cycle;
pub mod error;
pub mod scheduler;

pub use app::{Application, InstrumentStatus};
pub use config::{AppConfig, MarketHoursPolicy};
pub use cycle::{format_alert, CycleSettings, MonitorCycle};
pub use error::{AppError, AppResult};
pub use scheduler::{Cadence, JobKind, Scheduler, SchedulerStatus};
