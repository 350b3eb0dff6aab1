//! Outcome counters for one monitoring pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one monitoring cycle.
///
/// Produced once per cycle; the single source of truth for success and
/// failure counts of that pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    /// Instruments in the registry when the cycle started.
    pub total_instruments: usize,
    /// Enabled instruments that were processed.
    pub monitored: usize,
    /// Quote fetches that produced a quote (live or synthetic).
    pub successful_updates: usize,
    /// Alerts accepted by at least one channel.
    pub alerts_sent: usize,
    /// Failed fetches plus alerts no channel accepted.
    pub errors: usize,
    /// Cycle timestamp, also used for instrument state updates.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the cycle.
    #[serde(default)]
    pub duration_ms: u64,
}

impl CycleResult {
    /// Empty result stamped with the cycle start time.
    pub fn started_at(timestamp: DateTime<Utc>) -> Self {
        Self {
            total_instruments: 0,
            monitored: 0,
            successful_updates: 0,
            alerts_sent: 0,
            errors: 0,
            timestamp,
            duration_ms: 0,
        }
    }
}
