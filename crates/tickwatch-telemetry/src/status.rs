//! Periodic status summaries.
//!
//! Reads the process-wide counters and combines them with registry and
//! channel totals supplied by the caller.

use crate::metrics::{
    ALERTS_SENT_TOTAL, CYCLES_TOTAL, DISPATCH_TOTAL, JOB_FAILURES_TOTAL, QUOTE_FETCH_TOTAL,
    SCHEDULER_RUNNING,
};
use chrono::{DateTime, Utc};
use prometheus::CounterVec;
use serde::Serialize;
use tracing::info;

/// Registry and channel totals at report time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTotals {
    pub instruments: usize,
    pub enabled_instruments: usize,
    pub channels: usize,
    pub valid_channels: usize,
}

/// Point-in-time status summary.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub since: DateTime<Utc>,
    pub at: DateTime<Utc>,
    pub running: bool,
    pub totals: StatusTotals,
    pub cycles: u64,
    pub quotes_live: u64,
    pub quotes_synthetic: u64,
    pub quotes_failed: u64,
    pub alerts_sent: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
    pub job_failures: u64,
}

/// Status reporter.
pub struct StatusReporter {
    start_time: DateTime<Utc>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn counter_value(counter: &CounterVec, labels: &[&str]) -> u64 {
    counter.with_label_values(labels).get() as u64
}

/// Sum a counter over every label set whose `label` equals `value`.
fn sum_where(counter: &CounterVec, label: &str, value: &str) -> u64 {
    use prometheus::core::Collector;

    let mut total = 0.0;
    for mf in counter.collect() {
        for m in mf.get_metric() {
            let matches = m
                .get_label()
                .iter()
                .any(|pair| pair.get_name() == label && pair.get_value() == value);
            if matches {
                total += m.get_counter().get_value();
            }
        }
    }
    total as u64
}

fn sum_all(counter: &CounterVec) -> u64 {
    use prometheus::core::Collector;

    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric().iter())
        .map(|m| m.get_counter().get_value())
        .sum::<f64>() as u64
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
        }
    }

    pub fn snapshot(&self, totals: StatusTotals) -> StatusSnapshot {
        StatusSnapshot {
            since: self.start_time,
            at: Utc::now(),
            running: SCHEDULER_RUNNING.get() > 0.0,
            totals,
            cycles: CYCLES_TOTAL.get() as u64,
            quotes_live: counter_value(&QUOTE_FETCH_TOTAL, &["live"]),
            quotes_synthetic: counter_value(&QUOTE_FETCH_TOTAL, &["synthetic"]),
            quotes_failed: counter_value(&QUOTE_FETCH_TOTAL, &["failed"]),
            alerts_sent: sum_all(&ALERTS_SENT_TOTAL),
            deliveries_sent: sum_where(&DISPATCH_TOTAL, "result", "sent"),
            deliveries_failed: sum_where(&DISPATCH_TOTAL, "result", "failed"),
            job_failures: sum_all(&JOB_FAILURES_TOTAL),
        }
    }

    /// Log a status summary.
    pub fn output_status(&self, totals: StatusTotals) -> StatusSnapshot {
        let s = self.snapshot(totals);
        let uptime = s.at - s.since;

        info!(
            running = s.running,
            uptime_hours = uptime.num_hours(),
            uptime_minutes = uptime.num_minutes() % 60,
            instruments = s.totals.instruments,
            enabled_instruments = s.totals.enabled_instruments,
            channels = s.totals.channels,
            valid_channels = s.totals.valid_channels,
            "Status report"
        );
        info!(
            cycles = s.cycles,
            quotes_live = s.quotes_live,
            quotes_synthetic = s.quotes_synthetic,
            quotes_failed = s.quotes_failed,
            alerts_sent = s.alerts_sent,
            deliveries_sent = s.deliveries_sent,
            deliveries_failed = s.deliveries_failed,
            job_failures = s.job_failures,
            "Status counters"
        );
        s
    }
}
