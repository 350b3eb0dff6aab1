//! Prometheus metrics for tickwatch.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which only happens at static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

/// Completed monitoring cycles.
pub static CYCLES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("tickwatch_cycles_total", "Completed monitoring cycles").unwrap()
});

/// Cycle duration in milliseconds.
pub static CYCLE_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "tickwatch_cycle_duration_ms",
        "Monitoring cycle duration in milliseconds",
        vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 15000.0, 60000.0]
    )
    .unwrap()
});

/// Enabled instruments seen by the last cycle.
pub static INSTRUMENTS_MONITORED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickwatch_instruments_monitored",
        "Enabled instruments in the last cycle"
    )
    .unwrap()
});

/// Quote fetches by outcome (live/synthetic/failed).
pub static QUOTE_FETCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickwatch_quote_fetch_total",
        "Quote fetches by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Alerts accepted by at least one channel.
/// Labels: direction (up/down)
pub static ALERTS_SENT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickwatch_alerts_sent_total",
        "Alerts accepted by at least one channel",
        &["direction"]
    )
    .unwrap()
});

/// Alerts not sent. Labels: reason (cooldown/market_closed/undelivered)
pub static ALERTS_SUPPRESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickwatch_alerts_suppressed_total",
        "Alert-worthy moves that were not delivered",
        &["reason"]
    )
    .unwrap()
});

/// Per-channel delivery outcomes.
pub static DISPATCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickwatch_dispatch_total",
        "Channel delivery outcomes",
        &["channel_type", "result"]
    )
    .unwrap()
});

/// Authorization token fetches. Labels: result (ok/error)
pub static TOKEN_FETCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickwatch_token_fetch_total",
        "Authorization token fetches",
        &["result"]
    )
    .unwrap()
});

/// Scheduler state (1 = running).
pub static SCHEDULER_RUNNING: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("tickwatch_scheduler_running", "Scheduler running (1=running)").unwrap()
});

/// Failed or panicked scheduled jobs.
pub static JOB_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickwatch_job_failures_total",
        "Scheduled jobs that failed or panicked",
        &["job"]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    pub fn cycle_completed(duration_ms: f64, monitored: usize) {
        CYCLES_TOTAL.inc();
        CYCLE_DURATION_MS.observe(duration_ms);
        INSTRUMENTS_MONITORED.set(monitored as f64);
    }

    pub fn quote_live() {
        QUOTE_FETCH_TOTAL.with_label_values(&["live"]).inc();
    }

    pub fn quote_synthetic() {
        QUOTE_FETCH_TOTAL.with_label_values(&["synthetic"]).inc();
    }

    pub fn quote_failed() {
        QUOTE_FETCH_TOTAL.with_label_values(&["failed"]).inc();
    }

    pub fn alert_sent(direction: &str) {
        ALERTS_SENT_TOTAL.with_label_values(&[direction]).inc();
    }

    pub fn alert_suppressed(reason: &str) {
        ALERTS_SUPPRESSED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn dispatch_outcome(channel_type: &str, sent: bool) {
        let result = if sent { "sent" } else { "failed" };
        DISPATCH_TOTAL
            .with_label_values(&[channel_type, result])
            .inc();
    }

    pub fn token_fetched(ok: bool) {
        let result = if ok { "ok" } else { "error" };
        TOKEN_FETCH_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn scheduler_running(running: bool) {
        SCHEDULER_RUNNING.set(if running { 1.0 } else { 0.0 });
    }

    pub fn job_failed(job: &str) {
        JOB_FAILURES_TOTAL.with_label_values(&[job]).inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = QUOTE_FETCH_TOTAL.with_label_values(&["synthetic"]).get();
        Metrics::quote_synthetic();
        let after = QUOTE_FETCH_TOTAL.with_label_values(&["synthetic"]).get();
        assert!(after >= before + 1.0);
    }

    #[test]
    fn test_render_contains_metric_names() {
        Metrics::cycle_completed(12.0, 3);
        Metrics::dispatch_outcome("webhook", true);
        let text = Metrics::render();
        assert!(text.contains("tickwatch_cycles_total"));
        assert!(text.contains("tickwatch_dispatch_total"));
    }
}
