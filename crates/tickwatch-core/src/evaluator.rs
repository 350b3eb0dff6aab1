//! Threshold evaluation.
//!
//! A pure function over an instrument's thresholds and a quote. Synthetic
//! quotes take exactly the same path as live ones.

use crate::instrument::Instrument;
use crate::quote::Quote;

/// Which bound was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Outcome of a threshold check.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDecision {
    pub should_alert: bool,
    /// Human-readable reason; empty when no bound was crossed.
    pub reason: String,
    pub direction: Option<Direction>,
}

impl AlertDecision {
    fn quiet() -> Self {
        Self {
            should_alert: false,
            reason: String::new(),
            direction: None,
        }
    }
}

/// Format a percent value, keeping at least one decimal place.
///
/// `5.0` renders as "5.0", `2.25` as "2.25".
pub fn format_percent(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Check a quote against the instrument's bounds.
///
/// Alerts when `change_percent >= threshold_up` or
/// `change_percent <= threshold_down`. The down reason reports the
/// threshold magnitude only.
pub fn evaluate(instrument: &Instrument, quote: &Quote) -> AlertDecision {
    let pct = quote.change_percent;

    if pct >= instrument.threshold_up {
        AlertDecision {
            should_alert: true,
            reason: format!(
                "rise exceeded threshold {}%",
                format_percent(instrument.threshold_up)
            ),
            direction: Some(Direction::Up),
        }
    } else if pct <= instrument.threshold_down {
        AlertDecision {
            should_alert: true,
            reason: format!(
                "drop exceeded threshold {}%",
                format_percent(instrument.threshold_down.abs())
            ),
            direction: Some(Direction::Down),
        }
    } else {
        AlertDecision::quiet()
    }
}
