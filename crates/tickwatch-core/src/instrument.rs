//! Tracked instrument definition and per-instrument monitoring state.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default upward alert threshold (percent).
pub const DEFAULT_THRESHOLD_UP: f64 = 5.0;

/// Default downward alert threshold (percent).
pub const DEFAULT_THRESHOLD_DOWN: f64 = -5.0;

fn default_enabled() -> bool {
    true
}

fn default_threshold_up() -> f64 {
    DEFAULT_THRESHOLD_UP
}

fn default_threshold_down() -> f64 {
    DEFAULT_THRESHOLD_DOWN
}

/// A tracked symbol with alert thresholds and mutable monitoring state.
///
/// `threshold_down` is always `<= 0`; constructors and
/// [`Instrument::set_thresholds`] reject values that would break this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Unique key (e.g. "AAPL", "0700.HK").
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Market identifier (e.g. "US", "HK").
    pub market: String,
    /// Alert when the change percent reaches or exceeds this value.
    #[serde(default = "default_threshold_up")]
    pub threshold_up: f64,
    /// Alert when the change percent reaches or falls below this value.
    #[serde(default = "default_threshold_down")]
    pub threshold_down: f64,
    /// Disabled instruments are retained but skipped by cycles.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Price from the last successful fetch.
    #[serde(default)]
    pub last_price: Option<f64>,
    /// Time of the last successful fetch.
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
    /// Time of the last alert accepted by at least one channel.
    #[serde(default)]
    pub last_alert_time: Option<DateTime<Utc>>,
}

impl Instrument {
    /// Create a new enabled instrument with no monitoring history.
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        market: impl Into<String>,
        threshold_up: f64,
        threshold_down: f64,
    ) -> Result<Self> {
        let symbol = symbol.into().trim().to_string();
        if symbol.is_empty() {
            return Err(CoreError::InvalidSymbol("symbol is empty".to_string()));
        }
        Self::validate_thresholds(threshold_up, threshold_down)?;

        let name = name.into();
        let name = if name.trim().is_empty() {
            symbol.clone()
        } else {
            name
        };

        Ok(Self {
            symbol,
            name,
            market: market.into().trim().to_uppercase(),
            threshold_up,
            threshold_down,
            enabled: true,
            last_price: None,
            last_update_time: None,
            last_alert_time: None,
        })
    }

    /// Check the threshold invariants: `up > 0`, `down <= 0`, both finite.
    pub fn validate_thresholds(threshold_up: f64, threshold_down: f64) -> Result<()> {
        if !threshold_up.is_finite() || threshold_up <= 0.0 {
            return Err(CoreError::InvalidThreshold(format!(
                "threshold_up must be positive, got {threshold_up}"
            )));
        }
        if !threshold_down.is_finite() || threshold_down > 0.0 {
            return Err(CoreError::InvalidThreshold(format!(
                "threshold_down must be <= 0, got {threshold_down}"
            )));
        }
        Ok(())
    }

    /// Replace both thresholds after validating them.
    pub fn set_thresholds(&mut self, threshold_up: f64, threshold_down: f64) -> Result<()> {
        Self::validate_thresholds(threshold_up, threshold_down)?;
        self.threshold_up = threshold_up;
        self.threshold_down = threshold_down;
        Ok(())
    }

    /// Fold a successful fetch into the monitoring state.
    pub fn record_price(&mut self, price: f64, at: DateTime<Utc>) {
        self.last_price = Some(price);
        self.last_update_time = Some(at);
    }

    /// Whether the cooldown since the last alert has elapsed.
    ///
    /// True when no alert was ever sent, or when at least
    /// `cooldown_minutes` have passed since `last_alert_time`. A cooldown
    /// too long to represent never elapses.
    pub fn can_alert(&self, now: DateTime<Utc>, cooldown_minutes: u64) -> bool {
        match self.last_alert_time {
            None => true,
            Some(last) => i64::try_from(cooldown_minutes)
                .ok()
                .and_then(chrono::Duration::try_minutes)
                .is_some_and(|cooldown| now - last >= cooldown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn aapl() -> Instrument {
        Instrument::new("AAPL", "Apple", "us", 5.0, -5.0).unwrap()
    }

    #[test]
    fn test_new_normalizes_fields() {
        let inst = Instrument::new(" TSLA ", "", "us", 3.0, -2.5).unwrap();
        assert_eq!(inst.symbol, "TSLA");
        assert_eq!(inst.name, "TSLA");
        assert_eq!(inst.market, "US");
        assert!(inst.enabled);
        assert!(inst.last_price.is_none());
    }

    #[test]
    fn test_rejects_positive_threshold_down() {
        assert!(matches!(
            Instrument::new("AAPL", "Apple", "US", 5.0, 1.0),
            Err(CoreError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_threshold_up() {
        assert!(Instrument::new("AAPL", "Apple", "US", 0.0, -5.0).is_err());
        assert!(Instrument::new("AAPL", "Apple", "US", f64::NAN, -5.0).is_err());
    }

    #[test]
    fn test_set_thresholds_keeps_old_values_on_error() {
        let mut inst = aapl();
        assert!(inst.set_thresholds(4.0, 0.5).is_err());
        assert_eq!(inst.threshold_up, 5.0);
        assert_eq!(inst.threshold_down, -5.0);

        inst.set_thresholds(4.0, 0.0).unwrap();
        assert_eq!(inst.threshold_up, 4.0);
        assert_eq!(inst.threshold_down, 0.0);
    }

    #[test]
    fn test_cooldown_boundaries() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        let mut inst = aapl();
        assert!(inst.can_alert(now, 30));

        inst.last_alert_time = Some(now - chrono::Duration::minutes(29));
        assert!(!inst.can_alert(now, 30));

        inst.last_alert_time = Some(now - chrono::Duration::minutes(30));
        assert!(inst.can_alert(now, 30));

        inst.last_alert_time = Some(now - chrono::Duration::minutes(31));
        assert!(inst.can_alert(now, 30));
    }

    #[test]
    fn test_unrepresentable_cooldown_never_elapses() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        let mut inst = aapl();
        inst.last_alert_time = Some(now - chrono::Duration::days(365));
        assert!(!inst.can_alert(now, u64::MAX));
        assert!(!inst.can_alert(now, i64::MAX as u64));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let json = r#"{"symbol":"0700.HK","name":"Tencent","market":"HK"}"#;
        let inst: Instrument = serde_json::from_str(json).unwrap();
        assert!(inst.enabled);
        assert_eq!(inst.threshold_up, DEFAULT_THRESHOLD_UP);
        assert_eq!(inst.threshold_down, DEFAULT_THRESHOLD_DOWN);
        assert!(inst.last_alert_time.is_none());
    }
}
