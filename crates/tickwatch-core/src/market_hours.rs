//! Market hours lookup.
//!
//! Classifies a UTC instant as inside or outside the regular session of a
//! market, evaluated in the market's local timezone. Holidays are not
//! modelled; weekends are always closed.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serializable market session definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHoursConfig {
    /// IANA timezone name (e.g. "America/New_York").
    pub timezone: String,
    /// Local open time, "HH:MM".
    pub open: String,
    /// Local close time, "HH:MM".
    pub close: String,
}

impl MarketHoursConfig {
    pub fn new(timezone: &str, open: &str, close: &str) -> Self {
        Self {
            timezone: timezone.to_string(),
            open: open.to_string(),
            close: close.to_string(),
        }
    }
}

/// Parsed market session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHours {
    pub tz: Tz,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| CoreError::InvalidConfig(format!("invalid time {value:?}: {e}")))
}

impl MarketHours {
    pub fn from_config(config: &MarketHoursConfig) -> Result<Self> {
        let tz: Tz = config.timezone.parse().map_err(|e| {
            CoreError::InvalidConfig(format!("unknown timezone {:?}: {e}", config.timezone))
        })?;
        let open = parse_hhmm(&config.open)?;
        let close = parse_hhmm(&config.close)?;
        if open >= close {
            return Err(CoreError::InvalidConfig(format!(
                "market open {open} must be before close {close}"
            )));
        }
        Ok(Self { tz, open, close })
    }

    /// Whether `now` falls in `[open, close)` on a local weekday.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }
}

/// Default sessions for the markets the monitor ships with.
pub fn default_market_configs() -> HashMap<String, MarketHoursConfig> {
    HashMap::from([
        (
            "US".to_string(),
            MarketHoursConfig::new("America/New_York", "09:30", "16:00"),
        ),
        (
            "HK".to_string(),
            MarketHoursConfig::new("Asia/Hong_Kong", "09:30", "16:00"),
        ),
    ])
}

/// Market identifier → session table.
#[derive(Debug, Clone, Default)]
pub struct MarketCalendar {
    markets: HashMap<String, MarketHours>,
}

impl MarketCalendar {
    /// Build from config entries; market keys are uppercased.
    pub fn from_configs(configs: &HashMap<String, MarketHoursConfig>) -> Result<Self> {
        let mut markets = HashMap::with_capacity(configs.len());
        for (market, config) in configs {
            markets.insert(market.trim().to_uppercase(), MarketHours::from_config(config)?);
        }
        Ok(Self { markets })
    }

    pub fn get(&self, market: &str) -> Option<&MarketHours> {
        self.markets.get(&market.trim().to_uppercase())
    }

    /// Whether the market is in its regular session.
    ///
    /// Unknown markets are treated as always open.
    #[must_use]
    pub fn is_market_open(&self, market: &str, now: DateTime<Utc>) -> bool {
        self.get(market).map_or(true, |hours| hours.is_open_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(year: i32, month: u32, day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, 0).unwrap()
    }

    fn calendar() -> MarketCalendar {
        MarketCalendar::from_configs(&default_market_configs()).unwrap()
    }

    #[test]
    fn test_us_session_in_local_time() {
        let cal = calendar();
        // 2026-02-09 is Monday; New York is UTC-5 in February
        assert!(!cal.is_market_open("US", utc(2026, 2, 9, 14, 29)));
        assert!(cal.is_market_open("US", utc(2026, 2, 9, 14, 30)));
        assert!(cal.is_market_open("US", utc(2026, 2, 9, 20, 59)));
        assert!(!cal.is_market_open("US", utc(2026, 2, 9, 21, 0)));
    }

    #[test]
    fn test_us_session_follows_dst() {
        // 2026-07-06 is Monday; New York is UTC-4 in July
        assert!(calendar().is_market_open("us", utc(2026, 7, 6, 13, 30)));
    }

    #[test]
    fn test_hk_session() {
        let cal = calendar();
        // Hong Kong is UTC+8
        assert!(cal.is_market_open("HK", utc(2026, 2, 9, 2, 0)));
        assert!(!cal.is_market_open("HK", utc(2026, 2, 9, 9, 0)));
    }

    #[test]
    fn test_weekend_closed() {
        // 2026-02-07 is Saturday
        assert!(!calendar().is_market_open("US", utc(2026, 2, 7, 16, 0)));
    }

    #[test]
    fn test_unknown_market_open() {
        assert!(calendar().is_market_open("LSE", utc(2026, 2, 7, 3, 0)));
    }

    #[test]
    fn test_rejects_bad_config() {
        let bad_tz = MarketHoursConfig::new("Mars/Olympus", "09:30", "16:00");
        assert!(MarketHours::from_config(&bad_tz).is_err());

        let inverted = MarketHoursConfig::new("Asia/Hong_Kong", "16:00", "09:30");
        assert!(MarketHours::from_config(&inverted).is_err());
    }
}
