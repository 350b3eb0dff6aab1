//! Application configuration.
//!
//! Loaded from a TOML file (every section optional) and overlaid with
//! `TICKWATCH__SECTION__KEY` environment variables.

use crate::error::{AppError, AppResult};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tickwatch_core::market_hours::default_market_configs;
use tickwatch_core::{MarketCalendar, MarketHoursConfig};
use tickwatch_feed::default_base_prices;
use tickwatch_notify::TransportConfig;

/// Default config path when neither `--config` nor `TICKWATCH_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/tickwatch.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TICKWATCH_CONFIG";

/// What happens to alerts while an instrument's market is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketHoursPolicy {
    /// Log that the market is closed, alert anyway.
    #[default]
    Advisory,
    /// Keep monitoring but hold alerts until the market opens.
    SuppressAlerts,
}

/// Upper bound for job intervals (one week).
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Upper bound for the alert cooldown (one year).
pub const MAX_COOLDOWN_MINUTES: u64 = 365 * 24 * 60;

/// Monitoring cycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Minimum minutes between alerts for the same instrument. Default: 30.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    /// Pause between consecutive quote fetches (ms). Default: 500.
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
    /// Quote fetch attempts per instrument. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub market_hours_policy: MarketHoursPolicy,
}

fn default_cooldown_minutes() -> u64 {
    30
}

fn default_inter_call_delay_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            inter_call_delay_ms: default_inter_call_delay_ms(),
            max_attempts: default_max_attempts(),
            market_hours_policy: MarketHoursPolicy::default(),
        }
    }
}

/// Quote feed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Chart endpoint base URL.
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,
    /// Per-request timeout (seconds). Default: 10.
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
    /// Backoff base (ms); the delay before retry `n` is `base * 2^n`. Default: 1000.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Serve synthetic quotes only. Default: false.
    #[serde(default)]
    pub synthetic_mode: bool,
    /// Serve a synthetic quote when every live attempt fails. Default: true.
    #[serde(default = "default_true")]
    pub synthetic_fallback: bool,
    /// Synthetic base price per symbol.
    #[serde(default = "default_base_prices")]
    pub base_prices: HashMap<String, f64>,
}

fn default_feed_base_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_feed_timeout_secs() -> u64 {
    10
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_base_url(),
            timeout_secs: default_feed_timeout_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            synthetic_mode: false,
            synthetic_fallback: true,
            base_prices: default_base_prices(),
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Messaging API base URL for `direct` channels.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Default: 10.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Default: 30.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Webhook content limit in bytes. Default: 3500.
    #[serde(default = "default_webhook_byte_budget")]
    pub webhook_byte_budget: usize,
    /// Where the full report lives, shown in truncation notices.
    #[serde(default)]
    pub report_hint: Option<String>,
}

fn default_api_base() -> String {
    tickwatch_notify::transport::DEFAULT_API_BASE.to_string()
}

fn default_auth_timeout_secs() -> u64 {
    10
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_webhook_byte_budget() -> usize {
    tickwatch_notify::WEBHOOK_BYTE_BUDGET
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            proxy_url: None,
            auth_timeout_secs: default_auth_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            webhook_byte_budget: default_webhook_byte_budget(),
            report_hint: None,
        }
    }
}

impl NotifyConfig {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            api_base: self.api_base.clone(),
            proxy_url: self.proxy_url.clone(),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minutes between monitoring cycles. Default: 1.
    #[serde(default = "default_check_interval_minutes")]
    pub check_interval_minutes: u64,
    /// Minutes between status reports. Default: 60.
    #[serde(default = "default_status_report_interval_minutes")]
    pub status_report_interval_minutes: u64,
    /// UTC time of the daily reload, "HH:MM". Default: "09:00".
    #[serde(default = "default_daily_reload_at")]
    pub daily_reload_at: String,
    /// Scheduler loop tick (ms). Default: 1000.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Bound on joining the loop at stop (seconds). Default: 5.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_check_interval_minutes() -> u64 {
    1
}

fn default_status_report_interval_minutes() -> u64 {
    60
}

fn default_daily_reload_at() -> String {
    "09:00".to_string()
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_stop_timeout_secs() -> u64 {
    5
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: default_check_interval_minutes(),
            status_report_interval_minutes: default_status_report_interval_minutes(),
            daily_reload_at: default_daily_reload_at(),
            tick_ms: default_tick_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn daily_reload_time(&self) -> AppResult<NaiveTime> {
        NaiveTime::parse_from_str(self.daily_reload_at.trim(), "%H:%M").map_err(|e| {
            AppError::Config(format!(
                "schedule.daily_reload_at {:?}: {e}",
                self.daily_reload_at
            ))
        })
    }
}

/// Store locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_instruments_path")]
    pub instruments_path: PathBuf,
    #[serde(default = "default_channels_path")]
    pub channels_path: PathBuf,
    /// Directory for `cycles_YYYY-MM-DD.jsonl`; unset disables history.
    #[serde(default = "default_history_dir")]
    pub history_dir: Option<PathBuf>,
}

fn default_instruments_path() -> PathBuf {
    PathBuf::from("data/instruments.json")
}

fn default_channels_path() -> PathBuf {
    PathBuf::from("data/channels.json")
}

fn default_history_dir() -> Option<PathBuf> {
    Some(PathBuf::from("data/history"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            instruments_path: default_instruments_path(),
            channels_path: default_channels_path(),
            history_dir: default_history_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Fallback filter when `RUST_LOG` is unset. Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Market identifier → session hours.
    #[serde(default = "default_market_configs")]
    pub markets: HashMap<String, MarketHoursConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            feed: FeedConfig::default(),
            notify: NotifyConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            markets: default_market_configs(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Resolve the config path: explicit > `TICKWATCH_CONFIG` > default.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path` (optional) plus environment overrides.
    pub fn load(path: &Path) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("TICKWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to render config: {e}")))
    }

    pub fn validate(&self) -> AppResult<()> {
        if !(1..=MAX_INTERVAL_MINUTES).contains(&self.schedule.check_interval_minutes) {
            return Err(AppError::Config(format!(
                "schedule.check_interval_minutes must be between 1 and {MAX_INTERVAL_MINUTES}"
            )));
        }
        if !(1..=MAX_INTERVAL_MINUTES).contains(&self.schedule.status_report_interval_minutes) {
            return Err(AppError::Config(format!(
                "schedule.status_report_interval_minutes must be between 1 and {MAX_INTERVAL_MINUTES}"
            )));
        }
        if self.monitor.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            return Err(AppError::Config(format!(
                "monitor.cooldown_minutes must be at most {MAX_COOLDOWN_MINUTES}"
            )));
        }
        if self.schedule.tick_ms == 0 {
            return Err(AppError::Config("schedule.tick_ms must be positive".to_string()));
        }
        if self.monitor.max_attempts == 0 {
            return Err(AppError::Config(
                "monitor.max_attempts must be at least 1".to_string(),
            ));
        }
        self.schedule.daily_reload_time()?;
        self.market_calendar()?;
        Ok(())
    }

    pub fn market_calendar(&self) -> AppResult<MarketCalendar> {
        Ok(MarketCalendar::from_configs(&self.markets)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.monitor.cooldown_minutes, 30);
        assert_eq!(config.monitor.max_attempts, 3);
        assert_eq!(config.monitor.market_hours_policy, MarketHoursPolicy::Advisory);
        assert_eq!(config.schedule.check_interval_minutes, 1);
        assert_eq!(config.schedule.daily_reload_at, "09:00");
        assert_eq!(config.notify.webhook_byte_budget, 3500);
        assert!(config.feed.synthetic_fallback);
        assert_eq!(config.feed.base_prices["AAPL"], 150.0);
        assert!(config.markets.contains_key("HK"));
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
            [monitor]
            cooldown_minutes = 10
            market_hours_policy = "suppress_alerts"

            [schedule]
            check_interval_minutes = 5
            daily_reload_at = "08:30"

            [markets.SH]
            timezone = "Asia/Shanghai"
            open = "09:30"
            close = "15:00"
        "#;
        let config = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.monitor.cooldown_minutes, 10);
        assert_eq!(config.monitor.inter_call_delay_ms, 500);
        assert_eq!(
            config.monitor.market_hours_policy,
            MarketHoursPolicy::SuppressAlerts
        );
        assert_eq!(
            config.schedule.daily_reload_time().unwrap(),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap()
        );
        assert!(config.markets.contains_key("SH"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AppConfig::from_toml_str("[schedule]\ncheck_interval_minutes = 0").is_err());
        assert!(AppConfig::from_toml_str(
            "[schedule]\ncheck_interval_minutes = 9223372036854775807"
        )
        .is_err());
        assert!(AppConfig::from_toml_str(
            "[schedule]\nstatus_report_interval_minutes = 10081"
        )
        .is_err());
        assert!(AppConfig::from_toml_str("[monitor]\ncooldown_minutes = 525601").is_err());
        assert!(AppConfig::from_toml_str("[monitor]\ncooldown_minutes = 525600").is_ok());
        assert!(AppConfig::from_toml_str("[schedule]\ndaily_reload_at = \"25:00\"").is_err());
        assert!(AppConfig::from_toml_str(
            "[markets.XX]\ntimezone = \"Nowhere/City\"\nopen = \"09:00\"\nclose = \"10:00\""
        )
        .is_err());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.schedule.status_report_interval_minutes, 60);
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickwatch.toml");
        std::fs::write(
            &path,
            "[storage]\ninstruments_path = \"/tmp/tw/instruments.json\"\n[telemetry]\nlog_level = \"debug\"\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(
            config.storage.instruments_path,
            PathBuf::from("/tmp/tw/instruments.json")
        );
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_toml_render_parses_back() {
        let config = AppConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(AppConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
