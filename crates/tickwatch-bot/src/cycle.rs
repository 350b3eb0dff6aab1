//! One monitoring pass over the enabled instruments.
//!
//! Fetch, evaluate, gate by market hours and cooldown, dispatch, and fold the
//! outcome back into the registry. The cycle never fails outward; every
//! problem becomes a count in the returned [`CycleResult`].

use crate::config::{MarketHoursPolicy, MonitorConfig};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickwatch_core::{
    evaluate, AlertDecision, CycleResult, Direction, Instrument, MarketCalendar, Quote,
    SharedClock,
};
use tickwatch_feed::QuoteProvider;
use tickwatch_notify::{ChannelDispatcher, SendOptions};
use tickwatch_persistence::JsonLinesWriter;
use tickwatch_registry::InstrumentRegistry;
use tickwatch_telemetry::Metrics;
use tracing::{debug, info, warn};

/// Settings a cycle reads on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    pub cooldown_minutes: u64,
    pub inter_call_delay: Duration,
    pub max_attempts: u32,
    pub market_hours_policy: MarketHoursPolicy,
}

impl From<&MonitorConfig> for CycleSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            cooldown_minutes: config.cooldown_minutes,
            inter_call_delay: Duration::from_millis(config.inter_call_delay_ms),
            max_attempts: config.max_attempts,
            market_hours_policy: config.market_hours_policy,
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// Render an alert message.
pub fn format_alert(
    instrument: &Instrument,
    quote: &Quote,
    decision: &AlertDecision,
    at: DateTime<Utc>,
    market_open: bool,
) -> String {
    let glyph = match decision.direction {
        Some(Direction::Down) => "📉",
        _ => "📈",
    };

    let mut lines = vec![
        format!("{glyph} Price alert: {} ({})", instrument.name, instrument.symbol),
        format!("Market: {}", instrument.market),
        format!("Price: {:.2}", quote.current_price),
        format!(
            "Change: {:+.2} ({:+.2}%)",
            quote.change, quote.change_percent
        ),
        format!("Reason: {}", decision.reason),
        format!("Time: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
    ];
    if !market_open {
        lines.push("Note: market is currently closed".to_string());
    }
    if quote.is_synthetic {
        lines.push("Note: synthetic data, live quote unavailable".to_string());
    }
    lines.join("\n")
}

/// Monitoring cycle.
pub struct MonitorCycle {
    registry: Arc<InstrumentRegistry>,
    provider: Arc<dyn QuoteProvider>,
    dispatcher: Arc<ChannelDispatcher>,
    clock: SharedClock,
    calendar: MarketCalendar,
    settings: CycleSettings,
    history: Option<Mutex<JsonLinesWriter<CycleResult>>>,
    /// Held for the whole pass so cycles never overlap.
    running: tokio::sync::Mutex<()>,
}

impl MonitorCycle {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        provider: Arc<dyn QuoteProvider>,
        dispatcher: Arc<ChannelDispatcher>,
        clock: SharedClock,
        calendar: MarketCalendar,
        settings: CycleSettings,
    ) -> Self {
        Self {
            registry,
            provider,
            dispatcher,
            clock,
            calendar,
            settings,
            history: None,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Append each result to a daily JSON Lines history file.
    pub fn with_history(mut self, writer: JsonLinesWriter<CycleResult>) -> Self {
        self.history = Some(Mutex::new(writer));
        self
    }

    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ChannelDispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> CycleSettings {
        self.settings
    }

    /// Run one pass. Waits for any in-flight pass to finish first.
    pub async fn run(&self) -> CycleResult {
        let _running = self.running.lock().await;

        let started = Instant::now();
        let now = self.clock.now();
        let mut result = CycleResult::started_at(now);
        result.total_instruments = self.registry.len();

        let instruments = self.registry.enabled();
        result.monitored = instruments.len();
        info!(
            total = result.total_instruments,
            enabled = result.monitored,
            "Starting monitoring cycle"
        );

        for (idx, instrument) in instruments.iter().enumerate() {
            if idx > 0 && !self.settings.inter_call_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_call_delay).await;
            }
            self.process(instrument, now, &mut result).await;
        }

        if let Err(e) = self.registry.save() {
            warn!(error = %e, "Failed to persist instrument state");
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        Metrics::cycle_completed(result.duration_ms as f64, result.monitored);

        if let Some(history) = &self.history {
            let mut writer = history.lock();
            if let Err(e) = writer.add_record(result.clone()) {
                warn!(error = %e, "Failed to append cycle history");
            }
        }

        info!(
            monitored = result.monitored,
            updated = result.successful_updates,
            alerts = result.alerts_sent,
            errors = result.errors,
            duration_ms = result.duration_ms,
            "Monitoring cycle complete"
        );
        result
    }

    async fn process(&self, instrument: &Instrument, now: DateTime<Utc>, result: &mut CycleResult) {
        let symbol = instrument.symbol.as_str();

        let quote = match self.provider.fetch(symbol, self.settings.max_attempts).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(%symbol, error = %e, "Quote unavailable");
                Metrics::quote_failed();
                result.errors += 1;
                return;
            }
        };

        if quote.is_synthetic {
            Metrics::quote_synthetic();
        } else {
            Metrics::quote_live();
        }
        result.successful_updates += 1;

        if let Err(e) = self
            .registry
            .record_price(symbol, quote.current_price, quote.timestamp)
        {
            // Removed while the cycle was running.
            warn!(%symbol, error = %e, "Instrument vanished mid-cycle");
            return;
        }

        debug!(
            %symbol,
            price = quote.current_price,
            change_pct = quote.change_percent,
            synthetic = quote.is_synthetic,
            "Quote recorded"
        );

        let decision = evaluate(instrument, &quote);
        if !decision.should_alert {
            return;
        }

        let market_open = self.calendar.is_market_open(&instrument.market, now);
        if !market_open {
            match self.settings.market_hours_policy {
                MarketHoursPolicy::Advisory => {
                    debug!(%symbol, market = %instrument.market, "Market closed, alerting anyway");
                }
                MarketHoursPolicy::SuppressAlerts => {
                    info!(%symbol, market = %instrument.market, "Market closed, alert held");
                    Metrics::alert_suppressed("market_closed");
                    return;
                }
            }
        }

        if !self
            .registry
            .can_alert(symbol, now, self.settings.cooldown_minutes)
        {
            info!(%symbol, reason = %decision.reason, "Alert suppressed by cooldown");
            Metrics::alert_suppressed("cooldown");
            return;
        }

        let message = format_alert(instrument, &quote, &decision, now, market_open);
        let report = self
            .dispatcher
            .dispatch(&message, &SendOptions::default())
            .await;

        if report.any_sent() {
            if let Err(e) = self.registry.record_alert(symbol, now) {
                warn!(%symbol, error = %e, "Failed to record alert time");
            }
            result.alerts_sent += 1;
            let direction = match decision.direction {
                Some(Direction::Down) => "down",
                _ => "up",
            };
            Metrics::alert_sent(direction);
            info!(
                %symbol,
                reason = %decision.reason,
                channels = report.sent_count(),
                "Alert sent"
            );
        } else {
            result.errors += 1;
            Metrics::alert_suppressed("undelivered");
            warn!(
                %symbol,
                attempted = report.len(),
                "Alert not accepted by any channel"
            );
        }
    }
}
