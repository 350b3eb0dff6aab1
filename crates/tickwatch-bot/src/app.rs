//! Application wiring.
//!
//! Builds the stores, quote provider, dispatcher, monitoring cycle and
//! scheduler from an [`AppConfig`], and exposes the operations the CLI
//! drives.

use crate::config::AppConfig;
use crate::cycle::{CycleSettings, MonitorCycle};
use crate::error::AppResult;
use crate::scheduler::{status_totals, Scheduler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tickwatch_core::{
    Channel, ChannelKind, CycleResult, DirectConfig, Instrument, MarketCalendar, Quote,
    SharedClock, SystemClock, WebhookConfig,
};
use tickwatch_feed::{
    FeedSettings, HttpPriceSource, PriceSource, QuoteProvider, ResilientQuoteProvider,
    SyntheticQuotes,
};
use tickwatch_notify::{
    ChannelDispatcher, ChannelStore, ChannelTransport, ChannelUpdate, ConnectionTest,
    DeliveryOutcome, DispatchReport, HttpTransport, MockTransport, SendOptions,
};
use tickwatch_persistence::JsonLinesWriter;
use tickwatch_registry::{InstrumentRegistry, RegistryError};
use tickwatch_telemetry::StatusTotals;
use tracing::info;

/// Cycle history file prefix (`cycles_YYYY-MM-DD.jsonl`).
const HISTORY_PREFIX: &str = "cycles";

/// One row of the instrument listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentStatus {
    pub symbol: String,
    pub name: String,
    pub market: String,
    pub enabled: bool,
    pub threshold_up: f64,
    pub threshold_down: f64,
    pub last_price: Option<f64>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub market_open: bool,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    clock: SharedClock,
    calendar: MarketCalendar,
    registry: Arc<InstrumentRegistry>,
    store: Arc<ChannelStore>,
    provider: Arc<dyn QuoteProvider>,
    dispatcher: Arc<ChannelDispatcher>,
    scheduler: Scheduler,
}

impl Application {
    /// Build with the live chart source and HTTP transport.
    ///
    /// In mock mode quotes are synthetic and messages are recorded in memory
    /// instead of being sent.
    pub fn new(mut config: AppConfig, config_path: Option<PathBuf>, mock: bool) -> AppResult<Self> {
        let source: Arc<dyn PriceSource> = Arc::new(HttpPriceSource::new(
            config.feed.base_url.clone(),
            Duration::from_secs(config.feed.timeout_secs),
        )?);

        let transport: Arc<dyn ChannelTransport> = if mock {
            info!("Mock mode: synthetic quotes, messages are not delivered");
            config.feed.synthetic_mode = true;
            Arc::new(MockTransport::new())
        } else {
            Arc::new(HttpTransport::new(config.notify.transport_config())?)
        };

        Self::with_components(config, config_path, Arc::new(SystemClock), source, transport)
    }

    /// Build around caller-supplied boundaries.
    pub fn with_components(
        config: AppConfig,
        config_path: Option<PathBuf>,
        clock: SharedClock,
        source: Arc<dyn PriceSource>,
        transport: Arc<dyn ChannelTransport>,
    ) -> AppResult<Self> {
        config.validate()?;
        let calendar = config.market_calendar()?;

        let registry = Arc::new(InstrumentRegistry::open(&config.storage.instruments_path)?);
        let store = Arc::new(ChannelStore::open(&config.storage.channels_path)?);
        info!(
            instruments = registry.len(),
            channels = store.len(),
            "Stores loaded"
        );

        let provider: Arc<dyn QuoteProvider> = Arc::new(ResilientQuoteProvider::new(
            source,
            SyntheticQuotes::new(config.feed.base_prices.clone()),
            FeedSettings {
                synthetic_mode: config.feed.synthetic_mode,
                synthetic_fallback: config.feed.synthetic_fallback,
                base_delay: Duration::from_millis(config.feed.retry_base_delay_ms),
            },
            clock.clone(),
        ));

        let dispatcher = Arc::new(
            ChannelDispatcher::new(store.clone(), transport, clock.clone())
                .with_byte_budget(config.notify.webhook_byte_budget)
                .with_report_hint(config.notify.report_hint.clone()),
        );

        let mut cycle = MonitorCycle::new(
            registry.clone(),
            provider.clone(),
            dispatcher.clone(),
            clock.clone(),
            calendar.clone(),
            CycleSettings::from(&config.monitor),
        );
        if let Some(dir) = config
            .storage
            .history_dir
            .as_ref()
            .filter(|d| !d.as_os_str().is_empty())
        {
            cycle = cycle.with_history(JsonLinesWriter::new(dir, HISTORY_PREFIX, 1));
        }

        let scheduler = Scheduler::new(
            Arc::new(cycle),
            config.schedule.clone(),
            config_path,
            clock.clone(),
        );

        Ok(Self {
            config,
            clock,
            calendar,
            registry,
            store,
            provider,
            dispatcher,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    pub fn channel_store(&self) -> &Arc<ChannelStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<ChannelDispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run a single monitoring cycle.
    pub async fn run_once(&self) -> CycleResult {
        self.scheduler.run_now().await
    }

    pub fn status_totals(&self) -> StatusTotals {
        status_totals(&self.registry, &self.store)
    }

    // ---- instruments ----

    /// Start tracking a symbol. The symbol must yield a quote first.
    pub async fn add_instrument(
        &self,
        symbol: &str,
        name: &str,
        market: &str,
        threshold_up: f64,
        threshold_down: f64,
    ) -> AppResult<Quote> {
        let instrument = Instrument::new(symbol, name, market, threshold_up, threshold_down)?;
        if self.registry.contains(&instrument.symbol) {
            return Err(RegistryError::Duplicate(instrument.symbol).into());
        }

        let quote = self
            .provider
            .fetch(&instrument.symbol, self.config.monitor.max_attempts)
            .await?;

        let symbol = instrument.symbol.clone();
        self.registry.add(instrument)?;
        self.registry
            .record_price(&symbol, quote.current_price, quote.timestamp)?;
        info!(%symbol, price = quote.current_price, synthetic = quote.is_synthetic, "Instrument added");
        Ok(quote)
    }

    pub fn remove_instrument(&self, symbol: &str) -> AppResult<Instrument> {
        Ok(self.registry.remove(symbol)?)
    }

    pub fn set_instrument_enabled(&self, symbol: &str, enabled: bool) -> AppResult<()> {
        Ok(self.registry.set_enabled(symbol, enabled)?)
    }

    pub fn set_thresholds(&self, symbol: &str, up: f64, down: f64) -> AppResult<()> {
        Ok(self.registry.set_thresholds(symbol, up, down)?)
    }

    pub fn instrument_status(&self) -> Vec<InstrumentStatus> {
        let now = self.clock.now();
        self.registry
            .list()
            .into_iter()
            .map(|i| InstrumentStatus {
                market_open: self.calendar.is_market_open(&i.market, now),
                symbol: i.symbol,
                name: i.name,
                market: i.market,
                enabled: i.enabled,
                threshold_up: i.threshold_up,
                threshold_down: i.threshold_down,
                last_price: i.last_price,
                last_update_time: i.last_update_time,
                last_alert_time: i.last_alert_time,
            })
            .collect()
    }

    // ---- channels ----

    pub fn add_direct_channel(&self, name: &str, config: DirectConfig, enabled: bool) -> Channel {
        self.store.add_direct(name, config, enabled)
    }

    pub fn add_webhook_channel(&self, name: &str, config: WebhookConfig, enabled: bool) -> Channel {
        self.store.add_webhook(name, config, enabled)
    }

    pub fn update_channel(&self, id: &str, update: ChannelUpdate) -> AppResult<Channel> {
        Ok(self.store.update(id, update)?)
    }

    pub fn set_channel_enabled(&self, id: &str, enabled: bool) -> AppResult<Channel> {
        Ok(self.store.set_enabled(id, enabled)?)
    }

    pub fn remove_channel(&self, id: &str) -> AppResult<Channel> {
        Ok(self.store.delete(id)?)
    }

    pub fn channels(&self, kind: Option<ChannelKind>) -> Vec<Channel> {
        match kind {
            Some(kind) => self.store.by_kind(kind),
            None => self.store.list(),
        }
    }

    pub async fn test_channel(&self, id: &str) -> AppResult<ConnectionTest> {
        Ok(self.dispatcher.test_connection_by_id(id).await?)
    }

    pub async fn test_all_channels(&self) -> BTreeMap<String, ConnectionTest> {
        self.dispatcher.test_all_connections().await
    }

    // ---- manual notifications ----

    pub async fn notify_all(&self, message: &str, options: &SendOptions) -> DispatchReport {
        self.dispatcher.dispatch(message, options).await
    }

    pub async fn notify_channel(
        &self,
        id: &str,
        message: &str,
        options: &SendOptions,
    ) -> AppResult<DeliveryOutcome> {
        Ok(self.dispatcher.dispatch_to_one(id, message, options).await?)
    }

    pub async fn notify_kind(
        &self,
        kind: ChannelKind,
        message: &str,
        options: &SendOptions,
    ) -> DispatchReport {
        self.dispatcher.dispatch_to_type(kind, message, options).await
    }

    /// Stop the scheduler if it is running.
    pub async fn shutdown(&self) -> AppResult<()> {
        if self.scheduler.stop().await {
            info!("Shutdown complete");
        }
        Ok(())
    }
}
