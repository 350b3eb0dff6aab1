//! Alert fan-out across notification channels.
//!
//! Channels are attempted sequentially and independently: no short-circuit,
//! no rollback. Each attempt yields one [`DeliveryOutcome`] keyed by channel
//! id.

use crate::channel_store::ChannelStore;
use crate::error::{NotifyError, NotifyResult};
use crate::token_cache::TokenCache;
use crate::transport::{ChannelTransport, DirectMessage};
use crate::truncate::{truncate_for_webhook, WEBHOOK_BYTE_BUDGET};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tickwatch_core::{Channel, ChannelConfig, ChannelKind, DirectConfig, SharedClock};
use tickwatch_telemetry::Metrics;
use tracing::{debug, info, warn};

/// Provider error codes meaning the access token is no longer accepted.
const STALE_TOKEN_CODES: [i64; 3] = [40014, 42001, 42007];

/// Per-send options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Header line placed above the message.
    pub title: Option<String>,
    /// Pointer to the full report, shown when a webhook payload is truncated.
    pub report_hint: Option<String>,
}

impl SendOptions {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            report_hint: None,
        }
    }
}

/// Why a delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Token acquisition failed; nothing was sent.
    Auth,
    /// The provider answered with a non-zero error code.
    Rejected,
    /// Transport-level failure (connect, timeout, HTTP status).
    Network,
    /// Channel disabled or missing required fields.
    Config,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Rejected => "rejected",
            Self::Network => "network",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl DeliveryFailure {
    fn from_error(kind_hint: Option<FailureKind>, err: &NotifyError) -> Self {
        let kind = kind_hint.unwrap_or(match err {
            NotifyError::Auth(_) => FailureKind::Auth,
            NotifyError::Provider { .. } => FailureKind::Rejected,
            NotifyError::Invalid(_) | NotifyError::NotFound(_) | NotifyError::KindMismatch { .. } => {
                FailureKind::Config
            }
            NotifyError::Network(_) | NotifyError::Store(_) => FailureKind::Network,
        });
        let message = match err {
            NotifyError::Provider { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self { kind, message }
    }
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }

    fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed(DeliveryFailure {
            kind,
            message: message.into(),
        })
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => f.write_str("sent"),
            Self::Failed(failure) => write!(f, "failed: {failure}"),
        }
    }
}

/// Outcome for one channel within a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEntry {
    pub channel_name: String,
    pub kind: ChannelKind,
    pub outcome: DeliveryOutcome,
}

/// Outcomes of one dispatch, keyed by channel id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    entries: BTreeMap<String, DispatchEntry>,
}

impl DispatchReport {
    fn record(&mut self, channel: &Channel, outcome: DeliveryOutcome) {
        self.entries.insert(
            channel.id.clone(),
            DispatchEntry {
                channel_name: channel.name.clone(),
                kind: channel.kind(),
                outcome,
            },
        );
    }

    pub fn outcome(&self, channel_id: &str) -> Option<&DeliveryOutcome> {
        self.entries.get(channel_id).map(|e| &e.outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DispatchEntry)> {
        self.entries.iter()
    }

    /// Channel id → outcome.
    pub fn outcomes(&self) -> BTreeMap<String, DeliveryOutcome> {
        self.entries
            .iter()
            .map(|(id, e)| (id.clone(), e.outcome.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn any_sent(&self) -> bool {
        self.entries.values().any(|e| e.outcome.is_sent())
    }

    pub fn sent_count(&self) -> usize {
        self.entries.values().filter(|e| e.outcome.is_sent()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.sent_count()
    }
}

/// Result of a connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

impl ConnectionTest {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Canary text posted by webhook connection tests.
pub const CONNECTION_TEST_MESSAGE: &str = "tickwatch connection test";

/// Fans alerts out to configured channels.
pub struct ChannelDispatcher {
    store: Arc<ChannelStore>,
    transport: Arc<dyn ChannelTransport>,
    tokens: TokenCache,
    byte_budget: usize,
    default_report_hint: Option<String>,
}

impl ChannelDispatcher {
    pub fn new(
        store: Arc<ChannelStore>,
        transport: Arc<dyn ChannelTransport>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            transport,
            tokens: TokenCache::new(clock),
            byte_budget: WEBHOOK_BYTE_BUDGET,
            default_report_hint: None,
        }
    }

    /// Override the webhook byte budget.
    pub fn with_byte_budget(mut self, budget: usize) -> Self {
        self.byte_budget = budget;
        self
    }

    /// Report pointer used when a send does not supply one.
    pub fn with_report_hint(mut self, hint: Option<String>) -> Self {
        self.default_report_hint = hint;
        self
    }

    pub fn store(&self) -> &Arc<ChannelStore> {
        &self.store
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.tokens
    }

    /// Send to every valid channel in the store.
    pub async fn dispatch(&self, message: &str, options: &SendOptions) -> DispatchReport {
        let channels = self.store.valid_channels();
        self.dispatch_to(&channels, message, options).await
    }

    /// Send to the given channels; invalid ones are skipped without an outcome.
    pub async fn dispatch_to(
        &self,
        channels: &[Channel],
        message: &str,
        options: &SendOptions,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for channel in channels {
            if let Some(reason) = channel.invalid_reason() {
                debug!(id = %channel.id, %reason, "Skipping channel");
                continue;
            }
            let outcome = self.send_to_channel(channel, message, options).await;
            report.record(channel, outcome);
        }

        if report.is_empty() {
            warn!("No valid notification channels; alert not delivered");
        } else {
            info!(
                sent = report.sent_count(),
                failed = report.failed_count(),
                "Dispatch complete"
            );
        }
        report
    }

    /// Send to a single channel by id.
    pub async fn dispatch_to_one(
        &self,
        channel_id: &str,
        message: &str,
        options: &SendOptions,
    ) -> NotifyResult<DeliveryOutcome> {
        let channel = self
            .store
            .get(channel_id)
            .ok_or_else(|| NotifyError::NotFound(channel_id.to_string()))?;

        if let Some(reason) = channel.invalid_reason() {
            return Ok(DeliveryOutcome::failed(FailureKind::Config, reason));
        }
        Ok(self.send_to_channel(&channel, message, options).await)
    }

    /// Send to every valid channel of one type.
    pub async fn dispatch_to_type(
        &self,
        kind: ChannelKind,
        message: &str,
        options: &SendOptions,
    ) -> DispatchReport {
        let channels: Vec<Channel> = self
            .store
            .valid_channels()
            .into_iter()
            .filter(|c| c.kind() == kind)
            .collect();
        self.dispatch_to(&channels, message, options).await
    }

    async fn send_to_channel(
        &self,
        channel: &Channel,
        message: &str,
        options: &SendOptions,
    ) -> DeliveryOutcome {
        let outcome = match &channel.config {
            ChannelConfig::Direct(config) => self.send_direct(config, message, options).await,
            ChannelConfig::Webhook(config) => {
                self.send_webhook(&config.endpoint_url, message, options)
                    .await
            }
        };

        Metrics::dispatch_outcome(channel.kind().as_str(), outcome.is_sent());
        match &outcome {
            DeliveryOutcome::Sent => {
                info!(id = %channel.id, name = %channel.name, kind = %channel.kind(), "Message sent")
            }
            DeliveryOutcome::Failed(failure) => warn!(
                id = %channel.id,
                name = %channel.name,
                kind = %channel.kind(),
                error = %failure,
                "Message delivery failed"
            ),
        }
        outcome
    }

    /// Cached token, fetching a new one on miss or expiry.
    async fn access_token(&self, config: &DirectConfig) -> NotifyResult<String> {
        if let Some(token) = self.tokens.get(&config.corp_id, &config.corp_secret) {
            return Ok(token);
        }

        match self
            .transport
            .fetch_token(&config.corp_id, &config.corp_secret)
            .await
        {
            Ok(grant) => {
                Metrics::token_fetched(true);
                let expires_at = self.tokens.insert(
                    &config.corp_id,
                    &config.corp_secret,
                    grant.access_token.clone(),
                    grant.expires_in,
                );
                debug!(corp_id = %config.corp_id, %expires_at, "Access token cached");
                Ok(grant.access_token)
            }
            Err(e) => {
                Metrics::token_fetched(false);
                Err(match e {
                    NotifyError::Auth(_) => e,
                    other => NotifyError::Auth(other.to_string()),
                })
            }
        }
    }

    async fn send_direct(
        &self,
        config: &DirectConfig,
        message: &str,
        options: &SendOptions,
    ) -> DeliveryOutcome {
        let token = match self.access_token(config).await {
            Ok(token) => token,
            Err(e) => {
                return DeliveryOutcome::Failed(DeliveryFailure::from_error(
                    Some(FailureKind::Auth),
                    &e,
                ))
            }
        };

        let content = match options.title.as_deref() {
            Some(title) => format!("{title}\n\n{message}"),
            None => message.to_string(),
        };
        let direct = DirectMessage {
            recipient: config.recipient.clone(),
            agent_id: config.agent_id.clone(),
            content,
        };

        match self.transport.send_direct(&token, &direct).await {
            Ok(()) => DeliveryOutcome::Sent,
            Err(e) => {
                if let NotifyError::Provider { code, .. } = &e {
                    if STALE_TOKEN_CODES.contains(code) {
                        self.tokens.invalidate(&config.corp_id, &config.corp_secret);
                    }
                }
                DeliveryOutcome::Failed(DeliveryFailure::from_error(None, &e))
            }
        }
    }

    async fn send_webhook(
        &self,
        endpoint_url: &str,
        message: &str,
        options: &SendOptions,
    ) -> DeliveryOutcome {
        let content = match options.title.as_deref() {
            Some(title) => format!("**{title}**\n\n{message}"),
            None => message.to_string(),
        };
        let hint = options
            .report_hint
            .as_deref()
            .or(self.default_report_hint.as_deref());
        let content = truncate_for_webhook(&content, self.byte_budget, hint);

        match self.transport.post_webhook(endpoint_url, &content).await {
            Ok(()) => DeliveryOutcome::Sent,
            Err(e) => DeliveryOutcome::Failed(DeliveryFailure::from_error(None, &e)),
        }
    }

    /// Check a channel's connectivity.
    ///
    /// `direct` channels only exercise authorization; `webhook` channels post
    /// a short canary message.
    pub async fn test_connection(&self, channel: &Channel) -> ConnectionTest {
        let missing = channel.config.missing_fields();
        if !missing.is_empty() {
            return ConnectionTest::failed(format!("missing fields: {}", missing.join(", ")));
        }

        match &channel.config {
            ChannelConfig::Direct(config) => match self
                .transport
                .fetch_token(&config.corp_id, &config.corp_secret)
                .await
            {
                Ok(grant) => {
                    Metrics::token_fetched(true);
                    self.tokens.insert(
                        &config.corp_id,
                        &config.corp_secret,
                        grant.access_token,
                        grant.expires_in,
                    );
                    ConnectionTest::ok("authorization succeeded")
                }
                Err(e) => {
                    Metrics::token_fetched(false);
                    ConnectionTest::failed(e.to_string())
                }
            },
            ChannelConfig::Webhook(config) => {
                match self
                    .transport
                    .post_webhook(&config.endpoint_url, CONNECTION_TEST_MESSAGE)
                    .await
                {
                    Ok(()) => ConnectionTest::ok("test message delivered"),
                    Err(e) => ConnectionTest::failed(e.to_string()),
                }
            }
        }
    }

    pub async fn test_connection_by_id(&self, channel_id: &str) -> NotifyResult<ConnectionTest> {
        let channel = self
            .store
            .get(channel_id)
            .ok_or_else(|| NotifyError::NotFound(channel_id.to_string()))?;
        Ok(self.test_connection(&channel).await)
    }

    /// Test every configured channel, enabled or not.
    pub async fn test_all_connections(&self) -> BTreeMap<String, ConnectionTest> {
        let mut results = BTreeMap::new();
        for channel in self.store.list() {
            let result = self.test_connection(&channel).await;
            info!(
                id = %channel.id,
                name = %channel.name,
                success = result.success,
                message = %result.message,
                "Connection test"
            );
            results.insert(channel.id.clone(), result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, SentMessage};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;
    use tickwatch_core::{ManualClock, WebhookConfig};

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        transport: Arc<MockTransport>,
        dispatcher: ChannelDispatcher,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChannelStore::open(dir.path().join("channels.json")).unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let transport = Arc::new(MockTransport::new());
        let dispatcher = ChannelDispatcher::new(store, transport.clone(), clock.clone());
        Fixture {
            _dir: dir,
            clock,
            transport,
            dispatcher,
        }
    }

    fn webhook(url: &str) -> WebhookConfig {
        WebhookConfig {
            endpoint_url: url.to_string(),
        }
    }

    fn direct(corp_id: &str, agent_id: &str) -> DirectConfig {
        DirectConfig {
            corp_id: corp_id.to_string(),
            corp_secret: "secret".to_string(),
            agent_id: agent_id.to_string(),
            recipient: "@all".to_string(),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_attempts_every_channel() {
        let f = fixture();
        let store = f.dispatcher.store();
        let a = store.add_webhook("a", webhook("https://hooks.example/a"), true);
        let b = store.add_webhook("b", webhook("https://hooks.example/b"), true);
        let c = store.add_direct("c", direct("corp", "1000002"), true);
        f.transport.fail_webhook("https://hooks.example/b");

        let report = f.dispatcher.dispatch("AAPL up", &SendOptions::default()).await;
        assert_eq!(report.len(), 3);
        assert_eq!(report.sent_count(), 2);
        assert!(report.any_sent());
        assert_eq!(report.outcome(&a.id), Some(&DeliveryOutcome::Sent));
        assert_eq!(report.outcome(&c.id), Some(&DeliveryOutcome::Sent));
        match report.outcome(&b.id) {
            Some(DeliveryOutcome::Failed(failure)) => assert_eq!(failure.kind, FailureKind::Network),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_total_failure() {
        let f = fixture();
        let store = f.dispatcher.store();
        store.add_webhook("a", webhook("https://hooks.example/a"), true);
        store.add_direct("b", direct("corp", "1000002"), true);
        f.transport.fail_webhook("https://hooks.example/a");
        f.transport.fail_agent("1000002");

        let report = f.dispatcher.dispatch("msg", &SendOptions::default()).await;
        assert_eq!(report.len(), 2);
        assert!(!report.any_sent());
        assert_eq!(report.failed_count(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_skips_send() {
        let f = fixture();
        let ch = f.dispatcher.store().add_direct("app", direct("badcorp", "1"), true);
        f.transport.fail_auth("badcorp");

        let report = f.dispatcher.dispatch("msg", &SendOptions::default()).await;
        match report.outcome(&ch.id) {
            Some(DeliveryOutcome::Failed(failure)) => assert_eq!(failure.kind, FailureKind::Auth),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_token_reused_until_expiry() {
        let f = fixture();
        f.dispatcher.store().add_direct("app", direct("corp", "1"), true);

        f.dispatcher.dispatch("one", &SendOptions::default()).await;
        f.dispatcher.dispatch("two", &SendOptions::default()).await;
        assert_eq!(f.transport.auth_calls(), 1);

        // 7200 s lifetime minus the 300 s margin
        f.clock.advance(Duration::seconds(6900));
        f.dispatcher.dispatch("three", &SendOptions::default()).await;
        assert_eq!(f.transport.auth_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_channels_excluded() {
        let f = fixture();
        let store = f.dispatcher.store();
        store.add_webhook("off", webhook("https://hooks.example/off"), false);
        store.add_webhook("blank", webhook(""), true);

        let report = f.dispatcher.dispatch("msg", &SendOptions::default()).await;
        assert!(report.is_empty());
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_to_one_and_type() {
        let f = fixture();
        let store = f.dispatcher.store();
        let hook = store.add_webhook("room", webhook("https://hooks.example/a"), true);
        store.add_direct("app", direct("corp", "1"), true);
        let off = store.add_webhook("off", webhook("https://hooks.example/off"), false);

        let outcome = f
            .dispatcher
            .dispatch_to_one(&hook.id, "hello", &SendOptions::default())
            .await
            .unwrap();
        assert!(outcome.is_sent());

        let outcome = f
            .dispatcher
            .dispatch_to_one(&off.id, "hello", &SendOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed(DeliveryFailure { kind: FailureKind::Config, .. })
        ));

        assert!(matches!(
            f.dispatcher
                .dispatch_to_one("missing", "hello", &SendOptions::default())
                .await,
            Err(NotifyError::NotFound(_))
        ));

        let report = f
            .dispatcher
            .dispatch_to_type(ChannelKind::Direct, "hello", &SendOptions::default())
            .await;
        assert_eq!(report.len(), 1);
        assert!(report.iter().all(|(_, e)| e.kind == ChannelKind::Direct));
    }

    #[tokio::test]
    async fn test_webhook_payload_truncated_with_title() {
        let f = fixture();
        f.dispatcher
            .store()
            .add_webhook("room", webhook("https://hooks.example/a"), true);

        let body = "涨".repeat(3_000);
        f.dispatcher
            .dispatch(&body, &SendOptions::titled("Daily digest"))
            .await;

        match f.transport.sent().as_slice() {
            [SentMessage::Webhook { content, .. }] => {
                assert!(content.len() <= WEBHOOK_BYTE_BUDGET);
                assert!(content.starts_with("**Daily digest**"));
            }
            other => panic!("unexpected sends: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_tests() {
        let f = fixture();
        let store = f.dispatcher.store();
        let app = store.add_direct("app", direct("corp", "1"), true);
        let hook = store.add_webhook("room", webhook("https://hooks.example/a"), false);
        let broken = store.add_webhook("broken", webhook("https://hooks.example/b"), true);
        f.transport.fail_webhook("https://hooks.example/b");

        let results = f.dispatcher.test_all_connections().await;
        assert_eq!(results.len(), 3);
        assert!(results[&app.id].success);
        assert!(results[&hook.id].success);
        assert!(!results[&broken.id].success);

        // direct test only authorizes
        assert_eq!(f.transport.auth_calls(), 1);
        assert!(f
            .transport
            .sent()
            .iter()
            .all(|m| matches!(m, SentMessage::Webhook { content, .. } if content == CONNECTION_TEST_MESSAGE)));
    }
}
