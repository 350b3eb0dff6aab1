//! Channel transport.
//!
//! [`ChannelTransport`] is the wire boundary for both channel types. The
//! HTTP implementation speaks the enterprise messaging API; [`MockTransport`]
//! records calls and fails on demand for tests.

use crate::error::{NotifyError, NotifyResult};
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tickwatch_core::BoxFuture;
use tracing::debug;

/// Default messaging API base URL.
pub const DEFAULT_API_BASE: &str = "https://qyapi.weixin.qq.com";

/// Default timeout for token requests.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for message sends.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Token lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 7200;

/// Transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub api_base: String,
    /// Proxy for all outbound requests (e.g. "http://127.0.0.1:8080").
    pub proxy_url: Option<String>,
    pub auth_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            proxy_url: None,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Access token issued by the authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Declared lifetime in seconds.
    pub expires_in: i64,
}

/// Text message for a `direct` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub recipient: String,
    pub agent_id: String,
    pub content: String,
}

/// Wire boundary for channel delivery.
pub trait ChannelTransport: Send + Sync {
    /// Exchange credentials for an access token.
    fn fetch_token<'a>(
        &'a self,
        corp_id: &'a str,
        corp_secret: &'a str,
    ) -> BoxFuture<'a, NotifyResult<TokenGrant>>;

    /// Send a text message through the application API.
    fn send_direct<'a>(
        &'a self,
        access_token: &'a str,
        message: &'a DirectMessage,
    ) -> BoxFuture<'a, NotifyResult<()>>;

    /// Post a markdown message to a webhook endpoint.
    fn post_webhook<'a>(&'a self, endpoint_url: &'a str, content: &'a str)
        -> BoxFuture<'a, NotifyResult<()>>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl ApiResponse {
    fn into_result(self) -> NotifyResult<Self> {
        if self.errcode != 0 {
            return Err(NotifyError::Provider {
                code: self.errcode,
                message: self.errmsg,
            });
        }
        Ok(self)
    }
}

/// HTTP transport over reqwest.
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> NotifyResult<Self> {
        let mut builder = Client::builder();
        if let Some(proxy_url) = config.proxy_url.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| NotifyError::Network(format!("Invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| NotifyError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn execute(request: RequestBuilder) -> NotifyResult<ApiResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Network(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Network(format!("HTTP {status}: {body}")));
        }

        response
            .json::<ApiResponse>()
            .await
            .map_err(|e| NotifyError::Network(format!("Failed to parse response: {e}")))?
            .into_result()
    }

    async fn get_token(&self, corp_id: &str, corp_secret: &str) -> NotifyResult<TokenGrant> {
        let request = self
            .client
            .get(self.api_url("/cgi-bin/gettoken"))
            .query(&[("corpid", corp_id), ("corpsecret", corp_secret)])
            .timeout(self.config.auth_timeout);

        let response = Self::execute(request).await.map_err(|e| match e {
            NotifyError::Provider { code, message } => {
                NotifyError::Auth(format!("errcode {code}: {message}"))
            }
            other => NotifyError::Auth(other.to_string()),
        })?;

        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NotifyError::Auth("response carried no access_token".to_string()))?;

        debug!(%corp_id, expires_in = ?response.expires_in, "Access token issued");
        Ok(TokenGrant {
            access_token,
            expires_in: response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        })
    }

    async fn send_text(&self, access_token: &str, message: &DirectMessage) -> NotifyResult<()> {
        // The API expects a numeric agent id; fall back to the raw string.
        let agent_id = message
            .agent_id
            .trim()
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::from(message.agent_id.clone()));

        let body = json!({
            "touser": message.recipient,
            "msgtype": "text",
            "agentid": agent_id,
            "text": { "content": message.content },
        });

        let request = self
            .client
            .post(self.api_url("/cgi-bin/message/send"))
            .query(&[("access_token", access_token)])
            .json(&body)
            .timeout(self.config.send_timeout);

        Self::execute(request).await.map(|_| ())
    }

    async fn post_markdown(&self, endpoint_url: &str, content: &str) -> NotifyResult<()> {
        let body = json!({
            "msgtype": "markdown",
            "markdown": { "content": content },
        });

        let request = self
            .client
            .post(endpoint_url)
            .json(&body)
            .timeout(self.config.send_timeout);

        Self::execute(request).await.map(|_| ())
    }
}

impl ChannelTransport for HttpTransport {
    fn fetch_token<'a>(
        &'a self,
        corp_id: &'a str,
        corp_secret: &'a str,
    ) -> BoxFuture<'a, NotifyResult<TokenGrant>> {
        Box::pin(self.get_token(corp_id, corp_secret))
    }

    fn send_direct<'a>(
        &'a self,
        access_token: &'a str,
        message: &'a DirectMessage,
    ) -> BoxFuture<'a, NotifyResult<()>> {
        Box::pin(self.send_text(access_token, message))
    }

    fn post_webhook<'a>(
        &'a self,
        endpoint_url: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, NotifyResult<()>> {
        Box::pin(self.post_markdown(endpoint_url, content))
    }
}

/// A message recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Direct {
        access_token: String,
        message: DirectMessage,
    },
    Webhook {
        endpoint_url: String,
        content: String,
    },
}

/// Mock transport for testing.
#[derive(Debug)]
pub struct MockTransport {
    auth_calls: AtomicU32,
    token_lifetime_secs: i64,
    sent: Mutex<Vec<SentMessage>>,
    failing_auth: Mutex<HashSet<String>>,
    failing_agents: Mutex<HashSet<String>>,
    failing_webhooks: Mutex<HashSet<String>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            auth_calls: AtomicU32::new(0),
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            sent: Mutex::new(Vec::new()),
            failing_auth: Mutex::new(HashSet::new()),
            failing_agents: Mutex::new(HashSet::new()),
            failing_webhooks: Mutex::new(HashSet::new()),
        }
    }

    /// Declared lifetime for issued tokens.
    pub fn with_token_lifetime(mut self, secs: i64) -> Self {
        self.token_lifetime_secs = secs;
        self
    }

    /// Reject token requests for this corp id.
    pub fn fail_auth(&self, corp_id: &str) {
        self.failing_auth.lock().insert(corp_id.to_string());
    }

    /// Reject direct sends for this agent id.
    pub fn fail_agent(&self, agent_id: &str) {
        self.failing_agents.lock().insert(agent_id.to_string());
    }

    /// Reject posts to this webhook URL.
    pub fn fail_webhook(&self, endpoint_url: &str) {
        self.failing_webhooks.lock().insert(endpoint_url.to_string());
    }

    pub fn auth_calls(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    fn issue_token(&self, corp_id: &str) -> NotifyResult<TokenGrant> {
        let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_auth.lock().contains(corp_id) {
            return Err(NotifyError::Auth(format!("errcode 40013: invalid corpid {corp_id}")));
        }
        Ok(TokenGrant {
            access_token: format!("token-{corp_id}-{n}"),
            expires_in: self.token_lifetime_secs,
        })
    }

    fn record_direct(&self, access_token: &str, message: &DirectMessage) -> NotifyResult<()> {
        if self.failing_agents.lock().contains(&message.agent_id) {
            return Err(NotifyError::Provider {
                code: 60020,
                message: "not allow to access from your ip".to_string(),
            });
        }
        self.sent.lock().push(SentMessage::Direct {
            access_token: access_token.to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    fn record_webhook(&self, endpoint_url: &str, content: &str) -> NotifyResult<()> {
        if self.failing_webhooks.lock().contains(endpoint_url) {
            return Err(NotifyError::Network(format!(
                "HTTP request failed: connection refused ({endpoint_url})"
            )));
        }
        self.sent.lock().push(SentMessage::Webhook {
            endpoint_url: endpoint_url.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}

impl ChannelTransport for MockTransport {
    fn fetch_token<'a>(
        &'a self,
        corp_id: &'a str,
        _corp_secret: &'a str,
    ) -> BoxFuture<'a, NotifyResult<TokenGrant>> {
        let result = self.issue_token(corp_id);
        Box::pin(async move { result })
    }

    fn send_direct<'a>(
        &'a self,
        access_token: &'a str,
        message: &'a DirectMessage,
    ) -> BoxFuture<'a, NotifyResult<()>> {
        let result = self.record_direct(access_token, message);
        Box::pin(async move { result })
    }

    fn post_webhook<'a>(
        &'a self,
        endpoint_url: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, NotifyResult<()>> {
        let result = self.record_webhook(endpoint_url, content);
        Box::pin(async move { result })
    }
}
