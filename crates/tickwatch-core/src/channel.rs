//! Notification channel definitions.
//!
//! A channel is either credential-based (`direct`: an application message
//! API that needs an access token) or URL-based (`webhook`: a pre-provisioned
//! group robot endpoint). Validity is derived, never stored.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Direct,
    Webhook,
}

impl ChannelKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "api" => Ok(Self::Direct),
            "webhook" => Ok(Self::Webhook),
            other => Err(CoreError::UnknownChannelKind(other.to_string())),
        }
    }
}

fn default_recipient() -> String {
    "@all".to_string()
}

/// Credentials and addressing for a `direct` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectConfig {
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: String,
    /// Recipient selector; "@all" addresses every member.
    #[serde(default = "default_recipient")]
    pub recipient: String,
}

/// Endpoint for a `webhook` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub endpoint_url: String,
}

/// Type-specific channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum ChannelConfig {
    Direct(DirectConfig),
    Webhook(WebhookConfig),
}

impl ChannelConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Direct(_) => ChannelKind::Direct,
            Self::Webhook(_) => ChannelKind::Webhook,
        }
    }

    /// Names of required fields that are empty after trimming.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self {
            Self::Direct(c) => {
                for (field, value) in [
                    ("corp_id", &c.corp_id),
                    ("corp_secret", &c.corp_secret),
                    ("agent_id", &c.agent_id),
                    ("recipient", &c.recipient),
                ] {
                    if value.trim().is_empty() {
                        missing.push(field);
                    }
                }
            }
            Self::Webhook(c) => {
                if c.endpoint_url.trim().is_empty() {
                    missing.push("endpoint_url");
                }
            }
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// A configured notification destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Opaque id, generated at creation and stable for the channel's lifetime.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub config: ChannelConfig,
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        self.config.kind()
    }

    /// Enabled and every required field present.
    pub fn is_valid(&self) -> bool {
        self.enabled && self.config.is_complete()
    }

    /// Why the channel is excluded from dispatch, if it is.
    pub fn invalid_reason(&self) -> Option<String> {
        if !self.enabled {
            return Some("channel is disabled".to_string());
        }
        let missing = self.config.missing_fields();
        if missing.is_empty() {
            None
        } else {
            Some(format!("missing fields: {}", missing.join(", ")))
        }
    }
}
