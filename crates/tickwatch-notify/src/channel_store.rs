//! Channel configuration store.
//!
//! Channels persist as a JSON document split by type. Every mutation
//! rewrites the document atomically with a fresh `last_updated`.

use crate::error::{NotifyError, NotifyResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tickwatch_core::{Channel, ChannelConfig, ChannelKind, DirectConfig, WebhookConfig};
use tickwatch_persistence::{read_json, write_json_atomic};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// On-disk channel store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelDocument {
    #[serde(default)]
    pub direct_channels: Vec<Channel>,
    #[serde(default)]
    pub webhook_channels: Vec<Channel>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Partial channel update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChannelUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    /// Replacement config; must keep the channel's type.
    pub config: Option<ChannelConfig>,
}

/// Configured notification channels.
#[derive(Debug)]
pub struct ChannelStore {
    path: PathBuf,
    channels: RwLock<Vec<Channel>>,
}

impl ChannelStore {
    /// Open the store at `path`. A missing file yields no channels.
    pub fn open(path: impl Into<PathBuf>) -> NotifyResult<Self> {
        let store = Self {
            path: path.into(),
            channels: RwLock::new(Vec::new()),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the document, replacing in-memory state.
    pub fn reload(&self) -> NotifyResult<usize> {
        let doc: ChannelDocument = read_json(&self.path)?.unwrap_or_default();

        let mut loaded: Vec<Channel> = Vec::new();
        for channel in doc.direct_channels.into_iter().chain(doc.webhook_channels) {
            if loaded.iter().any(|c| c.id == channel.id) {
                warn!(id = %channel.id, "Duplicate channel id in store, keeping first");
                continue;
            }
            loaded.push(channel);
        }

        let count = loaded.len();
        *self.channels.write() = loaded;
        info!(path = %self.path.display(), count, "Loaded channels");
        Ok(count)
    }

    /// Write the current state to the store.
    pub fn save(&self) -> NotifyResult<()> {
        let channels = self.list();
        let (direct_channels, webhook_channels) = channels
            .into_iter()
            .partition(|c| c.kind() == ChannelKind::Direct);
        let doc = ChannelDocument {
            direct_channels,
            webhook_channels,
            last_updated: Some(Utc::now()),
        };
        write_json_atomic(&self.path, &doc)?;
        debug!(
            direct = doc.direct_channels.len(),
            webhook = doc.webhook_channels.len(),
            "Saved channels"
        );
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %e, "Failed to save channel store");
        }
    }

    /// Add a channel with a freshly generated id.
    pub fn add(&self, name: &str, config: ChannelConfig, enabled: bool) -> Channel {
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            enabled,
            config,
        };
        if let Some(reason) = channel.invalid_reason() {
            warn!(id = %channel.id, %reason, "Channel added but not dispatchable");
        }
        info!(id = %channel.id, kind = %channel.kind(), name = %channel.name, "Channel added");

        self.channels.write().push(channel.clone());
        self.persist();
        channel
    }

    pub fn add_direct(&self, name: &str, config: DirectConfig, enabled: bool) -> Channel {
        self.add(name, ChannelConfig::Direct(config), enabled)
    }

    pub fn add_webhook(&self, name: &str, config: WebhookConfig, enabled: bool) -> Channel {
        self.add(name, ChannelConfig::Webhook(config), enabled)
    }

    /// Apply a partial update, returning the updated channel.
    pub fn update(&self, id: &str, update: ChannelUpdate) -> NotifyResult<Channel> {
        let updated = {
            let mut channels = self.channels.write();
            let channel = channels
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| NotifyError::NotFound(id.to_string()))?;

            if let Some(config) = &update.config {
                if config.kind() != channel.kind() {
                    return Err(NotifyError::KindMismatch {
                        from: channel.kind(),
                        to: config.kind(),
                    });
                }
            }

            if let Some(name) = update.name {
                channel.name = name.trim().to_string();
            }
            if let Some(enabled) = update.enabled {
                channel.enabled = enabled;
            }
            if let Some(config) = update.config {
                channel.config = config;
            }
            channel.clone()
        };
        info!(%id, "Channel updated");
        self.persist();
        Ok(updated)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> NotifyResult<Channel> {
        self.update(
            id,
            ChannelUpdate {
                enabled: Some(enabled),
                ..ChannelUpdate::default()
            },
        )
    }

    /// Delete a channel, returning it.
    pub fn delete(&self, id: &str) -> NotifyResult<Channel> {
        let removed = {
            let mut channels = self.channels.write();
            let idx = channels
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| NotifyError::NotFound(id.to_string()))?;
            channels.remove(idx)
        };
        info!(%id, name = %removed.name, "Channel deleted");
        self.persist();
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Channel> {
        self.channels.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Channel> {
        self.channels.read().clone()
    }

    pub fn by_kind(&self, kind: ChannelKind) -> Vec<Channel> {
        self.channels
            .read()
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    /// Enabled channels with every required field present.
    pub fn valid_channels(&self) -> Vec<Channel> {
        self.channels
            .read()
            .iter()
            .filter(|c| c.is_valid())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}
