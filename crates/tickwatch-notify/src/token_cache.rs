//! Access token cache for `direct` channels.
//!
//! Keyed by credential pair. A cached token expires 300 s before the
//! provider-declared lifetime and is never returned at or after expiry.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tickwatch_core::SharedClock;
use tracing::debug;

/// Safety margin subtracted from the declared token lifetime.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 300;

/// Upper bound applied to provider-declared lifetimes.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Token cache keyed by `(corp_id, corp_secret)`.
pub struct TokenCache {
    entries: DashMap<(String, String), CachedToken>,
    clock: SharedClock,
}

impl TokenCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Cached token for the credentials, if still valid.
    pub fn get(&self, corp_id: &str, corp_secret: &str) -> Option<String> {
        let key = (corp_id.to_string(), corp_secret.to_string());
        let now = self.clock.now();

        let expired = match self.entries.get(&key) {
            Some(entry) if now < entry.expires_at => return Some(entry.token.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!(%corp_id, "Cached token expired");
            self.entries.remove(&key);
        }
        None
    }

    /// Cache a token with the provider-declared lifetime in seconds.
    ///
    /// The lifetime is clamped to `0..=MAX_TOKEN_LIFETIME_SECS`.
    pub fn insert(
        &self,
        corp_id: &str,
        corp_secret: &str,
        token: String,
        lifetime_secs: i64,
    ) -> DateTime<Utc> {
        let lifetime = lifetime_secs.clamp(0, MAX_TOKEN_LIFETIME_SECS);
        let expires_at =
            self.clock.now() + Duration::seconds(lifetime - TOKEN_EXPIRY_MARGIN_SECS);
        self.entries.insert(
            (corp_id.to_string(), corp_secret.to_string()),
            CachedToken { token, expires_at },
        );
        expires_at
    }

    pub fn invalidate(&self, corp_id: &str, corp_secret: &str) {
        self.entries
            .remove(&(corp_id.to_string(), corp_secret.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
