// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide WeChat access-token cache.
//!
//! Tokens are keyed by app id and expire after the lifetime the token
//! endpoint declared. Two workers may refresh the same app id at once; the
//! later insert wins and both tokens stay valid on the WeChat side.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Tokens are treated as expired this long before WeChat says they are.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Access tokens by app id.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token for `app_id` if it has not expired.
    pub async fn get(&self, app_id: &str) -> Option<String> {
        let tokens = self.tokens.read().await;
        tokens
            .get(app_id)
            .filter(|token| Instant::now() < token.expires_at)
            .map(|token| token.value.clone())
    }

    /// Stores a freshly issued token that lives for `expires_in`.
    pub async fn insert(&self, app_id: &str, value: String, expires_in: Duration) {
        let lifetime = expires_in.saturating_sub(EXPIRY_MARGIN);
        let expires_at = Instant::now() + lifetime;
        self.tokens
            .write()
            .await
            .insert(app_id.to_string(), CachedToken { value, expires_at });
        debug!(app_id, lifetime_secs = lifetime.as_secs(), "wechat token cached");
    }

    /// Drops the token for `app_id`, forcing a refresh on the next send.
    pub async fn invalidate(&self, app_id: &str) {
        if self.tokens.write().await.remove(app_id).is_some() {
            debug!(app_id, "wechat token invalidated");
        }
    }
}
