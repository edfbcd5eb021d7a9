// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of delivery adapters keyed by provider kind.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_config::model::BeaconConfig;
use beacon_core::error::BeaconError;
use beacon_core::traits::provider::DeliveryProvider;
use beacon_core::types::ProviderKind;
use beacon_email::EmailProvider;
use beacon_sms::SmsProvider;
use beacon_wechat::{TokenCache, WechatProvider};
use tracing::info;

use crate::forward::ForwardingProvider;

/// One adapter per provider kind.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<ProviderKind, Arc<dyn DeliveryProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under its own kind, replacing any previous one.
    pub fn with(mut self, provider: Arc<dyn DeliveryProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn DeliveryProvider>> {
        self.providers.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Builds the production adapters, or forwarding sinks for every kind
    /// when `delivery.forward_url` is set.
    pub fn from_config(
        config: &BeaconConfig,
        tokens: Arc<TokenCache>,
    ) -> Result<Self, BeaconError> {
        let timeout = config.delivery.http_timeout();

        if let Some(url) = &config.delivery.forward_url {
            info!(url = %url, "forwarding all deliveries to test sink");
            return ProviderKind::ALL
                .into_iter()
                .try_fold(Self::new(), |set, kind| -> Result<Self, BeaconError> {
                    Ok(set.with(Arc::new(ForwardingProvider::new(url, kind, timeout)?)))
                });
        }

        Ok(Self::new()
            .with(Arc::new(SmsProvider::new(&config.sms, timeout)?))
            .with(Arc::new(WechatProvider::new(&config.wechat, timeout, tokens)?))
            .with(Arc::new(EmailProvider::new(timeout))))
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .providers
            .iter()
            .map(|(kind, p)| format!("{kind}={}", p.name()))
            .collect();
        names.sort();
        f.debug_struct("ProviderSet").field("providers", &names).finish()
    }
}
