// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared test harness: an in-memory store plus one mock adapter per kind.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::resource::Resource;
use beacon_core::traits::store::{ListParams, ObjectStore};
use beacon_core::types::ProviderKind;
use beacon_store::MemoryStore;

use crate::mock_provider::MockProvider;

/// A test environment without network or disk.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub sms: Arc<MockProvider>,
    pub wechat: Arc<MockProvider>,
    pub email: Arc<MockProvider>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            sms: Arc::new(MockProvider::new(ProviderKind::Sms)),
            wechat: Arc::new(MockProvider::new(ProviderKind::Wechat)),
            email: Arc::new(MockProvider::new(ProviderKind::SmtpText)),
        }
    }

    /// The mock registered for `kind`.
    pub fn mock(&self, kind: ProviderKind) -> Arc<MockProvider> {
        match kind {
            ProviderKind::Sms => self.sms.clone(),
            ProviderKind::Wechat => self.wechat.clone(),
            ProviderKind::SmtpText => self.email.clone(),
        }
    }

    /// Creates `obj` in the store, returning the stored copy.
    pub async fn create<K: Resource>(&self, obj: K) -> K {
        self.store
            .create(&obj)
            .await
            .unwrap_or_else(|e| panic!("failed to create {} {}: {e}", K::KIND, obj.key()))
    }

    pub async fn list<K: Resource>(&self, namespace: &str) -> Vec<K> {
        self.store
            .list(&ListParams::in_namespace(namespace))
            .await
            .unwrap_or_else(|e| panic!("failed to list {}: {e}", K::KIND))
    }

    /// Polls `get` until the object exists and `check` holds, failing after `timeout`.
    pub async fn wait_for<K, F>(&self, namespace: &str, name: &str, timeout: Duration, check: F) -> K
    where
        K: Resource,
        F: Fn(&K) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(obj) = self.store.get::<K>(namespace, name).await
                && check(&obj)
            {
                return obj;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {} {namespace}/{name}", K::KIND);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls until `get` reports the object gone.
    pub async fn wait_gone<K: Resource>(&self, namespace: &str, name: &str, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.store.get::<K>(namespace, name).await {
                Err(e) if e.is_not_found() => return,
                _ if tokio::time::Instant::now() >= deadline => {
                    panic!("timed out waiting for {} {namespace}/{name} to disappear", K::KIND)
                }
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
