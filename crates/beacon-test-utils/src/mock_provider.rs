// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock delivery adapter for deterministic testing.
//!
//! `MockProvider` implements `DeliveryProvider` by recording every send,
//! enabling dispatch and controller tests without SMS, WeChat or SMTP.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use beacon_core::BeaconError;
use beacon_core::template;
use beacon_core::traits::provider::{DeliveryProvider, DeliveryReceipt, DeliveryRequest};
use beacon_core::types::ProviderKind;

/// One recorded send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub kind: ProviderKind,
    pub destination: String,
    pub variables: BTreeMap<String, String>,
    pub body: String,
}

/// A mock provider that records sends and fails for chosen destinations.
///
/// Failures are keyed by destination and persist until cleared.
pub struct MockProvider {
    kind: ProviderKind,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failures: Arc<Mutex<HashMap<String, String>>>,
    counter: AtomicU64,
}

impl MockProvider {
    /// Create a mock serving `kind` that accepts every send.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            sent: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(0),
        }
    }

    /// Make every send to `destination` fail with `reason`.
    pub async fn fail_for(&self, destination: impl Into<String>, reason: impl Into<String>) {
        self.failures
            .lock()
            .await
            .insert(destination.into(), reason.into());
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    /// Every successful send so far, in order.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn send_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    fn render(&self, request: &DeliveryRequest<'_>) -> (Option<String>, String) {
        let vars = request.variables;
        match self.kind {
            ProviderKind::Sms => (
                None,
                request
                    .template
                    .sms
                    .as_ref()
                    .map(|t| template::render(&t.body, vars))
                    .unwrap_or_default(),
            ),
            ProviderKind::Wechat => (
                None,
                request
                    .template
                    .wechat
                    .as_ref()
                    .map(|t| template::render(&t.body, vars))
                    .unwrap_or_default(),
            ),
            ProviderKind::SmtpText => match &request.template.text {
                Some(t) => (
                    Some(template::render(&t.header, vars)),
                    template::render(&t.body, vars),
                ),
                None => (None, String::new()),
            },
        }
    }
}

#[async_trait]
impl DeliveryProvider for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(&self, request: &DeliveryRequest<'_>) -> Result<DeliveryReceipt, BeaconError> {
        if let Some(reason) = self.failures.lock().await.get(request.destination) {
            return Err(BeaconError::provider(reason.clone()));
        }

        let (header, body) = self.render(request);
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.sent.lock().await.push(SentMessage {
            kind: self.kind,
            destination: request.destination.to_string(),
            variables: request.variables.clone(),
            body: body.clone(),
        });

        Ok(DeliveryReceipt {
            provider_message_id: format!("mock-{}-{n}", self.kind),
            header,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn records_sends_and_scripted_failures() {
        let provider = MockProvider::new(ProviderKind::Sms);
        provider.fail_for("222", "quota exceeded").await;

        let channel = fixtures::sms_channel("sms").spec;
        let template = fixtures::sms_template("sms", "t", "hi {{.name}}").spec;
        let vars = fixtures::vars(&[("name", "bob")]);

        let ok = provider
            .send(&DeliveryRequest {
                kind: ProviderKind::Sms,
                channel: &channel,
                template: &template,
                destination: "111",
                variables: &vars,
            })
            .await
            .unwrap();
        assert_eq!(ok.body, "hi bob");
        assert_eq!(ok.provider_message_id, "mock-sms-1");

        let err = provider
            .send(&DeliveryRequest {
                kind: ProviderKind::Sms,
                channel: &channel,
                template: &template,
                destination: "222",
                variables: &vars,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(provider.send_count().await, 1);
    }
}
