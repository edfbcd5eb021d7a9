// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forwarding sink: renders locally and POSTs the result to one URL.
//!
//! Used in place of the real adapters when a forward URL is configured, so
//! end-to-end environments can assert on content without provider accounts.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::error::BeaconError;
use beacon_core::template;
use beacon_core::traits::provider::{DeliveryProvider, DeliveryReceipt, DeliveryRequest};
use beacon_core::types::ProviderKind;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ForwardedMessage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    destination: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<&'a str>,
    body: &'a str,
}

/// Sends rendered content for one provider kind to the forwarding URL.
#[derive(Debug, Clone)]
pub struct ForwardingProvider {
    client: reqwest::Client,
    url: String,
    kind: ProviderKind,
}

impl ForwardingProvider {
    pub fn new(url: &str, kind: ProviderKind, timeout: Duration) -> Result<Self, BeaconError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BeaconError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            url: url.to_string(),
            kind,
        })
    }

    fn render(&self, request: &DeliveryRequest<'_>) -> Result<(Option<String>, String), BeaconError> {
        let vars = request.variables;
        let missing = || {
            BeaconError::Config(format!(
                "template has no section for {}",
                self.kind.type_tag()
            ))
        };
        Ok(match self.kind {
            ProviderKind::Sms => {
                let tpl = request.template.sms.as_ref().ok_or_else(missing)?;
                (None, template::render(&tpl.body, vars))
            }
            ProviderKind::Wechat => {
                let tpl = request.template.wechat.as_ref().ok_or_else(missing)?;
                (None, template::render(&tpl.body, vars))
            }
            ProviderKind::SmtpText => {
                let tpl = request.template.text.as_ref().ok_or_else(missing)?;
                (
                    Some(template::render(&tpl.header, vars)),
                    template::render(&tpl.body, vars),
                )
            }
        })
    }
}

#[async_trait]
impl DeliveryProvider for ForwardingProvider {
    fn name(&self) -> &str {
        "forward"
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(&self, request: &DeliveryRequest<'_>) -> Result<DeliveryReceipt, BeaconError> {
        let (header, body) = self.render(request)?;
        let payload = ForwardedMessage {
            kind: self.kind.type_tag(),
            destination: request.destination,
            header: header.as_deref(),
            body: &body,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BeaconError::Provider {
                message: format!("forward request failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BeaconError::provider(format!(
                "forward sink returned {status}: {text}"
            )));
        }

        debug!(kind = %self.kind, destination = request.destination, "content forwarded");
        Ok(DeliveryReceipt {
            provider_message_id: format!("forward-{}", uuid::Uuid::new_v4()),
            header,
            body,
        })
    }
}
