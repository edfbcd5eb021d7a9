// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery provider trait for SMS, WeChat and SMTP integrations.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::BeaconError;
use crate::types::{ChannelSpec, ProviderKind, TemplateSpec};

/// Everything a provider needs for one send to one destination.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub kind: ProviderKind,
    pub channel: &'a ChannelSpec,
    pub template: &'a TemplateSpec,
    /// Phone number, email address or open id, depending on `kind`.
    pub destination: &'a str,
    pub variables: &'a BTreeMap<String, String>,
}

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    /// Rendered subject line, for providers that have one.
    pub header: Option<String>,
    pub body: String,
}

/// A single-shot delivery integration.
///
/// Implementations perform exactly one send attempt per call; retry policy
/// belongs to the caller.
#[async_trait]
pub trait DeliveryProvider: Send + Sync + 'static {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// The provider kind this adapter serves.
    fn kind(&self) -> ProviderKind;

    /// Renders the template for `request.destination` and sends it.
    async fn send(&self, request: &DeliveryRequest<'_>) -> Result<DeliveryReceipt, BeaconError>;
}
