// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification resources: channels, templates, receivers, requests and messages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::resource::{ObjectMeta, Resource};

/// The address space a receiver identity lives in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IdentityKind {
    Mobile,
    Email,
    WechatOpenid,
}

/// The closed set of delivery providers a template can configure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    Sms,
    Wechat,
    SmtpText,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Sms, Self::Wechat, Self::SmtpText];

    /// The receiver identity this provider delivers to.
    pub fn identity_kind(self) -> IdentityKind {
        match self {
            Self::Sms => IdentityKind::Mobile,
            Self::Wechat => IdentityKind::WechatOpenid,
            Self::SmtpText => IdentityKind::Email,
        }
    }

    /// Short type tag used when content is forwarded to a test sink.
    pub fn type_tag(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Wechat => "wechat",
            Self::SmtpText => "email",
        }
    }
}

// --- Channel ---

/// Credentials for the SMS gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsCredentials {
    pub app_id: String,
    pub app_key: String,
    /// Country calling code; falls back to the configured default when unset.
    #[serde(default)]
    pub nation_code: Option<String>,
    #[serde(default)]
    pub extend: String,
}

/// Credentials for the WeChat official-account API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WechatCredentials {
    pub app_id: String,
    pub app_secret: String,
}

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpCredentials {
    pub host: String,
    pub port: u16,
    pub from: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms: Option<SmsCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wechat: Option<WechatCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpCredentials>,
}

impl ChannelSpec {
    /// Whether this channel carries credentials for `kind`.
    pub fn supports(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Sms => self.sms.is_some(),
            ProviderKind::Wechat => self.wechat.is_some(),
            ProviderKind::SmtpText => self.smtp.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum ChannelPhase {
    #[default]
    Active,
    Terminating,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    #[serde(default)]
    pub phase: ChannelPhase,
}

/// A configured outbound delivery mechanism and its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ChannelSpec,
    #[serde(default)]
    pub status: ChannelStatus,
}

// --- Template ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsTemplate {
    /// Provider-side template id (`tpl_id`).
    pub template_id: u64,
    pub sign: String,
    /// Local copy of the template text; its placeholders fix the parameter order.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniProgram {
    #[serde(rename = "appid")]
    pub app_id: String,
    #[serde(rename = "pagepath")]
    pub page_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WechatTemplate {
    pub template_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub miniprogram: Option<MiniProgram>,
    /// Rendered into the audit record; WeChat itself renders from `data`.
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextTemplate {
    pub header: String,
    pub body: String,
    #[serde(default)]
    pub html: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms: Option<SmsTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wechat: Option<WechatTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextTemplate>,
}

impl TemplateSpec {
    /// Provider kinds this template configures, in a stable order.
    pub fn provider_kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ProviderKind::Sms => self.sms.is_some(),
                ProviderKind::Wechat => self.wechat.is_some(),
                ProviderKind::SmtpText => self.text.is_some(),
            })
            .collect()
    }
}

/// Rendering configuration for one or more provider kinds, scoped to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TemplateSpec,
}

// --- Receivers ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverSpec {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub identities: BTreeMap<IdentityKind, String>,
}

/// A recipient identity with per-kind addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ReceiverSpec,
}

impl Receiver {
    /// The non-empty identity of `kind`, if configured.
    pub fn identity(&self, kind: IdentityKind) -> Option<&str> {
        self.spec
            .identities
            .get(&kind)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverGroupSpec {
    #[serde(default)]
    pub receivers: Vec<String>,
}

/// A named set of receiver references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverGroup {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ReceiverGroupSpec,
}

// --- MessageRequest ---

/// Lifecycle of a dispatch job. Transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum RequestPhase {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
    PartialFailure,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::PartialFailure)
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    pub fn can_transition_to(self, next: RequestPhase) -> bool {
        match self {
            Self::Pending => next == Self::Sending,
            Self::Sending => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequestSpec {
    pub template: String,
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub receiver_groups: Vec<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequestStatus {
    #[serde(default)]
    pub phase: RequestPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Receiver name to failure reason, for every receiver that was not reached.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// One dispatch job fanning out to many receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub metadata: ObjectMeta,
    pub spec: MessageRequestSpec,
    #[serde(default)]
    pub status: MessageRequestStatus,
}

impl MessageRequest {
    /// Name of the owning channel. Requests live in a namespace named after it.
    pub fn channel_name(&self) -> &str {
        &self.metadata.namespace
    }
}

// --- Message ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum ReadState {
    #[default]
    Unread,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSpec {
    pub request: String,
    pub receiver: String,
    pub kind: IdentityKind,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub body: String,
    pub provider_message_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatus {
    #[serde(default)]
    pub state: ReadState,
}

/// Audit record of one successful send to one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub metadata: ObjectMeta,
    pub spec: MessageSpec,
    #[serde(default)]
    pub status: MessageStatus,
}

macro_rules! impl_resource {
    ($($ty:ty => $kind:literal),* $(,)?) => {
        $(
            impl Resource for $ty {
                const KIND: &'static str = $kind;

                fn meta(&self) -> &ObjectMeta {
                    &self.metadata
                }

                fn meta_mut(&mut self) -> &mut ObjectMeta {
                    &mut self.metadata
                }
            }
        )*
    };
}

impl_resource! {
    Channel => "Channel",
    Template => "Template",
    Receiver => "Receiver",
    ReceiverGroup => "ReceiverGroup",
    MessageRequest => "MessageRequest",
    Message => "Message",
}
