// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resource builders with realistic defaults.

use std::collections::BTreeMap;

use beacon_core::resource::ObjectMeta;
use beacon_core::types::{
    Channel, ChannelSpec, ChannelStatus, IdentityKind, MessageRequest, MessageRequestSpec,
    MessageRequestStatus, Receiver, ReceiverGroup, ReceiverGroupSpec, ReceiverSpec, SmsCredentials,
    SmsTemplate, SmtpCredentials, Template, TemplateSpec, TextTemplate, WechatCredentials,
    WechatTemplate,
};

pub fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A channel carrying credentials for every provider kind.
pub fn channel(name: &str) -> Channel {
    Channel {
        metadata: ObjectMeta::cluster(name),
        spec: ChannelSpec {
            sms: Some(sms_credentials()),
            wechat: Some(WechatCredentials {
                app_id: "wx-test".into(),
                app_secret: "secret".into(),
            }),
            smtp: Some(SmtpCredentials {
                host: "smtp.example.com".into(),
                port: 587,
                from: "alerts@example.com".into(),
                username: None,
                password: None,
            }),
        },
        status: ChannelStatus::default(),
    }
}

/// A channel with SMS credentials only.
pub fn sms_channel(name: &str) -> Channel {
    Channel {
        metadata: ObjectMeta::cluster(name),
        spec: ChannelSpec {
            sms: Some(sms_credentials()),
            ..Default::default()
        },
        status: ChannelStatus::default(),
    }
}

fn sms_credentials() -> SmsCredentials {
    SmsCredentials {
        app_id: "1400000000".into(),
        app_key: "key".into(),
        nation_code: None,
        extend: String::new(),
    }
}

pub fn template(channel: &str, name: &str, spec: TemplateSpec) -> Template {
    Template {
        metadata: ObjectMeta::namespaced(channel, name),
        spec,
    }
}

pub fn sms_template(channel: &str, name: &str, body: &str) -> Template {
    template(
        channel,
        name,
        TemplateSpec {
            sms: Some(SmsTemplate {
                template_id: 1001,
                sign: "Beacon".into(),
                body: body.into(),
            }),
            ..Default::default()
        },
    )
}

pub fn wechat_template(body: &str) -> WechatTemplate {
    WechatTemplate {
        template_id: "tmpl".into(),
        url: None,
        miniprogram: None,
        body: body.into(),
    }
}

pub fn text_template(header: &str, body: &str) -> TextTemplate {
    TextTemplate {
        header: header.into(),
        body: body.into(),
        html: false,
    }
}

pub fn receiver(name: &str, identities: &[(IdentityKind, &str)]) -> Receiver {
    Receiver {
        metadata: ObjectMeta::cluster(name),
        spec: ReceiverSpec {
            username: Some(name.to_string()),
            identities: identities
                .iter()
                .map(|(kind, value)| (*kind, value.to_string()))
                .collect(),
        },
    }
}

pub fn group(name: &str, members: &[&str]) -> ReceiverGroup {
    ReceiverGroup {
        metadata: ObjectMeta::cluster(name),
        spec: ReceiverGroupSpec {
            receivers: members.iter().map(|m| m.to_string()).collect(),
        },
    }
}

pub fn request(
    channel: &str,
    name: &str,
    template: &str,
    receivers: &[&str],
    groups: &[&str],
) -> MessageRequest {
    MessageRequest {
        metadata: ObjectMeta::namespaced(channel, name),
        spec: MessageRequestSpec {
            template: template.to_string(),
            receivers: receivers.iter().map(|r| r.to_string()).collect(),
            receiver_groups: groups.iter().map(|g| g.to_string()).collect(),
            variables: BTreeMap::new(),
        },
        status: MessageRequestStatus::default(),
    }
}
