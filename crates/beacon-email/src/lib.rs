// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SMTP delivery adapter for the Beacon notification controller.
//!
//! Renders the template's header and body, builds a single-recipient message
//! and hands it to the channel's SMTP relay. Port 465 uses implicit TLS; any
//! other port upgrades with STARTTLS when the server offers it.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::error::BeaconError;
use beacon_core::template;
use beacon_core::traits::provider::{DeliveryProvider, DeliveryReceipt, DeliveryRequest};
use beacon_core::types::{ProviderKind, SmtpCredentials};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

/// Port on which the relay expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// SMTP adapter implementing [`DeliveryProvider`] for [`ProviderKind::SmtpText`].
#[derive(Debug, Clone)]
pub struct EmailProvider {
    timeout: Duration,
}

impl EmailProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(
        &self,
        smtp: &SmtpCredentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, BeaconError> {
        let builder = match tls_mode(smtp.port) {
            TlsMode::Implicit => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host).map_err(smtp_error)?
            }
            TlsMode::Opportunistic => {
                let tls = TlsParameters::new(smtp.host.clone()).map_err(smtp_error)?;
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                    .tls(Tls::Opportunistic(tls))
            }
        };

        let mut builder = builder.port(smtp.port).timeout(Some(self.timeout));
        if let Some(credentials) = credentials(smtp) {
            builder = builder
                .credentials(credentials)
                .authentication(vec![Mechanism::Plain, Mechanism::Login]);
        }
        Ok(builder.build())
    }
}

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    /// TLS from the first byte.
    Implicit,
    /// Plain connection upgraded with STARTTLS when the server offers it.
    Opportunistic,
}

fn tls_mode(port: u16) -> TlsMode {
    if port == IMPLICIT_TLS_PORT {
        TlsMode::Implicit
    } else {
        TlsMode::Opportunistic
    }
}

/// Login for the relay. Only a non-empty username turns authentication on;
/// a missing password is sent as empty.
fn credentials(smtp: &SmtpCredentials) -> Option<Credentials> {
    let username = smtp.username.as_deref().filter(|u| !u.is_empty())?;
    let password = smtp.password.clone().unwrap_or_default();
    Some(Credentials::new(username.to_string(), password))
}

fn smtp_error(e: lettre::transport::smtp::Error) -> BeaconError {
    BeaconError::Provider {
        message: format!("smtp error: {e}"),
        source: Some(Box::new(e)),
    }
}

/// Builds the outgoing message and returns it with its Message-ID.
pub fn build_message(
    from: &str,
    to: &str,
    subject: &str,
    body: String,
    html: bool,
) -> Result<(Message, String), BeaconError> {
    let parse = |addr: &str| {
        addr.parse::<Mailbox>()
            .map_err(|e| BeaconError::provider(format!("invalid email address {addr:?}: {e}")))
    };
    let from = parse(from)?;
    let domain = from.email.domain().to_string();
    let message_id = format!("<{}@{domain}>", uuid::Uuid::new_v4());

    let message = Message::builder()
        .from(from)
        .to(parse(to)?)
        .subject(subject)
        .message_id(Some(message_id.clone()))
        .header(if html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        })
        .body(body)
        .map_err(|e| BeaconError::provider(format!("failed to build email: {e}")))?;
    Ok((message, message_id))
}

#[async_trait]
impl DeliveryProvider for EmailProvider {
    fn name(&self) -> &str {
        "smtp"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::SmtpText
    }

    async fn send(&self, request: &DeliveryRequest<'_>) -> Result<DeliveryReceipt, BeaconError> {
        let smtp = request
            .channel
            .smtp
            .as_ref()
            .ok_or_else(|| BeaconError::Config("channel has no smtp settings".into()))?;
        let tpl = request
            .template
            .text
            .as_ref()
            .ok_or_else(|| BeaconError::Config("template has no text section".into()))?;

        let header = template::render(&tpl.header, request.variables);
        let body = template::render(&tpl.body, request.variables);
        let (message, message_id) =
            build_message(&smtp.from, request.destination, &header, body.clone(), tpl.html)?;

        let response = self
            .transport(smtp)?
            .send(message)
            .await
            .map_err(smtp_error)?;
        debug!(
            host = %smtp.host,
            code = %response.code(),
            message_id = %message_id,
            "email accepted by relay"
        );

        Ok(DeliveryReceipt {
            provider_message_id: message_id,
            header: Some(header),
            body,
        })
    }
}
