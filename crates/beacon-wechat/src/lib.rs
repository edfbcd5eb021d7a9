// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WeChat template-message delivery adapter for the Beacon notification controller.
//!
//! Obtains an access token per official-account app id (cached in a shared
//! [`TokenCache`]) and posts template messages to the receiver's open id.

pub mod token;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_config::model::WechatConfig;
use beacon_core::error::BeaconError;
use beacon_core::template;
use beacon_core::traits::provider::{DeliveryProvider, DeliveryReceipt, DeliveryRequest};
use beacon_core::types::{MiniProgram, ProviderKind, WechatCredentials};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use token::TokenCache;

const TOKEN_PATH: &str = "/cgi-bin/token";
const SEND_PATH: &str = "/cgi-bin/message/template/send";

/// Error codes meaning the access token is invalid or expired.
const STALE_TOKEN_CODES: [i64; 3] = [40001, 40014, 42001];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Serialize)]
struct DataValue<'a> {
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    touser: &'a str,
    template_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    miniprogram: Option<&'a MiniProgram>,
    data: BTreeMap<&'a str, DataValue<'a>>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    msgid: Option<serde_json::Value>,
}

/// WeChat adapter implementing [`DeliveryProvider`] for [`ProviderKind::Wechat`].
#[derive(Debug, Clone)]
pub struct WechatProvider {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<TokenCache>,
}

impl WechatProvider {
    /// Creates an adapter sharing `tokens` with every other WeChat sender.
    pub fn new(
        config: &WechatConfig,
        timeout: Duration,
        tokens: Arc<TokenCache>,
    ) -> Result<Self, BeaconError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BeaconError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<reqwest::Url, BeaconError> {
        reqwest::Url::parse_with_params(&format!("{}{path}", self.endpoint), params).map_err(|e| {
            BeaconError::Config(format!("invalid wechat endpoint {}: {e}", self.endpoint))
        })
    }

    /// Returns a valid access token, fetching one when the cache has none.
    async fn access_token(&self, credentials: &WechatCredentials) -> Result<String, BeaconError> {
        if let Some(token) = self.tokens.get(&credentials.app_id).await {
            return Ok(token);
        }

        let url = self.url(
            TOKEN_PATH,
            &[
                ("grant_type", "client_credential"),
                ("appid", credentials.app_id.as_str()),
                ("secret", credentials.app_secret.as_str()),
            ],
        )?;
        let response: TokenResponse = self.call(self.client.get(url)).await?;
        if response.errcode != 0 || response.access_token.is_empty() {
            return Err(BeaconError::provider(format!(
                "wechat token error {}: {}",
                response.errcode, response.errmsg
            )));
        }

        debug!(app_id = %credentials.app_id, "wechat access token refreshed");
        self.tokens
            .insert(
                &credentials.app_id,
                response.access_token.clone(),
                Duration::from_secs(response.expires_in),
            )
            .await;
        Ok(response.access_token)
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BeaconError> {
        let response = request.send().await.map_err(|e| BeaconError::Provider {
            message: format!("wechat request failed: {e}"),
            source: Some(Box::new(e)),
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BeaconError::provider(format!(
                "wechat api returned {status}: {text}"
            )));
        }

        serde_json::from_str(&text).map_err(|e| BeaconError::Provider {
            message: format!("failed to parse wechat response: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[async_trait]
impl DeliveryProvider for WechatProvider {
    fn name(&self) -> &str {
        "wechat"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Wechat
    }

    async fn send(&self, request: &DeliveryRequest<'_>) -> Result<DeliveryReceipt, BeaconError> {
        let credentials = request
            .channel
            .wechat
            .as_ref()
            .ok_or_else(|| BeaconError::Config("channel has no wechat credentials".into()))?;
        let tpl = request
            .template
            .wechat
            .as_ref()
            .ok_or_else(|| BeaconError::Config("template has no wechat section".into()))?;

        let token = self.access_token(credentials).await?;

        let payload = SendRequest {
            touser: request.destination,
            template_id: &tpl.template_id,
            url: tpl.url.as_deref().filter(|u| !u.is_empty()),
            miniprogram: tpl.miniprogram.as_ref(),
            data: request
                .variables
                .iter()
                .map(|(key, value)| (key.as_str(), DataValue { value: value.as_str() }))
                .collect(),
        };

        let url = self.url(SEND_PATH, &[("access_token", token.as_str())])?;
        let response: SendResponse = self.call(self.client.post(url).json(&payload)).await?;
        if response.errcode != 0 {
            if STALE_TOKEN_CODES.contains(&response.errcode) {
                self.tokens.invalidate(&credentials.app_id).await;
            }
            warn!(
                errcode = response.errcode,
                errmsg = %response.errmsg,
                "wechat rejected template message"
            );
            return Err(BeaconError::provider(format!(
                "wechat error {}: {}",
                response.errcode, response.errmsg
            )));
        }

        let provider_message_id = match response.msgid {
            Some(serde_json::Value::String(id)) => id,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Ok(DeliveryReceipt {
            provider_message_id,
            header: None,
            body: template::render(&tpl.body, request.variables),
        })
    }
}
