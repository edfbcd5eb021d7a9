// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SMS gateway delivery adapter for the Beacon notification controller.
//!
//! Sends template SMS through the gateway's `sendsms` endpoint. Each request
//! is signed with `sha256("appkey=..&random=..&time=..&mobile=..")`, and the
//! template parameters are passed positionally in the order their
//! placeholders first appear in the local template body.

use std::time::Duration;

use async_trait::async_trait;
use beacon_config::model::SmsConfig;
use beacon_core::error::BeaconError;
use beacon_core::template;
use beacon_core::traits::provider::{DeliveryProvider, DeliveryReceipt, DeliveryRequest};
use beacon_core::types::ProviderKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Path of the template SMS endpoint below the configured base URL.
const SEND_PATH: &str = "/v5/tlssmssvr/sendsms";

/// Computes the request signature exactly as the gateway verifies it.
pub fn signature(app_key: &str, random: u64, time: i64, mobile: &str) -> String {
    let plain = format!("appkey={app_key}&random={random}&time={time}&mobile={mobile}");
    hex::encode(Sha256::digest(plain.as_bytes()))
}

#[derive(Debug, Serialize)]
struct Tel<'a> {
    nationcode: &'a str,
    mobile: &'a str,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    tel: Tel<'a>,
    sign: &'a str,
    tpl_id: u64,
    params: Vec<String>,
    sig: String,
    time: i64,
    extend: &'a str,
    ext: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    result: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    sid: String,
}

/// SMS adapter implementing [`DeliveryProvider`] for [`ProviderKind::Sms`].
#[derive(Debug, Clone)]
pub struct SmsProvider {
    client: reqwest::Client,
    endpoint: String,
    default_nation_code: String,
}

impl SmsProvider {
    /// Creates an adapter for the gateway at `config.endpoint`.
    pub fn new(config: &SmsConfig, timeout: Duration) -> Result<Self, BeaconError> {
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
            default_nation_code: config.default_nation_code.clone(),
        })
    }

    fn send_url(&self, app_id: &str, random: u64) -> Result<reqwest::Url, BeaconError> {
        let random = random.to_string();
        reqwest::Url::parse_with_params(
            &format!("{}{SEND_PATH}", self.endpoint),
            [("sdkappid", app_id), ("random", random.as_str())],
        )
        .map_err(|e| BeaconError::Config(format!("invalid sms endpoint {}: {e}", self.endpoint)))
    }

    async fn post(
        &self,
        url: reqwest::Url,
        body: &SendRequest<'_>,
    ) -> Result<SendResponse, BeaconError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| BeaconError::Provider {
                message: format!("sms request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BeaconError::provider(format!(
                "sms gateway returned {status}: {text}"
            )));
        }

        serde_json::from_str(&text).map_err(|e| BeaconError::Provider {
            message: format!("failed to parse sms response: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[async_trait]
impl DeliveryProvider for SmsProvider {
    fn name(&self) -> &str {
        "sms"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Sms
    }

    async fn send(&self, request: &DeliveryRequest<'_>) -> Result<DeliveryReceipt, BeaconError> {
        let credentials = request
            .channel
            .sms
            .as_ref()
            .ok_or_else(|| BeaconError::Config("channel has no sms credentials".into()))?;
        let tpl = request
            .template
            .sms
            .as_ref()
            .ok_or_else(|| BeaconError::Config("template has no sms section".into()))?;

        let body = template::render(&tpl.body, request.variables);
        let params = template::positional_params(&tpl.body, request.variables);

        let random: u64 = rand::thread_rng().gen_range(1_000_000_000..10_000_000_000);
        let time = chrono::Utc::now().timestamp();
        let nation_code = credentials
            .nation_code
            .as_deref()
            .unwrap_or(&self.default_nation_code);

        let payload = SendRequest {
            tel: Tel {
                nationcode: nation_code,
                mobile: request.destination,
            },
            sign: &tpl.sign,
            tpl_id: tpl.template_id,
            params,
            sig: signature(&credentials.app_key, random, time, request.destination),
            time,
            extend: &credentials.extend,
            ext: "",
        };

        let url = self.send_url(&credentials.app_id, random)?;
        let response = self.post(url, &payload).await?;
        if response.result != 0 {
            warn!(
                result = response.result,
                errmsg = %response.errmsg,
                "sms gateway rejected message"
            );
            return Err(BeaconError::provider(format!(
                "sms gateway error {}: {}",
                response.result, response.errmsg
            )));
        }

        debug!(sid = %response.sid, "sms accepted");
        Ok(DeliveryReceipt {
            provider_message_id: response.sid,
            header: None,
            body,
        })
    }
}
