// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Beacon notification controller.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Beacon configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconConfig {
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Settings shared by both reconcilers (resync, queue backoff).
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Channel termination controller settings.
    #[serde(default)]
    pub channel: ChannelControllerConfig,

    /// MessageRequest reconciler settings.
    #[serde(default)]
    pub request: RequestControllerConfig,

    /// Provider-independent delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// SMS gateway endpoint settings.
    #[serde(default)]
    pub sms: SmsConfig,

    /// WeChat API endpoint settings.
    #[serde(default)]
    pub wechat: WechatConfig,

    /// In-process object store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Watch and work-queue settings shared by both reconcilers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Interval at which every cached object is re-delivered to the handlers.
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,

    /// First delay applied when a key is re-queued after an error.
    #[serde(default = "default_requeue_base_delay_ms")]
    pub requeue_base_delay_ms: u64,

    /// Upper bound for the exponential re-queue delay.
    #[serde(default = "default_requeue_max_delay_secs")]
    pub requeue_max_delay_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_secs: default_resync_secs(),
            requeue_base_delay_ms: default_requeue_base_delay_ms(),
            requeue_max_delay_secs: default_requeue_max_delay_secs(),
        }
    }
}

impl ControllerConfig {
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn requeue_base_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_base_delay_ms)
    }

    pub fn requeue_max_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_max_delay_secs)
    }
}

fn default_resync_secs() -> u64 {
    30
}

fn default_requeue_base_delay_ms() -> u64 {
    5
}

fn default_requeue_max_delay_secs() -> u64 {
    300
}

/// Channel termination protocol settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelControllerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_channel_workers")]
    pub workers: usize,

    /// Delay between observing a deletion and starting cleanup.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Finalizer token owned by this controller.
    #[serde(default = "default_finalizer")]
    pub finalizer: String,

    /// Delete the channel object once no finalizer remains.
    #[serde(default = "default_true")]
    pub delete_when_finalized: bool,
}

impl Default for ChannelControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_channel_workers(),
            grace_period_secs: default_grace_period_secs(),
            finalizer: default_finalizer(),
            delete_when_finalized: true,
        }
    }
}

impl ChannelControllerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn default_channel_workers() -> usize {
    2
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_finalizer() -> String {
    "beacon.io/channel-controller".to_string()
}

fn default_true() -> bool {
    true
}

/// MessageRequest reconciler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RequestControllerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_request_workers")]
    pub workers: usize,

    /// Attempts made to persist a status before surfacing the error.
    #[serde(default = "default_status_retry_attempts")]
    pub status_retry_attempts: u32,

    /// Fixed delay between status persistence attempts.
    #[serde(default = "default_status_retry_delay_secs")]
    pub status_retry_delay_secs: u64,

    /// Re-queues allowed for one key before it is dropped.
    #[serde(default = "default_max_requeues")]
    pub max_requeues: u32,
}

impl Default for RequestControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_request_workers(),
            status_retry_attempts: default_status_retry_attempts(),
            status_retry_delay_secs: default_status_retry_delay_secs(),
            max_requeues: default_max_requeues(),
        }
    }
}

impl RequestControllerConfig {
    pub fn status_retry_delay(&self) -> Duration {
        Duration::from_secs(self.status_retry_delay_secs)
    }
}

fn default_request_workers() -> usize {
    4
}

fn default_status_retry_attempts() -> u32 {
    5
}

fn default_status_retry_delay_secs() -> u64 {
    5
}

fn default_max_requeues() -> u32 {
    5
}

/// Delivery settings that apply to every provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// When set, all rendered content is POSTed here instead of the real provider.
    #[serde(default)]
    pub forward_url: Option<String>,

    /// Timeout for provider HTTP calls.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            forward_url: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl DeliveryConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_http_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SmsConfig {
    /// Base URL of the SMS gateway.
    #[serde(default = "default_sms_endpoint")]
    pub endpoint: String,

    /// Nation code used when a channel does not set one.
    #[serde(default = "default_nation_code")]
    pub default_nation_code: String,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_sms_endpoint(),
            default_nation_code: default_nation_code(),
        }
    }
}

fn default_sms_endpoint() -> String {
    "https://yun.tim.qq.com".to_string()
}

fn default_nation_code() -> String {
    "86".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WechatConfig {
    /// Base URL of the WeChat API.
    #[serde(default = "default_wechat_endpoint")]
    pub endpoint: String,
}

impl Default for WechatConfig {
    fn default() -> Self {
        Self {
            endpoint: default_wechat_endpoint(),
        }
    }
}

fn default_wechat_endpoint() -> String {
    "https://api.weixin.qq.com".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory of JSON manifests loaded into the store at startup.
    #[serde(default)]
    pub seed_dir: Option<String>,
}
