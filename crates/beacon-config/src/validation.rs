// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as worker counts, retry bounds and endpoint URL schemes.

use crate::diagnostic::ConfigError;
use crate::model::BeaconConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &BeaconConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.log.level.to_ascii_lowercase().as_str()) {
        invalid(format!(
            "log.level `{}` must be one of {}",
            config.log.level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.channel.workers == 0 {
        invalid("channel.workers must be at least 1".to_string());
    }

    if config.request.workers == 0 {
        invalid("request.workers must be at least 1".to_string());
    }

    if config.channel.finalizer.trim().is_empty() {
        invalid("channel.finalizer must not be empty".to_string());
    }

    if config.request.status_retry_attempts == 0 {
        invalid("request.status_retry_attempts must be at least 1".to_string());
    }

    if config.controller.resync_secs == 0 {
        invalid("controller.resync_secs must be at least 1".to_string());
    }

    if config.controller.requeue_base_delay() > config.controller.requeue_max_delay() {
        invalid(format!(
            "controller.requeue_base_delay_ms ({}) exceeds controller.requeue_max_delay_secs ({})",
            config.controller.requeue_base_delay_ms, config.controller.requeue_max_delay_secs
        ));
    }

    if config.delivery.http_timeout_secs == 0 {
        invalid("delivery.http_timeout_secs must be at least 1".to_string());
    }

    let endpoints = [
        ("sms.endpoint", Some(config.sms.endpoint.as_str())),
        ("wechat.endpoint", Some(config.wechat.endpoint.as_str())),
        ("delivery.forward_url", config.delivery.forward_url.as_deref()),
    ];
    for (key, value) in endpoints {
        if let Some(url) = value
            && !is_http_url(url)
        {
            invalid(format!("{key} `{url}` must be an http:// or https:// URL"));
        }
    }

    if config.sms.default_nation_code.is_empty()
        || !config.sms.default_nation_code.chars().all(|c| c.is_ascii_digit())
    {
        invalid(format!(
            "sms.default_nation_code `{}` must be a non-empty string of digits",
            config.sms.default_nation_code
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.trim().is_empty())
}
