// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Beacon notification controller.

use thiserror::Error;

/// The primary error type used across the store, dispatch and controller crates.
#[derive(Debug, Error)]
pub enum BeaconError {
    /// Configuration errors (invalid TOML, missing credentials, bad URLs).
    #[error("configuration error: {0}")]
    Config(String),

    /// The addressed object does not exist in the store.
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    /// A write raced a concurrent writer (stale resource version or failed precondition).
    #[error("conflict writing {kind} \"{name}\": {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// An object with the same key already exists.
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    /// The object behind a name changed identity between a read and a write.
    #[error("{kind} \"{name}\" changed identity: expected uid {expected}, found {found}")]
    IdentityMismatch {
        kind: String,
        name: String,
        expected: String,
        found: String,
    },

    /// Object store failures (unavailable backend, serialization).
    #[error("store error: {message}")]
    Store {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Delivery provider failures (HTTP, SMTP, provider result codes).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A template could not be rendered.
    #[error("render error: {0}")]
    Render(String),

    /// A bounded retry gave up.
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<BeaconError>,
    },

    /// Several independent steps failed; none was skipped.
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<BeaconError>),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BeaconError {
    /// Builds a [`BeaconError::NotFound`] for the given kind and name.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Builds a [`BeaconError::Conflict`].
    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Builds a [`BeaconError::Provider`] without an underlying source.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            source: None,
        }
    }

    /// True when the target object no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when a concurrent writer raced this one.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Collapses a list of step errors: `Ok` when empty, the error itself when
    /// there is exactly one, [`BeaconError::Aggregate`] otherwise.
    pub fn aggregate(mut errors: Vec<BeaconError>) -> Result<(), BeaconError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

fn join_errors(errors: &[BeaconError]) -> String {
    let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
