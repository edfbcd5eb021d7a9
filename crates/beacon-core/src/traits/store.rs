// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Object store trait: the watch/list/CRUD backend the controllers run against.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BeaconError;
use crate::resource::Resource;

/// Selects a subset of one kind's objects.
///
/// Field selectors are exact matches on dotted paths into the serialized
/// object, e.g. `status.phase` or `metadata.name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Restrict to one namespace; `None` lists across all namespaces.
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

impl ListParams {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(path.into(), value.into());
        self
    }

    /// Whether a serialized object satisfies every selector.
    pub fn matches(&self, object: &serde_json::Value) -> bool {
        if let Some(namespace) = &self.namespace {
            let actual = object
                .pointer("/metadata/namespace")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if actual != namespace {
                return false;
            }
        }

        let labels_match = self.labels.iter().all(|(key, expected)| {
            object
                .get("metadata")
                .and_then(|m| m.get("labels"))
                .and_then(|l| l.get(key))
                .and_then(|v| v.as_str())
                == Some(expected.as_str())
        });

        labels_match
            && self.fields.iter().all(|(path, expected)| {
                let pointer = format!("/{}", path.replace('.', "/"));
                match object.pointer(&pointer) {
                    Some(serde_json::Value::String(s)) => s == expected,
                    Some(serde_json::Value::Null) | None => expected.is_empty(),
                    Some(other) => other.to_string() == *expected,
                }
            })
    }
}

/// How dependents of a deleted object are cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    /// Delete the object now and let dependents be collected asynchronously.
    #[default]
    Background,
    /// Leave dependents in place.
    Orphan,
}

/// Conditions that must hold on the stored object for a delete to proceed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub propagation: Propagation,
    pub preconditions: Option<Preconditions>,
}

impl DeleteOptions {
    pub fn background() -> Self {
        Self::default()
    }

    /// Delete only if the stored object still has this uid.
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            propagation: Propagation::Background,
            preconditions: Some(Preconditions {
                uid: Some(uid.into()),
                resource_version: None,
            }),
        }
    }
}

/// A change notification from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }
}

/// Backend for typed resources with optimistic concurrency.
///
/// Writes carrying a non-zero `resource_version` fail with
/// [`BeaconError::Conflict`] when the stored version differs. Missing objects
/// yield [`BeaconError::NotFound`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get<K: Resource>(&self, namespace: &str, name: &str) -> Result<K, BeaconError>;

    async fn list<K: Resource>(&self, params: &ListParams) -> Result<Vec<K>, BeaconError>;

    async fn create<K: Resource>(&self, obj: &K) -> Result<K, BeaconError>;

    /// Replaces metadata and spec; the stored status is kept.
    async fn update<K: Resource>(&self, obj: &K) -> Result<K, BeaconError>;

    /// Replaces only the status.
    async fn update_status<K: Resource>(&self, obj: &K) -> Result<K, BeaconError>;

    /// Replaces only the finalizer list.
    async fn finalize<K: Resource>(&self, obj: &K) -> Result<K, BeaconError>;

    /// Requests deletion. Objects with finalizers are only marked deleting.
    async fn delete<K: Resource>(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), BeaconError>;

    /// Requests deletion of every matching object; returns how many were hit.
    async fn delete_collection<K: Resource>(
        &self,
        params: &ListParams,
        options: &DeleteOptions,
    ) -> Result<usize, BeaconError>;

    /// Streams changes to objects of kind `K` from now on.
    ///
    /// The stream ends when the watcher falls too far behind to be given
    /// every change. Callers list again and open a new watch.
    async fn watch<K: Resource>(&self) -> Result<BoxStream<'static, WatchEvent<K>>, BeaconError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_selector_matches_nested_paths() {
        let obj = json!({
            "metadata": {"name": "req", "namespace": "ops", "labels": {"tenant": "t1"}},
            "status": {"phase": "Sending"}
        });

        assert!(ListParams::default().field("status.phase", "Sending").matches(&obj));
        assert!(!ListParams::default().field("status.phase", "Sent").matches(&obj));
        assert!(ListParams::in_namespace("ops").label("tenant", "t1").matches(&obj));
        assert!(!ListParams::in_namespace("dev").matches(&obj));
        assert!(!ListParams::default().label("tenant", "t2").matches(&obj));
    }

    #[test]
    fn cluster_objects_match_empty_namespace() {
        let obj = json!({"metadata": {"name": "sms"}});
        assert!(ListParams::in_namespace("").matches(&obj));
        assert!(ListParams::default().field("metadata.namespace", "").matches(&obj));
    }
}
