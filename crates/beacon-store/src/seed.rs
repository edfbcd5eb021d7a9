// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loading JSON manifests into a store at startup.
//!
//! Each `*.json` file in the seed directory holds one manifest object or an
//! array of them. The `kind` field selects the resource type.

use std::path::Path;

use beacon_core::error::BeaconError;
use beacon_core::traits::store::ObjectStore;
use beacon_core::types::{Channel, Message, MessageRequest, Receiver, ReceiverGroup, Template};
use serde::Deserialize;
use tracing::{debug, info};

/// One object of any stored kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    Channel(Channel),
    Template(Template),
    Receiver(Receiver),
    ReceiverGroup(ReceiverGroup),
    MessageRequest(MessageRequest),
    Message(Message),
}

impl Manifest {
    /// Apply order: channels and receivers before the objects that reference them.
    fn rank(&self) -> u8 {
        match self {
            Self::Channel(_) => 0,
            Self::Receiver(_) => 1,
            Self::ReceiverGroup(_) => 2,
            Self::Template(_) => 3,
            Self::MessageRequest(_) => 4,
            Self::Message(_) => 5,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Many(Vec<Manifest>),
    One(Box<Manifest>),
}

/// Reads every `*.json` manifest under `dir`, in file-name order.
pub fn load_manifests(dir: &Path) -> Result<Vec<Manifest>, BeaconError> {
    let read_err = |e: std::io::Error| BeaconError::Config(format!("cannot read seed dir {}: {e}", dir.display()));

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(read_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(read_err)?;
    paths.retain(|p| p.extension().is_some_and(|ext| ext == "json"));
    paths.sort();

    let mut manifests = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| BeaconError::Config(format!("cannot read {}: {e}", path.display())))?;
        let parsed: ManifestFile = serde_json::from_str(&content)
            .map_err(|e| BeaconError::Config(format!("invalid manifest {}: {e}", path.display())))?;
        match parsed {
            ManifestFile::Many(list) => manifests.extend(list),
            ManifestFile::One(one) => manifests.push(*one),
        }
        debug!(path = %path.display(), "manifest file loaded");
    }
    Ok(manifests)
}

/// Creates every manifest in dependency order; returns how many were created.
pub async fn apply_manifests<S: ObjectStore>(
    store: &S,
    mut manifests: Vec<Manifest>,
) -> Result<usize, BeaconError> {
    manifests.sort_by_key(Manifest::rank);
    let count = manifests.len();
    for manifest in manifests {
        match manifest {
            Manifest::Channel(obj) => store.create(&obj).await.map(drop)?,
            Manifest::Template(obj) => store.create(&obj).await.map(drop)?,
            Manifest::Receiver(obj) => store.create(&obj).await.map(drop)?,
            Manifest::ReceiverGroup(obj) => store.create(&obj).await.map(drop)?,
            Manifest::MessageRequest(obj) => store.create(&obj).await.map(drop)?,
            Manifest::Message(obj) => store.create(&obj).await.map(drop)?,
        }
    }
    info!(count, "seed manifests applied");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use beacon_core::traits::store::ListParams;

    #[tokio::test]
    async fn loads_single_and_array_files_and_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b-requests.json"),
            r#"{"kind": "MessageRequest", "metadata": {"name": "r1", "namespace": "sms"},
                "spec": {"template": "t1", "receivers": ["alice"]}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a-base.json"),
            r#"[
                {"kind": "Channel", "metadata": {"name": "sms"}},
                {"kind": "Receiver", "metadata": {"name": "alice"},
                 "spec": {"identities": {"mobile": "13788888888"}}}
            ]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manifests = load_manifests(dir.path()).unwrap();
        assert_eq!(manifests.len(), 3);

        let store = MemoryStore::new();
        assert_eq!(apply_manifests(&store, manifests).await.unwrap(), 3);

        let requests: Vec<MessageRequest> =
            store.list(&ListParams::in_namespace("sms")).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].spec.receivers, vec!["alice"]);

        let journal = store.journal().await;
        assert_eq!(journal.first().map(|e| e.kind.as_str()), Some("Channel"));
    }

    #[test]
    fn invalid_manifest_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), r#"{"kind": "Gadget"}"#).unwrap();
        let err = load_manifests(dir.path()).unwrap_err().to_string();
        assert!(err.contains("bad.json"), "got: {err}");
    }
}
