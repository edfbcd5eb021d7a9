// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`MemoryStore`]: an in-process [`ObjectStore`] with resource versions,
//! uids, finalizers and a broadcast watch stream.
//!
//! Objects are kept as JSON so one map serves every kind. Every write bumps a
//! store-wide resource version and is broadcast to watchers while the state
//! lock is held, so watchers observe writes in version order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use beacon_core::error::BeaconError;
use beacon_core::resource::{ObjectKey, Resource};
use beacon_core::traits::store::{DeleteOptions, ListParams, ObjectStore, WatchEvent};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

/// Capacity of the watch broadcast buffer before slow watchers lag.
const WATCH_BUFFER: usize = 1024;

/// Store operations, used to aim injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Finalize,
    Delete,
    DeleteCollection,
}

/// Error produced by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    NotFound,
    Conflict,
    Unavailable,
}

/// A scripted failure for the next `times` matching operations.
#[derive(Debug, Clone)]
pub struct Fault {
    pub op: StoreOp,
    pub kind: &'static str,
    pub error: FaultKind,
    pub times: usize,
}

/// Kind of change recorded in the journal and sent to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// One applied write, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub kind: String,
    pub key: ObjectKey,
    pub event: EventType,
    pub resource_version: u64,
}

#[derive(Debug, Clone)]
struct RawEvent {
    kind: &'static str,
    event: EventType,
    object: Value,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(&'static str, ObjectKey), Value>,
    last_version: u64,
    faults: Vec<Fault>,
    journal: Vec<JournalEntry>,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn take_fault(&mut self, op: StoreOp, kind: &'static str, name: &str) -> Result<(), BeaconError> {
        let Some(index) = self
            .faults
            .iter()
            .position(|f| f.op == op && f.kind == kind && f.times > 0)
        else {
            return Ok(());
        };

        let fault = &mut self.faults[index];
        fault.times -= 1;
        let error = fault.error;
        if fault.times == 0 {
            self.faults.remove(index);
        }

        debug!(?op, kind, name, ?error, "injected store fault");
        Err(match error {
            FaultKind::NotFound => BeaconError::not_found(kind, name),
            FaultKind::Conflict => BeaconError::conflict(kind, name, "injected conflict"),
            FaultKind::Unavailable => BeaconError::Store {
                message: format!("injected outage during {op:?} on {kind}"),
                source: None,
            },
        })
    }
}

/// In-process object store.
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<RawEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    /// Makes the next `fault.times` matching operations fail.
    pub async fn inject_fault(&self, fault: Fault) {
        self.state.lock().await.faults.push(fault);
    }

    /// Every applied write so far, in commit order.
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().await.journal.clone()
    }

    /// Number of stored objects of kind `K`.
    pub async fn count<K: Resource>(&self) -> usize {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(kind, _)| *kind == K::KIND)
            .count()
    }

    fn commit(&self, state: &mut State, kind: &'static str, key: ObjectKey, event: EventType, object: Value) {
        let resource_version = object
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_u64)
            .unwrap_or(state.last_version);
        state.journal.push(JournalEntry {
            kind: kind.to_string(),
            key,
            event,
            resource_version,
        });
        // No receivers is not an error: nobody is watching yet.
        let _ = self.events.send(RawEvent { kind, event, object });
    }

    /// Shared path for update, update_status and finalize.
    async fn write<K: Resource>(
        &self,
        op: StoreOp,
        obj: &K,
        merge: impl FnOnce(Value, &Value) -> Value + Send,
    ) -> Result<K, BeaconError> {
        let key = obj.key();
        let mut state = self.state.lock().await;
        state.take_fault(op, K::KIND, &key.name)?;

        let stored_value = state
            .objects
            .get(&(K::KIND, key.clone()))
            .cloned()
            .ok_or_else(|| BeaconError::not_found(K::KIND, key.to_string()))?;
        let stored: K = decode(stored_value.clone())?;
        check_write_preconditions(obj, &stored)?;

        let merged = merge(encode(obj)?, &stored_value);
        let mut updated: K = decode(merged)?;
        let version = state.next_version();
        {
            let meta = updated.meta_mut();
            let current = stored.meta();
            meta.uid = current.uid.clone();
            meta.creation_timestamp = current.creation_timestamp;
            meta.deletion_timestamp = current.deletion_timestamp;
            meta.resource_version = version;
        }

        let value = encode(&updated)?;
        state.objects.insert((K::KIND, key.clone()), value.clone());
        self.commit(&mut state, K::KIND, key, EventType::Modified, value);
        Ok(updated)
    }

    /// Applies delete semantics to one stored object. Caller holds the lock.
    fn delete_locked<K: Resource>(
        &self,
        state: &mut State,
        key: &ObjectKey,
        options: &DeleteOptions,
    ) -> Result<(), BeaconError> {
        let stored_value = state
            .objects
            .get(&(K::KIND, key.clone()))
            .cloned()
            .ok_or_else(|| BeaconError::not_found(K::KIND, key.to_string()))?;
        let mut stored: K = decode(stored_value)?;

        if let Some(pre) = &options.preconditions {
            if let Some(uid) = &pre.uid
                && *uid != stored.meta().uid
            {
                return Err(BeaconError::conflict(
                    K::KIND,
                    key.to_string(),
                    format!("uid precondition failed: expected {uid}, stored {}", stored.meta().uid),
                ));
            }
            if let Some(rv) = pre.resource_version
                && rv != stored.meta().resource_version
            {
                return Err(BeaconError::conflict(
                    K::KIND,
                    key.to_string(),
                    "resource version precondition failed",
                ));
            }
        }

        if stored.meta().finalizers.is_empty() {
            state.objects.remove(&(K::KIND, key.clone()));
            let value = encode(&stored)?;
            debug!(kind = K::KIND, key = %key, "object removed");
            self.commit(state, K::KIND, key.clone(), EventType::Deleted, value);
            return Ok(());
        }

        if stored.meta().deletion_timestamp.is_none() {
            let version = state.next_version();
            let meta = stored.meta_mut();
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version = version;
            let value = encode(&stored)?;
            state.objects.insert((K::KIND, key.clone()), value.clone());
            debug!(kind = K::KIND, key = %key, "deletion requested, finalizers pending");
            self.commit(state, K::KIND, key.clone(), EventType::Modified, value);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Resource>(&self, namespace: &str, name: &str) -> Result<K, BeaconError> {
        let key = ObjectKey::new(namespace, name);
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::Get, K::KIND, name)?;
        let value = state
            .objects
            .get(&(K::KIND, key.clone()))
            .cloned()
            .ok_or_else(|| BeaconError::not_found(K::KIND, key.to_string()))?;
        decode(value)
    }

    async fn list<K: Resource>(&self, params: &ListParams) -> Result<Vec<K>, BeaconError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::List, K::KIND, "")?;
        state
            .objects
            .iter()
            .filter(|((kind, _), value)| *kind == K::KIND && params.matches(value))
            .map(|(_, value)| decode(value.clone()))
            .collect()
    }

    async fn create<K: Resource>(&self, obj: &K) -> Result<K, BeaconError> {
        let key = obj.key();
        if key.name.is_empty() {
            return Err(BeaconError::Store {
                message: format!("{} name must not be empty", K::KIND),
                source: None,
            });
        }

        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::Create, K::KIND, &key.name)?;
        if state.objects.contains_key(&(K::KIND, key.clone())) {
            return Err(BeaconError::AlreadyExists {
                kind: K::KIND.to_string(),
                name: key.to_string(),
            });
        }

        let mut created = obj.clone();
        let version = state.next_version();
        {
            let meta = created.meta_mut();
            meta.uid = uuid::Uuid::new_v4().to_string();
            meta.resource_version = version;
            meta.creation_timestamp = Some(Utc::now());
            meta.deletion_timestamp = None;
        }

        let value = encode(&created)?;
        state.objects.insert((K::KIND, key.clone()), value.clone());
        self.commit(&mut state, K::KIND, key, EventType::Added, value);
        Ok(created)
    }

    async fn update<K: Resource>(&self, obj: &K) -> Result<K, BeaconError> {
        self.write(StoreOp::Update, obj, |mut incoming, stored| {
            copy_field(&mut incoming, stored, &["status"]);
            incoming
        })
        .await
    }

    async fn update_status<K: Resource>(&self, obj: &K) -> Result<K, BeaconError> {
        self.write(StoreOp::UpdateStatus, obj, |incoming, stored| {
            let mut merged = stored.clone();
            copy_field(&mut merged, &incoming, &["status"]);
            merged
        })
        .await
    }

    async fn finalize<K: Resource>(&self, obj: &K) -> Result<K, BeaconError> {
        self.write(StoreOp::Finalize, obj, |incoming, stored| {
            let mut merged = stored.clone();
            copy_field(&mut merged, &incoming, &["metadata", "finalizers"]);
            merged
        })
        .await
    }

    async fn delete<K: Resource>(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), BeaconError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::Delete, K::KIND, name)?;
        self.delete_locked::<K>(&mut state, &ObjectKey::new(namespace, name), options)
    }

    async fn delete_collection<K: Resource>(
        &self,
        params: &ListParams,
        options: &DeleteOptions,
    ) -> Result<usize, BeaconError> {
        let mut state = self.state.lock().await;
        state.take_fault(StoreOp::DeleteCollection, K::KIND, "")?;

        let keys: Vec<ObjectKey> = state
            .objects
            .iter()
            .filter(|((kind, _), value)| *kind == K::KIND && params.matches(value))
            .map(|((_, key), _)| key.clone())
            .collect();

        for key in &keys {
            self.delete_locked::<K>(&mut state, key, options)?;
        }
        Ok(keys.len())
    }

    async fn watch<K: Resource>(&self) -> Result<BoxStream<'static, WatchEvent<K>>, BeaconError> {
        let receiver = self.events.subscribe();
        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(raw) if raw.kind == K::KIND => match serde_json::from_value::<K>(raw.object) {
                        Ok(obj) => {
                            let event = match raw.event {
                                EventType::Added => WatchEvent::Added(obj),
                                EventType::Modified => WatchEvent::Modified(obj),
                                EventType::Deleted => WatchEvent::Deleted(obj),
                            };
                            return Some((event, receiver));
                        }
                        Err(e) => warn!(kind = K::KIND, error = %e, "dropping undecodable watch event"),
                    },
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(kind = K::KIND, skipped, "watch lagged, ending stream");
                        return None;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

fn check_write_preconditions<K: Resource>(incoming: &K, stored: &K) -> Result<(), BeaconError> {
    let (new, old) = (incoming.meta(), stored.meta());
    if !new.uid.is_empty() && new.uid != old.uid {
        return Err(BeaconError::conflict(
            K::KIND,
            incoming.key().to_string(),
            format!("uid {} does not match stored uid {}", new.uid, old.uid),
        ));
    }
    if new.resource_version != 0 && new.resource_version != old.resource_version {
        return Err(BeaconError::conflict(
            K::KIND,
            incoming.key().to_string(),
            format!(
                "resource version {} is stale (stored {})",
                new.resource_version, old.resource_version
            ),
        ));
    }
    Ok(())
}

/// Copies the value at `path` from `src` into `dst`, removing it from `dst`
/// when `src` has none.
fn copy_field(dst: &mut Value, src: &Value, path: &[&str]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let source = parents
        .iter()
        .try_fold(src, |v, segment| v.get(segment))
        .and_then(|v| v.get(last))
        .cloned();

    let mut target = dst;
    for segment in parents {
        let Some(next) = target.get_mut(segment) else {
            return;
        };
        target = next;
    }
    if let Some(map) = target.as_object_mut() {
        match source {
            Some(value) => {
                map.insert((*last).to_string(), value);
            }
            None => {
                map.remove(*last);
            }
        }
    }
}

fn encode<K: Resource>(obj: &K) -> Result<Value, BeaconError> {
    serde_json::to_value(obj).map_err(|e| BeaconError::Store {
        message: format!("failed to encode {}: {e}", K::KIND),
        source: Some(Box::new(e)),
    })
}

fn decode<K: Resource>(value: Value) -> Result<K, BeaconError> {
    serde_json::from_value(value).map_err(|e| BeaconError::Store {
        message: format!("failed to decode {}: {e}", K::KIND),
        source: Some(Box::new(e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::resource::ObjectMeta;
    use beacon_core::types::{Channel, ChannelPhase, ChannelSpec, ChannelStatus, Template, TemplateSpec};

    fn channel(name: &str, finalizers: &[&str]) -> Channel {
        let mut metadata = ObjectMeta::cluster(name);
        metadata.finalizers = finalizers.iter().map(|f| f.to_string()).collect();
        Channel {
            metadata,
            spec: ChannelSpec::default(),
            status: ChannelStatus::default(),
        }
    }

    fn template(namespace: &str, name: &str) -> Template {
        Template {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: TemplateSpec::default(),
        }
    }

    #[tokio::test]
    async fn create_assigns_identity_and_version() {
        let store = MemoryStore::new();
        let created = store.create(&channel("sms", &[])).await.unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.resource_version, 1);
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store.create(&channel("sms", &[])).await.unwrap_err();
        assert!(matches!(err, BeaconError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&channel("sms", &[])).await.unwrap();

        let mut first = created.clone();
        first.metadata.labels.insert("tier".into(), "gold".into());
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.status.phase = ChannelPhase::Terminating;
        let err = store.update_status(&stale).await.unwrap_err();
        assert!(err.is_conflict(), "got: {err}");
    }

    #[tokio::test]
    async fn status_and_spec_writes_are_separate() {
        let store = MemoryStore::new();
        let created = store.create(&channel("sms", &[])).await.unwrap();

        let mut status_only = created.clone();
        status_only.status.phase = ChannelPhase::Terminating;
        status_only.metadata.labels.insert("ignored".into(), "yes".into());
        let after_status = store.update_status(&status_only).await.unwrap();
        assert_eq!(after_status.status.phase, ChannelPhase::Terminating);
        assert!(after_status.metadata.labels.is_empty());

        let mut spec_only = after_status.clone();
        spec_only.status.phase = ChannelPhase::Active;
        let after_update = store.update(&spec_only).await.unwrap();
        assert_eq!(after_update.status.phase, ChannelPhase::Terminating);
    }

    #[tokio::test]
    async fn delete_with_finalizers_only_marks_deleting() {
        let store = MemoryStore::new();
        store.create(&channel("sms", &["a", "b"])).await.unwrap();
        store
            .delete::<Channel>("", "sms", &DeleteOptions::background())
            .await
            .unwrap();

        let marked: Channel = store.get("", "sms").await.unwrap();
        assert!(marked.metadata.is_deleting());

        let mut cleared = marked.clone();
        cleared.metadata.finalizers.clear();
        let finalized = store.finalize(&cleared).await.unwrap();
        assert!(finalized.metadata.finalizers.is_empty());
        assert!(finalized.metadata.is_deleting());

        store
            .delete::<Channel>("", "sms", &DeleteOptions::with_uid(finalized.metadata.uid.clone()))
            .await
            .unwrap();
        let err = store.get::<Channel>("", "sms").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn uid_precondition_protects_recreated_objects() {
        let store = MemoryStore::new();
        let old = store.create(&channel("sms", &[])).await.unwrap();
        store
            .delete::<Channel>("", "sms", &DeleteOptions::background())
            .await
            .unwrap();
        store.create(&channel("sms", &[])).await.unwrap();

        let err = store
            .delete::<Channel>("", "sms", &DeleteOptions::with_uid(old.metadata.uid))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.count::<Channel>().await, 1);
    }

    #[tokio::test]
    async fn delete_collection_is_scoped_to_namespace() {
        let store = MemoryStore::new();
        store.create(&template("sms", "a")).await.unwrap();
        store.create(&template("sms", "b")).await.unwrap();
        store.create(&template("mail", "c")).await.unwrap();

        let deleted = store
            .delete_collection::<Template>(&ListParams::in_namespace("sms"), &DeleteOptions::background())
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining: Vec<Template> = store.list(&ListParams::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].metadata.name, "c");
    }

    #[tokio::test]
    async fn watch_delivers_typed_events_in_order() {
        let store = MemoryStore::new();
        let mut events = store.watch::<Channel>().await.unwrap();

        store.create(&template("sms", "ignored")).await.unwrap();
        let created = store.create(&channel("sms", &[])).await.unwrap();
        store
            .delete::<Channel>("", "sms", &DeleteOptions::background())
            .await
            .unwrap();

        assert_eq!(events.next().await, Some(WatchEvent::Added(created.clone())));
        match events.next().await {
            Some(WatchEvent::Deleted(obj)) => assert_eq!(obj.metadata.uid, created.metadata.uid),
            other => panic!("expected Deleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_watch_ends_instead_of_skipping() {
        let store = MemoryStore::new();
        let mut events = store.watch::<Channel>().await.unwrap();

        for i in 0..WATCH_BUFFER + 10 {
            store.create(&channel(&format!("c{i}"), &[])).await.unwrap();
        }

        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn injected_faults_fire_then_clear() {
        let store = MemoryStore::new();
        store.create(&channel("sms", &[])).await.unwrap();
        store
            .inject_fault(Fault {
                op: StoreOp::Get,
                kind: Channel::KIND,
                error: FaultKind::Unavailable,
                times: 1,
            })
            .await;

        assert!(matches!(
            store.get::<Channel>("", "sms").await,
            Err(BeaconError::Store { .. })
        ));
        assert!(store.get::<Channel>("", "sms").await.is_ok());
    }
}
