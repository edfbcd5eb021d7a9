// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! List-then-watch cache that turns store changes into handler callbacks.
//!
//! The watch is opened before the initial list so no change is missed.
//! Events that do not advance an object's resource version (replays of what
//! the list already returned) are dropped. A watch that ends, for example
//! because it fell behind, is replaced by a fresh list and watch. Every
//! `resync` period each cached object is re-delivered through
//! [`EventHandler::on_update`].

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::error::BeaconError;
use beacon_core::resource::{ObjectKey, Resource};
use beacon_core::traits::store::{ListParams, ObjectStore, WatchEvent};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives change notifications for one resource kind.
#[async_trait]
pub trait EventHandler<K: Resource>: Send + Sync + 'static {
    async fn on_add(&self, obj: &K);

    /// Called for modifications and for periodic resyncs (`old == new`).
    async fn on_update(&self, old: &K, new: &K);

    async fn on_delete(&self, obj: &K);
}

/// Last observed state of every object of kind `K`.
pub struct Informer<S, K> {
    store: Arc<S>,
    resync: Duration,
    cache: Arc<RwLock<HashMap<ObjectKey, K>>>,
    _kind: PhantomData<fn() -> K>,
}

impl<S, K> Informer<S, K>
where
    S: ObjectStore + 'static,
    K: Resource,
{
    pub fn new(store: Arc<S>, resync: Duration) -> Self {
        Self {
            store,
            resync,
            cache: Arc::new(RwLock::new(HashMap::new())),
            _kind: PhantomData,
        }
    }

    /// Cached copy of the object at `key`.
    pub async fn cached(&self, key: &ObjectKey) -> Option<K> {
        self.cache.read().await.get(key).cloned()
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Lists, then follows the watch until `stop` fires. When the watch
    /// ends the informer lists again and reconciles its cache against the
    /// listing, so changes the watch dropped still reach the handler.
    pub async fn run<H>(&self, handler: Arc<H>, stop: CancellationToken) -> Result<(), BeaconError>
    where
        H: EventHandler<K>,
    {
        let mut events = self.sync(handler.as_ref()).await?;

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.resync, self.resync);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(kind = K::KIND, "informer stopping");
                    return Ok(());
                }
                event = events.next() => match event {
                    Some(event) => self.apply(handler.as_ref(), event).await,
                    None => {
                        warn!(kind = K::KIND, "watch stream ended, relisting");
                        events = self.sync(handler.as_ref()).await?;
                    }
                },
                _ = ticker.tick() => self.resync_all(handler.as_ref()).await,
            }
        }
    }

    /// Opens a watch, lists, and brings the cache in line with the listing.
    /// New objects are added, changed ones updated, and cached objects
    /// missing from the listing deleted.
    async fn sync<H>(&self, handler: &H) -> Result<BoxStream<'static, WatchEvent<K>>, BeaconError>
    where
        H: EventHandler<K>,
    {
        let events = self.store.watch::<K>().await?;
        let listed: Vec<K> = self.store.list(&ListParams::default()).await?;
        info!(kind = K::KIND, count = listed.len(), "informer synced");

        let listed_keys: HashSet<ObjectKey> = listed.iter().map(Resource::key).collect();
        for obj in listed {
            self.apply(handler, WatchEvent::Added(obj)).await;
        }

        let vanished: Vec<K> = self
            .cache
            .read()
            .await
            .iter()
            .filter(|(key, _)| !listed_keys.contains(*key))
            .map(|(_, obj)| obj.clone())
            .collect();
        for obj in vanished {
            self.apply(handler, WatchEvent::Deleted(obj)).await;
        }
        Ok(events)
    }

    async fn apply<H: EventHandler<K>>(&self, handler: &H, event: WatchEvent<K>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let key = obj.key();
                let previous = {
                    let mut cache = self.cache.write().await;
                    let replayed = cache.get(&key).is_some_and(|old| {
                        old.uid() == obj.uid()
                            && old.meta().resource_version >= obj.meta().resource_version
                    });
                    if replayed {
                        return;
                    }
                    cache.insert(key, obj.clone())
                };
                match previous {
                    Some(old) if old.uid() == obj.uid() => handler.on_update(&old, &obj).await,
                    Some(old) => {
                        handler.on_delete(&old).await;
                        handler.on_add(&obj).await;
                    }
                    None => handler.on_add(&obj).await,
                }
            }
            WatchEvent::Deleted(obj) => {
                let removed = self.cache.write().await.remove(&obj.key());
                handler.on_delete(removed.as_ref().unwrap_or(&obj)).await;
            }
        }
    }

    async fn resync_all<H: EventHandler<K>>(&self, handler: &H) {
        let snapshot: Vec<K> = self.cache.read().await.values().cloned().collect();
        debug!(kind = K::KIND, count = snapshot.len(), "resync");
        for obj in &snapshot {
            handler.on_update(obj, obj).await;
        }
    }
}
