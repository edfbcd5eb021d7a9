// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker pool shared by both controllers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::error::BeaconError;
use beacon_core::resource::{ObjectKey, Resource};
use beacon_core::traits::store::ObjectStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::informer::{EventHandler, Informer};
use crate::workqueue::WorkQueue;

/// Brings one object's actual state toward its desired state.
///
/// Reconcile must be idempotent: the same key may be delivered again at any
/// time (resync, retries, duplicate events).
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Name for logging.
    fn name(&self) -> &str;

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), BeaconError>;
}

/// Spawns `workers` tasks draining `queue` into `reconciler`.
///
/// Failed keys are re-added with backoff. When `max_requeues` is set, a key
/// that has already been re-added that many times is dropped instead.
pub fn spawn_workers<R: Reconciler>(
    reconciler: Arc<R>,
    queue: WorkQueue<ObjectKey>,
    workers: usize,
    max_requeues: Option<u32>,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker| {
            let reconciler = Arc::clone(&reconciler);
            let queue = queue.clone();
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    process(reconciler.as_ref(), &queue, &key, max_requeues).await;
                    queue.done(&key).await;
                }
                debug!(controller = reconciler.name(), worker, "worker stopped");
            })
        })
        .collect()
}

async fn process<R: Reconciler>(
    reconciler: &R,
    queue: &WorkQueue<ObjectKey>,
    key: &ObjectKey,
    max_requeues: Option<u32>,
) {
    let Err(e) = reconciler.reconcile(key).await else {
        queue.forget(key).await;
        return;
    };

    let requeues = queue.num_requeues(key).await;
    match max_requeues {
        Some(max) if requeues >= max => {
            error!(
                controller = reconciler.name(),
                key = %key,
                requeues,
                error = %e,
                "giving up on key after repeated failures"
            );
            queue.forget(key).await;
        }
        _ => {
            warn!(
                controller = reconciler.name(),
                key = %key,
                requeues,
                error = %e,
                "reconcile failed, requeueing"
            );
            queue.add_rate_limited(key.clone()).await;
        }
    }
}

/// Everything a controller needs to run besides itself.
pub struct ControllerRun<S> {
    pub store: Arc<S>,
    pub queue: WorkQueue<ObjectKey>,
    pub resync: Duration,
    pub workers: usize,
    pub max_requeues: Option<u32>,
}

/// Runs an informer feeding `controller` and a worker pool draining its
/// queue until `stop` fires, then stops dequeuing and waits for in-flight
/// reconciles to finish.
///
/// Returns early with an error if the informer fails.
pub async fn run_controller<S, K, C>(
    controller: Arc<C>,
    run: ControllerRun<S>,
    stop: CancellationToken,
) -> Result<(), BeaconError>
where
    S: ObjectStore + 'static,
    K: Resource,
    C: Reconciler + EventHandler<K>,
{
    let ControllerRun {
        store,
        queue,
        resync,
        workers,
        max_requeues,
    } = run;

    let handles = spawn_workers(Arc::clone(&controller), queue.clone(), workers, max_requeues);
    info!(controller = controller.name(), kind = K::KIND, workers, "controller started");

    let informer = Informer::<S, K>::new(store, resync);
    let informer_stop = stop.child_token();
    let handler = Arc::clone(&controller);
    let mut informer_task =
        tokio::spawn(async move { informer.run(handler, informer_stop).await });

    let finished_early = tokio::select! {
        _ = stop.cancelled() => None,
        joined = &mut informer_task => Some(joined),
    };

    queue.shut_down().await;
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(controller = controller.name(), error = %e, "worker task failed");
        }
    }

    let joined = match finished_early {
        Some(joined) => joined,
        None => informer_task.await,
    };
    info!(controller = controller.name(), "controller stopped");
    joined.map_err(|e| BeaconError::Internal(format!("informer task failed: {e}")))?
}
