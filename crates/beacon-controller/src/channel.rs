// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel termination controller.
//!
//! Live channels carry this controller's finalizer token. Once a channel is
//! marked for deletion (and a grace period has passed) the controller moves
//! it to `Terminating`, deletes every Template and MessageRequest in the
//! channel's namespace, releases its token and, when it holds the last one,
//! deletes the channel. Each step can be re-run after a failure at any point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_config::BeaconConfig;
use beacon_config::model::ChannelControllerConfig;
use beacon_core::error::BeaconError;
use beacon_core::resource::{ObjectKey, Resource};
use beacon_core::traits::store::{DeleteOptions, ListParams, ObjectStore};
use beacon_core::types::{Channel, ChannelPhase, MessageRequest, Template};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::informer::EventHandler;
use crate::retry::update_with_retry;
use crate::runtime::{ControllerRun, Reconciler, run_controller};
use crate::workqueue::WorkQueue;

const CONFLICT_RETRY_ATTEMPTS: u32 = 5;

pub struct ChannelController<S> {
    store: Arc<S>,
    queue: WorkQueue<ObjectKey>,
    config: ChannelControllerConfig,
    resync: Duration,
}

impl<S: ObjectStore> ChannelController<S> {
    pub fn new(store: Arc<S>, config: &BeaconConfig) -> Self {
        Self {
            store,
            queue: WorkQueue::new(
                config.controller.requeue_base_delay(),
                config.controller.requeue_max_delay(),
            ),
            config: config.channel.clone(),
            resync: config.controller.resync_period(),
        }
    }

    /// Watches channels and reconciles them with `workers` workers until
    /// `stop` fires. Failed keys are retried until they succeed.
    pub async fn run(self: Arc<Self>, workers: usize, stop: CancellationToken) -> Result<(), BeaconError> {
        let run = ControllerRun {
            store: Arc::clone(&self.store),
            queue: self.queue.clone(),
            resync: self.resync,
            workers,
            max_requeues: None,
        };
        run_controller::<S, Channel, Self>(self, run, stop).await
    }

    fn owns_token(&self, channel: &Channel) -> bool {
        channel
            .metadata
            .finalizers
            .iter()
            .any(|f| *f == self.config.finalizer)
    }

    async fn enqueue(&self, channel: &Channel) {
        if channel.metadata.is_deleting() {
            self.queue.add_after(channel.key(), self.config.grace_period());
        } else if !self.owns_token(channel) {
            self.queue.add(channel.key()).await;
        }
    }

    async fn ensure_finalizer(&self, channel: Channel) -> Result<(), BeaconError> {
        if self.owns_token(&channel) {
            return Ok(());
        }

        let store = self.store.as_ref();
        let finalizer = self.config.finalizer.as_str();
        let key = channel.key();
        let (namespace, name) = (key.namespace.as_str(), key.name.as_str());
        let result = update_with_retry(
            channel,
            CONFLICT_RETRY_ATTEMPTS,
            move || store.get::<Channel>(namespace, name),
            move |mut channel: Channel| async move {
                let present = channel.metadata.finalizers.iter().any(|f| f == finalizer);
                if present || channel.metadata.is_deleting() {
                    return Ok(channel);
                }
                channel.metadata.finalizers.push(finalizer.to_string());
                store.update(&channel).await
            },
        )
        .await;

        match result {
            Ok(_) => {
                debug!(channel = %key, finalizer, "finalizer added");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn terminate(&self, channel: Channel) -> Result<(), BeaconError> {
        let store = self.store.as_ref();
        let finalizer = self.config.finalizer.as_str();
        let key = channel.key();
        let (namespace, name) = (key.namespace.as_str(), key.name.as_str());
        let refetch = move || store.get::<Channel>(namespace, name);

        let channel = if channel.status.phase == ChannelPhase::Terminating {
            channel
        } else {
            let marked = update_with_retry(
                channel,
                CONFLICT_RETRY_ATTEMPTS,
                refetch,
                move |mut channel: Channel| async move {
                    channel.status.phase = ChannelPhase::Terminating;
                    store.update_status(&channel).await
                },
            )
            .await;
            match marked {
                Ok(channel) => {
                    info!(channel = %key, "channel terminating");
                    channel
                }
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
        };

        self.delete_content(&channel.metadata.name).await?;

        let channel = if self.owns_token(&channel) {
            let released = update_with_retry(
                channel,
                CONFLICT_RETRY_ATTEMPTS,
                refetch,
                move |mut channel: Channel| async move {
                    channel.metadata.finalizers.retain(|f| f != finalizer);
                    store.finalize(&channel).await
                },
            )
            .await;
            match released {
                Ok(channel) => {
                    debug!(channel = %key, finalizer, "finalizer removed");
                    channel
                }
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
        } else {
            channel
        };

        if !channel.metadata.finalizers.is_empty() {
            debug!(channel = %key, remaining = ?channel.metadata.finalizers, "waiting on other finalizers");
            return Ok(());
        }
        if !self.config.delete_when_finalized {
            return Ok(());
        }

        match store
            .delete::<Channel>(namespace, name, &DeleteOptions::with_uid(channel.uid()))
            .await
        {
            Ok(()) => {
                info!(channel = %key, "channel deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Deletes every Template and MessageRequest in the channel's namespace.
    /// Both kinds are attempted even if the first fails.
    async fn delete_content(&self, channel: &str) -> Result<(), BeaconError> {
        let params = ListParams::in_namespace(channel);
        let options = DeleteOptions::background();
        let mut errors = Vec::new();

        match self.store.delete_collection::<Template>(&params, &options).await {
            Ok(count) => debug!(channel, count, "templates deleted"),
            Err(e) => errors.push(e),
        }
        match self.store.delete_collection::<MessageRequest>(&params, &options).await {
            Ok(count) => debug!(channel, count, "message requests deleted"),
            Err(e) => errors.push(e),
        }

        BeaconError::aggregate(errors)
    }
}

#[async_trait]
impl<S: ObjectStore> Reconciler for ChannelController<S> {
    fn name(&self) -> &str {
        "channel"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), BeaconError> {
        let channel: Channel = match self.store.get(&key.namespace, &key.name).await {
            Ok(channel) => channel,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if channel.metadata.is_deleting() {
            self.terminate(channel).await
        } else {
            self.ensure_finalizer(channel).await
        }
    }
}

#[async_trait]
impl<S: ObjectStore> EventHandler<Channel> for ChannelController<S> {
    async fn on_add(&self, obj: &Channel) {
        self.enqueue(obj).await;
    }

    async fn on_update(&self, _old: &Channel, new: &Channel) {
        self.enqueue(new).await;
    }

    async fn on_delete(&self, obj: &Channel) {
        self.queue.forget(&obj.key()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_store::{EventType, Fault, FaultKind, MemoryStore, StoreOp};
    use beacon_test_utils::{TestHarness, fixtures};

    const TOKEN: &str = "beacon.io/channel-controller";

    fn controller(h: &TestHarness) -> ChannelController<MemoryStore> {
        ChannelController::new(h.store.clone(), &BeaconConfig::default())
    }

    async fn seed_channel(h: &TestHarness, finalizers: &[&str]) -> Channel {
        let mut channel = fixtures::sms_channel("ops");
        channel.metadata.finalizers = finalizers.iter().map(|f| f.to_string()).collect();
        let channel = h.create(channel).await;
        h.create(fixtures::sms_template("ops", "alert", "{{.name}} is down")).await;
        h.create(fixtures::sms_template("ops", "recovery", "{{.name}} is back")).await;
        h.create(fixtures::request("ops", "r1", "alert", &["alice"], &[])).await;
        channel
    }

    async fn mark_deleted(h: &TestHarness) {
        h.store
            .delete::<Channel>("", "ops", &DeleteOptions::background())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn live_channel_gets_finalizer_and_keeps_foreign_ones() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &["other.io/keep"]).await;
        let c = controller(&h);

        c.reconcile(&channel.key()).await.unwrap();
        c.reconcile(&channel.key()).await.unwrap();

        let stored: Channel = h.store.get("", "ops").await.unwrap();
        assert_eq!(stored.metadata.finalizers, vec!["other.io/keep", TOKEN]);
        assert_eq!(stored.status.phase, ChannelPhase::Active);
    }

    #[tokio::test]
    async fn termination_removes_content_then_token_then_channel() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &[TOKEN]).await;
        let c = controller(&h);
        mark_deleted(&h).await;
        let before = h.store.journal().await.len();

        c.reconcile(&channel.key()).await.unwrap();

        let steps: Vec<(String, EventType)> = h.store.journal().await[before..]
            .iter()
            .map(|e| (e.kind.clone(), e.event))
            .collect();
        let step = |kind: &str, event| (kind.to_string(), event);
        assert_eq!(
            steps,
            vec![
                step(Channel::KIND, EventType::Modified),
                step(Template::KIND, EventType::Deleted),
                step(Template::KIND, EventType::Deleted),
                step(MessageRequest::KIND, EventType::Deleted),
                step(Channel::KIND, EventType::Modified),
                step(Channel::KIND, EventType::Deleted),
            ]
        );
        assert_eq!(h.store.count::<Channel>().await, 0);
        assert_eq!(h.store.count::<Template>().await, 0);
    }

    #[tokio::test]
    async fn foreign_finalizer_keeps_channel_terminating() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &["other.io/keep", TOKEN]).await;
        let c = controller(&h);
        mark_deleted(&h).await;

        c.reconcile(&channel.key()).await.unwrap();

        let stored: Channel = h.store.get("", "ops").await.unwrap();
        assert_eq!(stored.status.phase, ChannelPhase::Terminating);
        assert_eq!(stored.metadata.finalizers, vec!["other.io/keep"]);
        assert!(stored.metadata.is_deleting());
        assert_eq!(h.store.count::<Template>().await, 0);
        assert_eq!(h.store.count::<MessageRequest>().await, 0);
    }

    #[tokio::test]
    async fn failed_content_delete_keeps_token_and_attempts_every_kind() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &[TOKEN]).await;
        let c = controller(&h);
        mark_deleted(&h).await;
        h.store
            .inject_fault(Fault {
                op: StoreOp::DeleteCollection,
                kind: Template::KIND,
                error: FaultKind::Unavailable,
                times: 1,
            })
            .await;

        c.reconcile(&channel.key()).await.unwrap_err();

        let stored: Channel = h.store.get("", "ops").await.unwrap();
        assert_eq!(stored.metadata.finalizers, vec![TOKEN]);
        assert_eq!(h.store.count::<Template>().await, 2);
        assert_eq!(h.store.count::<MessageRequest>().await, 0);

        c.reconcile(&channel.key()).await.unwrap();
        assert_eq!(h.store.count::<Channel>().await, 0);
    }

    #[tokio::test]
    async fn status_conflict_is_refetched_and_retried() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &[TOKEN]).await;
        let c = controller(&h);
        mark_deleted(&h).await;
        h.store
            .inject_fault(Fault {
                op: StoreOp::UpdateStatus,
                kind: Channel::KIND,
                error: FaultKind::Conflict,
                times: 2,
            })
            .await;

        c.reconcile(&channel.key()).await.unwrap();
        assert_eq!(h.store.count::<Channel>().await, 0);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces_retry_exhaustion() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &[TOKEN]).await;
        let c = controller(&h);
        mark_deleted(&h).await;
        h.store
            .inject_fault(Fault {
                op: StoreOp::UpdateStatus,
                kind: Channel::KIND,
                error: FaultKind::Conflict,
                times: CONFLICT_RETRY_ATTEMPTS as usize,
            })
            .await;

        let err = c.reconcile(&channel.key()).await.unwrap_err();
        assert!(matches!(err, BeaconError::RetryExhausted { .. }), "got: {err:?}");
        assert_eq!(h.store.count::<Template>().await, 2);
    }

    #[tokio::test]
    async fn vanished_channel_is_success() {
        let h = TestHarness::new();
        let c = controller(&h);
        c.reconcile(&ObjectKey::new("", "ops")).await.unwrap();

        let channel = seed_channel(&h, &[TOKEN]).await;
        mark_deleted(&h).await;
        h.store
            .inject_fault(Fault {
                op: StoreOp::Finalize,
                kind: Channel::KIND,
                error: FaultKind::NotFound,
                times: 1,
            })
            .await;
        c.reconcile(&channel.key()).await.unwrap();
    }

    #[tokio::test]
    async fn channel_is_kept_when_final_deletion_is_not_owned() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &[TOKEN]).await;
        let mut config = BeaconConfig::default();
        config.channel.delete_when_finalized = false;
        let c = ChannelController::new(h.store.clone(), &config);
        mark_deleted(&h).await;

        c.reconcile(&channel.key()).await.unwrap();

        let stored: Channel = h.store.get("", "ops").await.unwrap();
        assert!(stored.metadata.finalizers.is_empty());
        assert_eq!(stored.status.phase, ChannelPhase::Terminating);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_channel_is_queued_only_after_grace_period() {
        let h = TestHarness::new();
        seed_channel(&h, &[TOKEN]).await;
        let c = controller(&h);
        mark_deleted(&h).await;
        let deleting: Channel = h.store.get("", "ops").await.unwrap();
        assert!(deleting.metadata.is_deleting());

        c.on_update(&deleting, &deleting).await;

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(c.queue.is_empty().await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(c.queue.len().await, 1);
        assert_eq!(c.queue.get().await, Some(deleting.key()));
    }

    #[tokio::test(start_paused = true)]
    async fn live_channel_without_token_is_queued_at_once() {
        let h = TestHarness::new();
        let channel = seed_channel(&h, &[]).await;
        let c = controller(&h);

        c.on_add(&channel).await;

        assert_eq!(c.queue.len().await, 1);
    }
}
