// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MessageRequest reconciler.
//!
//! Drives each request `Pending -> Sending -> {Sent, Failed, PartialFailure}`.
//! The `Pending -> Sending` write has no side effects; dispatch happens only
//! when a request is observed in `Sending` after having been seen `Pending`
//! by this process, so a request is dispatched at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_config::BeaconConfig;
use beacon_config::model::RequestControllerConfig;
use beacon_core::error::BeaconError;
use beacon_core::resource::{ObjectKey, ObjectMeta, Resource};
use beacon_core::traits::store::ObjectStore;
use beacon_core::types::{Message, MessageRequest, MessageSpec, MessageStatus, RequestPhase};
use beacon_dispatch::{Delivery, DispatchEngine, DispatchOutcome};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::informer::EventHandler;
use crate::retry::persist_with_retry;
use crate::runtime::{ControllerRun, Reconciler, run_controller};
use crate::workqueue::WorkQueue;

/// Label linking an archived Message to the request that produced it.
pub const REQUEST_LABEL: &str = "beacon.io/request";

/// Label naming the receiver an archived Message was sent to.
pub const RECEIVER_LABEL: &str = "beacon.io/receiver";

pub struct MessageRequestController<S> {
    store: Arc<S>,
    engine: Arc<DispatchEngine<S>>,
    queue: WorkQueue<ObjectKey>,
    /// Last observed object per request key.
    cache: Mutex<HashMap<ObjectKey, MessageRequest>>,
    config: RequestControllerConfig,
    resync: Duration,
}

impl<S: ObjectStore> MessageRequestController<S> {
    pub fn new(store: Arc<S>, engine: Arc<DispatchEngine<S>>, config: &BeaconConfig) -> Self {
        Self {
            store,
            engine,
            queue: WorkQueue::new(
                config.controller.requeue_base_delay(),
                config.controller.requeue_max_delay(),
            ),
            cache: Mutex::new(HashMap::new()),
            config: config.request.clone(),
            resync: config.controller.resync_period(),
        }
    }

    /// Watches requests and reconciles them with `workers` workers until
    /// `stop` fires.
    pub async fn run(self: Arc<Self>, workers: usize, stop: CancellationToken) -> Result<(), BeaconError> {
        let run = ControllerRun {
            store: Arc::clone(&self.store),
            queue: self.queue.clone(),
            resync: self.resync,
            workers,
            max_requeues: Some(self.config.max_requeues),
        };
        run_controller::<S, MessageRequest, Self>(self, run, stop).await
    }

    /// Swaps the cached copy of a request, returning the previous one.
    ///
    /// A cached copy with a different uid belongs to a deleted namesake and
    /// is discarded.
    async fn observe(&self, request: &MessageRequest) -> Option<MessageRequest> {
        let mut cache = self.cache.lock().await;
        cache
            .insert(request.key(), request.clone())
            .filter(|previous| previous.uid() == request.uid())
    }

    async fn forget_request(&self, key: &ObjectKey) {
        self.cache.lock().await.remove(key);
    }

    async fn mark_sending(&self, request: &MessageRequest) -> Result<(), BeaconError> {
        let mut next = request.clone();
        next.status.phase = RequestPhase::Sending;
        next.status.last_transition_time = Some(Utc::now());
        match self.store.update_status(&next).await {
            Ok(_) => {
                debug!(request = %request.key(), "request accepted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Dispatches a request that moved from `Pending` to `Sending`.
    ///
    /// When dispatch fails before anything was sent, `previous` is put back
    /// into the cache so the queue retry dispatches again.
    async fn send(&self, request: &MessageRequest, previous: MessageRequest) -> Result<(), BeaconError> {
        let outcome = match self.engine.dispatch(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(request = %request.key(), error = %e, "dispatch could not start, will retry");
                self.cache.lock().await.insert(request.key(), previous);
                return Err(e);
            }
        };
        let phase = outcome.phase();
        info!(
            request = %request.key(),
            %phase,
            resolved = outcome.resolved,
            sent = outcome.sent.len(),
            failed = outcome.failures.len(),
            "request dispatched"
        );

        let persisted = self.persist_outcome(request, &outcome, phase).await;
        self.archive(request, &outcome.sent).await;
        persisted
    }

    async fn persist_outcome(
        &self,
        request: &MessageRequest,
        outcome: &DispatchOutcome,
        phase: RequestPhase,
    ) -> Result<(), BeaconError> {
        let mut next = request.clone();
        next.status.phase = phase;
        next.status.errors = outcome.failures.clone();
        next.status.last_transition_time = Some(Utc::now());

        let store = self.store.as_ref();
        let next = &next;
        let written = persist_with_retry(
            self.config.status_retry_attempts,
            self.config.status_retry_delay(),
            move || store.update_status(next),
        )
        .await?;
        if written.is_none() {
            debug!(request = %request.key(), "request vanished before its status was written");
        }
        Ok(())
    }

    /// Records every delivery as a Message. Failures are logged only.
    async fn archive(&self, request: &MessageRequest, sent: &[Delivery]) {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for delivery in sent {
            let count = seen.entry(delivery.receiver.as_str()).or_insert(0);
            let name = if *count == 0 {
                format!("{}-{}", request.metadata.name, delivery.receiver)
            } else {
                format!("{}-{}-{}", request.metadata.name, delivery.receiver, delivery.kind)
            };
            *count += 1;

            let message = message_for(request, delivery, name);
            match self.store.create(&message).await {
                Ok(_) => {}
                Err(BeaconError::AlreadyExists { .. }) => {
                    debug!(message = %message.key(), "message already archived");
                }
                Err(e) => {
                    warn!(message = %message.key(), error = %e, "failed to archive message");
                }
            }
        }
    }
}

fn message_for(request: &MessageRequest, delivery: &Delivery, name: String) -> Message {
    let mut metadata = ObjectMeta::namespaced(request.metadata.namespace.clone(), name);
    metadata
        .labels
        .insert(REQUEST_LABEL.to_string(), request.metadata.name.clone());
    metadata
        .labels
        .insert(RECEIVER_LABEL.to_string(), delivery.receiver.clone());
    Message {
        metadata,
        spec: MessageSpec {
            request: request.metadata.name.clone(),
            receiver: delivery.receiver.clone(),
            kind: delivery.kind,
            destination: delivery.destination.clone(),
            header: delivery.receipt.header.clone(),
            body: delivery.receipt.body.clone(),
            provider_message_id: delivery.receipt.provider_message_id.clone(),
        },
        status: MessageStatus::default(),
    }
}

#[async_trait]
impl<S: ObjectStore> Reconciler for MessageRequestController<S> {
    fn name(&self) -> &str {
        "message-request"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), BeaconError> {
        let request: MessageRequest = match self.store.get(&key.namespace, &key.name).await {
            Ok(request) => request,
            Err(e) if e.is_not_found() => {
                self.forget_request(key).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let previous = self.observe(&request).await;
        match (previous, request.status.phase) {
            (_, RequestPhase::Pending) => self.mark_sending(&request).await,
            (Some(previous), RequestPhase::Sending) if previous.status.phase == RequestPhase::Pending => {
                self.send(&request, previous).await
            }
            (None, RequestPhase::Sending) => {
                debug!(request = %key, "request already sending when first observed, skipping");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<S: ObjectStore> EventHandler<MessageRequest> for MessageRequestController<S> {
    async fn on_add(&self, obj: &MessageRequest) {
        self.queue.add(obj.key()).await;
    }

    async fn on_update(&self, _old: &MessageRequest, new: &MessageRequest) {
        self.queue.add(new.key()).await;
    }

    async fn on_delete(&self, obj: &MessageRequest) {
        let key = obj.key();
        self.forget_request(&key).await;
        self.queue.forget(&key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::traits::store::ListParams;
    use beacon_core::types::{IdentityKind, ProviderKind, ReceiverGroup, TemplateSpec};
    use beacon_dispatch::ProviderSet;
    use beacon_store::{Fault, FaultKind, MemoryStore, StoreOp};
    use beacon_test_utils::{TestHarness, fixtures};

    fn controller(h: &TestHarness) -> MessageRequestController<MemoryStore> {
        let providers = ProviderSet::new()
            .with(h.sms.clone())
            .with(h.wechat.clone())
            .with(h.email.clone());
        let engine = Arc::new(DispatchEngine::new(h.store.clone(), providers));
        let mut config = BeaconConfig::default();
        config.request.status_retry_delay_secs = 0;
        MessageRequestController::new(h.store.clone(), engine, &config)
    }

    async fn seed(h: &TestHarness) {
        h.create(fixtures::sms_channel("ops")).await;
        h.create(fixtures::sms_template("ops", "alert", "{{.name}} is down"))
            .await;
        h.create(fixtures::receiver("alice", &[(IdentityKind::Mobile, "13700000001")]))
            .await;
        h.create(fixtures::receiver("bob", &[(IdentityKind::Email, "bob@example.com")]))
            .await;
        h.create(fixtures::group("oncall", &["alice", "bob"])).await;
    }

    async fn phase(h: &TestHarness, name: &str) -> RequestPhase {
        h.store
            .get::<MessageRequest>("ops", name)
            .await
            .unwrap()
            .status
            .phase
    }

    #[tokio::test]
    async fn pending_request_moves_to_sending_without_sending() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["alice"], &[]))
            .await;
        let c = controller(&h);

        c.reconcile(&req.key()).await.unwrap();

        let stored: MessageRequest = h.store.get("ops", "r1").await.unwrap();
        assert_eq!(stored.status.phase, RequestPhase::Sending);
        assert!(stored.status.last_transition_time.is_some());
        assert_eq!(h.sms.send_count().await, 0);
    }

    #[tokio::test]
    async fn sending_request_is_dispatched_and_archived() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &[], &["oncall"]))
            .await;
        let c = controller(&h);

        c.reconcile(&req.key()).await.unwrap();
        c.reconcile(&req.key()).await.unwrap();

        let stored: MessageRequest = h.store.get("ops", "r1").await.unwrap();
        assert_eq!(stored.status.phase, RequestPhase::PartialFailure);
        assert_eq!(stored.status.errors.len(), 1);
        assert!(stored.status.errors["bob"].contains("did not configure"));

        let messages: Vec<Message> = h
            .store
            .list(&ListParams::in_namespace("ops").label(REQUEST_LABEL, "r1"))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].metadata.name, "r1-alice");
        assert_eq!(messages[0].spec.destination, "13700000001");
        assert_eq!(messages[0].spec.kind, IdentityKind::Mobile);
        assert_eq!(messages[0].spec.provider_message_id, "mock-sms-1");
    }

    #[tokio::test]
    async fn reconciling_twice_does_not_send_twice() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["alice"], &[]))
            .await;
        let c = controller(&h);

        for _ in 0..4 {
            c.reconcile(&req.key()).await.unwrap();
        }

        assert_eq!(phase(&h, "r1").await, RequestPhase::Sent);
        assert_eq!(h.sms.send_count().await, 1);
        assert_eq!(h.store.count::<Message>().await, 1);
    }

    #[tokio::test]
    async fn request_first_seen_sending_is_not_dispatched() {
        let h = TestHarness::new();
        seed(&h).await;
        let mut req = fixtures::request("ops", "r1", "alert", &["alice"], &[]);
        req.status.phase = RequestPhase::Sending;
        let req = h.create(req).await;
        let c = controller(&h);

        c.reconcile(&req.key()).await.unwrap();

        assert_eq!(phase(&h, "r1").await, RequestPhase::Sending);
        assert_eq!(h.sms.send_count().await, 0);
    }

    #[tokio::test]
    async fn deleted_request_is_a_no_op() {
        let h = TestHarness::new();
        let c = controller(&h);
        c.reconcile(&ObjectKey::new("ops", "gone")).await.unwrap();
    }

    #[tokio::test]
    async fn conflict_on_status_write_surfaces_without_resending() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["alice"], &[]))
            .await;
        let c = controller(&h);
        c.reconcile(&req.key()).await.unwrap();

        h.store
            .inject_fault(Fault {
                op: StoreOp::UpdateStatus,
                kind: MessageRequest::KIND,
                error: FaultKind::Conflict,
                times: 1,
            })
            .await;
        let err = c.reconcile(&req.key()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(h.sms.send_count().await, 1);
        assert_eq!(h.store.count::<Message>().await, 1, "archive runs regardless");

        // The queue retry sees the cached Sending copy and does not dispatch again.
        c.reconcile(&req.key()).await.unwrap();
        assert_eq!(h.sms.send_count().await, 1);
    }

    #[tokio::test]
    async fn transient_status_failures_are_retried() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["alice"], &[]))
            .await;
        let c = controller(&h);
        c.reconcile(&req.key()).await.unwrap();

        h.store
            .inject_fault(Fault {
                op: StoreOp::UpdateStatus,
                kind: MessageRequest::KIND,
                error: FaultKind::Unavailable,
                times: 2,
            })
            .await;
        c.reconcile(&req.key()).await.unwrap();
        assert_eq!(phase(&h, "r1").await, RequestPhase::Sent);
    }

    #[tokio::test]
    async fn request_vanishing_mid_flight_is_success() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["alice"], &[]))
            .await;
        let c = controller(&h);
        c.reconcile(&req.key()).await.unwrap();

        h.store
            .inject_fault(Fault {
                op: StoreOp::UpdateStatus,
                kind: MessageRequest::KIND,
                error: FaultKind::NotFound,
                times: 1,
            })
            .await;
        c.reconcile(&req.key()).await.unwrap();
        assert_eq!(h.sms.send_count().await, 1);
    }

    #[tokio::test]
    async fn unresolvable_group_keeps_request_sending_until_retry() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["alice"], &["oncall"]))
            .await;
        let c = controller(&h);
        c.reconcile(&req.key()).await.unwrap();

        h.store
            .inject_fault(Fault {
                op: StoreOp::Get,
                kind: ReceiverGroup::KIND,
                error: FaultKind::Unavailable,
                times: 1,
            })
            .await;
        let err = c.reconcile(&req.key()).await.unwrap_err();
        assert!(matches!(err, BeaconError::Store { .. }), "got: {err:?}");
        assert_eq!(phase(&h, "r1").await, RequestPhase::Sending);
        assert_eq!(h.sms.send_count().await, 0);

        c.reconcile(&req.key()).await.unwrap();
        let stored: MessageRequest = h.store.get("ops", "r1").await.unwrap();
        assert_eq!(stored.status.phase, RequestPhase::PartialFailure);
        assert!(stored.status.errors["bob"].contains("did not configure"));
        assert_eq!(h.sms.send_count().await, 1);
    }

    #[tokio::test]
    async fn one_receiver_with_two_kinds_gets_two_messages() {
        let h = TestHarness::new();
        h.create(fixtures::channel("ops")).await;
        h.create(fixtures::template(
            "ops",
            "alert",
            TemplateSpec {
                sms: fixtures::sms_template("ops", "x", "{{.name}}").spec.sms,
                wechat: None,
                text: Some(fixtures::text_template("alert", "{{.name}} is down")),
            },
        ))
        .await;
        h.create(fixtures::receiver(
            "carol",
            &[
                (IdentityKind::Mobile, "13700000003"),
                (IdentityKind::Email, "carol@example.com"),
            ],
        ))
        .await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["carol"], &[]))
            .await;
        let c = controller(&h);

        c.reconcile(&req.key()).await.unwrap();
        c.reconcile(&req.key()).await.unwrap();

        assert_eq!(phase(&h, "r1").await, RequestPhase::Sent);
        let mut names: Vec<String> = h
            .list::<Message>("ops")
            .await
            .into_iter()
            .map(|m| m.metadata.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["r1-carol", "r1-carol-email"]);
        assert_eq!(h.mock(ProviderKind::SmtpText).send_count().await, 1);
    }

    #[tokio::test]
    async fn recreated_request_is_treated_as_new() {
        let h = TestHarness::new();
        seed(&h).await;
        let req = h
            .create(fixtures::request("ops", "r1", "alert", &["alice"], &[]))
            .await;
        let c = controller(&h);
        c.reconcile(&req.key()).await.unwrap();

        h.store
            .delete::<MessageRequest>("ops", "r1", &Default::default())
            .await
            .unwrap();
        let mut again = fixtures::request("ops", "r1", "alert", &["alice"], &[]);
        again.status.phase = RequestPhase::Sending;
        h.create(again).await;

        c.reconcile(&req.key()).await.unwrap();
        assert_eq!(h.sms.send_count().await, 0, "a Sending namesake was never seen Pending");
    }
}
