// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recipient resolution and per-receiver fan-out.
//!
//! Each receiver is handled in isolation: a failure for one receiver (or for
//! one provider kind of a receiver) never prevents sends to the others.
//! The engine never retries; that is the reconciler's decision.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use beacon_core::error::BeaconError;
use beacon_core::traits::provider::{DeliveryReceipt, DeliveryRequest};
use beacon_core::traits::store::ObjectStore;
use beacon_core::types::{
    Channel, IdentityKind, MessageRequest, MessageRequestSpec, ProviderKind, Receiver,
    ReceiverGroup, RequestPhase, Template,
};
use tracing::{debug, info, warn};

use crate::providers::ProviderSet;

/// One successful send to one receiver through one provider kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receiver: String,
    pub provider: ProviderKind,
    pub kind: IdentityKind,
    pub destination: String,
    pub receipt: DeliveryReceipt,
}

/// Result of dispatching one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Size of the resolved recipient set.
    pub resolved: usize,
    pub sent: Vec<Delivery>,
    /// Receiver name to failure reason.
    pub failures: BTreeMap<String, String>,
}

impl DispatchOutcome {
    /// The terminal request phase this outcome maps to.
    ///
    /// Only the failure map counts. A receiver that got one kind but failed
    /// another is a failed receiver even though its delivery is in `sent`.
    pub fn phase(&self) -> RequestPhase {
        if self.failures.is_empty() {
            RequestPhase::Sent
        } else if self.failures.len() >= self.resolved {
            RequestPhase::Failed
        } else {
            RequestPhase::PartialFailure
        }
    }

    fn fail_all(recipients: BTreeSet<String>, reason: &str) -> Self {
        Self {
            resolved: recipients.len(),
            sent: Vec::new(),
            failures: recipients
                .into_iter()
                .map(|name| (name, reason.to_string()))
                .collect(),
        }
    }
}

/// Sends a request's template to its recipients.
pub struct DispatchEngine<S> {
    store: Arc<S>,
    providers: ProviderSet,
}

impl<S: ObjectStore> DispatchEngine<S> {
    pub fn new(store: Arc<S>, providers: ProviderSet) -> Self {
        Self { store, providers }
    }

    /// Union of group members and direct receivers; blanks dropped,
    /// duplicates collapsed. Groups that do not exist are skipped; any other
    /// store error is returned so the request can be retried as a whole.
    pub async fn resolve_recipients(
        &self,
        spec: &MessageRequestSpec,
    ) -> Result<BTreeSet<String>, BeaconError> {
        let mut recipients = BTreeSet::new();

        for group_name in spec.receiver_groups.iter().filter(|g| !g.trim().is_empty()) {
            match self.store.get::<ReceiverGroup>("", group_name).await {
                Ok(group) => recipients.extend(
                    group
                        .spec
                        .receivers
                        .into_iter()
                        .filter(|r| !r.trim().is_empty()),
                ),
                Err(e) if e.is_not_found() => {
                    warn!(group = %group_name, "skipping missing receiver group");
                }
                Err(e) => return Err(e),
            }
        }

        recipients.extend(
            spec.receivers
                .iter()
                .filter(|r| !r.trim().is_empty())
                .cloned(),
        );
        Ok(recipients)
    }

    /// Dispatches `request` to every resolved recipient.
    ///
    /// Fails without sending anything when the recipient set cannot be
    /// resolved. Every later failure is recorded per receiver in the outcome.
    pub async fn dispatch(&self, request: &MessageRequest) -> Result<DispatchOutcome, BeaconError> {
        let recipients = self.resolve_recipients(&request.spec).await?;
        if recipients.is_empty() {
            debug!(request = %request.metadata.name, "no recipients resolved");
            return Ok(DispatchOutcome::default());
        }

        let channel_name = request.channel_name();
        let (channel, template) = match self.resolve_content(request).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    channel = channel_name,
                    template = %request.spec.template,
                    error = %e,
                    "channel/template unavailable, failing every receiver"
                );
                let reason = format!(
                    "channel/template unavailable: channel {channel_name}, template {}: {e}",
                    request.spec.template
                );
                return Ok(DispatchOutcome::fail_all(recipients, &reason));
            }
        };

        let mut outcome = DispatchOutcome {
            resolved: recipients.len(),
            ..Default::default()
        };
        for name in recipients {
            match self.send_to_receiver(request, &channel, &template, &name).await {
                Ok(sent) => outcome.sent.extend(sent),
                Err((sent, reason)) => {
                    outcome.sent.extend(sent);
                    outcome.failures.insert(name, reason);
                }
            }
        }

        info!(
            request = %request.metadata.name,
            channel = channel_name,
            resolved = outcome.resolved,
            sent = outcome.sent.len(),
            failed = outcome.failures.len(),
            "dispatch finished"
        );
        Ok(outcome)
    }

    async fn resolve_content(&self, request: &MessageRequest) -> Result<(Channel, Template), BeaconError> {
        let channel: Channel = self.store.get("", request.channel_name()).await?;
        if channel.metadata.is_deleting() {
            return Err(BeaconError::Conflict {
                kind: "Channel".into(),
                name: channel.metadata.name.clone(),
                message: "channel is being deleted".into(),
            });
        }
        let template: Template = self
            .store
            .get(request.channel_name(), &request.spec.template)
            .await?;
        Ok((channel, template))
    }

    /// Sends to one receiver through every kind the template configures.
    ///
    /// Returns the successful deliveries, and on failure also the reason
    /// recorded for this receiver.
    async fn send_to_receiver(
        &self,
        request: &MessageRequest,
        channel: &Channel,
        template: &Template,
        name: &str,
    ) -> Result<Vec<Delivery>, (Vec<Delivery>, String)> {
        let receiver: Receiver = self
            .store
            .get("", name)
            .await
            .map_err(|e| (Vec::new(), format!("receiver {name} unavailable: {e}")))?;

        let kinds = template.spec.provider_kinds();
        let mut sent = Vec::new();
        let mut errors = Vec::new();

        for provider in &kinds {
            let identity_kind = provider.identity_kind();
            let Some(destination) = receiver.identity(identity_kind) else {
                debug!(receiver = name, kind = %identity_kind, "identity not configured, skipping");
                continue;
            };
            if !channel.spec.supports(*provider) {
                errors.push(format!(
                    "channel {} has no {} credentials",
                    channel.metadata.name,
                    provider.type_tag()
                ));
                continue;
            }
            let Some(adapter) = self.providers.get(*provider) else {
                errors.push(format!("no {} provider registered", provider.type_tag()));
                continue;
            };

            let delivery = DeliveryRequest {
                kind: *provider,
                channel: &channel.spec,
                template: &template.spec,
                destination,
                variables: &request.spec.variables,
            };
            match adapter.send(&delivery).await {
                Ok(receipt) => sent.push(Delivery {
                    receiver: name.to_string(),
                    provider: *provider,
                    kind: identity_kind,
                    destination: destination.to_string(),
                    receipt,
                }),
                Err(e) => {
                    warn!(receiver = name, provider = adapter.name(), error = %e, "send failed");
                    errors.push(format!("{} send failed: {e}", provider.type_tag()));
                }
            }
        }

        if !errors.is_empty() {
            return Err((sent, errors.join("; ")));
        }
        if sent.is_empty() {
            let wanted: Vec<_> = kinds.iter().map(|k| k.identity_kind().to_string()).collect();
            return Err((
                sent,
                format!("receiver {name} did not configure any of [{}]", wanted.join(", ")),
            ));
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::resource::ObjectMeta;
    use beacon_core::traits::store::DeleteOptions;
    use beacon_core::resource::Resource;
    use beacon_core::types::TemplateSpec;
    use beacon_store::{Fault, FaultKind, StoreOp};
    use beacon_test_utils::{TestHarness, fixtures};

    fn engine(h: &TestHarness) -> DispatchEngine<beacon_store::MemoryStore> {
        let providers = ProviderKind::ALL
            .into_iter()
            .fold(ProviderSet::new(), |set, kind| set.with(h.mock(kind)));
        DispatchEngine::new(h.store.clone(), providers)
    }

    #[tokio::test]
    async fn resolution_is_a_set_union() {
        let h = TestHarness::new();
        h.create(fixtures::group("g1", &["r1", "r2"])).await;
        h.create(fixtures::group("g2", &["r3", ""])).await;

        let req = fixtures::request("sms", "req", "t", &["r1", " "], &["g1", "g2", "missing"]);
        let resolved = engine(&h).resolve_recipients(&req.spec).await.unwrap();
        assert_eq!(
            resolved.into_iter().collect::<Vec<_>>(),
            vec!["r1", "r2", "r3"]
        );
    }

    #[tokio::test]
    async fn empty_recipient_set_is_sent_without_calls() {
        let h = TestHarness::new();
        let outcome = engine(&h)
            .dispatch(&fixtures::request("sms", "req", "t", &[], &[]))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::default());
        assert_eq!(outcome.phase(), RequestPhase::Sent);
        assert_eq!(h.sms.send_count().await, 0);
    }

    #[tokio::test]
    async fn group_member_without_identity_yields_partial_failure() {
        let h = TestHarness::new();
        h.create(fixtures::sms_channel("sms")).await;
        h.create(fixtures::sms_template("sms", "alert", "{{.name}} down")).await;
        h.create(fixtures::receiver("alice", &[(IdentityKind::Mobile, "13700000001")]))
            .await;
        h.create(fixtures::receiver("bob", &[(IdentityKind::Email, "bob@example.com")]))
            .await;
        h.create(fixtures::group("oncall", &["alice", "bob"])).await;

        let mut req = fixtures::request("sms", "req", "alert", &[], &["oncall"]);
        req.spec.variables = fixtures::vars(&[("name", "db")]);
        let outcome = engine(&h).dispatch(&req).await.unwrap();

        assert_eq!(outcome.phase(), RequestPhase::PartialFailure);
        assert_eq!(outcome.sent.len(), 1);
        assert_eq!(outcome.sent[0].receiver, "alice");
        assert_eq!(outcome.sent[0].receipt.body, "db down");
        assert!(outcome.failures["bob"].contains("did not configure"));
        assert_eq!(h.sms.sent().await[0].destination, "13700000001");
    }

    #[tokio::test]
    async fn provider_error_is_isolated_per_receiver() {
        let h = TestHarness::new();
        h.create(fixtures::channel("ops")).await;
        h.create(fixtures::template(
            "ops",
            "multi",
            TemplateSpec {
                sms: fixtures::sms_template("ops", "x", "sms body").spec.sms,
                text: Some(fixtures::text_template("subject", "mail body")),
                ..Default::default()
            },
        ))
        .await;
        h.create(fixtures::receiver(
            "carol",
            &[
                (IdentityKind::Mobile, "111"),
                (IdentityKind::Email, "carol@example.com"),
            ],
        ))
        .await;
        h.create(fixtures::receiver("dave", &[(IdentityKind::Mobile, "222")]))
            .await;
        h.sms.fail_for("111", "gateway quota exceeded").await;

        let outcome = engine(&h)
            .dispatch(&fixtures::request("ops", "req", "multi", &["carol", "dave"], &[]))
            .await
            .unwrap();

        assert_eq!(outcome.phase(), RequestPhase::PartialFailure);
        assert!(outcome.failures["carol"].contains("gateway quota exceeded"));
        assert!(!outcome.failures.contains_key("dave"));
        // carol's email still went out and is reported.
        let receivers: Vec<_> = outcome
            .sent
            .iter()
            .map(|d| (d.receiver.as_str(), d.provider))
            .collect();
        assert_eq!(
            receivers,
            vec![("carol", ProviderKind::SmtpText), ("dave", ProviderKind::Sms)]
        );
    }

    #[tokio::test]
    async fn receiver_with_a_failed_kind_is_failed_despite_other_delivery() {
        let h = TestHarness::new();
        h.create(fixtures::channel("ops")).await;
        h.create(fixtures::template(
            "ops",
            "multi",
            TemplateSpec {
                sms: fixtures::sms_template("ops", "x", "sms body").spec.sms,
                text: Some(fixtures::text_template("subject", "mail body")),
                ..Default::default()
            },
        ))
        .await;
        h.create(fixtures::receiver(
            "carol",
            &[
                (IdentityKind::Mobile, "111"),
                (IdentityKind::Email, "carol@example.com"),
            ],
        ))
        .await;
        h.sms.fail_for("111", "gateway quota exceeded").await;

        let outcome = engine(&h)
            .dispatch(&fixtures::request("ops", "req", "multi", &["carol"], &[]))
            .await
            .unwrap();

        assert_eq!(outcome.phase(), RequestPhase::Failed);
        assert_eq!(outcome.sent.len(), 1);
        assert_eq!(outcome.sent[0].provider, ProviderKind::SmtpText);
        assert!(outcome.failures["carol"].contains("gateway quota exceeded"));
    }

    #[tokio::test]
    async fn missing_template_fails_every_receiver() {
        let h = TestHarness::new();
        h.create(fixtures::sms_channel("sms")).await;
        h.create(fixtures::receiver("alice", &[(IdentityKind::Mobile, "1")]))
            .await;

        let outcome = engine(&h)
            .dispatch(&fixtures::request("sms", "req", "nope", &["alice", "ghost"], &[]))
            .await
            .unwrap();
        assert_eq!(outcome.phase(), RequestPhase::Failed);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.values().all(|r| r.contains("channel/template unavailable")));
        assert_eq!(h.sms.send_count().await, 0);
    }

    #[tokio::test]
    async fn deleting_channel_counts_as_unavailable() {
        let h = TestHarness::new();
        let mut channel = fixtures::sms_channel("sms");
        channel.metadata.finalizers = vec!["beacon.io/channel-controller".into()];
        h.create(channel).await;
        h.create(fixtures::sms_template("sms", "t", "x")).await;
        h.create(fixtures::receiver("alice", &[(IdentityKind::Mobile, "1")]))
            .await;
        h.store
            .delete::<Channel>("", "sms", &DeleteOptions::background())
            .await
            .unwrap();

        let outcome = engine(&h)
            .dispatch(&fixtures::request("sms", "req", "t", &["alice"], &[]))
            .await
            .unwrap();
        assert_eq!(outcome.phase(), RequestPhase::Failed);
        assert_eq!(h.sms.send_count().await, 0);
    }

    #[tokio::test]
    async fn channel_without_credentials_for_kind_is_a_failure() {
        let h = TestHarness::new();
        h.create(Channel {
            metadata: ObjectMeta::cluster("bare"),
            spec: Default::default(),
            status: Default::default(),
        })
        .await;
        h.create(fixtures::sms_template("bare", "t", "x")).await;
        h.create(fixtures::receiver("alice", &[(IdentityKind::Mobile, "1")]))
            .await;

        let outcome = engine(&h)
            .dispatch(&fixtures::request("bare", "req", "t", &["alice"], &[]))
            .await
            .unwrap();
        assert!(outcome.failures["alice"].contains("no sms credentials"));
    }

    #[tokio::test]
    async fn transient_group_read_failure_aborts_before_sending() {
        let h = TestHarness::new();
        h.create(fixtures::sms_channel("sms")).await;
        h.create(fixtures::sms_template("sms", "t", "x")).await;
        for (name, mobile) in [("a", "1"), ("b", "2"), ("c", "3")] {
            h.create(fixtures::receiver(name, &[(IdentityKind::Mobile, mobile)]))
                .await;
        }
        h.create(fixtures::group("g", &["b", "c"])).await;
        h.store
            .inject_fault(Fault {
                op: StoreOp::Get,
                kind: ReceiverGroup::KIND,
                error: FaultKind::Unavailable,
                times: 1,
            })
            .await;

        let req = fixtures::request("sms", "req", "t", &["a"], &["g"]);
        let err = engine(&h).dispatch(&req).await.unwrap_err();
        assert!(matches!(err, BeaconError::Store { .. }), "got: {err:?}");
        assert_eq!(h.sms.send_count().await, 0);

        let outcome = engine(&h).dispatch(&req).await.unwrap();
        assert_eq!(outcome.resolved, 3);
        assert_eq!(outcome.phase(), RequestPhase::Sent);
    }

    #[test]
    fn phase_follows_failure_count() {
        let mut outcome = DispatchOutcome {
            resolved: 2,
            ..Default::default()
        };
        assert_eq!(outcome.phase(), RequestPhase::Sent);
        outcome.failures.insert("a".into(), "x".into());
        assert_eq!(outcome.phase(), RequestPhase::PartialFailure);
        outcome.failures.insert("b".into(), "x".into());
        assert_eq!(outcome.phase(), RequestPhase::Failed);
    }
}
