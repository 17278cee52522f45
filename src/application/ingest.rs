//! Webhook ingest handler.
//!
//! The full path a processor delivery takes: verify the signature, parse
//! and type the event, correlate it to a user, claim the event id, run
//! the transition inside the store's per-user critical section, and
//! append the audit entry.
//!
//! Responses are chosen for the processor's retry semantics: duplicates
//! and no-ops acknowledge with success, permanently-invalid deliveries
//! are rejected without retry, and transient store failures release the
//! dedup claim and signal retry.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::domain::foundation::{AuditEntryId, Timestamp, UserId};
use crate::domain::subscription::{
    resolve_entitlements, transition, BillingEvent, BillingEventKind, EntitlementPolicy,
    LifecycleEvent, LifecyclePolicy, NoopReason, SubscriptionState, WebhookError, WebhookVerifier,
};
use crate::ports::{AuditEntry, AuditLog, ClaimOutcome, ProcessedEventStore, SubscriptionStore};

use super::entitlement_service::entitlement_change_note;

/// What ingesting one delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event moved the user's record.
    Applied {
        user_id: UserId,
        state: SubscriptionState,
    },
    /// Valid event, but it changed nothing in the current state.
    NoChange { reason: NoopReason },
    /// Redelivery of an already-applied event.
    Duplicate,
    /// Event type this engine does not handle.
    Ignored { event_type: String },
}

/// Handler for inbound processor deliveries.
pub struct IngestWebhookHandler {
    verifier: WebhookVerifier,
    store: Arc<dyn SubscriptionStore>,
    dedup: Arc<dyn ProcessedEventStore>,
    audit: Arc<dyn AuditLog>,
    lifecycle_policy: LifecyclePolicy,
    entitlement_policy: EntitlementPolicy,
}

impl IngestWebhookHandler {
    pub fn new(
        verifier: WebhookVerifier,
        store: Arc<dyn SubscriptionStore>,
        dedup: Arc<dyn ProcessedEventStore>,
        audit: Arc<dyn AuditLog>,
        lifecycle_policy: LifecyclePolicy,
        entitlement_policy: EntitlementPolicy,
    ) -> Self {
        Self {
            verifier,
            store,
            dedup,
            audit,
            lifecycle_policy,
            entitlement_policy,
        }
    }

    /// Processes one raw delivery.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<IngestOutcome, WebhookError> {
        let envelope = self.verifier.verify_and_parse(payload, signature)?;
        let event = BillingEvent::from_envelope(&envelope)?;

        if event.is_unknown() {
            debug!(event_type = %envelope.event_type, event_id = %event.id, "ignoring unhandled event type");
            return Ok(IngestOutcome::Ignored {
                event_type: envelope.event_type,
            });
        }

        let now = Timestamp::now();
        let user_id = self.correlate(&event).await?;

        match self
            .dedup
            .try_claim(&event.id, &envelope.event_type, now)
            .await
            .map_err(|e| WebhookError::Store(e.to_string()))?
        {
            ClaimOutcome::FirstSeen => {}
            ClaimOutcome::AlreadyProcessed => {
                info!(event_id = %event.id, "duplicate delivery, acknowledging");
                return Ok(IngestOutcome::Duplicate);
            }
        }

        let event_id = event.id.clone();
        let lifecycle_event = LifecycleEvent::Billing(event);
        let policy = self.lifecycle_policy.clone();
        let applied = match self
            .store
            .apply_transition(
                user_id,
                Box::new(move |current| transition(user_id, current, &lifecycle_event, now, &policy)),
            )
            .await
        {
            Ok(applied) => applied,
            Err(err) => {
                // Release the claim so the processor's redelivery retries
                // from scratch.
                if let Err(release_err) = self.dedup.release(&event_id).await {
                    error!(event_id = %event_id, error = %release_err, "failed to release dedup claim");
                }
                return Err(WebhookError::Store(err.to_string()));
            }
        };

        match applied.outcome {
            crate::domain::subscription::TransitionOutcome::Applied {
                prior_state,
                next,
                cause,
            } => {
                let before =
                    resolve_entitlements(applied.prior.as_ref(), now, &self.entitlement_policy);
                let after = resolve_entitlements(Some(&next), now, &self.entitlement_policy);
                let entry = AuditEntry {
                    id: AuditEntryId::new(),
                    user_id,
                    event_id: Some(event_id.clone()),
                    cause,
                    prior_state,
                    new_state: next.state,
                    tier: next.tier,
                    entitlement_change: entitlement_change_note(&before, &after),
                    recorded_at: now,
                };
                if let Err(err) = self.audit.append(entry).await {
                    // The transition is already committed; losing the audit
                    // entry is logged, not propagated, because a retry would
                    // hit the dedup claim and re-audit nothing.
                    error!(event_id = %event_id, error = %err, "audit append failed");
                }
                info!(
                    user_id = %user_id,
                    event_id = %event_id,
                    prior = ?prior_state,
                    next = %next.state,
                    "transition applied"
                );
                Ok(IngestOutcome::Applied {
                    user_id,
                    state: next.state,
                })
            }
            crate::domain::subscription::TransitionOutcome::Noop { reason } => {
                match reason {
                    NoopReason::Stale => {
                        info!(user_id = %user_id, event_id = %event_id, "stale event, no-op")
                    }
                    _ => debug!(user_id = %user_id, event_id = %event_id, reason = %reason, "event produced no transition"),
                }
                Ok(IngestOutcome::NoChange { reason })
            }
        }
    }

    /// Resolves which user an event belongs to.
    ///
    /// Checkout events carry the user id in their metadata; subscription
    /// events are correlated through the customer id recorded at first
    /// checkout.
    async fn correlate(&self, event: &BillingEvent) -> Result<UserId, WebhookError> {
        if let BillingEventKind::CheckoutCompleted { user_id: Some(user), .. } = &event.kind {
            return Ok(*user);
        }

        let customer_id = match event.customer_id() {
            Some(id) => id,
            None => return Err(WebhookError::MissingField("customer")),
        };

        let mapped = self
            .store
            .find_user_by_customer(customer_id)
            .await
            .map_err(|e| WebhookError::Store(e.to_string()))?;

        match (&event.kind, mapped) {
            (_, Some(user)) => Ok(user),
            // A checkout we cannot attribute is permanently malformed.
            (BillingEventKind::CheckoutCompleted { .. }, None) => {
                Err(WebhookError::MissingMetadata("user_id"))
            }
            // For subscription events the correlating checkout may still
            // be in flight; signal retry.
            (_, None) => Err(WebhookError::UnknownCustomer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryAuditLog, InMemoryProcessedEventStore, InMemorySubscriptionStore,
    };
    use crate::domain::subscription::{compute_test_signature, PlanTier, TransitionCause};
    use serde_json::json;

    const SECRET: &str = "whsec_ingest_tests";

    struct Harness {
        handler: IngestWebhookHandler,
        store: Arc<InMemorySubscriptionStore>,
        dedup: Arc<InMemoryProcessedEventStore>,
        audit: Arc<InMemoryAuditLog>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let dedup = Arc::new(InMemoryProcessedEventStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let handler = IngestWebhookHandler::new(
            WebhookVerifier::new(SECRET),
            store.clone(),
            dedup.clone(),
            audit.clone(),
            LifecyclePolicy::default(),
            EntitlementPolicy::default(),
        );
        Harness {
            handler,
            store,
            dedup,
            audit,
        }
    }

    fn signed(payload: &str) -> (Vec<u8>, String) {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = compute_test_signature(SECRET, timestamp, payload);
        (
            payload.as_bytes().to_vec(),
            format!("t={},v1={}", timestamp, signature),
        )
    }

    fn checkout_payload(event_id: &str, user: UserId, trial: bool) -> String {
        json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": chrono::Utc::now().timestamp(),
            "data": { "object": {
                "id": "cs_1",
                "customer": "cus_42",
                "subscription": "sub_42",
                "metadata": {
                    "user_id": user.to_string(),
                    "tier": "premium",
                    "trial": if trial { "true" } else { "false" }
                }
            }},
            "livemode": false,
            "api_version": "2023-10-16"
        })
        .to_string()
    }

    fn deleted_payload(event_id: &str, created: i64) -> String {
        json!({
            "id": event_id,
            "type": "customer.subscription.deleted",
            "created": created,
            "data": { "object": { "id": "sub_42", "customer": "cus_42" } },
            "livemode": false,
            "api_version": "2023-10-16"
        })
        .to_string()
    }

    #[tokio::test]
    async fn checkout_creates_record_and_audit_entry() {
        let h = harness();
        let user = UserId::new();
        let (payload, sig) = signed(&checkout_payload("evt_1", user, false));

        let outcome = h.handler.handle(&payload, &sig).await.unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Applied {
                user_id: user,
                state: SubscriptionState::Active
            }
        );
        let record = h.store.get(&user).await.unwrap().unwrap();
        assert_eq!(record.tier, PlanTier::Premium);

        let entries = h.audit.for_user(&user).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_id.as_deref(), Some("evt_1"));
        assert_eq!(entries[0].cause, TransitionCause::Event);
        assert_eq!(entries[0].prior_state, None);
        assert!(entries[0].entitlement_change.is_some());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acknowledged_once() {
        let h = harness();
        let user = UserId::new();
        let (payload, sig) = signed(&checkout_payload("evt_dup", user, false));

        let first = h.handler.handle(&payload, &sig).await.unwrap();
        let second = h.handler.handle(&payload, &sig).await.unwrap();

        assert!(matches!(first, IngestOutcome::Applied { .. }));
        assert_eq!(second, IngestOutcome::Duplicate);
        // Exactly one audit entry despite two deliveries.
        assert_eq!(h.audit.for_user(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let h = harness();
        let payload = checkout_payload("evt_x", UserId::new(), false);
        let header = format!("t={},v1={}", chrono::Utc::now().timestamp(), "a".repeat(64));

        let result = h.handler.handle(payload.as_bytes(), &header).await;

        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
        assert_eq!(h.dedup.len().await, 0);
    }

    #[tokio::test]
    async fn subscription_event_correlates_through_customer_id() {
        let h = harness();
        let user = UserId::new();
        let (payload, sig) = signed(&checkout_payload("evt_1", user, false));
        h.handler.handle(&payload, &sig).await.unwrap();

        let (payload, sig) = signed(&deleted_payload(
            "evt_2",
            chrono::Utc::now().timestamp(),
        ));
        let outcome = h.handler.handle(&payload, &sig).await.unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Applied {
                user_id: user,
                state: SubscriptionState::Canceled
            }
        );
    }

    #[tokio::test]
    async fn unknown_customer_signals_retry() {
        let h = harness();
        let (payload, sig) = signed(&deleted_payload(
            "evt_orphan",
            chrono::Utc::now().timestamp(),
        ));

        let result = h.handler.handle(&payload, &sig).await;

        match result {
            Err(err) => assert!(err.is_retryable()),
            Ok(outcome) => panic!("expected retryable error, got {:?}", outcome),
        }
        // No claim recorded, so the redelivery gets a clean run.
        assert_eq!(h.dedup.len().await, 0);
    }

    #[tokio::test]
    async fn unhandled_event_type_is_acknowledged_and_ignored() {
        let h = harness();
        let payload = json!({
            "id": "evt_tax",
            "type": "customer.tax_id.created",
            "created": chrono::Utc::now().timestamp(),
            "data": { "object": {} },
            "livemode": false,
            "api_version": "2023-10-16"
        })
        .to_string();
        let (payload, sig) = signed(&payload);

        let outcome = h.handler.handle(&payload, &sig).await.unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Ignored {
                event_type: "customer.tax_id.created".to_string()
            }
        );
    }

    #[tokio::test]
    async fn transient_store_failure_releases_the_claim() {
        let h = harness();
        let user = UserId::new();
        h.store.fail_next_writes(1);
        let (payload, sig) = signed(&checkout_payload("evt_retry", user, false));

        let result = h.handler.handle(&payload, &sig).await;
        match result {
            Err(err) => assert!(err.is_retryable()),
            Ok(outcome) => panic!("expected store failure, got {:?}", outcome),
        }

        // The redelivery now succeeds end to end.
        let outcome = h.handler.handle(&payload, &sig).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Applied { .. }));
        assert_eq!(h.audit.for_user(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_event_is_acknowledged_without_transition() {
        let h = harness();
        let user = UserId::new();
        let (payload, sig) = signed(&checkout_payload("evt_1", user, false));
        h.handler.handle(&payload, &sig).await.unwrap();

        // A delayed deletion whose payload predates the checkout.
        let (payload, sig) = signed(&deleted_payload(
            "evt_old",
            chrono::Utc::now().timestamp() - 3600,
        ));
        let outcome = h.handler.handle(&payload, &sig).await.unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::NoChange {
                reason: NoopReason::Stale
            }
        );
        let record = h.store.get(&user).await.unwrap().unwrap();
        assert_eq!(record.state, SubscriptionState::Active);
    }

    #[tokio::test]
    async fn concurrent_duplicate_deliveries_apply_once() {
        let h = harness();
        let user = UserId::new();
        let (payload, sig) = signed(&checkout_payload("evt_race", user, false));
        let handler = Arc::new(h.handler);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handler = handler.clone();
            let payload = payload.clone();
            let sig = sig.clone();
            tasks.push(tokio::spawn(async move {
                handler.handle(&payload, &sig).await.unwrap()
            }));
        }

        let mut applied = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), IngestOutcome::Applied { .. }) {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(h.audit.for_user(&user).await.unwrap().len(), 1);
    }
}
