//! Reconciler - poll-and-repair against the processor, plus local sweeps.
//!
//! Webhook delivery is unreliable; the reconciler bounds the damage of a
//! missed event. It periodically picks records that have not been touched
//! recently, fetches the processor's authoritative subscription, and when
//! the two diverge synthesizes a repair routed through the same transition
//! function live events use. Independently of any remote call, it advances
//! trials past their deadline and pending cancellations past their period
//! boundary.
//!
//! Remote calls run outside any request path, with bounded timeouts and
//! capped exponential backoff; a failed user is retried on the next
//! scheduled cycle, never immediately.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::foundation::{AuditEntryId, StoreError, Timestamp, UserId};
use crate::domain::subscription::{
    resolve_entitlements, transition, EntitlementPolicy, LifecycleEvent, LifecyclePolicy,
    RemoteStatus, SubscriptionState, TransitionOutcome,
};
use crate::ports::{
    AuditEntry, AuditLog, ProcessedEventStore, ProcessorClient, ProcessorError,
    RemoteSubscription, SubscriptionStore,
};

use super::entitlement_service::entitlement_change_note;

/// Reconciler scheduling and resilience knobs.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Seconds between cycles.
    pub interval_secs: u64,

    /// Maximum records reconciled remotely per cycle.
    pub batch_limit: u32,

    /// A record untouched for this long is a reconciliation candidate.
    pub stale_after_secs: i64,

    /// Remote fetch attempts per user per cycle.
    pub max_fetch_attempts: u32,

    /// First backoff delay; doubles per attempt.
    pub base_backoff_secs: u64,

    /// How long processed event ids are retained before pruning. Must be
    /// at least the processor's maximum redelivery window.
    pub dedup_retention_days: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            batch_limit: 100,
            stale_after_secs: 6 * 3600,
            max_fetch_attempts: 3,
            base_backoff_secs: 1,
            dedup_retention_days: 30,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub trials_expired: u64,
    pub cancellations_closed: u64,
    pub reconciled: u64,
    pub repaired: u64,
    pub failures: u64,
    pub claims_pruned: u64,
}

/// Failures while reconciling one user.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

pub struct Reconciler {
    store: Arc<dyn SubscriptionStore>,
    processor: Arc<dyn ProcessorClient>,
    audit: Arc<dyn AuditLog>,
    dedup: Arc<dyn ProcessedEventStore>,
    lifecycle_policy: LifecyclePolicy,
    entitlement_policy: EntitlementPolicy,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        processor: Arc<dyn ProcessorClient>,
        audit: Arc<dyn AuditLog>,
        dedup: Arc<dyn ProcessedEventStore>,
        lifecycle_policy: LifecyclePolicy,
        entitlement_policy: EntitlementPolicy,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            processor,
            audit,
            dedup,
            lifecycle_policy,
            entitlement_policy,
            config,
        }
    }

    /// Runs cycles forever. Spawned as a background task at startup.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = self.run_cycle(Timestamp::now()).await;
            info!(
                trials_expired = report.trials_expired,
                cancellations_closed = report.cancellations_closed,
                reconciled = report.reconciled,
                repaired = report.repaired,
                failures = report.failures,
                claims_pruned = report.claims_pruned,
                "reconciliation cycle finished"
            );
        }
    }

    /// One full cycle: local sweeps, then a bounded batch of remote
    /// reconciliations, then dedup claim pruning.
    pub async fn run_cycle(&self, now: Timestamp) -> CycleReport {
        let mut report = CycleReport::default();

        self.sweep_trials(now, &mut report).await;
        self.sweep_cancellations(now, &mut report).await;

        let cutoff = now.plus_secs(-self.config.stale_after_secs);
        match self
            .store
            .find_stale_open_records(cutoff, self.config.batch_limit)
            .await
        {
            Ok(users) => {
                for user_id in users {
                    report.reconciled += 1;
                    match self.reconcile_user(&user_id, now).await {
                        Ok(true) => report.repaired += 1,
                        Ok(false) => {}
                        Err(err) => {
                            report.failures += 1;
                            warn!(user_id = %user_id, error = %err, "reconciliation failed, retrying next cycle");
                        }
                    }
                }
            }
            Err(err) => {
                report.failures += 1;
                warn!(error = %err, "could not list reconciliation candidates");
            }
        }

        match self
            .dedup
            .prune_before(now.minus_days(self.config.dedup_retention_days))
            .await
        {
            Ok(pruned) => report.claims_pruned = pruned,
            Err(err) => warn!(error = %err, "dedup pruning failed"),
        }

        report
    }

    async fn sweep_trials(&self, now: Timestamp, report: &mut CycleReport) {
        match self.store.find_trials_ending_before(now).await {
            Ok(users) => {
                for user_id in users {
                    match self
                        .apply_and_audit(user_id, LifecycleEvent::TrialSweep, now)
                        .await
                    {
                        Ok(Some(_)) => report.trials_expired += 1,
                        Ok(None) => {}
                        Err(err) => {
                            report.failures += 1;
                            warn!(user_id = %user_id, error = %err, "trial sweep failed");
                        }
                    }
                }
            }
            Err(err) => {
                report.failures += 1;
                warn!(error = %err, "could not list elapsed trials");
            }
        }
    }

    async fn sweep_cancellations(&self, now: Timestamp, report: &mut CycleReport) {
        match self.store.find_cancellations_elapsed_before(now).await {
            Ok(users) => {
                for user_id in users {
                    match self
                        .apply_and_audit(user_id, LifecycleEvent::CancellationSweep, now)
                        .await
                    {
                        Ok(Some(_)) => report.cancellations_closed += 1,
                        Ok(None) => {}
                        Err(err) => {
                            report.failures += 1;
                            warn!(user_id = %user_id, error = %err, "cancellation sweep failed");
                        }
                    }
                }
            }
            Err(err) => {
                report.failures += 1;
                warn!(error = %err, "could not list elapsed cancellations");
            }
        }
    }

    /// Reconciles one user against the processor. Returns whether a
    /// repair was applied.
    pub async fn reconcile_user(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<bool, ReconcileError> {
        let Some(record) = self.store.get(user_id).await? else {
            return Ok(false);
        };
        if record.state.is_closed() {
            return Ok(false);
        }
        // Trials are tracked locally; there is no remote subscription to
        // compare against until conversion.
        if record.state == SubscriptionState::Trialing {
            return Ok(false);
        }
        let Some(customer_id) = record.processor_customer_id.clone() else {
            warn!(user_id = %user_id, "open paid record without a customer id");
            return Ok(false);
        };

        let repair = match self.fetch_with_backoff(&customer_id).await {
            Ok(remote) => {
                let Some(implied) = implied_state(&remote) else {
                    debug!(user_id = %user_id, status = ?remote.status, "remote status not actionable");
                    return Ok(false);
                };
                if !diverges(&record, &remote, implied) {
                    return Ok(false);
                }
                self.grade_divergence(user_id, record.state, implied);
                LifecycleEvent::Repair {
                    status: remote.status,
                    cancel_at_period_end: remote.cancel_at_period_end,
                    current_period_end: remote.current_period_end,
                    subscription_id: Some(remote.subscription_id),
                    tier: remote.tier,
                }
            }
            // The processor has no subscription for an open paid record:
            // treat the remote absence as authoritative cancellation.
            Err(ProcessorError::NotFound) => {
                self.grade_divergence(user_id, record.state, SubscriptionState::Canceled);
                LifecycleEvent::Repair {
                    status: RemoteStatus::Canceled,
                    cancel_at_period_end: false,
                    current_period_end: None,
                    subscription_id: record.processor_subscription_id.clone(),
                    tier: None,
                }
            }
            Err(err) => return Err(err.into()),
        };

        let applied = self.apply_and_audit(*user_id, repair, now).await?;
        Ok(applied.is_some())
    }

    /// Fetches the remote subscription with capped exponential backoff.
    async fn fetch_with_backoff(
        &self,
        customer_id: &str,
    ) -> Result<RemoteSubscription, ProcessorError> {
        let mut attempt = 0u32;
        loop {
            match self.processor.fetch_subscription(customer_id).await {
                Ok(remote) => return Ok(remote),
                Err(err) if err.is_transient() && attempt + 1 < self.config.max_fetch_attempts => {
                    let delay = self.config.base_backoff_secs << attempt;
                    debug!(customer_id = %customer_id, attempt, delay_secs = delay, "processor fetch failed, backing off");
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Routes a synthesized event through the transition function and
    /// audits the result. Returns the new state when a transition applied.
    async fn apply_and_audit(
        &self,
        user_id: UserId,
        event: LifecycleEvent,
        now: Timestamp,
    ) -> Result<Option<SubscriptionState>, StoreError> {
        let policy = self.lifecycle_policy.clone();
        let applied = self
            .store
            .apply_transition(
                user_id,
                Box::new(move |current| transition(user_id, current, &event, now, &policy)),
            )
            .await?;

        match applied.outcome {
            TransitionOutcome::Applied {
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
                    event_id: None,
                    cause,
                    prior_state,
                    new_state: next.state,
                    tier: next.tier,
                    entitlement_change: entitlement_change_note(&before, &after),
                    recorded_at: now,
                };
                if let Err(err) = self.audit.append(entry).await {
                    error!(user_id = %user_id, error = %err, "audit append failed");
                }
                info!(user_id = %user_id, cause = %cause, next = %next.state, "transition applied");
                Ok(Some(next.state))
            }
            TransitionOutcome::Noop { reason } => {
                debug!(user_id = %user_id, reason = %reason, "synthesized event produced no transition");
                Ok(None)
            }
        }
    }

    /// Divergence is expected async lag; a divergence that would pull the
    /// record back past a whole lifecycle stage likely indicates a bug and
    /// is logged at elevated severity.
    fn grade_divergence(
        &self,
        user_id: &UserId,
        local: SubscriptionState,
        implied: SubscriptionState,
    ) {
        let regression = i16::from(local.lifecycle_stage()) - i16::from(implied.lifecycle_stage());
        if regression > 1 {
            error!(
                user_id = %user_id,
                local = %local,
                remote_implied = %implied,
                "reconciliation divergence exceeds sanity threshold"
            );
        } else {
            info!(
                user_id = %user_id,
                local = %local,
                remote_implied = %implied,
                "reconciliation divergence detected, repairing"
            );
        }
    }
}

/// The local state the processor's record implies, or `None` when the
/// remote status is not one we act on.
fn implied_state(remote: &RemoteSubscription) -> Option<SubscriptionState> {
    match remote.status {
        RemoteStatus::Canceled | RemoteStatus::Incomplete => Some(SubscriptionState::Canceled),
        RemoteStatus::PastDue | RemoteStatus::Unpaid => Some(SubscriptionState::PastDue),
        RemoteStatus::Active | RemoteStatus::Trialing => {
            if remote.cancel_at_period_end {
                Some(SubscriptionState::CancelPending)
            } else {
                Some(SubscriptionState::Active)
            }
        }
        RemoteStatus::Unknown => None,
    }
}

fn diverges(
    record: &crate::domain::subscription::SubscriptionRecord,
    remote: &RemoteSubscription,
    implied: SubscriptionState,
) -> bool {
    if record.state != implied {
        return true;
    }
    if let Some(tier) = remote.tier {
        if record.tier != tier {
            return true;
        }
    }
    if let Some(period_end) = remote.current_period_end {
        if record.current_period_end != Some(period_end) {
            return true;
        }
    }
    false
}
