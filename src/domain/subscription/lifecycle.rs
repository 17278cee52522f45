//! Pure lifecycle transition function.
//!
//! All lifecycle policy lives here: which billing event moves a record
//! along which edge of the state machine. Callers (webhook ingest and the
//! reconciler) route every mutation through [`transition`], so live events
//! and reconciliation repairs share one code path and one table.
//!
//! The function takes the current record (or `None` for a user with no
//! billing history), never performs I/O, and returns either the next
//! record or an explained no-op. Arrival order is not trusted: the
//! event's own type and payload fields pick the target state, and a
//! payload-carried timestamp guard refuses to regress a record below an
//! already-applied event.

use crate::domain::foundation::{Timestamp, UserId};

use super::billing_event::{BillingEvent, BillingEventKind, RemoteStatus};
use super::record::SubscriptionRecord;
use super::state::SubscriptionState;
use super::tier::PlanTier;

/// Tunable lifecycle durations.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Trial length granted at trial checkout.
    pub trial_days: i64,

    /// Fallback period length when a paid checkout payload carries no
    /// period boundary.
    pub default_period_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            trial_days: 14,
            default_period_days: 30,
        }
    }
}

/// Input to the transition function.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A verified, deduplicated processor event.
    Billing(BillingEvent),

    /// Synthesized by the reconciler from the processor's authoritative
    /// record when it diverges from ours.
    Repair {
        status: RemoteStatus,
        cancel_at_period_end: bool,
        current_period_end: Option<Timestamp>,
        subscription_id: Option<String>,
        /// Tier implied by the remote price, where the reconciler could
        /// map it.
        tier: Option<PlanTier>,
    },

    /// Local sweep: trial deadline reached without a paid conversion.
    TrialSweep,

    /// Local sweep: a pending cancellation reached its period boundary.
    CancellationSweep,
}

impl LifecycleEvent {
    /// What kind of actor produced this input, recorded in the audit log.
    pub fn cause(&self) -> TransitionCause {
        match self {
            LifecycleEvent::Billing(_) => TransitionCause::Event,
            LifecycleEvent::Repair { .. } => TransitionCause::Reconciliation,
            LifecycleEvent::TrialSweep | LifecycleEvent::CancellationSweep => {
                TransitionCause::ExpirationSweep
            }
        }
    }
}

/// Who drove a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// A live processor event.
    Event,
    /// A reconciler repair against the processor's record.
    Reconciliation,
    /// A local time-based sweep.
    ExpirationSweep,
}

impl std::fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransitionCause::Event => "event",
            TransitionCause::Reconciliation => "reconciliation",
            TransitionCause::ExpirationSweep => "expiration_sweep",
        };
        write!(f, "{}", s)
    }
}

/// Result of evaluating one event against one record.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The event moved the record; the caller persists `next` and emits
    /// an audit entry.
    Applied {
        prior_state: Option<SubscriptionState>,
        next: SubscriptionRecord,
        cause: TransitionCause,
    },

    /// The event changed nothing. Acknowledged, not an error.
    Noop { reason: NoopReason },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    /// The resulting record, when one was produced.
    pub fn record(&self) -> Option<&SubscriptionRecord> {
        match self {
            TransitionOutcome::Applied { next, .. } => Some(next),
            TransitionOutcome::Noop { .. } => None,
        }
    }
}

/// Why an event produced no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopReason {
    /// Payload timestamp is older than the record's last applied event.
    Stale,
    /// Event type this engine does not handle.
    UnknownEventKind,
    /// Event does not apply in the record's current state.
    NotApplicable,
    /// Non-creating event arrived for a user with no record.
    NoRecord,
    /// Record is in a terminal state the event cannot leave.
    Terminal,
}

impl std::fmt::Display for NoopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NoopReason::Stale => "stale",
            NoopReason::UnknownEventKind => "unknown_event_kind",
            NoopReason::NotApplicable => "not_applicable",
            NoopReason::NoRecord => "no_record",
            NoopReason::Terminal => "terminal",
        };
        write!(f, "{}", s)
    }
}

/// Evaluates one lifecycle event against the user's current record.
pub fn transition(
    user_id: UserId,
    current: Option<&SubscriptionRecord>,
    event: &LifecycleEvent,
    now: Timestamp,
    policy: &LifecyclePolicy,
) -> TransitionOutcome {
    match event {
        LifecycleEvent::Billing(billing) => {
            if billing.is_unknown() {
                return noop(NoopReason::UnknownEventKind);
            }
            // Stale guard: never let an older payload regress a record a
            // newer event has already advanced. Equal timestamps pass;
            // distinct events can share a second.
            if let Some(record) = current {
                if let Some(last) = record.last_event_at {
                    if billing.created.is_before(&last) {
                        return noop(NoopReason::Stale);
                    }
                }
            }
            apply_billing(user_id, current, billing, now, policy)
        }
        LifecycleEvent::Repair {
            status,
            cancel_at_period_end,
            current_period_end,
            subscription_id,
            tier,
        } => match current {
            None => noop(NoopReason::NoRecord),
            Some(record) => apply_status(
                record,
                *status,
                *cancel_at_period_end,
                *current_period_end,
                subscription_id.as_deref(),
                *tier,
                TransitionCause::Reconciliation,
                None,
                now,
                policy,
            ),
        },
        LifecycleEvent::TrialSweep => match current {
            Some(record) if record.trial_elapsed(now) => {
                let mut next = record.clone();
                next.state = SubscriptionState::Expired;
                applied(Some(record), next, TransitionCause::ExpirationSweep, None, now)
            }
            Some(_) => noop(NoopReason::NotApplicable),
            None => noop(NoopReason::NoRecord),
        },
        LifecycleEvent::CancellationSweep => match current {
            Some(record) if record.cancellation_elapsed(now) => {
                let mut next = record.clone();
                next.state = SubscriptionState::Canceled;
                next.cancel_at_period_end = false;
                applied(Some(record), next, TransitionCause::ExpirationSweep, None, now)
            }
            Some(_) => noop(NoopReason::NotApplicable),
            None => noop(NoopReason::NoRecord),
        },
    }
}

fn apply_billing(
    user_id: UserId,
    current: Option<&SubscriptionRecord>,
    event: &BillingEvent,
    now: Timestamp,
    policy: &LifecyclePolicy,
) -> TransitionOutcome {
    match (&event.kind, current) {
        (
            BillingEventKind::CheckoutCompleted {
                tier,
                trial,
                customer_id,
                subscription_id,
                period_end,
                ..
            },
            None,
        ) => {
            let next = if *trial {
                SubscriptionRecord::start_trial(
                    user_id,
                    *tier,
                    now.add_days(policy.trial_days),
                    customer_id.clone(),
                    subscription_id.clone(),
                    now,
                )
            } else {
                SubscriptionRecord::start_paid(
                    user_id,
                    *tier,
                    period_end.unwrap_or_else(|| now.add_days(policy.default_period_days)),
                    customer_id.clone(),
                    subscription_id.clone(),
                    now,
                )
            };
            applied(None, next, TransitionCause::Event, Some(event), now)
        }

        (
            BillingEventKind::CheckoutCompleted {
                tier,
                trial,
                customer_id,
                subscription_id,
                period_end,
                ..
            },
            Some(record),
        ) => {
            // One trial per user, ever.
            if *trial {
                return noop(NoopReason::NotApplicable);
            }
            let period_end =
                period_end.unwrap_or_else(|| now.add_days(policy.default_period_days));
            if record.state.is_closed() {
                // Win-back: a closed record starts a fresh paid cycle.
                // The record's creation time and history survive.
                let mut next = SubscriptionRecord::start_paid(
                    user_id,
                    *tier,
                    period_end,
                    customer_id.clone(),
                    subscription_id.clone(),
                    now,
                );
                next.created_at = record.created_at;
                return applied(Some(record), next, TransitionCause::Event, Some(event), now);
            }
            // Paid checkout from any open state lands on Active: trial
            // conversion, past-due recovery via new checkout, tier change,
            // or reactivation.
            let mut next = record.clone();
            next.state = SubscriptionState::Active;
            next.tier = *tier;
            next.current_period_end = Some(period_end);
            next.cancel_at_period_end = false;
            next.past_due_since = None;
            if subscription_id.is_some() {
                next.processor_subscription_id = subscription_id.clone();
            }
            applied(Some(record), next, TransitionCause::Event, Some(event), now)
        }

        (
            BillingEventKind::SubscriptionUpdated {
                status,
                cancel_at_period_end,
                current_period_end,
                subscription_id,
                ..
            },
            Some(record),
        ) => apply_status(
            record,
            *status,
            *cancel_at_period_end,
            *current_period_end,
            Some(subscription_id.as_str()),
            None,
            TransitionCause::Event,
            Some(event),
            now,
            policy,
        ),

        (BillingEventKind::SubscriptionDeleted { .. }, Some(record)) => {
            close(record, TransitionCause::Event, Some(event), now)
        }

        (BillingEventKind::PaymentFailed { .. }, Some(record)) => {
            mark_past_due(record, TransitionCause::Event, Some(event), now)
        }

        (BillingEventKind::Unknown { .. }, _) => noop(NoopReason::UnknownEventKind),

        // Subscription events for a user with no record: acknowledged and
        // left for reconciliation, which can rebuild from the processor.
        (_, None) => noop(NoopReason::NoRecord),
    }
}

/// Shared status-driven edge selection for live subscription updates and
/// reconciler repairs.
#[allow(clippy::too_many_arguments)]
fn apply_status(
    record: &SubscriptionRecord,
    status: RemoteStatus,
    cancel_at_period_end: bool,
    current_period_end: Option<Timestamp>,
    subscription_id: Option<&str>,
    tier: Option<PlanTier>,
    cause: TransitionCause,
    event: Option<&BillingEvent>,
    now: Timestamp,
    policy: &LifecyclePolicy,
) -> TransitionOutcome {
    use SubscriptionState::*;

    if record.state.is_closed() {
        return noop(NoopReason::Terminal);
    }

    // The processor reports its own trial phase as "trialing"; for a paid
    // record that is equivalent to current.
    let remote_current = matches!(status, RemoteStatus::Active | RemoteStatus::Trialing);
    let remote_delinquent = matches!(status, RemoteStatus::PastDue | RemoteStatus::Unpaid);
    let remote_closed = matches!(status, RemoteStatus::Canceled | RemoteStatus::Incomplete);

    let target = match record.state {
        // A "trialing" update on a trial is housekeeping, not a
        // conversion; only a paid status moves the trial forward, and
        // the sweep still expires an unconverted one.
        Trialing if matches!(status, RemoteStatus::Active) => Some(Active),
        Active | CancelPending if remote_delinquent => Some(PastDue),
        Active | PastDue | CancelPending if remote_closed => Some(Canceled),
        Active if remote_current && cancel_at_period_end => Some(CancelPending),
        Active if remote_current => Some(Active), // renewal, period roll
        PastDue if remote_current => Some(Active),
        CancelPending if remote_current && !cancel_at_period_end => Some(Active),
        // Period boundary moved while the cancellation is still pending.
        CancelPending if remote_current && cancel_at_period_end => Some(CancelPending),
        _ => None,
    };

    let Some(target) = target else {
        return noop(NoopReason::NotApplicable);
    };

    let mut next = record.clone();
    next.state = target;
    next.cancel_at_period_end = target == CancelPending;
    next.past_due_since = match target {
        PastDue => record.past_due_since.or(Some(now)),
        _ => None,
    };
    if let Some(t) = tier {
        next.tier = t;
    }
    match target {
        Canceled => {}
        _ => {
            next.current_period_end = current_period_end
                .or(record.current_period_end)
                .or_else(|| Some(now.add_days(policy.default_period_days)));
        }
    }
    if let Some(id) = subscription_id {
        next.processor_subscription_id = Some(id.to_string());
    }
    applied(Some(record), next, cause, event, now)
}

fn close(
    record: &SubscriptionRecord,
    cause: TransitionCause,
    event: Option<&BillingEvent>,
    now: Timestamp,
) -> TransitionOutcome {
    use SubscriptionState::*;
    match record.state {
        Active | PastDue | CancelPending => {
            let mut next = record.clone();
            next.state = Canceled;
            next.cancel_at_period_end = false;
            next.past_due_since = None;
            applied(Some(record), next, cause, event, now)
        }
        Canceled | Expired => noop(NoopReason::Terminal),
        Trialing => noop(NoopReason::NotApplicable),
    }
}

fn mark_past_due(
    record: &SubscriptionRecord,
    cause: TransitionCause,
    event: Option<&BillingEvent>,
    now: Timestamp,
) -> TransitionOutcome {
    use SubscriptionState::*;
    match record.state {
        Active | CancelPending => {
            let mut next = record.clone();
            next.state = PastDue;
            next.cancel_at_period_end = false;
            next.past_due_since = Some(now);
            applied(Some(record), next, cause, event, now)
        }
        PastDue => noop(NoopReason::NotApplicable),
        Trialing => noop(NoopReason::NotApplicable),
        Canceled | Expired => noop(NoopReason::Terminal),
    }
}

fn applied(
    prior: Option<&SubscriptionRecord>,
    mut next: SubscriptionRecord,
    cause: TransitionCause,
    event: Option<&BillingEvent>,
    now: Timestamp,
) -> TransitionOutcome {
    next.updated_at = now;
    if let Some(event) = event {
        next.last_event_id = Some(event.id.clone());
        next.last_event_at = Some(event.created);
    }
    TransitionOutcome::Applied {
        prior_state: prior.map(|r| r.state),
        next,
        cause,
    }
}

fn noop(reason: NoopReason) -> TransitionOutcome {
    TransitionOutcome::Noop { reason }
}
