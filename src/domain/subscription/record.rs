//! Subscription record aggregate.
//!
//! One record per user, created on first billing interaction and never
//! deleted; terminal states are retained for audit and win-back flows.
//! The record is mutated only through the lifecycle transition function,
//! applied under the store's single-writer-per-user contract.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, UserId, ValidationError};

use super::{PlanTier, SubscriptionState};

/// Authoritative local subscription state for one user.
///
/// # Invariants
///
/// - `state = Trialing` implies `trial_ends_at` is set (and was in the
///   future at creation); `trial_ends_at` is never rewritten afterwards.
/// - `state` in {Active, PastDue, CancelPending} implies
///   `current_period_end` is set.
/// - `cancel_at_period_end = true` iff `state = CancelPending`.
/// - `state = PastDue` implies `past_due_since` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// User this record belongs to. One record per user.
    pub user_id: UserId,

    /// Current lifecycle state.
    pub state: SubscriptionState,

    /// Plan tier. Retained through terminal states.
    pub tier: PlanTier,

    /// Trial deadline, set once at trial start.
    pub trial_ends_at: Option<Timestamp>,

    /// End of the current paid period; access remains valid until this
    /// boundary even after a cancellation request.
    pub current_period_end: Option<Timestamp>,

    /// True once cancellation was requested but the period has not elapsed.
    pub cancel_at_period_end: bool,

    /// When the record entered PastDue; anchors the grace window.
    pub past_due_since: Option<Timestamp>,

    /// Processor-side customer id. Never cleared once set.
    pub processor_customer_id: Option<String>,

    /// Processor-side subscription id. Never cleared once set.
    pub processor_subscription_id: Option<String>,

    /// Id of the most recently applied billing event.
    pub last_event_id: Option<String>,

    /// Payload-carried timestamp of the most recently applied event,
    /// backing the stale-event guard.
    pub last_event_at: Option<Timestamp>,

    /// When the record was created.
    pub created_at: Timestamp,

    /// When the record was last mutated.
    pub updated_at: Timestamp,
}

impl SubscriptionRecord {
    /// Creates a trialing record from a trial checkout.
    pub fn start_trial(
        user_id: UserId,
        tier: PlanTier,
        trial_ends_at: Timestamp,
        customer_id: String,
        subscription_id: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            user_id,
            state: SubscriptionState::Trialing,
            tier,
            trial_ends_at: Some(trial_ends_at),
            current_period_end: None,
            cancel_at_period_end: false,
            past_due_since: None,
            processor_customer_id: Some(customer_id),
            processor_subscription_id: subscription_id,
            last_event_id: None,
            last_event_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an active record from a paid checkout with no prior trial.
    pub fn start_paid(
        user_id: UserId,
        tier: PlanTier,
        period_end: Timestamp,
        customer_id: String,
        subscription_id: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            user_id,
            state: SubscriptionState::Active,
            tier,
            trial_ends_at: None,
            current_period_end: Some(period_end),
            cancel_at_period_end: false,
            past_due_since: None,
            processor_customer_id: Some(customer_id),
            processor_subscription_id: subscription_id,
            last_event_id: None,
            last_event_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the trial deadline has elapsed.
    ///
    /// False for non-trialing records.
    pub fn trial_elapsed(&self, now: Timestamp) -> bool {
        self.state == SubscriptionState::Trialing
            && self.trial_ends_at.map(|t| now >= t).unwrap_or(false)
    }

    /// Whether a pending cancellation has reached its period boundary.
    pub fn cancellation_elapsed(&self, now: Timestamp) -> bool {
        self.state == SubscriptionState::CancelPending
            && self.current_period_end.map(|t| now >= t).unwrap_or(false)
    }

    /// Whole days of trial remaining, for the status surface.
    pub fn trial_days_remaining(&self, now: Timestamp) -> Option<i64> {
        if self.state != SubscriptionState::Trialing {
            return None;
        }
        self.trial_ends_at
            .map(|ends| ends.duration_since(&now).num_days().max(0))
    }

    /// Checks the structural invariants of the record.
    ///
    /// Exercised by the property tests; a violation here means the
    /// transition function produced an illegal record.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        use SubscriptionState::*;

        if self.state == Trialing && self.trial_ends_at.is_none() {
            return Err(ValidationError::empty_field("trial_ends_at"));
        }
        if matches!(self.state, Active | PastDue | CancelPending)
            && self.current_period_end.is_none()
        {
            return Err(ValidationError::empty_field("current_period_end"));
        }
        if self.cancel_at_period_end != (self.state == CancelPending) {
            return Err(ValidationError::invalid_format(
                "cancel_at_period_end",
                format!("flag is {} in state {}", self.cancel_at_period_end, self.state),
            ));
        }
        if self.state == PastDue && self.past_due_since.is_none() {
            return Err(ValidationError::empty_field("past_due_since"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000)
    }

    #[test]
    fn start_trial_sets_deadline_and_processor_ids() {
        let record = SubscriptionRecord::start_trial(
            UserId::new(),
            PlanTier::Standard,
            now().add_days(14),
            "cus_123".into(),
            Some("sub_456".into()),
            now(),
        );

        assert_eq!(record.state, SubscriptionState::Trialing);
        assert_eq!(record.trial_ends_at, Some(now().add_days(14)));
        assert_eq!(record.processor_customer_id.as_deref(), Some("cus_123"));
        assert_eq!(record.processor_subscription_id.as_deref(), Some("sub_456"));
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn start_paid_is_active_with_period_end() {
        let record = SubscriptionRecord::start_paid(
            UserId::new(),
            PlanTier::Premium,
            now().add_days(30),
            "cus_123".into(),
            Some("sub_456".into()),
            now(),
        );

        assert_eq!(record.state, SubscriptionState::Active);
        assert_eq!(record.current_period_end, Some(now().add_days(30)));
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn trial_elapsed_only_after_deadline() {
        let record = SubscriptionRecord::start_trial(
            UserId::new(),
            PlanTier::Standard,
            now().add_days(14),
            "cus_123".into(),
            None,
            now(),
        );

        assert!(!record.trial_elapsed(now().add_days(13)));
        assert!(record.trial_elapsed(now().add_days(14)));
        assert!(record.trial_elapsed(now().add_days(15)));
    }

    #[test]
    fn trial_days_remaining_clamps_at_zero() {
        let record = SubscriptionRecord::start_trial(
            UserId::new(),
            PlanTier::Standard,
            now().add_days(14),
            "cus_123".into(),
            None,
            now(),
        );

        assert_eq!(record.trial_days_remaining(now()), Some(14));
        assert_eq!(record.trial_days_remaining(now().add_days(20)), Some(0));
    }

    #[test]
    fn trial_days_remaining_none_for_paid_records() {
        let record = SubscriptionRecord::start_paid(
            UserId::new(),
            PlanTier::Standard,
            now().add_days(30),
            "cus_123".into(),
            None,
            now(),
        );
        assert_eq!(record.trial_days_remaining(now()), None);
    }

    #[test]
    fn invariant_rejects_cancel_flag_outside_cancel_pending() {
        let mut record = SubscriptionRecord::start_paid(
            UserId::new(),
            PlanTier::Standard,
            now().add_days(30),
            "cus_123".into(),
            None,
            now(),
        );
        record.cancel_at_period_end = true;
        assert!(record.check_invariants().is_err());
    }

    #[test]
    fn invariant_rejects_active_without_period_end() {
        let mut record = SubscriptionRecord::start_paid(
            UserId::new(),
            PlanTier::Standard,
            now().add_days(30),
            "cus_123".into(),
            None,
            now(),
        );
        record.current_period_end = None;
        assert!(record.check_invariants().is_err());
    }

    #[test]
    fn invariant_rejects_past_due_without_anchor() {
        let mut record = SubscriptionRecord::start_paid(
            UserId::new(),
            PlanTier::Standard,
            now().add_days(30),
            "cus_123".into(),
            None,
            now(),
        );
        record.state = SubscriptionState::PastDue;
        assert!(record.check_invariants().is_err());
        record.past_due_since = Some(now());
        assert!(record.check_invariants().is_ok());
    }
}
