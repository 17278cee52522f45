//! Subscription lifecycle state machine.
//!
//! Defines all lifecycle states a subscription record can occupy and the
//! legal transitions between them. The transition *policy* (which billing
//! event causes which edge) lives in `lifecycle`; this module only encodes
//! which edges exist at all.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a subscription record.
///
/// A user with no record at all is implicitly in the `None`-equivalent
/// state; that case is represented by the absence of a record, not by a
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Trial period running. Access per the requested tier until
    /// `trial_ends_at`.
    Trialing,

    /// Paid and current.
    Active,

    /// Payment failed; grace window running.
    PastDue,

    /// Cancellation requested; paid access continues until period end.
    CancelPending,

    /// Paid subscription ended. Terminal.
    Canceled,

    /// Trial elapsed without conversion. Terminal, trials only.
    Expired,
}

impl SubscriptionState {
    /// Returns true for the two terminal states.
    pub fn is_closed(&self) -> bool {
        matches!(self, SubscriptionState::Canceled | SubscriptionState::Expired)
    }

    /// Position of this state along the lifecycle, used by the reconciler
    /// to grade how far a divergence would move a record backwards.
    ///
    /// PastDue and CancelPending sit at the same stage as Active: they are
    /// sideways excursions, not progress.
    pub fn lifecycle_stage(&self) -> u8 {
        match self {
            SubscriptionState::Trialing => 1,
            SubscriptionState::Active
            | SubscriptionState::PastDue
            | SubscriptionState::CancelPending => 2,
            SubscriptionState::Canceled | SubscriptionState::Expired => 3,
        }
    }
}

impl StateMachine for SubscriptionState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionState::*;
        matches!(
            (self, target),
            // From TRIALING
            (Trialing, Active)   // paid conversion
                | (Trialing, Expired)
            // From ACTIVE
                | (Active, Active) // renewal / period roll
                | (Active, CancelPending)
                | (Active, PastDue)
                | (Active, Canceled)
            // From PAST_DUE
                | (PastDue, Active)
                | (PastDue, Canceled)
            // From CANCEL_PENDING
                | (CancelPending, Active) // reactivation before period end
                | (CancelPending, CancelPending) // period boundary extension
                | (CancelPending, PastDue)
                | (CancelPending, Canceled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionState::*;
        match self {
            Trialing => vec![Active, Expired],
            Active => vec![Active, CancelPending, PastDue, Canceled],
            PastDue => vec![Active, Canceled],
            CancelPending => vec![Active, CancelPending, PastDue, Canceled],
            Canceled => vec![],
            Expired => vec![],
        }
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionState::Trialing => "trialing",
            SubscriptionState::Active => "active",
            SubscriptionState::PastDue => "past_due",
            SubscriptionState::CancelPending => "cancel_pending",
            SubscriptionState::Canceled => "canceled",
            SubscriptionState::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SubscriptionState; 6] = [
        SubscriptionState::Trialing,
        SubscriptionState::Active,
        SubscriptionState::PastDue,
        SubscriptionState::CancelPending,
        SubscriptionState::Canceled,
        SubscriptionState::Expired,
    ];

    #[test]
    fn trial_can_convert_or_expire_only() {
        let s = SubscriptionState::Trialing;
        assert!(s.can_transition_to(&SubscriptionState::Active));
        assert!(s.can_transition_to(&SubscriptionState::Expired));
        assert!(!s.can_transition_to(&SubscriptionState::Canceled));
        assert!(!s.can_transition_to(&SubscriptionState::PastDue));
    }

    #[test]
    fn cancel_pending_can_reactivate() {
        assert!(
            SubscriptionState::CancelPending.can_transition_to(&SubscriptionState::Active)
        );
    }

    #[test]
    fn past_due_can_recover_or_cancel() {
        let s = SubscriptionState::PastDue;
        assert!(s.can_transition_to(&SubscriptionState::Active));
        assert!(s.can_transition_to(&SubscriptionState::Canceled));
        assert!(!s.can_transition_to(&SubscriptionState::Expired));
    }

    #[test]
    fn paid_states_never_reach_expired() {
        for s in [
            SubscriptionState::Active,
            SubscriptionState::PastDue,
            SubscriptionState::CancelPending,
        ] {
            assert!(!s.can_transition_to(&SubscriptionState::Expired));
        }
    }

    #[test]
    fn canceled_and_expired_are_terminal() {
        assert!(SubscriptionState::Canceled.is_terminal());
        assert!(SubscriptionState::Expired.is_terminal());
        assert!(SubscriptionState::Canceled.is_closed());
        assert!(SubscriptionState::Expired.is_closed());
    }

    #[test]
    fn active_renewal_is_a_self_edge() {
        assert!(SubscriptionState::Active.can_transition_to(&SubscriptionState::Active));
    }

    #[test]
    fn cancel_pending_extension_is_a_self_edge() {
        assert!(
            SubscriptionState::CancelPending.can_transition_to(&SubscriptionState::CancelPending)
        );
    }

    #[test]
    fn valid_transitions_agree_with_can_transition_to() {
        for s in ALL {
            for target in s.valid_transitions() {
                assert!(
                    s.can_transition_to(&target),
                    "edge {:?} -> {:?} inconsistent",
                    s,
                    target
                );
            }
        }
    }

    #[test]
    fn lifecycle_stage_never_decreases_along_edges_except_reactivation() {
        for s in ALL {
            for target in s.valid_transitions() {
                // The only backwards-looking edges are sideways moves within
                // stage 2 (Active <-> PastDue <-> CancelPending).
                assert!(
                    target.lifecycle_stage() >= s.lifecycle_stage(),
                    "{:?} -> {:?} regresses",
                    s,
                    target
                );
            }
        }
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&SubscriptionState::CancelPending).unwrap();
        assert_eq!(json, "\"cancel_pending\"");
    }
}
