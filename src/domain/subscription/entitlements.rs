//! Entitlement resolution.
//!
//! Maps a subscription record to the set of product capabilities it
//! unlocks. Pure and deterministic: every caller (assessments, matchups,
//! calendar, therapist tooling) gets the same answer for the same record
//! and clock, and none of them re-derive billing logic.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

use super::record::SubscriptionRecord;
use super::state::SubscriptionState;
use super::tier::PlanTier;

/// A single product capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    /// Read access to past assessment results.
    AssessmentHistory,
    /// Read and write daily relationship logs.
    DailyLogs,
    /// Generate new daily assessments.
    DailyAssessments,
    /// Partner matchup comparisons.
    Matchups,
    /// Coaching meeting scheduling.
    Meetings,
    /// Therapist integration tools.
    TherapistTools,
    /// External calendar sync.
    CalendarSync,
    /// Extended video library.
    ExtendedVideos,
}

impl Entitlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entitlement::AssessmentHistory => "assessment_history",
            Entitlement::DailyLogs => "daily_logs",
            Entitlement::DailyAssessments => "daily_assessments",
            Entitlement::Matchups => "matchups",
            Entitlement::Meetings => "meetings",
            Entitlement::TherapistTools => "therapist_tools",
            Entitlement::CalendarSync => "calendar_sync",
            Entitlement::ExtendedVideos => "extended_videos",
        }
    }
}

impl std::fmt::Display for Entitlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The capabilities a user currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementSet(BTreeSet<Entitlement>);

impl EntitlementSet {
    /// Minimal free set held by everyone, including users with no billing
    /// history and closed records.
    pub fn free() -> Self {
        Self(BTreeSet::from([
            Entitlement::AssessmentHistory,
            Entitlement::DailyLogs,
        ]))
    }

    /// Full set for an entitled record on the given tier.
    pub fn for_tier(tier: PlanTier) -> Self {
        let mut set = Self::free();
        set.0.extend([
            Entitlement::DailyAssessments,
            Entitlement::Matchups,
            Entitlement::Meetings,
        ]);
        if tier == PlanTier::Premium {
            set.0.extend([
                Entitlement::TherapistTools,
                Entitlement::CalendarSync,
                Entitlement::ExtendedVideos,
            ]);
        }
        set
    }

    /// Grace degradation for past-due records: keep the tier's read and
    /// collaboration surface, block new assessment generation.
    pub fn grace(tier: PlanTier) -> Self {
        let mut set = Self::for_tier(tier);
        set.0.remove(&Entitlement::DailyAssessments);
        set
    }

    pub fn allows(&self, entitlement: Entitlement) -> bool {
        self.0.contains(&entitlement)
    }

    pub fn iter(&self) -> impl Iterator<Item = Entitlement> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Tunable entitlement windows.
#[derive(Debug, Clone)]
pub struct EntitlementPolicy {
    /// How long a past-due record keeps its degraded paid access before
    /// falling to the free set.
    pub grace_days: i64,
}

impl Default for EntitlementPolicy {
    fn default() -> Self {
        Self { grace_days: 7 }
    }
}

/// Resolves the entitlement set for a user's record at a given instant.
///
/// `None` is a user with no billing history. Time-based degradations are
/// applied here directly, so the answer is correct even when the sweep
/// that will formalize the state change has not run yet.
pub fn resolve_entitlements(
    record: Option<&SubscriptionRecord>,
    now: Timestamp,
    policy: &EntitlementPolicy,
) -> EntitlementSet {
    let Some(record) = record else {
        return EntitlementSet::free();
    };

    match record.state {
        SubscriptionState::Trialing => {
            if record.trial_elapsed(now) {
                EntitlementSet::free()
            } else {
                EntitlementSet::for_tier(record.tier)
            }
        }
        SubscriptionState::Active => EntitlementSet::for_tier(record.tier),
        SubscriptionState::CancelPending => {
            if record.cancellation_elapsed(now) {
                EntitlementSet::free()
            } else {
                EntitlementSet::for_tier(record.tier)
            }
        }
        SubscriptionState::PastDue => {
            let in_grace = record
                .past_due_since
                .map(|since| now.is_before(&since.add_days(policy.grace_days)))
                .unwrap_or(false);
            if in_grace {
                EntitlementSet::grace(record.tier)
            } else {
                EntitlementSet::free()
            }
        }
        SubscriptionState::Canceled | SubscriptionState::Expired => EntitlementSet::free(),
    }
}
