//! HTTP DTOs for the billing endpoints.
//!
//! JSON request/response shapes; the boundary between HTTP and the
//! application layer.

use serde::{Deserialize, Serialize};

use crate::domain::subscription::{
    EntitlementSet, PlanTier, SubscriptionRecord, SubscriptionState, TransitionCause,
};
use crate::ports::AuditEntry;

// ════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════

/// Request to start a hosted checkout flow.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    /// The tier to purchase.
    pub tier: PlanTier,

    /// Whether to start with a trial period.
    #[serde(default)]
    pub trial: bool,
}

// ════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════

/// Hosted session URL (checkout or billing portal).
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub url: String,
}

/// The user's current entitlement set.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementsResponse {
    pub entitlements: EntitlementSet,
}

/// Subscription status surface.
///
/// `state` is null for users with no billing history.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatusResponse {
    pub state: Option<SubscriptionState>,
    pub tier: Option<PlanTier>,
    pub trial_ends_at: Option<String>,
    pub trial_days_remaining: Option<i64>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
}

impl SubscriptionStatusResponse {
    pub fn from_record(
        record: Option<&SubscriptionRecord>,
        now: crate::domain::foundation::Timestamp,
    ) -> Self {
        match record {
            None => Self {
                state: None,
                tier: None,
                trial_ends_at: None,
                trial_days_remaining: None,
                current_period_end: None,
                cancel_at_period_end: false,
            },
            Some(record) => Self {
                state: Some(record.state),
                tier: Some(record.tier),
                trial_ends_at: record.trial_ends_at.map(|t| t.as_datetime().to_rfc3339()),
                trial_days_remaining: record.trial_days_remaining(now),
                current_period_end: record
                    .current_period_end
                    .map(|t| t.as_datetime().to_rfc3339()),
                cancel_at_period_end: record.cancel_at_period_end,
            },
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntryResponse {
    pub id: String,
    pub event_id: Option<String>,
    pub cause: TransitionCause,
    pub prior_state: Option<SubscriptionState>,
    pub new_state: SubscriptionState,
    pub tier: PlanTier,
    pub entitlement_change: Option<String>,
    pub recorded_at: String,
}

impl From<AuditEntry> for AuditEntryResponse {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            event_id: entry.event_id,
            cause: entry.cause,
            prior_state: entry.prior_state,
            new_state: entry.new_state,
            tier: entry.tier,
            entitlement_change: entry.entitlement_change,
            recorded_at: entry.recorded_at.as_datetime().to_rfc3339(),
        }
    }
}

/// The user's audit trail, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct AuditTrailResponse {
    pub entries: Vec<AuditEntryResponse>,
}

/// Acknowledgement for a webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAckResponse {
    pub received: bool,
}

/// Standard error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
