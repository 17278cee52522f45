//! Billing event envelope and typed payload extraction.
//!
//! The processor delivers events as a generic envelope with a polymorphic
//! `data.object`. Only the fields this engine acts on are extracted; the
//! rest of the processor's schema is ignored. Unknown event types extract
//! successfully into [`BillingEventKind::Unknown`] so they can be
//! acknowledged without processing (forward compatibility).

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, UserId};

use super::errors::WebhookError;
use super::tier::PlanTier;

/// Raw processor webhook event (simplified).
///
/// Mirrors the processor's wire schema. Fields beyond these are dropped
/// at deserialization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventEnvelope {
    /// Processor-assigned unique event identifier (evt_xxx).
    pub id: String,

    /// Event type string (e.g. "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp at which the processor created the event. This is
    /// the payload-carried timestamp backing the stale-event guard.
    pub created: i64,

    /// Event-specific data.
    pub data: EventData,

    /// Whether this is a live mode event.
    #[serde(default)]
    pub livemode: bool,

    /// API version used to render the event.
    #[serde(default)]
    pub api_version: String,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventData {
    /// The object that triggered the event (polymorphic by event type).
    pub object: serde_json::Value,
}

/// Processor-reported subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    /// Any status this engine does not act on.
    Unknown,
}

impl RemoteStatus {
    /// Parses a processor status string, mapping unrecognized values to
    /// `Unknown` rather than failing.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => RemoteStatus::Active,
            "trialing" => RemoteStatus::Trialing,
            "past_due" => RemoteStatus::PastDue,
            "canceled" => RemoteStatus::Canceled,
            "unpaid" => RemoteStatus::Unpaid,
            "incomplete" | "incomplete_expired" => RemoteStatus::Incomplete,
            _ => RemoteStatus::Unknown,
        }
    }
}

/// A verified billing event with its payload extracted into the fields the
/// lifecycle acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingEvent {
    /// Processor-assigned unique identifier, the deduplication key.
    pub id: String,

    /// Payload-carried creation time.
    pub created: Timestamp,

    /// Typed payload.
    pub kind: BillingEventKind,
}

/// Typed payload of the billing event kinds the engine handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEventKind {
    /// A checkout session completed: either a trial start or a paid
    /// subscription start/conversion.
    CheckoutCompleted {
        /// Internal user id from checkout metadata. Absent when the
        /// processor object was created outside our checkout flow; the
        /// ingest layer then falls back to customer-id correlation.
        user_id: Option<UserId>,
        tier: PlanTier,
        trial: bool,
        customer_id: String,
        subscription_id: Option<String>,
        /// Period end if the processor included the subscription snapshot.
        period_end: Option<Timestamp>,
    },

    /// The processor-side subscription changed (status, cancellation flag
    /// or period boundary).
    SubscriptionUpdated {
        customer_id: String,
        subscription_id: String,
        status: RemoteStatus,
        cancel_at_period_end: bool,
        current_period_end: Option<Timestamp>,
    },

    /// The processor-side subscription was deleted.
    SubscriptionDeleted {
        customer_id: String,
        subscription_id: String,
    },

    /// A payment attempt failed. The processor also reflects this in a
    /// subsequent status update; handling both keeps either ordering
    /// convergent.
    PaymentFailed { customer_id: String },

    /// An event type this engine does not handle. Acknowledged, ignored.
    Unknown { event_type: String },
}

impl BillingEvent {
    /// Extracts a typed billing event from a verified envelope.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::MissingField` when a handled event type
    /// lacks a field required for correlation.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, WebhookError> {
        let object = &envelope.data.object;
        let kind = match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                let customer_id = require_str(object, "customer")?;
                let metadata = &object["metadata"];
                let user_id = metadata["user_id"]
                    .as_str()
                    .and_then(|s| s.parse::<UserId>().ok());
                // Checkout without an explicit tier buys standard.
                let tier = metadata["tier"]
                    .as_str()
                    .and_then(PlanTier::parse)
                    .unwrap_or(PlanTier::Standard);
                let trial = metadata["trial"].as_str() == Some("true");
                BillingEventKind::CheckoutCompleted {
                    user_id,
                    tier,
                    trial,
                    customer_id,
                    subscription_id: optional_str(object, "subscription"),
                    period_end: object["current_period_end"]
                        .as_i64()
                        .map(Timestamp::from_unix_secs),
                }
            }
            "customer.subscription.updated" => BillingEventKind::SubscriptionUpdated {
                customer_id: require_str(object, "customer")?,
                subscription_id: require_str(object, "id")?,
                status: RemoteStatus::parse(object["status"].as_str().unwrap_or("")),
                cancel_at_period_end: object["cancel_at_period_end"].as_bool().unwrap_or(false),
                current_period_end: object["current_period_end"]
                    .as_i64()
                    .map(Timestamp::from_unix_secs),
            },
            "customer.subscription.deleted" => BillingEventKind::SubscriptionDeleted {
                customer_id: require_str(object, "customer")?,
                subscription_id: require_str(object, "id")?,
            },
            "invoice.payment_failed" => BillingEventKind::PaymentFailed {
                customer_id: require_str(object, "customer")?,
            },
            other => BillingEventKind::Unknown {
                event_type: other.to_string(),
            },
        };

        Ok(BillingEvent {
            id: envelope.id.clone(),
            created: Timestamp::from_unix_secs(envelope.created),
            kind,
        })
    }

    /// Processor customer id for correlation, where the kind carries one.
    pub fn customer_id(&self) -> Option<&str> {
        match &self.kind {
            BillingEventKind::CheckoutCompleted { customer_id, .. }
            | BillingEventKind::SubscriptionUpdated { customer_id, .. }
            | BillingEventKind::SubscriptionDeleted { customer_id, .. }
            | BillingEventKind::PaymentFailed { customer_id } => Some(customer_id),
            BillingEventKind::Unknown { .. } => None,
        }
    }

    /// True for event types the engine does not handle.
    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, BillingEventKind::Unknown { .. })
    }
}

fn require_str(object: &serde_json::Value, field: &'static str) -> Result<String, WebhookError> {
    object[field]
        .as_str()
        .map(str::to_string)
        .ok_or(WebhookError::MissingField(field))
}

fn optional_str(object: &serde_json::Value, field: &str) -> Option<String> {
    object[field].as_str().map(str::to_string)
}

/// Builder for test envelopes.
#[cfg(test)]
pub struct EventEnvelopeBuilder {
    id: String,
    event_type: String,
    created: i64,
    object: serde_json::Value,
}

#[cfg(test)]
impl EventEnvelopeBuilder {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: "evt_test_1".to_string(),
            event_type: event_type.into(),
            created: 1_700_000_000,
            object: serde_json::json!({}),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    pub fn object(mut self, object: serde_json::Value) -> Self {
        self.object = object;
        self
    }

    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            id: self.id,
            event_type: self.event_type,
            created: self.created,
            data: EventData { object: self.object },
            livemode: false,
            api_version: "2023-10-16".to_string(),
        }
    }
}
