//! Subscription lifecycle domain.
//!
//! Everything billing-related lives here: the subscription record and its
//! lifecycle states, the processor event envelope, the pure transition
//! function, entitlement resolution, and webhook verification.

mod billing_event;
mod entitlements;
mod errors;
mod lifecycle;
mod record;
mod state;
mod tier;
mod webhook_verifier;

pub use billing_event::{BillingEvent, BillingEventKind, EventEnvelope, RemoteStatus};
pub use entitlements::{Entitlement, EntitlementPolicy, EntitlementSet, resolve_entitlements};
pub use errors::WebhookError;
pub use lifecycle::{
    LifecycleEvent, LifecyclePolicy, NoopReason, TransitionCause, TransitionOutcome, transition,
};
pub use record::SubscriptionRecord;
pub use state::SubscriptionState;
pub use tier::PlanTier;
pub use webhook_verifier::{SignatureHeader, WebhookVerifier};

#[cfg(test)]
pub use billing_event::EventEnvelopeBuilder;
#[cfg(test)]
pub use webhook_verifier::compute_test_signature;
