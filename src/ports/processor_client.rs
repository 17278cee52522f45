//! ProcessorClient port - the external payment processor's API.
//!
//! Consumed by the reconciler (authoritative subscription reads) and by
//! the checkout/portal surface. All calls are network-latency-bound and
//! issued with bounded timeouts outside any webhook-handling path.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{PlanTier, RemoteStatus};

/// The processor's authoritative view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub subscription_id: String,
    pub customer_id: String,
    pub status: RemoteStatus,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<Timestamp>,
    /// Tier implied by the subscription's price, where the price id is
    /// one we configured.
    pub tier: Option<PlanTier>,
}

/// A hosted checkout or billing portal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedSession {
    /// URL the product redirects the user to.
    pub url: String,
}

/// Processor API failures.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Network failure or non-2xx response.
    #[error("Processor request failed: {0}")]
    Request(String),

    /// Request exceeded its bounded timeout.
    #[error("Processor request timed out")]
    Timeout,

    /// The customer has no subscription on the processor side.
    #[error("No remote subscription for customer")]
    NotFound,

    /// Response arrived but could not be interpreted.
    #[error("Invalid processor response: {0}")]
    InvalidResponse(String),
}

impl ProcessorError {
    /// Whether the next scheduled cycle should retry this call.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessorError::Request(_) | ProcessorError::Timeout)
    }
}

/// Port for the processor's REST API.
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    /// Fetch the customer's current subscription.
    ///
    /// # Errors
    ///
    /// `NotFound` when the customer exists but holds no subscription.
    async fn fetch_subscription(
        &self,
        customer_id: &str,
    ) -> Result<RemoteSubscription, ProcessorError>;

    /// Resolve the internal user recorded in the customer's metadata.
    async fn fetch_customer_user(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserId>, ProcessorError>;

    /// Create a hosted checkout session for a plan purchase or trial
    /// start. Completion comes back as a webhook event.
    async fn create_checkout_session(
        &self,
        user_id: &UserId,
        tier: PlanTier,
        trial: bool,
    ) -> Result<HostedSession, ProcessorError>;

    /// Create a hosted billing portal session for an existing customer.
    async fn create_portal_session(
        &self,
        customer_id: &str,
    ) -> Result<HostedSession, ProcessorError>;

    /// Flag the subscription to cancel at its period end. The state
    /// change itself arrives as a webhook event.
    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<(), ProcessorError>;
}
