//! Hosted checkout, portal, and cancellation flows.
//!
//! These handlers only open sessions against the processor or flag
//! intents on it; the resulting state changes arrive as webhook events
//! and flow through the normal ingest path. Nothing here mutates the
//! subscription store.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::domain::foundation::{StoreError, UserId};
use crate::domain::subscription::PlanTier;
use crate::ports::{HostedSession, ProcessorClient, ProcessorError, SubscriptionStore};

/// Failures in the checkout/portal/cancel flows.
#[derive(Debug, Error)]
pub enum BillingFlowError {
    /// The user has no subscription record.
    #[error("No subscription on file")]
    NoSubscription,

    /// The record exists but carries no processor customer id.
    #[error("No processor customer on file")]
    NoCustomer,

    /// The record exists but carries no processor subscription id.
    #[error("No processor subscription on file")]
    NoRemoteSubscription,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Handler for plan-change session creation.
pub struct BillingSessionHandler {
    store: Arc<dyn SubscriptionStore>,
    processor: Arc<dyn ProcessorClient>,
}

impl BillingSessionHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, processor: Arc<dyn ProcessorClient>) -> Self {
        Self { store, processor }
    }

    /// Opens a hosted checkout session for a plan purchase or trial start.
    pub async fn start_checkout(
        &self,
        user_id: &UserId,
        tier: PlanTier,
        trial: bool,
    ) -> Result<HostedSession, BillingFlowError> {
        let session = self
            .processor
            .create_checkout_session(user_id, tier, trial)
            .await?;
        info!(user_id = %user_id, tier = %tier, trial, "checkout session created");
        Ok(session)
    }

    /// Opens the hosted billing portal for an existing customer.
    pub async fn open_portal(&self, user_id: &UserId) -> Result<HostedSession, BillingFlowError> {
        let record = self
            .store
            .get(user_id)
            .await?
            .ok_or(BillingFlowError::NoSubscription)?;
        let customer_id = record
            .processor_customer_id
            .ok_or(BillingFlowError::NoCustomer)?;

        let session = self.processor.create_portal_session(&customer_id).await?;
        info!(user_id = %user_id, "portal session created");
        Ok(session)
    }

    /// Flags the user's subscription to cancel at period end. The actual
    /// transition to CancelPending arrives as a webhook event.
    pub async fn request_cancellation(&self, user_id: &UserId) -> Result<(), BillingFlowError> {
        let record = self
            .store
            .get(user_id)
            .await?
            .ok_or(BillingFlowError::NoSubscription)?;
        let subscription_id = record
            .processor_subscription_id
            .ok_or(BillingFlowError::NoRemoteSubscription)?;

        self.processor.cancel_at_period_end(&subscription_id).await?;
        info!(user_id = %user_id, "cancellation requested at period end");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemorySubscriptionStore, MockProcessorClient};
    use crate::domain::foundation::Timestamp;
    use crate::domain::subscription::SubscriptionRecord;

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000)
    }

    fn handler() -> (
        BillingSessionHandler,
        Arc<InMemorySubscriptionStore>,
        Arc<MockProcessorClient>,
    ) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let processor = Arc::new(MockProcessorClient::new());
        (
            BillingSessionHandler::new(store.clone(), processor.clone()),
            store,
            processor,
        )
    }

    #[tokio::test]
    async fn checkout_returns_hosted_url() {
        let (handler, _, _) = handler();
        let session = handler
            .start_checkout(&UserId::new(), PlanTier::Premium, true)
            .await
            .unwrap();
        assert!(session.url.starts_with("https://"));
    }

    #[tokio::test]
    async fn portal_requires_a_record() {
        let (handler, _, _) = handler();
        let result = handler.open_portal(&UserId::new()).await;
        assert!(matches!(result, Err(BillingFlowError::NoSubscription)));
    }

    #[tokio::test]
    async fn portal_opens_for_known_customer() {
        let (handler, store, _) = handler();
        let user = UserId::new();
        store
            .seed(SubscriptionRecord::start_paid(
                user,
                PlanTier::Standard,
                now().add_days(30),
                "cus_1".into(),
                Some("sub_1".into()),
                now(),
            ))
            .await;

        let session = handler.open_portal(&user).await.unwrap();
        assert!(session.url.contains("portal"));
    }

    #[tokio::test]
    async fn cancellation_flags_the_remote_subscription() {
        let (handler, store, processor) = handler();
        let user = UserId::new();
        store
            .seed(SubscriptionRecord::start_paid(
                user,
                PlanTier::Standard,
                now().add_days(30),
                "cus_1".into(),
                Some("sub_1".into()),
                now(),
            ))
            .await;

        handler.request_cancellation(&user).await.unwrap();
        assert!(processor.was_cancel_requested("sub_1").await);
        // The local record is untouched; the webhook will move it.
        let record = store.get(&user).await.unwrap().unwrap();
        assert!(!record.cancel_at_period_end);
    }

    #[tokio::test]
    async fn cancellation_flags_a_trialing_subscription() {
        let (handler, store, processor) = handler();
        let user = UserId::new();
        store
            .seed(SubscriptionRecord::start_trial(
                user,
                PlanTier::Standard,
                now().add_days(14),
                "cus_1".into(),
                Some("sub_t".into()),
                now(),
            ))
            .await;

        handler.request_cancellation(&user).await.unwrap();
        assert!(processor.was_cancel_requested("sub_t").await);
    }

    #[tokio::test]
    async fn cancellation_requires_a_remote_subscription() {
        let (handler, store, _) = handler();
        let user = UserId::new();
        store
            .seed(SubscriptionRecord::start_trial(
                user,
                PlanTier::Standard,
                now().add_days(14),
                "cus_1".into(),
                None,
                now(),
            ))
            .await;

        let result = handler.request_cancellation(&user).await;
        assert!(matches!(
            result,
            Err(BillingFlowError::NoRemoteSubscription)
        ));
    }
}
