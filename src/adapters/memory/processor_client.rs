//! Mock processor client.
//!
//! Configurable remote subscriptions, user correlation, and failure
//! injection for reconciler and billing-flow tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::foundation::UserId;
use crate::domain::subscription::PlanTier;
use crate::ports::{HostedSession, ProcessorClient, ProcessorError, RemoteSubscription};

#[derive(Default)]
pub struct MockProcessorClient {
    subscriptions: Mutex<HashMap<String, RemoteSubscription>>,
    customer_users: Mutex<HashMap<String, UserId>>,
    cancel_requests: Mutex<HashSet<String>>,
    fail_fetches: AtomicU32,
    fetch_count: AtomicU32,
}

impl MockProcessorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_subscription(&self, customer_id: &str, remote: RemoteSubscription) {
        self.subscriptions
            .lock()
            .await
            .insert(customer_id.to_string(), remote);
    }

    pub async fn set_customer_user(&self, customer_id: &str, user_id: UserId) {
        self.customer_users
            .lock()
            .await
            .insert(customer_id.to_string(), user_id);
    }

    /// Makes the next `n` subscription fetches fail transiently.
    pub fn fail_next_fetches(&self, n: u32) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    /// How many subscription fetches were attempted.
    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub async fn was_cancel_requested(&self, subscription_id: &str) -> bool {
        self.cancel_requests.lock().await.contains(subscription_id)
    }
}

#[async_trait]
impl ProcessorClient for MockProcessorClient {
    async fn fetch_subscription(
        &self,
        customer_id: &str,
    ) -> Result<RemoteSubscription, ProcessorError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProcessorError::Request("injected failure".to_string()));
        }
        self.subscriptions
            .lock()
            .await
            .get(customer_id)
            .cloned()
            .ok_or(ProcessorError::NotFound)
    }

    async fn fetch_customer_user(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserId>, ProcessorError> {
        Ok(self.customer_users.lock().await.get(customer_id).copied())
    }

    async fn create_checkout_session(
        &self,
        user_id: &UserId,
        tier: PlanTier,
        trial: bool,
    ) -> Result<HostedSession, ProcessorError> {
        Ok(HostedSession {
            url: format!(
                "https://checkout.example.com/c/{}?tier={}&trial={}",
                user_id,
                tier.as_str(),
                trial
            ),
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
    ) -> Result<HostedSession, ProcessorError> {
        Ok(HostedSession {
            url: format!("https://billing.example.com/portal/{}", customer_id),
        })
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<(), ProcessorError> {
        self.cancel_requests
            .lock()
            .await
            .insert(subscription_id.to_string());
        Ok(())
    }
}
