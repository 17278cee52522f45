//! In-memory subscription store.
//!
//! A single async mutex over the record map gives a stronger guarantee
//! than the port demands (global serialization instead of per-user), which
//! is fine at test scale and keeps `apply_transition` trivially atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::foundation::{StoreError, Timestamp, UserId};
use crate::domain::subscription::{SubscriptionRecord, SubscriptionState, TransitionOutcome};
use crate::ports::{AppliedTransition, SubscriptionStore, TransitionFn};

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    records: Mutex<HashMap<UserId, SubscriptionRecord>>,
    fail_reads: AtomicU32,
    fail_writes: AtomicU32,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing the transition contract.
    /// Test setup only.
    pub async fn seed(&self, record: SubscriptionRecord) {
        self.records.lock().await.insert(record.user_id, record);
    }

    /// Makes the next `n` reads fail with a transient error.
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` `apply_transition` calls fail with a transient
    /// error.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>, StoreError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::unavailable("injected read failure"));
        }
        Ok(self.records.lock().await.get(user_id).cloned())
    }

    async fn apply_transition(
        &self,
        user_id: UserId,
        decide: TransitionFn,
    ) -> Result<AppliedTransition, StoreError> {
        if Self::take_failure(&self.fail_writes) {
            return Err(StoreError::unavailable("injected write failure"));
        }
        let mut records = self.records.lock().await;
        let prior = records.get(&user_id).cloned();
        let outcome = decide(prior.as_ref());
        if let TransitionOutcome::Applied { next, .. } = &outcome {
            records.insert(user_id, next.clone());
        }
        Ok(AppliedTransition { prior, outcome })
    }

    async fn find_user_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserId>, StoreError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::unavailable("injected read failure"));
        }
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|r| r.processor_customer_id.as_deref() == Some(customer_id))
            .map(|r| r.user_id))
    }

    async fn find_trials_ending_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<UserId>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| {
                r.state == SubscriptionState::Trialing
                    && r.trial_ends_at.map(|t| t <= cutoff).unwrap_or(false)
            })
            .map(|r| r.user_id)
            .collect())
    }

    async fn find_cancellations_elapsed_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<UserId>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| {
                r.state == SubscriptionState::CancelPending
                    && r.current_period_end.map(|t| t <= cutoff).unwrap_or(false)
            })
            .map(|r| r.user_id)
            .collect())
    }

    async fn find_stale_open_records(
        &self,
        updated_before: Timestamp,
        limit: u32,
    ) -> Result<Vec<UserId>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| !r.state.is_closed() && r.updated_at <= updated_before)
            .map(|r| r.user_id)
            .take(limit as usize)
            .collect())
    }
}
