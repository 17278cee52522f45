//! SubscriptionStore port - transactional per-user subscription records.
//!
//! The store is the only place subscription records are persisted, and
//! `apply_transition` is the only way they change. Implementations must
//! make each `apply_transition` call atomic per user (row lock or per-user
//! mutex): two concurrently processed events for the same user are
//! serialized, while unrelated users proceed in parallel.

use async_trait::async_trait;

use crate::domain::foundation::{StoreError, Timestamp, UserId};
use crate::domain::subscription::{SubscriptionRecord, TransitionOutcome};

/// Decision function run inside the per-user critical section.
///
/// Receives the current record (or `None` for a user with no billing
/// history) and returns the transition outcome. The store persists the
/// next record when the outcome is `Applied` and leaves the row untouched
/// on `Noop`.
pub type TransitionFn =
    Box<dyn FnOnce(Option<&SubscriptionRecord>) -> TransitionOutcome + Send + 'static>;

/// What `apply_transition` observed and did, returned for audit emission.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    /// Record as it was when the decision function ran.
    pub prior: Option<SubscriptionRecord>,
    /// The decision, including the persisted record when applied.
    pub outcome: TransitionOutcome,
}

/// Port for subscription record persistence.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Fetch a user's record. `None` means no billing history.
    async fn get(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// Run a transition decision atomically against the user's record.
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` on transient failures; the caller retries
    /// the whole event, which is safe under deduplication.
    async fn apply_transition(
        &self,
        user_id: UserId,
        decide: TransitionFn,
    ) -> Result<AppliedTransition, StoreError>;

    /// Correlate a processor customer id to the owning user.
    ///
    /// Subscription events carry only the processor's customer id; the
    /// mapping is recorded by the first checkout event.
    async fn find_user_by_customer(&self, customer_id: &str)
        -> Result<Option<UserId>, StoreError>;

    /// Users with trialing records whose deadline is at or before `cutoff`.
    async fn find_trials_ending_before(&self, cutoff: Timestamp)
        -> Result<Vec<UserId>, StoreError>;

    /// Users with pending cancellations whose period boundary is at or
    /// before `cutoff`.
    async fn find_cancellations_elapsed_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<UserId>, StoreError>;

    /// Users with open paid records not touched since `updated_before`,
    /// candidates for reconciliation against the processor.
    async fn find_stale_open_records(
        &self,
        updated_before: Timestamp,
        limit: u32,
    ) -> Result<Vec<UserId>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn SubscriptionStore) {}
    }
}
