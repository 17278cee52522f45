//! Entitlement query service.
//!
//! The synchronous capability-check surface the rest of the product calls
//! before gating a feature. Resolution itself is pure; this service adds
//! the store read and the fail-closed policy around it.

use std::sync::Arc;

use tracing::warn;

use crate::domain::foundation::{StoreError, Timestamp, UserId};
use crate::domain::subscription::{
    resolve_entitlements, EntitlementPolicy, EntitlementSet, SubscriptionRecord,
};
use crate::ports::SubscriptionStore;

/// Resolves entitlement sets for users.
pub struct EntitlementService {
    store: Arc<dyn SubscriptionStore>,
    policy: EntitlementPolicy,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn SubscriptionStore>, policy: EntitlementPolicy) -> Self {
        Self { store, policy }
    }

    /// Current entitlement set for a user.
    ///
    /// Fails closed: if the store cannot be read, the user gets the free
    /// set rather than unverified premium access. Free functionality is
    /// never taken away by an outage.
    pub async fn entitlements_for(&self, user_id: &UserId, now: Timestamp) -> EntitlementSet {
        match self.store.get(user_id).await {
            Ok(record) => resolve_entitlements(record.as_ref(), now, &self.policy),
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "entitlement read failed, failing closed");
                EntitlementSet::free()
            }
        }
    }

    /// The user's raw record, for the subscription status surface.
    pub async fn record_for(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.store.get(user_id).await
    }

    pub fn policy(&self) -> &EntitlementPolicy {
        &self.policy
    }
}

/// Short human-readable diff between two entitlement sets, recorded on
/// audit entries. `None` when nothing changed.
pub fn entitlement_change_note(
    before: &EntitlementSet,
    after: &EntitlementSet,
) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for gained in after.iter().filter(|e| !before.allows(*e)) {
        parts.push(format!("+{}", gained));
    }
    for lost in before.iter().filter(|e| !after.allows(*e)) {
        parts.push(format!("-{}", lost));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}
