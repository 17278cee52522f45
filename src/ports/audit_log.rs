//! AuditLog port - append-only transition history.
//!
//! Every applied transition is recorded, regardless of what caused it.
//! Entries are immutable once written and read back in order for the
//! support tooling surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AuditEntryId, StoreError, Timestamp, UserId};
use crate::domain::subscription::{PlanTier, SubscriptionState, TransitionCause};

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,

    pub user_id: UserId,

    /// Processor event id that drove the transition; `None` for repairs
    /// and sweeps.
    pub event_id: Option<String>,

    pub cause: TransitionCause,

    /// State before the transition; `None` when the record was created.
    pub prior_state: Option<SubscriptionState>,

    pub new_state: SubscriptionState,

    pub tier: PlanTier,

    /// Entitlements gained or lost by this transition, as a short
    /// human-readable note for support tooling.
    pub entitlement_change: Option<String>,

    pub recorded_at: Timestamp,
}

/// Port for the append-only audit log.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry. Entries are never updated or deleted.
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// All entries for a user, oldest first.
    async fn for_user(&self, user_id: &UserId) -> Result<Vec<AuditEntry>, StoreError>;
}
