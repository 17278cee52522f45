//! ProcessedEventStore port - webhook event deduplication.
//!
//! The processor delivers at-least-once: timeouts, 5xx responses and lost
//! acknowledgements all cause redelivery. This port is the single
//! concurrency-control point preventing double-application of one event.
//! It does not serialize distinct events for the same user; the
//! SubscriptionStore does that.

use async_trait::async_trait;

use crate::domain::foundation::{StoreError, Timestamp};

/// Result of attempting to claim an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First delivery of this event; the caller proceeds to apply it.
    FirstSeen,
    /// Already claimed by this or another delivery; the caller discards
    /// the event and acknowledges success.
    AlreadyProcessed,
}

/// Port for the durable set of processed event ids.
///
/// Implementations must make `try_claim` atomic under concurrent delivery
/// of the same event id (PRIMARY KEY with `ON CONFLICT DO NOTHING`, or
/// equivalent). Entries are retained at least as long as the processor's
/// maximum redelivery window, then pruned.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Atomically claim an event id.
    ///
    /// Exactly one concurrent caller receives `FirstSeen`.
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Release a claim after a transient processing failure, so the
    /// processor's redelivery is treated as first-seen and retried.
    async fn release(&self, event_id: &str) -> Result<(), StoreError>;

    /// Delete claims recorded before `cutoff`. Returns the number removed.
    async fn prune_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_event_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn ProcessedEventStore) {}
    }
}
