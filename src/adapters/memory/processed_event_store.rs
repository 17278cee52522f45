//! In-memory processed-event set.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::foundation::{StoreError, Timestamp};
use crate::ports::{ClaimOutcome, ProcessedEventStore};

#[derive(Default)]
pub struct InMemoryProcessedEventStore {
    // event_id -> (event_type, claimed_at)
    claims: Mutex<HashMap<String, (String, Timestamp)>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live claims. Test assertions only.
    pub async fn len(&self) -> usize {
        self.claims.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.claims.lock().await.is_empty()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut claims = self.claims.lock().await;
        if claims.contains_key(event_id) {
            Ok(ClaimOutcome::AlreadyProcessed)
        } else {
            claims.insert(event_id.to_string(), (event_type.to_string(), now));
            Ok(ClaimOutcome::FirstSeen)
        }
    }

    async fn release(&self, event_id: &str) -> Result<(), StoreError> {
        self.claims.lock().await.remove(event_id);
        Ok(())
    }

    async fn prune_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut claims = self.claims.lock().await;
        let before = claims.len();
        claims.retain(|_, (_, claimed_at)| *claimed_at >= cutoff);
        Ok((before - claims.len()) as u64)
    }
}
