//! In-memory audit log.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::foundation::{StoreError, UserId};
use crate::ports::{AuditEntry, AuditLog};

#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all users. Test assertions only.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn for_user(&self, user_id: &UserId) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| e.user_id == *user_id)
            .cloned()
            .collect())
    }
}
