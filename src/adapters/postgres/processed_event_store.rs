//! PostgreSQL implementation of ProcessedEventStore.
//!
//! The primary key on `event_id` plus `ON CONFLICT DO NOTHING` makes the
//! claim atomic across concurrent deliveries and across processes.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{StoreError, Timestamp};
use crate::ports::{ClaimOutcome, ProcessedEventStore};

use super::store_err;

pub struct PostgresProcessedEventStore {
    pool: PgPool,
}

impl PostgresProcessedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresProcessedEventStore {
    async fn try_claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> Result<ClaimOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, claimed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(*now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("claim event", e))?;

        if result.rows_affected() == 1 {
            Ok(ClaimOutcome::FirstSeen)
        } else {
            Ok(ClaimOutcome::AlreadyProcessed)
        }
    }

    async fn release(&self, event_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("release claim", e))?;
        Ok(())
    }

    async fn prune_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM processed_events WHERE claimed_at < $1")
            .bind(*cutoff.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("prune claims", e))?;
        Ok(result.rows_affected())
    }
}
