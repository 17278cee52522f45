//! PostgreSQL implementation of AuditLog.
//!
//! Insert-only table; nothing here updates or deletes rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{AuditEntryId, StoreError, Timestamp, UserId};
use crate::domain::subscription::{PlanTier, SubscriptionState, TransitionCause};
use crate::ports::{AuditEntry, AuditLog};

use super::store_err;

pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    user_id: Uuid,
    event_id: Option<String>,
    cause: String,
    prior_state: Option<String>,
    new_state: String,
    tier: String,
    entitlement_change: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: AuditEntryId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            event_id: row.event_id,
            cause: parse_cause(&row.cause)?,
            prior_state: row.prior_state.as_deref().map(parse_state).transpose()?,
            new_state: parse_state(&row.new_state)?,
            tier: PlanTier::parse(&row.tier)
                .ok_or_else(|| StoreError::internal(format!("invalid tier value: {}", row.tier)))?,
            entitlement_change: row.entitlement_change,
            recorded_at: Timestamp::from_datetime(row.recorded_at),
        })
    }
}

fn parse_cause(s: &str) -> Result<TransitionCause, StoreError> {
    match s {
        "event" => Ok(TransitionCause::Event),
        "reconciliation" => Ok(TransitionCause::Reconciliation),
        "expiration_sweep" => Ok(TransitionCause::ExpirationSweep),
        other => Err(StoreError::internal(format!("invalid cause value: {}", other))),
    }
}

fn parse_state(s: &str) -> Result<SubscriptionState, StoreError> {
    match s {
        "trialing" => Ok(SubscriptionState::Trialing),
        "active" => Ok(SubscriptionState::Active),
        "past_due" => Ok(SubscriptionState::PastDue),
        "cancel_pending" => Ok(SubscriptionState::CancelPending),
        "canceled" => Ok(SubscriptionState::Canceled),
        "expired" => Ok(SubscriptionState::Expired),
        other => Err(StoreError::internal(format!("invalid state value: {}", other))),
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscription_audit (
                id, user_id, event_id, cause, prior_state, new_state,
                tier, entitlement_change, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(&entry.event_id)
        .bind(entry.cause.to_string())
        .bind(entry.prior_state.map(|s| s.to_string()))
        .bind(entry.new_state.to_string())
        .bind(entry.tier.as_str())
        .bind(&entry.entitlement_change)
        .bind(*entry.recorded_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("append audit entry", e))?;

        Ok(())
    }

    async fn for_user(&self, user_id: &UserId) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, event_id, cause, prior_state, new_state,
                   tier, entitlement_change, recorded_at
            FROM subscription_audit
            WHERE user_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list audit entries", e))?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_strings_roundtrip() {
        for cause in [
            TransitionCause::Event,
            TransitionCause::Reconciliation,
            TransitionCause::ExpirationSweep,
        ] {
            assert_eq!(parse_cause(&cause.to_string()).unwrap(), cause);
        }
    }

    #[test]
    fn row_conversion_rebuilds_the_entry() {
        let now = Utc::now();
        let row = AuditRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: Some("evt_1".to_string()),
            cause: "reconciliation".to_string(),
            prior_state: Some("active".to_string()),
            new_state: "canceled".to_string(),
            tier: "standard".to_string(),
            entitlement_change: Some("-daily_assessments".to_string()),
            recorded_at: now,
        };

        let entry = AuditEntry::try_from(row).unwrap();
        assert_eq!(entry.cause, TransitionCause::Reconciliation);
        assert_eq!(entry.prior_state, Some(SubscriptionState::Active));
        assert_eq!(entry.new_state, SubscriptionState::Canceled);
    }
}
