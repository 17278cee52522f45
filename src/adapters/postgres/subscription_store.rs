//! PostgreSQL implementation of SubscriptionStore.
//!
//! `apply_transition` opens a transaction and takes the user's row with
//! `SELECT ... FOR UPDATE`, so concurrent events for one user serialize on
//! the row lock while unrelated users proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{StoreError, Timestamp, UserId};
use crate::domain::subscription::{
    PlanTier, SubscriptionRecord, SubscriptionState, TransitionOutcome,
};
use crate::ports::{AppliedTransition, SubscriptionStore, TransitionFn};

use super::store_err;

pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a subscription record.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    user_id: Uuid,
    state: String,
    tier: String,
    trial_ends_at: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    past_due_since: Option<DateTime<Utc>>,
    processor_customer_id: Option<String>,
    processor_subscription_id: Option<String>,
    last_event_id: Option<String>,
    last_event_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionRecord {
            user_id: UserId::from_uuid(row.user_id),
            state: parse_state(&row.state)?,
            tier: parse_tier(&row.tier)?,
            trial_ends_at: row.trial_ends_at.map(Timestamp::from_datetime),
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            past_due_since: row.past_due_since.map(Timestamp::from_datetime),
            processor_customer_id: row.processor_customer_id,
            processor_subscription_id: row.processor_subscription_id,
            last_event_id: row.last_event_id,
            last_event_at: row.last_event_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
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

fn parse_tier(s: &str) -> Result<PlanTier, StoreError> {
    PlanTier::parse(s).ok_or_else(|| StoreError::internal(format!("invalid tier value: {}", s)))
}

const SELECT_COLUMNS: &str = r#"
    SELECT user_id, state, tier, trial_ends_at, current_period_end,
           cancel_at_period_end, past_due_since, processor_customer_id,
           processor_subscription_id, last_event_id, last_event_at,
           created_at, updated_at
    FROM subscriptions
"#;

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE user_id = $1", SELECT_COLUMNS))
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("fetch subscription", e))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn apply_transition(
        &self,
        user_id: UserId,
        decide: TransitionFn,
    ) -> Result<AppliedTransition, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("begin transaction", e))?;

        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE user_id = $1 FOR UPDATE", SELECT_COLUMNS))
                .bind(user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| store_err("lock subscription row", e))?;

        let prior = row.map(SubscriptionRecord::try_from).transpose()?;
        let outcome = decide(prior.as_ref());

        if let TransitionOutcome::Applied { next, .. } = &outcome {
            sqlx::query(
                r#"
                INSERT INTO subscriptions (
                    user_id, state, tier, trial_ends_at, current_period_end,
                    cancel_at_period_end, past_due_since, processor_customer_id,
                    processor_subscription_id, last_event_id, last_event_at,
                    created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (user_id) DO UPDATE SET
                    state = EXCLUDED.state,
                    tier = EXCLUDED.tier,
                    trial_ends_at = EXCLUDED.trial_ends_at,
                    current_period_end = EXCLUDED.current_period_end,
                    cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                    past_due_since = EXCLUDED.past_due_since,
                    processor_customer_id = EXCLUDED.processor_customer_id,
                    processor_subscription_id = EXCLUDED.processor_subscription_id,
                    last_event_id = EXCLUDED.last_event_id,
                    last_event_at = EXCLUDED.last_event_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(next.user_id.as_uuid())
            .bind(next.state.to_string())
            .bind(next.tier.as_str())
            .bind(next.trial_ends_at.map(|t| *t.as_datetime()))
            .bind(next.current_period_end.map(|t| *t.as_datetime()))
            .bind(next.cancel_at_period_end)
            .bind(next.past_due_since.map(|t| *t.as_datetime()))
            .bind(&next.processor_customer_id)
            .bind(&next.processor_subscription_id)
            .bind(&next.last_event_id)
            .bind(next.last_event_at.map(|t| *t.as_datetime()))
            .bind(*next.created_at.as_datetime())
            .bind(*next.updated_at.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("upsert subscription", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| store_err("commit transaction", e))?;

        Ok(AppliedTransition { prior, outcome })
    }

    async fn find_user_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserId>, StoreError> {
        let user_id: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM subscriptions WHERE processor_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("correlate customer", e))?;

        Ok(user_id.map(UserId::from_uuid))
    }

    async fn find_trials_ending_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM subscriptions WHERE state = 'trialing' AND trial_ends_at <= $1",
        )
        .bind(*cutoff.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list elapsed trials", e))?;

        Ok(ids.into_iter().map(UserId::from_uuid).collect())
    }

    async fn find_cancellations_elapsed_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM subscriptions
            WHERE state = 'cancel_pending' AND current_period_end <= $1
            "#,
        )
        .bind(*cutoff.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list elapsed cancellations", e))?;

        Ok(ids.into_iter().map(UserId::from_uuid).collect())
    }

    async fn find_stale_open_records(
        &self,
        updated_before: Timestamp,
        limit: u32,
    ) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM subscriptions
            WHERE state NOT IN ('canceled', 'expired') AND updated_at <= $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(*updated_before.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list stale records", e))?;

        Ok(ids.into_iter().map(UserId::from_uuid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_roundtrip() {
        for state in [
            SubscriptionState::Trialing,
            SubscriptionState::Active,
            SubscriptionState::PastDue,
            SubscriptionState::CancelPending,
            SubscriptionState::Canceled,
            SubscriptionState::Expired,
        ] {
            assert_eq!(parse_state(&state.to_string()).unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_is_an_internal_error() {
        let err = parse_state("paused").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn row_conversion_rebuilds_the_record() {
        let now = Utc::now();
        let row = SubscriptionRow {
            user_id: Uuid::new_v4(),
            state: "past_due".to_string(),
            tier: "premium".to_string(),
            trial_ends_at: None,
            current_period_end: Some(now),
            cancel_at_period_end: false,
            past_due_since: Some(now),
            processor_customer_id: Some("cus_1".to_string()),
            processor_subscription_id: Some("sub_1".to_string()),
            last_event_id: Some("evt_1".to_string()),
            last_event_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let record = SubscriptionRecord::try_from(row).unwrap();
        assert_eq!(record.state, SubscriptionState::PastDue);
        assert_eq!(record.tier, PlanTier::Premium);
        assert!(record.check_invariants().is_ok());
    }
}
