//! PostgreSQL adapters.
//!
//! Durable implementations of the storage ports. Concurrency contracts
//! map onto the database: `apply_transition` takes a row lock per user,
//! and event claims rely on the primary key with `ON CONFLICT DO NOTHING`.

mod audit_log;
mod processed_event_store;
mod subscription_store;

pub use audit_log::PostgresAuditLog;
pub use processed_event_store::PostgresProcessedEventStore;
pub use subscription_store::PostgresSubscriptionStore;

use crate::domain::foundation::StoreError;

/// Classifies a sqlx failure for the retry policy: connectivity problems
/// are transient, everything else is not.
fn store_err(context: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::unavailable(format!("{}: {}", context, e))
        }
        other => StoreError::internal(format!("{}: {}", context, other)),
    }
}
