//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `SubscriptionStore` - transactional per-user subscription records
//! - `ProcessedEventStore` - webhook event deduplication
//! - `AuditLog` - append-only transition history
//! - `ProcessorClient` - the external payment processor's API

mod audit_log;
mod processed_event_store;
mod processor_client;
mod subscription_store;

pub use audit_log::{AuditEntry, AuditLog};
pub use processed_event_store::{ClaimOutcome, ProcessedEventStore};
pub use processor_client::{HostedSession, ProcessorClient, ProcessorError, RemoteSubscription};
pub use subscription_store::{AppliedTransition, SubscriptionStore, TransitionFn};
