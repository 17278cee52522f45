//! In-memory adapters.
//!
//! Process-local implementations of the storage and processor ports,
//! used by the test suites and for local development runs without
//! external dependencies. Failure injection hooks let tests exercise the
//! transient-failure paths.

mod audit_log;
mod processed_event_store;
mod processor_client;
mod subscription_store;

pub use audit_log::InMemoryAuditLog;
pub use processed_event_store::InMemoryProcessedEventStore;
pub use processor_client::MockProcessorClient;
pub use subscription_store::InMemorySubscriptionStore;
