//! Application layer - use-case handlers wiring domain logic to ports.
//!
//! Each handler owns one operation: webhook ingest, reconciliation,
//! entitlement queries, and the hosted checkout/portal/cancel flows.
//! Handlers hold `Arc<dyn Port>` dependencies and contain no storage or
//! transport specifics.

mod billing_sessions;
mod entitlement_service;
mod ingest;
mod reconciler;

pub use billing_sessions::{BillingFlowError, BillingSessionHandler};
pub use entitlement_service::{entitlement_change_note, EntitlementService};
pub use ingest::{IngestOutcome, IngestWebhookHandler};
pub use reconciler::{CycleReport, ReconcileError, Reconciler, ReconcilerConfig};
