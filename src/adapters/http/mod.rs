//! HTTP adapters - REST API implementations.
//!
//! The billing module exposes the webhook receiver, the entitlement and
//! subscription status surfaces, and the checkout/portal/cancel flows.

pub mod billing;

pub use billing::{billing_router, BillingAppState};
