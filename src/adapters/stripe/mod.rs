//! Stripe implementation of the ProcessorClient port.
//!
//! Thin REST client over the Stripe API: subscription reads for the
//! reconciler, customer metadata lookups, hosted checkout and billing
//! portal sessions, and cancel-at-period-end requests. Webhook
//! verification lives in the domain layer, not here.

mod client;

pub use client::{StripeClient, StripeConfig};
