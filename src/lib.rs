//! Attuned - Relationship Coaching Platform Backend
//!
//! This crate implements the subscription lifecycle and entitlement engine:
//! Stripe webhook ingestion, the lifecycle state machine, reconciliation
//! against the processor's authoritative records, and the feature-gating
//! surface consumed by the rest of the product.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
