//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `subscription` - Subscription lifecycle, billing events and entitlements

pub mod foundation;
pub mod subscription;
