//! Adapters - implementations of the ports for concrete infrastructure.
//!
//! - `http` - axum handlers for the inbound surfaces
//! - `memory` - in-process implementations for tests and local runs
//! - `postgres` - durable sqlx-backed stores
//! - `stripe` - the payment processor's REST API

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;
