//! HTTP adapter for the billing module.

mod dto;
mod handlers;
mod routes;

pub use handlers::BillingAppState;
pub use routes::{billing_router, billing_routes, webhook_routes};
