//! Shared domain primitives.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{StoreError, ValidationError};
pub use ids::{AuditEntryId, UserId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
