//! Error types shared across the domain layer and the ports.

use thiserror::Error;

/// Errors that occur during value object construction or state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField {
            field: field.into(),
        }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        ValidationError::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Errors surfaced by the persistence ports.
///
/// The split matters for webhook handling: `Unavailable` must be reported
/// to the processor as retryable (5xx), while `Internal` indicates data the
/// store could not interpret and retrying will not help.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the operation timed out.
    /// Safe to retry; event deduplication makes reprocessing harmless.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store returned data the domain layer could not interpret,
    /// or an operation violated an internal constraint.
    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Creates a transient unavailability error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable(reason.into())
    }

    /// Creates a non-retryable internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        StoreError::Internal(reason.into())
    }

    /// Returns true if the failed operation is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_field_displays_field_name() {
        let err = ValidationError::empty_field("tier");
        assert_eq!(format!("{}", err), "Field 'tier' cannot be empty");
    }

    #[test]
    fn invalid_transition_displays_both_states() {
        let err = ValidationError::invalid_transition("Expired", "Active");
        let msg = format!("{}", err);
        assert!(msg.contains("Expired"));
        assert!(msg.contains("Active"));
    }

    #[test]
    fn unavailable_is_transient() {
        assert!(StoreError::Unavailable("connection refused".into()).is_transient());
    }

    #[test]
    fn internal_is_not_transient() {
        assert!(!StoreError::Internal("bad row".into()).is_transient());
    }
}
