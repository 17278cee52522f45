//! Webhook processing errors.
//!
//! Every failure mode of event ingestion, with HTTP status mapping and
//! retryability semantics. The status code decides the processor's retry
//! behavior: permanently-invalid events must never come back, transient
//! failures must.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors that occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Delivery timestamp is outside the acceptable window (5 minutes).
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Delivery timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse the payload or signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required checkout metadata field missing from the event.
    #[error("Missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// Required field missing from the event payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The processor customer could not be correlated to a user.
    /// Possibly eventual consistency: the checkout event that records
    /// the mapping may still be in flight.
    #[error("Unknown processor customer")]
    UnknownCustomer,

    /// Subscription store failed.
    #[error("Store error: {0}")]
    Store(String),
}

impl WebhookError {
    /// Returns true if the processor should redeliver this event.
    ///
    /// Redelivery is safe for transient failures because deduplication
    /// only records an event after it was fully applied.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::Store(_) | WebhookError::UnknownCustomer
        )
    }

    /// Maps the error to the response status.
    ///
    /// - 2xx: acknowledged, no redelivery
    /// - 4xx: permanently invalid, no redelivery
    /// - 5xx: transient, processor redelivers with backoff
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature | WebhookError::TimestampOutOfRange => {
                StatusCode::UNAUTHORIZED
            }

            WebhookError::InvalidTimestamp
            | WebhookError::ParseError(_)
            | WebhookError::MissingMetadata(_)
            | WebhookError::MissingField(_) => StatusCode::BAD_REQUEST,

            WebhookError::UnknownCustomer | WebhookError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_failures_are_rejected_without_retry() {
        for err in [
            WebhookError::InvalidSignature,
            WebhookError::TimestampOutOfRange,
        ] {
            assert!(!err.is_retryable());
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn malformed_payloads_are_bad_requests() {
        for err in [
            WebhookError::InvalidTimestamp,
            WebhookError::ParseError("bad json".to_string()),
            WebhookError::MissingMetadata("user_id"),
            WebhookError::MissingField("customer"),
        ] {
            assert!(!err.is_retryable());
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn store_failure_is_retryable() {
        let err = WebhookError::Store("connection refused".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unknown_customer_is_retryable() {
        // The correlating checkout event may still be in flight.
        let err = WebhookError::UnknownCustomer;
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn errors_display_their_context() {
        assert_eq!(
            format!("{}", WebhookError::ParseError("truncated".to_string())),
            "Parse error: truncated"
        );
        assert_eq!(
            format!("{}", WebhookError::MissingMetadata("tier")),
            "Missing metadata: tier"
        );
    }
}
