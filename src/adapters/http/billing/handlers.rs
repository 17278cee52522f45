//! HTTP handlers for the billing endpoints.
//!
//! These handlers connect Axum routes to the application layer. The
//! webhook receiver maps ingest outcomes onto the processor's retry
//! semantics; everything else is a thin authenticated surface over the
//! entitlement service and the session flows.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::{
    BillingFlowError, BillingSessionHandler, EntitlementService, IngestWebhookHandler,
};
use crate::domain::foundation::{StoreError, Timestamp, UserId};
use crate::ports::{AuditLog, ProcessorError};

use super::dto::{
    AuditEntryResponse, AuditTrailResponse, CheckoutRequest, EntitlementsResponse, ErrorResponse,
    SessionResponse, SubscriptionStatusResponse, WebhookAckResponse,
};

// ════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════

/// Shared state for the billing routes.
///
/// Cloned per request; everything inside is Arc-wrapped.
#[derive(Clone)]
pub struct BillingAppState {
    pub ingest: Arc<IngestWebhookHandler>,
    pub sessions: Arc<BillingSessionHandler>,
    pub entitlements: Arc<EntitlementService>,
    pub audit: Arc<dyn AuditLog>,
}

// ════════════════════════════════════════════════════════════════════════════
// User Context
// ════════════════════════════════════════════════════════════════════════════

/// Authenticated user context extracted from the request.
///
/// The account subsystem terminates authentication upstream and forwards
/// the verified user id in a header.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> axum::response::Response {
        let error = ErrorResponse::new("AUTHENTICATION_REQUIRED", "Authentication is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[async_trait]
impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or(AuthenticationRequired)?;

        Ok(AuthenticatedUser { user_id })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Webhook Receiver
// ════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/billing - receive a processor delivery.
///
/// Status codes drive the processor's redelivery: 2xx acknowledges
/// (including duplicates and no-ops), 4xx rejects permanently, 5xx asks
/// for a retry with backoff.
pub async fn handle_billing_webhook(
    State(state): State<BillingAppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let Some(signature) = headers.get("Stripe-Signature").and_then(|v| v.to_str().ok()) else {
        let error = ErrorResponse::new("MISSING_SIGNATURE", "Missing Stripe-Signature header");
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    };

    match state.ingest.handle(&body, signature).await {
        // Every non-error outcome acknowledges so the processor stops
        // redelivering; Applied, NoChange, Duplicate and Ignored all
        // land here.
        Ok(_outcome) => {
            (StatusCode::OK, Json(WebhookAckResponse { received: true })).into_response()
        }
        Err(err) => {
            let error = ErrorResponse::new("WEBHOOK_REJECTED", err.to_string());
            (err.status_code(), Json(error)).into_response()
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Query Endpoints
// ════════════════════════════════════════════════════════════════════════════

/// GET /billing/entitlements - the user's current entitlement set.
///
/// Infallible by design: store failures resolve to the free set inside
/// the service.
pub async fn get_entitlements(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    let entitlements = state
        .entitlements
        .entitlements_for(&user.user_id, Timestamp::now())
        .await;
    Json(EntitlementsResponse { entitlements })
}

/// GET /billing/subscription - the user's subscription status.
pub async fn get_subscription_status(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let record = state.entitlements.record_for(&user.user_id).await?;
    let response = SubscriptionStatusResponse::from_record(record.as_ref(), Timestamp::now());
    Ok(Json(response))
}

/// GET /billing/audit - the user's audit trail, oldest first.
pub async fn get_audit_trail(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let entries = state.audit.for_user(&user.user_id).await?;
    let response = AuditTrailResponse {
        entries: entries.into_iter().map(AuditEntryResponse::from).collect(),
    };
    Ok(Json(response))
}

// ════════════════════════════════════════════════════════════════════════════
// Session Endpoints
// ════════════════════════════════════════════════════════════════════════════

/// POST /billing/checkout - start a hosted checkout flow.
pub async fn create_checkout(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let session = state
        .sessions
        .start_checkout(&user.user_id, request.tier, request.trial)
        .await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { url: session.url })))
}

/// GET /billing/portal - open the hosted billing portal.
pub async fn get_portal_url(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let session = state.sessions.open_portal(&user.user_id).await?;
    Ok(Json(SessionResponse { url: session.url }))
}

/// POST /billing/cancel - request cancellation at period end.
///
/// The local record does not change here; the CancelPending transition
/// arrives as a webhook event.
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    state.sessions.request_cancellation(&user.user_id).await?;
    Ok(StatusCode::ACCEPTED)
}

// ════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════

/// API error type that converts application errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(BillingFlowError);

impl From<BillingFlowError> for BillingApiError {
    fn from(err: BillingFlowError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for BillingApiError {
    fn from(err: StoreError) -> Self {
        Self(BillingFlowError::Store(err))
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code) = match &self.0 {
            BillingFlowError::NoSubscription => (StatusCode::NOT_FOUND, "NO_SUBSCRIPTION"),
            BillingFlowError::NoCustomer => (StatusCode::CONFLICT, "NO_CUSTOMER"),
            BillingFlowError::NoRemoteSubscription => {
                (StatusCode::CONFLICT, "NO_REMOTE_SUBSCRIPTION")
            }
            BillingFlowError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            BillingFlowError::Processor(ProcessorError::NotFound) => {
                (StatusCode::CONFLICT, "NO_REMOTE_SUBSCRIPTION")
            }
            BillingFlowError::Processor(_) => (StatusCode::BAD_GATEWAY, "PROCESSOR_ERROR"),
        };

        let body = ErrorResponse::new(error_code, self.0.to_string());
        (status, Json(body)).into_response()
    }
}
