//! Axum router configuration for the billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    cancel_subscription, create_checkout, get_audit_trail, get_entitlements, get_portal_url,
    get_subscription_status, handle_billing_webhook, BillingAppState,
};

/// User-facing billing routes (require authentication).
///
/// - `GET /entitlements` - current entitlement set
/// - `GET /subscription` - subscription status
/// - `GET /audit` - audit trail
/// - `GET /portal` - billing portal URL
/// - `POST /checkout` - start checkout flow
/// - `POST /cancel` - request cancellation at period end
pub fn billing_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/entitlements", get(get_entitlements))
        .route("/subscription", get(get_subscription_status))
        .route("/audit", get(get_audit_trail))
        .route("/portal", get(get_portal_url))
        .route("/checkout", post(create_checkout))
        .route("/cancel", post(cancel_subscription))
}

/// Webhook routes. Separate because deliveries carry no user
/// authentication; they are verified by signature instead.
///
/// - `POST /billing` - processor webhook receiver
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/billing", post(handle_billing_webhook))
}

/// The complete billing router, suitable for mounting at the API root.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .nest("/billing", billing_routes())
        .nest("/webhooks", webhook_routes())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Json, State};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    use super::super::dto::CheckoutRequest;
    use super::super::handlers::{
        cancel_subscription, create_checkout, get_entitlements, get_portal_url,
        get_subscription_status, handle_billing_webhook, AuthenticatedUser,
    };
    use super::*;
    use crate::adapters::memory::{
        InMemoryAuditLog, InMemoryProcessedEventStore, InMemorySubscriptionStore,
        MockProcessorClient,
    };
    use crate::application::{BillingSessionHandler, EntitlementService, IngestWebhookHandler};
    use crate::domain::foundation::{Timestamp, UserId};
    use crate::domain::subscription::{
        compute_test_signature, EntitlementPolicy, EventEnvelopeBuilder, LifecyclePolicy, PlanTier,
        SubscriptionRecord, WebhookVerifier,
    };
    use crate::ports::SubscriptionStore;

    const SECRET: &str = "whsec_http_tests";

    struct Fixture {
        state: BillingAppState,
        store: Arc<InMemorySubscriptionStore>,
        processor: Arc<MockProcessorClient>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let dedup = Arc::new(InMemoryProcessedEventStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let processor = Arc::new(MockProcessorClient::new());

        let ingest = Arc::new(IngestWebhookHandler::new(
            WebhookVerifier::new(SECRET),
            store.clone(),
            dedup,
            audit.clone(),
            LifecyclePolicy::default(),
            EntitlementPolicy::default(),
        ));
        let sessions = Arc::new(BillingSessionHandler::new(store.clone(), processor.clone()));
        let entitlements = Arc::new(EntitlementService::new(
            store.clone(),
            EntitlementPolicy::default(),
        ));

        Fixture {
            state: BillingAppState {
                ingest,
                sessions,
                entitlements,
                audit,
            },
            store,
            processor,
        }
    }

    fn anonymous_user() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: UserId::new(),
        }
    }

    fn signed_headers(payload: &str, timestamp: i64) -> HeaderMap {
        let signature = compute_test_signature(SECRET, timestamp, payload);
        let mut headers = HeaderMap::new();
        headers.insert(
            "Stripe-Signature",
            HeaderValue::from_str(&format!("t={},v1={}", timestamp, signature)).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn webhook_rejects_missing_signature_header() {
        let fixture = fixture();
        let response = handle_billing_webhook(
            State(fixture.state),
            HeaderMap::new(),
            axum::body::Bytes::from_static(b"{}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let fixture = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(
            "Stripe-Signature",
            HeaderValue::from_static("t=1700000000,v1=deadbeef"),
        );

        let response = handle_billing_webhook(
            State(fixture.state),
            headers,
            axum::body::Bytes::from_static(b"{}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_applies_a_valid_checkout_event() {
        let fixture = fixture();
        let user_id = UserId::new();
        let now = Timestamp::now().as_unix_secs();

        let envelope = EventEnvelopeBuilder::new("checkout.session.completed")
            .id("evt_http_1")
            .created(now)
            .object(serde_json::json!({
                "id": "cs_1",
                "customer": "cus_http_1",
                "subscription": "sub_http_1",
                "metadata": { "user_id": user_id.to_string(), "tier": "premium", "trial": "true" }
            }))
            .build();
        let payload = serde_json::to_string(&envelope).unwrap();

        let response = handle_billing_webhook(
            State(fixture.state),
            signed_headers(&payload, now),
            axum::body::Bytes::from(payload.clone()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let record = fixture.store.get(&user_id).await.unwrap().unwrap();
        assert_eq!(record.tier, PlanTier::Premium);
    }

    #[tokio::test]
    async fn entitlements_default_to_free_for_unknown_user() {
        let fixture = fixture();
        let response = get_entitlements(State(fixture.state.clone()), anonymous_user())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn subscription_status_is_null_state_without_history() {
        let fixture = fixture();
        let response = get_subscription_status(State(fixture.state.clone()), anonymous_user())
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn checkout_creates_a_hosted_session() {
        let fixture = fixture();
        let response = create_checkout(
            State(fixture.state.clone()),
            anonymous_user(),
            Json(CheckoutRequest {
                tier: PlanTier::Standard,
                trial: true,
            }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn portal_404s_without_a_record() {
        let fixture = fixture();
        let response = get_portal_url(State(fixture.state.clone()), anonymous_user())
            .await
            .map(IntoResponse::into_response)
            .unwrap_or_else(IntoResponse::into_response);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_is_accepted_for_a_paid_record() {
        let fixture = fixture();
        let user_id = UserId::new();
        let now = Timestamp::now();
        fixture
            .store
            .seed(SubscriptionRecord::start_paid(
                user_id,
                PlanTier::Standard,
                now.add_days(30),
                "cus_1".into(),
                Some("sub_1".into()),
                now,
            ))
            .await;

        let response = cancel_subscription(
            State(fixture.state.clone()),
            AuthenticatedUser { user_id },
        )
        .await
        .unwrap()
        .into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(fixture.processor.was_cancel_requested("sub_1").await);
    }

    #[test]
    fn routers_assemble() {
        let _ = billing_router();
        let _ = billing_routes();
        let _ = webhook_routes();
    }
}
