//! Attuned billing service entry point.
//!
//! Wires the PostgreSQL stores, the Stripe client, the webhook ingest
//! path, and the reconciler together, then serves the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use attuned::adapters::http::{billing_router, BillingAppState};
use attuned::adapters::postgres::{
    PostgresAuditLog, PostgresProcessedEventStore, PostgresSubscriptionStore,
};
use attuned::adapters::stripe::StripeClient;
use attuned::application::{
    BillingSessionHandler, EntitlementService, IngestWebhookHandler, Reconciler,
};
use attuned::config::AppConfig;
use attuned::domain::subscription::WebhookVerifier;
use attuned::ports::{AuditLog, ProcessedEventStore, ProcessorClient, SubscriptionStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    let store: Arc<dyn SubscriptionStore> = Arc::new(PostgresSubscriptionStore::new(pool.clone()));
    let dedup: Arc<dyn ProcessedEventStore> =
        Arc::new(PostgresProcessedEventStore::new(pool.clone()));
    let audit: Arc<dyn AuditLog> = Arc::new(PostgresAuditLog::new(pool));
    let processor: Arc<dyn ProcessorClient> =
        Arc::new(StripeClient::new(config.billing.stripe_config())?);

    let lifecycle_policy = config.billing.lifecycle_policy();
    let entitlement_policy = config.billing.entitlement_policy();

    let ingest = Arc::new(IngestWebhookHandler::new(
        WebhookVerifier::new(&config.billing.stripe_webhook_secret),
        store.clone(),
        dedup.clone(),
        audit.clone(),
        lifecycle_policy.clone(),
        entitlement_policy.clone(),
    ));
    let sessions = Arc::new(BillingSessionHandler::new(store.clone(), processor.clone()));
    let entitlements = Arc::new(EntitlementService::new(
        store.clone(),
        entitlement_policy.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        store,
        processor,
        audit.clone(),
        dedup,
        lifecycle_policy,
        entitlement_policy,
        config.billing.reconciler_config(),
    ));
    tokio::spawn(reconciler.run());

    let state = BillingAppState {
        ingest,
        sessions,
        entitlements,
        audit,
    };

    let app = billing_router().with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.server.request_timeout_secs,
            ))),
    );

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, test_mode = config.billing.is_test_mode(), "billing service listening");

    axum::serve(listener, app).await?;

    Ok(())
}
