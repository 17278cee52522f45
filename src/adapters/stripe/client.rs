//! Stripe REST client.
//!
//! All calls are form-encoded POSTs or plain GETs against the Stripe
//! API, authenticated with the secret key via HTTP basic auth. Requests
//! carry a bounded timeout so a slow processor cannot stall the
//! reconciler or a user-facing billing flow.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{PlanTier, RemoteStatus};
use crate::ports::{HostedSession, ProcessorClient, ProcessorError, RemoteSubscription};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    pub api_key: SecretString,

    /// Base URL for the Stripe API; overridable for tests.
    pub api_base_url: String,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Price id backing the standard plan.
    pub standard_price_id: String,

    /// Price id backing the premium plan.
    pub premium_price_id: String,

    /// Where checkout redirects on success.
    pub checkout_success_url: String,

    /// Where checkout redirects when abandoned.
    pub checkout_cancel_url: String,

    /// Trial length passed to checkout when a trial is requested.
    pub trial_days: u32,
}

impl StripeConfig {
    pub fn new(
        api_key: impl Into<String>,
        standard_price_id: impl Into<String>,
        premium_price_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            standard_price_id: standard_price_id.into(),
            premium_price_id: premium_price_id.into(),
            checkout_success_url: "https://app.attuned.example/billing/success".to_string(),
            checkout_cancel_url: "https://app.attuned.example/billing/canceled".to_string(),
            trial_days: 14,
        }
    }

    /// Point the client at a different base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    fn price_for_tier(&self, tier: PlanTier) -> &str {
        match tier {
            PlanTier::Standard => &self.standard_price_id,
            PlanTier::Premium => &self.premium_price_id,
        }
    }

    fn tier_for_price(&self, price_id: &str) -> Option<PlanTier> {
        if price_id == self.standard_price_id {
            Some(PlanTier::Standard)
        } else if price_id == self.premium_price_id {
            Some(PlanTier::Premium)
        } else {
            None
        }
    }
}

/// ProcessorClient backed by the Stripe REST API.
pub struct StripeClient {
    config: StripeConfig,
    http: reqwest::Client,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, ProcessorError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProcessorError::Request(format!("build http client: {}", e)))?;

        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ProcessorError> {
        self.http
            .get(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(request_err)
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response, ProcessorError> {
        self.http
            .post(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .form(params)
            .send()
            .await
            .map_err(request_err)
    }

    fn remote_from_api(&self, sub: ApiSubscription) -> RemoteSubscription {
        let tier = sub
            .items
            .data
            .first()
            .and_then(|item| self.config.tier_for_price(&item.price.id));

        RemoteSubscription {
            subscription_id: sub.id,
            customer_id: sub.customer,
            status: RemoteStatus::parse(&sub.status),
            cancel_at_period_end: sub.cancel_at_period_end,
            current_period_end: sub.current_period_end.map(Timestamp::from_unix_secs),
            tier,
        }
    }
}

fn request_err(e: reqwest::Error) -> ProcessorError {
    if e.is_timeout() {
        ProcessorError::Timeout
    } else {
        ProcessorError::Request(e.to_string())
    }
}

/// Converts a non-2xx response into an error, reading the body for
/// diagnostics.
async fn error_from_response(response: reqwest::Response) -> ProcessorError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, error = %body, "Stripe API call failed");
    ProcessorError::Request(format!("Stripe returned {}: {}", status, body))
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProcessorError> {
    response
        .json()
        .await
        .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ProcessorClient for StripeClient {
    async fn fetch_subscription(
        &self,
        customer_id: &str,
    ) -> Result<RemoteSubscription, ProcessorError> {
        // status=all so a subscription Stripe already canceled still
        // comes back, letting the reconciler observe the closure.
        let path = format!(
            "/v1/subscriptions?customer={}&status=all&limit=1",
            customer_id
        );
        let response = self.get(&path).await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let list: ApiList<ApiSubscription> = parse_json(response).await?;
        let sub = list.data.into_iter().next().ok_or(ProcessorError::NotFound)?;

        Ok(self.remote_from_api(sub))
    }

    async fn fetch_customer_user(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserId>, ProcessorError> {
        let response = self.get(&format!("/v1/customers/{}", customer_id)).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let customer: ApiCustomer = parse_json(response).await?;
        if customer.deleted {
            return Ok(None);
        }

        Ok(customer
            .metadata
            .get("user_id")
            .and_then(|raw| raw.parse().ok()))
    }

    async fn create_checkout_session(
        &self,
        user_id: &UserId,
        tier: PlanTier,
        trial: bool,
    ) -> Result<HostedSession, ProcessorError> {
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", self.config.price_for_tier(tier).to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", self.config.checkout_success_url.clone()),
            ("cancel_url", self.config.checkout_cancel_url.clone()),
            // Correlation keys the webhook handler reads back.
            ("metadata[user_id]", user_id.to_string()),
            ("metadata[tier]", tier.as_str().to_string()),
            ("subscription_data[metadata][user_id]", user_id.to_string()),
        ];

        if trial {
            params.push(("metadata[trial]", "true".to_string()));
            params.push((
                "subscription_data[trial_period_days]",
                self.config.trial_days.to_string(),
            ));
        }

        let response = self.post_form("/v1/checkout/sessions", &params).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let session: ApiSession = parse_json(response).await?;
        let url = session
            .url
            .ok_or_else(|| ProcessorError::InvalidResponse("session has no url".to_string()))?;

        Ok(HostedSession { url })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
    ) -> Result<HostedSession, ProcessorError> {
        let params = vec![
            ("customer", customer_id.to_string()),
            ("return_url", self.config.checkout_success_url.clone()),
        ];

        let response = self.post_form("/v1/billing_portal/sessions", &params).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let session: ApiSession = parse_json(response).await?;
        let url = session
            .url
            .ok_or_else(|| ProcessorError::InvalidResponse("session has no url".to_string()))?;

        Ok(HostedSession { url })
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<(), ProcessorError> {
        let params = vec![("cancel_at_period_end", "true".to_string())];
        let path = format!("/v1/subscriptions/{}", subscription_id);

        let response = self.post_form(&path, &params).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProcessorError::NotFound);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Wire Types
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct ApiList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiSubscription {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    cancel_at_period_end: bool,
    current_period_end: Option<i64>,
    #[serde(default)]
    items: ApiList<ApiSubscriptionItem>,
}

impl<T> Default for ApiList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct ApiSubscriptionItem {
    price: ApiPrice,
}

#[derive(Debug, Deserialize)]
struct ApiPrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiCustomer {
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApiSession {
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig::new("sk_test_abc", "price_standard", "price_premium")
    }

    #[test]
    fn price_ids_map_to_tiers() {
        let config = test_config();
        assert_eq!(config.tier_for_price("price_standard"), Some(PlanTier::Standard));
        assert_eq!(config.tier_for_price("price_premium"), Some(PlanTier::Premium));
        assert_eq!(config.tier_for_price("price_legacy"), None);
    }

    #[test]
    fn subscription_payload_maps_to_remote_view() {
        let config = test_config();
        let client = StripeClient::new(config).unwrap();

        let sub: ApiSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "past_due",
            "cancel_at_period_end": false,
            "current_period_end": 1_700_000_000,
            "items": { "data": [ { "price": { "id": "price_premium" } } ] }
        }))
        .unwrap();

        let remote = client.remote_from_api(sub);
        assert_eq!(remote.status, RemoteStatus::PastDue);
        assert_eq!(remote.tier, Some(PlanTier::Premium));
        assert_eq!(
            remote.current_period_end,
            Some(Timestamp::from_unix_secs(1_700_000_000))
        );
    }

    #[test]
    fn unknown_price_leaves_tier_unset() {
        let client = StripeClient::new(test_config()).unwrap();

        let sub: ApiSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_2",
            "customer": "cus_2",
            "status": "active",
            "items": { "data": [ { "price": { "id": "price_grandfathered" } } ] }
        }))
        .unwrap();

        let remote = client.remote_from_api(sub);
        assert_eq!(remote.status, RemoteStatus::Active);
        assert_eq!(remote.tier, None);
        assert_eq!(remote.current_period_end, None);
    }
}
