//! Billing configuration
//!
//! Stripe credentials and price mapping, lifecycle policy knobs, and the
//! reconciler schedule.

use serde::Deserialize;

use crate::adapters::stripe::StripeConfig;
use crate::application::ReconcilerConfig;
use crate::domain::subscription::{EntitlementPolicy, LifecyclePolicy};

use super::error::ValidationError;

/// Billing configuration (Stripe + lifecycle policy)
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Stripe API key (sk_test_... or sk_live_...)
    pub stripe_api_key: String,

    /// Stripe webhook signing secret (whsec_...)
    pub stripe_webhook_secret: String,

    /// Stripe price ID backing the standard plan
    pub standard_price_id: String,

    /// Stripe price ID backing the premium plan
    pub premium_price_id: String,

    /// URL checkout redirects to on success
    #[serde(default = "default_success_url")]
    pub checkout_success_url: String,

    /// URL checkout redirects to when abandoned
    #[serde(default = "default_cancel_url")]
    pub checkout_cancel_url: String,

    /// Trial length in days
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,

    /// Fallback billing period length when an event carries no boundary
    #[serde(default = "default_period_days")]
    pub default_period_days: u32,

    /// Past-due grace window in days
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,

    /// Seconds between reconciler cycles
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Records reconciled remotely per cycle
    #[serde(default = "default_reconcile_batch_limit")]
    pub reconcile_batch_limit: u32,

    /// A record untouched for this long becomes a reconciliation candidate
    #[serde(default = "default_stale_after")]
    pub reconcile_stale_after_secs: u32,

    /// Remote fetch attempts per user per cycle
    #[serde(default = "default_fetch_attempts")]
    pub reconcile_max_fetch_attempts: u32,

    /// Days processed event ids are retained for deduplication
    #[serde(default = "default_dedup_retention")]
    pub dedup_retention_days: u32,
}

impl BillingConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    /// Lifecycle policy derived from this configuration.
    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            trial_days: i64::from(self.trial_days),
            default_period_days: i64::from(self.default_period_days),
        }
    }

    /// Entitlement policy derived from this configuration.
    pub fn entitlement_policy(&self) -> EntitlementPolicy {
        EntitlementPolicy {
            grace_days: i64::from(self.grace_days),
        }
    }

    /// Reconciler schedule derived from this configuration.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval_secs: self.reconcile_interval_secs,
            batch_limit: self.reconcile_batch_limit,
            stale_after_secs: i64::from(self.reconcile_stale_after_secs),
            max_fetch_attempts: self.reconcile_max_fetch_attempts,
            base_backoff_secs: 1,
            dedup_retention_days: i64::from(self.dedup_retention_days),
        }
    }

    /// Stripe client configuration derived from this configuration.
    pub fn stripe_config(&self) -> StripeConfig {
        let mut config = StripeConfig::new(
            self.stripe_api_key.clone(),
            self.standard_price_id.clone(),
            self.premium_price_id.clone(),
        );
        config.checkout_success_url = self.checkout_success_url.clone();
        config.checkout_cancel_url = self.checkout_cancel_url.clone();
        config.trial_days = self.trial_days;
        config
    }

    /// Validate billing configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_WEBHOOK_SECRET"));
        }
        if !self.stripe_api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }
        if self.standard_price_id.is_empty() {
            return Err(ValidationError::MissingRequired("STANDARD_PRICE_ID"));
        }
        if self.premium_price_id.is_empty() {
            return Err(ValidationError::MissingRequired("PREMIUM_PRICE_ID"));
        }
        if self.trial_days == 0 || self.trial_days > 90 {
            return Err(ValidationError::InvalidTrialLength);
        }
        if self.grace_days == 0 || self.grace_days > 30 {
            return Err(ValidationError::InvalidGraceWindow);
        }
        if self.reconcile_interval_secs < 60 {
            return Err(ValidationError::InvalidReconcileInterval);
        }
        if self.dedup_retention_days < 3 {
            return Err(ValidationError::InvalidDedupRetention);
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            stripe_webhook_secret: String::new(),
            standard_price_id: String::new(),
            premium_price_id: String::new(),
            checkout_success_url: default_success_url(),
            checkout_cancel_url: default_cancel_url(),
            trial_days: default_trial_days(),
            default_period_days: default_period_days(),
            grace_days: default_grace_days(),
            reconcile_interval_secs: default_reconcile_interval(),
            reconcile_batch_limit: default_reconcile_batch_limit(),
            reconcile_stale_after_secs: default_stale_after(),
            reconcile_max_fetch_attempts: default_fetch_attempts(),
            dedup_retention_days: default_dedup_retention(),
        }
    }
}

fn default_success_url() -> String {
    "https://app.attuned.example/billing/success".to_string()
}

fn default_cancel_url() -> String {
    "https://app.attuned.example/billing/canceled".to_string()
}

fn default_trial_days() -> u32 {
    14
}

fn default_period_days() -> u32 {
    30
}

fn default_grace_days() -> u32 {
    7
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_reconcile_batch_limit() -> u32 {
    100
}

fn default_stale_after() -> u32 {
    6 * 3600
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_dedup_retention() -> u32 {
    30
}
