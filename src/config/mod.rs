//! Application configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Configuration is loaded with the
//! `ATTUNED` prefix and nested values use double underscores as
//! separators.
//!
//! # Example
//!
//! ```no_run
//! use attuned::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod database;
mod error;
mod server;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Billing configuration (Stripe, lifecycle policy, reconciler)
    pub billing: BillingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Environment Variable Format
    ///
    /// - `ATTUNED__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `ATTUNED__DATABASE__URL=...` -> `database.url = ...`
    /// - `ATTUNED__BILLING__STRIPE_API_KEY=...` -> `billing.stripe_api_key = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("ATTUNED")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.billing.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgresql://attuned@localhost/attuned".to_string(),
                ..Default::default()
            },
            billing: BillingConfig {
                stripe_api_key: "sk_test_abc".to_string(),
                stripe_webhook_secret: "whsec_xyz".to_string(),
                standard_price_id: "price_standard".to_string(),
                premium_price_id: "price_premium".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn full_config_validates() {
        assert!(valid().validate().is_ok());
        assert!(!valid().is_production());
    }

    #[test]
    fn validation_surfaces_section_errors() {
        let mut config = valid();
        config.billing.stripe_webhook_secret = String::new();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.database.url = String::new();
        assert!(config.validate().is_err());
    }
}
