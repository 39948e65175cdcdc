use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_PAYMENT_PROVIDER: &str = "mock";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;
const DEFAULT_CURRENCY: &str = "eur";
const DEFAULT_MAX_CHECKOUT_ITEMS: usize = 10;
const DEFAULT_COUPON_WINDOW_DAYS: i64 = 30;
const DEFAULT_COUPON_REQUIRED_PURCHASES: u64 = 3;
const DEFAULT_COUPON_DISCOUNT_PERCENTAGE: u32 = 30;
const DEFAULT_COUPON_CODE_PREFIX: &str = "SPIN";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Runtime environment name (development, staging, production)
    pub environment: String,

    /// Log level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma separated list of allowed CORS origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Payment provider backend: "stripe" or "mock"
    #[serde(default = "default_payment_provider")]
    #[validate(custom = "validate_payment_provider")]
    pub payment_provider: String,

    /// Secret API key used against the Stripe API
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Base URL of the Stripe API (overridable for tests)
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Shared secret for verifying inbound payment webhooks
    #[validate(length(min = 1))]
    pub payment_webhook_secret: String,

    /// Accepted clock skew for webhook signatures, in seconds
    #[serde(default = "default_webhook_tolerance_secs")]
    #[validate(range(min = 1))]
    pub payment_webhook_tolerance_secs: i64,

    /// ISO currency code sent to the payment provider
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Maximum number of line items accepted in one checkout session
    #[serde(default = "default_max_checkout_items")]
    #[validate(range(min = 1, max = 100))]
    pub max_checkout_items: usize,

    /// Trailing window for the frequent shopper coupon
    #[serde(default = "default_coupon_window_days")]
    #[validate(range(min = 1))]
    pub coupon_purchase_window_days: i64,

    /// Purchases within the window that earn a coupon
    #[serde(default = "default_coupon_required_purchases")]
    #[validate(range(min = 1))]
    pub coupon_required_purchases: u64,

    #[serde(default = "default_coupon_discount_percentage")]
    #[validate(range(min = 1, max = 100))]
    pub coupon_discount_percentage: u32,

    #[serde(default = "default_coupon_code_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub coupon_code_prefix: String,
}

impl AppConfig {
    /// Creates a new configuration
    pub fn new(
        database_url: String,
        payment_webhook_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            payment_provider: default_payment_provider(),
            stripe_secret_key: None,
            stripe_api_base: default_stripe_api_base(),
            payment_webhook_secret,
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            currency: default_currency(),
            max_checkout_items: default_max_checkout_items(),
            coupon_purchase_window_days: default_coupon_window_days(),
            coupon_required_purchases: default_coupon_required_purchases(),
            coupon_discount_percentage: default_coupon_discount_percentage(),
            coupon_code_prefix: default_coupon_code_prefix(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Returns the configured CORS origins, trimmed and without empties
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn uses_stripe(&self) -> bool {
        self.payment_provider.eq_ignore_ascii_case("stripe")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.uses_stripe()
            && self
                .stripe_secret_key
                .as_deref()
                .map_or(true, |key| key.trim().is_empty())
        {
            let mut err = ValidationError::new("stripe_secret_key_required");
            err.message =
                Some("Set APP__STRIPE_SECRET_KEY when payment_provider is \"stripe\"".into());
            errors.add("stripe_secret_key", err);
        }

        if self.is_production() && !self.uses_stripe() {
            let mut err = ValidationError::new("mock_provider_in_production");
            err.message = Some("The mock payment provider must not be used in production".into());
            errors.add("payment_provider", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_payment_provider() -> String {
    DEFAULT_PAYMENT_PROVIDER.to_string()
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_webhook_tolerance_secs() -> i64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_max_checkout_items() -> usize {
    DEFAULT_MAX_CHECKOUT_ITEMS
}

fn default_coupon_window_days() -> i64 {
    DEFAULT_COUPON_WINDOW_DAYS
}

fn default_coupon_required_purchases() -> u64 {
    DEFAULT_COUPON_REQUIRED_PURCHASES
}

fn default_coupon_discount_percentage() -> u32 {
    DEFAULT_COUPON_DISCOUNT_PERCENTAGE
}

fn default_coupon_code_prefix() -> String {
    DEFAULT_COUPON_CODE_PREFIX.to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_payment_provider(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "stripe" | "mock" => Ok(()),
        _ => {
            let mut err = ValidationError::new("payment_provider");
            err.message = Some("Must be one of: stripe, mock".into());
            Err(err)
        }
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("recordstore_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables prefixed with `APP__`
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // payment_webhook_secret has no default and must come from a file or APP__PAYMENT_WEBHOOK_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://recordstore.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("payment_webhook_secret").is_err() {
        error!("Webhook secret is not configured. Set APP__PAYMENT_WEBHOOK_SECRET to the signing secret of your payment provider.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "payment_webhook_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "whsec_test".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.max_checkout_items, 10);
        assert_eq!(cfg.payment_webhook_tolerance_secs, 300);
    }

    #[test]
    fn stripe_provider_requires_secret_key() {
        let mut cfg = base_config();
        cfg.payment_provider = "stripe".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.stripe_secret_key = Some("sk_test_123".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_rejects_mock_provider() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn rejects_unknown_log_level_and_empty_secret() {
        let mut cfg = base_config();
        cfg.log_level = "loud".into();
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.payment_webhook_secret = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn coupon_percentage_is_bounded() {
        let mut cfg = base_config();
        cfg.coupon_discount_percentage = 0;
        assert!(cfg.validate().is_err());
        cfg.coupon_discount_percentage = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn event_channel_needs_capacity() {
        let mut cfg = base_config();
        cfg.event_channel_capacity = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("event_channel_capacity"));

        cfg.event_channel_capacity = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn cors_origins_are_trimmed() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some(" https://a.test, ,https://b.test ".into());
        assert_eq!(cfg.cors_origins(), vec!["https://a.test", "https://b.test"]);
    }
}
