pub mod metadata;
pub mod mock;
pub mod stripe;

use crate::{config::AppConfig, errors::ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::info;

pub use metadata::{AppliedCoupon, CheckoutLineItem, CheckoutMetadata, Customer, GuestContact};
pub use mock::MockGateway;
pub use stripe::{StripeConfig, StripeGateway};

/// Placeholder the provider substitutes with the real session id in the return URL.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// A line as the payment provider displays and charges it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLineItem {
    pub name: String,
    pub description: String,
    /// Minor currency units
    pub unit_amount: i64,
    pub quantity: i32,
}

/// Provider-agnostic request to open a hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutIntent {
    pub currency: String,
    pub return_url: String,
    pub line_items: Vec<ProviderLineItem>,
    pub metadata: BTreeMap<String, String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
    Unknown,
}

impl SessionStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "open" => SessionStatus::Open,
            "complete" => SessionStatus::Complete,
            "expired" => SessionStatus::Expired,
            _ => SessionStatus::Unknown,
        }
    }
}

/// Hosted payment provider.
///
/// Implementations report every provider-side failure as
/// `ServiceError::ProcessingError` and never retry on their own.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        intent: CheckoutIntent,
    ) -> Result<CreatedSession, ServiceError>;

    async fn session_status(&self, session_id: String) -> Result<SessionStatus, ServiceError>;
}

/// Builds the gateway selected by `payment_provider`.
pub fn gateway_from_config(cfg: &AppConfig) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
    if cfg.uses_stripe() {
        let secret_key = cfg
            .stripe_secret_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::InternalError("Stripe secret key is not configured".to_string())
            })?;
        info!("Using Stripe payment gateway at {}", cfg.stripe_api_base);
        Ok(Arc::new(StripeGateway::new(StripeConfig {
            secret_key,
            api_base: cfg.stripe_api_base.clone(),
        })?))
    } else {
        info!("Using mock payment gateway");
        Ok(Arc::new(MockGateway::default()))
    }
}
