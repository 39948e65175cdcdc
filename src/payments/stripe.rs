use super::{CheckoutIntent, CreatedSession, PaymentGateway, SessionStatus};
use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// e.g. `https://api.stripe.com`
    pub api_base: String,
}

/// Embedded Stripe Checkout over the REST API
#[derive(Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client error: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Stripe's bracketed form encoding of a checkout session.
    fn form_params(intent: &CheckoutIntent) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("ui_mode".to_string(), "embedded".to_string()),
            ("return_url".to_string(), intent.return_url.clone()),
        ];

        for (i, item) in intent.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            params.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
            params.push((
                format!("{}[price_data][currency]", prefix),
                intent.currency.clone(),
            ));
            params.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount.to_string(),
            ));
            params.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            params.push((
                format!("{}[price_data][product_data][description]", prefix),
                item.description.clone(),
            ));
        }

        for (key, value) in &intent.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        if let Some(email) = &intent.customer_email {
            params.push(("customer_email".to_string(), email.clone()));
        }

        params
    }

    async fn read_session(response: reqwest::Response) -> Result<CheckoutSessionResponse, ServiceError> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, body = %error_text, "Stripe API error");
            return Err(provider_failure());
        }

        response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Stripe response");
            provider_failure()
        })
    }
}

/// Provider details stay in the logs; callers only learn that the request failed.
fn provider_failure() -> ServiceError {
    ServiceError::ProcessingError("Payment provider request failed".to_string())
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, intent), fields(lines = intent.line_items.len()))]
    async fn create_checkout_session(
        &self,
        intent: CheckoutIntent,
    ) -> Result<CreatedSession, ServiceError> {
        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&Self::form_params(&intent))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Stripe request failed");
                provider_failure()
            })?;

        let session = Self::read_session(response).await?;
        let client_secret = session.client_secret.ok_or_else(|| {
            ServiceError::ProcessingError("Stripe session has no client secret".to_string())
        })?;

        info!("Checkout session created: {}", session.id);
        Ok(CreatedSession {
            session_id: session.id,
            client_secret,
        })
    }

    #[instrument(skip(self))]
    async fn session_status(&self, session_id: String) -> Result<SessionStatus, ServiceError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Stripe request failed");
                provider_failure()
            })?;

        let session = Self::read_session(response).await?;
        Ok(session
            .status
            .as_deref()
            .map_or(SessionStatus::Unknown, SessionStatus::from_provider))
    }
}
