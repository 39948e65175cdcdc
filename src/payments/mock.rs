use super::{CheckoutIntent, CreatedSession, PaymentGateway, SessionStatus};
use crate::errors::ServiceError;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

pub const MOCK_SESSION_ID: &str = "mock_session_123";
pub const MOCK_CLIENT_SECRET: &str = "mock_client_secret_456";

/// In-process gateway for development and tests.
///
/// Hands out a fixed session, remembers every intent it was given and reports
/// whatever status it was told to.
pub struct MockGateway {
    intents: Mutex<Vec<CheckoutIntent>>,
    status: Mutex<SessionStatus>,
    failure: Mutex<Option<String>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            intents: Mutex::new(Vec::new()),
            status: Mutex::new(SessionStatus::Complete),
            failure: Mutex::new(None),
        }
    }
}

impl MockGateway {
    pub async fn intents(&self) -> Vec<CheckoutIntent> {
        self.intents.lock().await.clone()
    }

    pub async fn set_status(&self, status: SessionStatus) {
        *self.status.lock().await = status;
    }

    /// Makes every following call fail with `message`; `None` heals it.
    pub async fn set_failure(&self, message: Option<String>) {
        *self.failure.lock().await = message;
    }

    async fn check_failure(&self) -> Result<(), ServiceError> {
        match self.failure.lock().await.as_ref() {
            Some(message) => Err(ServiceError::ProcessingError(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        intent: CheckoutIntent,
    ) -> Result<CreatedSession, ServiceError> {
        self.check_failure().await?;
        info!(
            lines = intent.line_items.len(),
            "Creating mock checkout session"
        );
        self.intents.lock().await.push(intent);
        Ok(CreatedSession {
            session_id: MOCK_SESSION_ID.to_string(),
            client_secret: MOCK_CLIENT_SECRET.to_string(),
        })
    }

    async fn session_status(&self, _session_id: String) -> Result<SessionStatus, ServiceError> {
        self.check_failure().await?;
        Ok(*self.status.lock().await)
    }
}
