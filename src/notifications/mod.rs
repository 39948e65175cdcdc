use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

/// One purchased line as shown to the customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationLine {
    pub title: String,
    pub artist: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Order confirmation sent once a checkout has been reconciled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub is_guest: bool,
    pub lines: Vec<ConfirmationLine>,
    pub total: Decimal,
}

impl OrderConfirmation {
    pub fn subject(&self) -> String {
        format!("Your order {} is confirmed", self.order_number)
    }

    /// Plain text body
    pub fn body(&self) -> String {
        let greeting = match &self.recipient_name {
            Some(name) if !name.is_empty() => format!("Hi {},", name),
            _ => "Hi,".to_string(),
        };
        let mut body = format!(
            "{}\n\nThank you for your order {}.\n\n",
            greeting, self.order_number
        );
        for line in &self.lines {
            body.push_str(&format!(
                "{} x {} - {} @ {} = {}\n",
                line.quantity, line.title, line.artist, line.unit_price, line.line_total
            ));
        }
        body.push_str(&format!("\nTotal: {}\n", self.total));
        body
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Failed to send email to {recipient}: {reason}")]
    SendFailed { recipient: String, reason: String },
}

/// Outbound email. Delivery failures are reported, never retried here.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

/// Writes confirmations to the log instead of sending them
#[derive(Debug, Default, Clone)]
pub struct LogEmailDispatcher;

#[async_trait]
impl EmailDispatcher for LogEmailDispatcher {
    #[instrument(skip(self, confirmation), fields(order = %confirmation.order_number))]
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        if !confirmation.recipient_email.contains('@') {
            return Err(NotificationError::SendFailed {
                recipient: confirmation.recipient_email.clone(),
                reason: "invalid address".to_string(),
            });
        }
        info!(
            to = %confirmation.recipient_email,
            subject = %confirmation.subject(),
            "{}",
            confirmation.body()
        );
        Ok(())
    }
}
