use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted by the basket, inventory and checkout services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    InventoryChanged {
        record_id: i64,
        quantity: i32,
    },
    BasketUpdated {
        user_id: i64,
        record_id: i64,
        quantity: i32,
    },
    BasketCleared(i64),
    CheckoutSessionCreated {
        session_id: String,
        is_guest: bool,
    },
    CheckoutReconciled {
        session_id: String,
        order_number: String,
        purchase_ids: Vec<i64>,
    },
    CouponIssued {
        user_id: i64,
        code: String,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::InventoryChanged {
                record_id,
                quantity,
            } => {
                info!(record_id, quantity, "inventory changed");
            }
            Event::CheckoutReconciled {
                session_id,
                order_number,
                purchase_ids,
            } => {
                info!(
                    session_id = %session_id,
                    order_number = %order_number,
                    purchases = purchase_ids.len(),
                    "checkout reconciled"
                );
            }
            Event::CouponIssued { user_id, code } => {
                info!(user_id, code = %code, "coupon issued");
            }
            other => debug!("Received event: {:?}", other),
        }
    }

    info!("Event processing loop stopped");
}
