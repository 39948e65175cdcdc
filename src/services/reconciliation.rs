//! Payment completion reconciliation.
//!
//! A signed `checkout.session.completed` delivery whose payment is settled is
//! turned into purchase records and inventory debits. Sessions completed
//! with a delayed payment method are fulfilled on the later
//! `checkout.session.async_payment_succeeded` event.
//!
//! Deliveries are at-least-once, so every step after the metadata has been
//! parsed is safe to repeat:
//!
//! * each line runs in its own short transaction that claims the
//!   `(checkout_session_id, line_index)` key by inserting the purchase record,
//!   debits stock with a conditional update and attaches the guest contact;
//!   a redelivery skips lines whose key already exists;
//! * once every line is applied the session is written to
//!   `processed_checkout_sessions` and later deliveries are acknowledged as
//!   duplicates without touching anything.
//!
//! A failing line aborts the remaining lines of that delivery. Lines applied
//! before it stay applied; the provider's retry resumes at the failed line.

use crate::{
    db::is_unique_violation,
    entities::{guest_contact, processed_checkout, user},
    errors::{PurchaseStage, ServiceError},
    events::{Event, EventSender},
    money,
    notifications::{ConfirmationLine, EmailDispatcher, OrderConfirmation},
    payments::{CheckoutLineItem, CheckoutMetadata, Customer, GuestContact},
    services::{
        baskets::BasketService,
        coupons::{self, CouponService},
        inventory,
        purchases::{self, NewPurchase},
    },
    webhooks::{self, WebhookEnvelope},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Result of one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Processed {
        session_id: String,
        order_number: String,
        purchase_ids: Vec<i64>,
    },
    Duplicate {
        session_id: String,
    },
    /// Completed session whose funds are not settled yet; fulfilled on the
    /// later async payment success event.
    AwaitingPayment {
        session_id: String,
        payment_status: Option<String>,
    },
    Ignored {
        event_type: String,
    },
}

struct AppliedLine {
    purchase_id: i64,
    remaining: Option<i32>,
}

#[derive(Clone)]
pub struct Reconciler {
    db: Arc<DatabaseConnection>,
    baskets: BasketService,
    coupons: CouponService,
    email: Arc<dyn EmailDispatcher>,
    event_sender: Arc<EventSender>,
    webhook_secret: String,
    tolerance_secs: u64,
}

impl Reconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        baskets: BasketService,
        coupons: CouponService,
        email: Arc<dyn EmailDispatcher>,
        event_sender: Arc<EventSender>,
        webhook_secret: String,
        tolerance_secs: u64,
    ) -> Self {
        Self {
            db,
            baskets,
            coupons,
            email,
            event_sender,
            webhook_secret,
            tolerance_secs,
        }
    }

    /// Verifies and applies one webhook delivery.
    #[instrument(skip(self, payload, signature), fields(bytes = payload.len()))]
    pub async fn reconcile(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let signature =
            signature.ok_or_else(|| ServiceError::Unauthorized("Missing signature".to_string()))?;
        webhooks::verify(
            signature,
            payload,
            &self.webhook_secret,
            self.tolerance_secs,
            Utc::now().timestamp(),
        )
        .map_err(|e| {
            counter!("recordstore_webhooks.rejected", 1);
            warn!("Webhook signature verification failed: {}", e);
            ServiceError::Unauthorized(e.to_string())
        })?;
        debug!("signature verified");

        let envelope: WebhookEnvelope = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("Invalid webhook payload: {}", e)))?;

        if !envelope.is_checkout_settlement() {
            debug!(event_type = %envelope.event_type, "ignoring webhook event");
            counter!("recordstore_webhooks.ignored", 1);
            return Ok(ReconcileOutcome::Ignored {
                event_type: envelope.event_type,
            });
        }

        let result = self.apply_checkout(&envelope).await;
        match &result {
            Ok(ReconcileOutcome::Duplicate { .. }) => {
                counter!("recordstore_webhooks.duplicate", 1)
            }
            Ok(ReconcileOutcome::AwaitingPayment { .. }) => {
                counter!("recordstore_webhooks.awaiting_payment", 1)
            }
            Ok(_) => counter!("recordstore_webhooks.processed", 1),
            Err(e) => {
                counter!("recordstore_webhooks.failed", 1);
                error!(event_id = %envelope.id, error = ?e, "Checkout reconciliation failed");
            }
        }
        result
    }

    async fn apply_checkout(
        &self,
        envelope: &WebhookEnvelope,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let session = envelope.checkout_session().map_err(|e| {
            ServiceError::purchase_processing(
                PurchaseStage::Metadata,
                None,
                ServiceError::ValidationError(format!("Invalid checkout session: {}", e)),
            )
        })?;
        let session_id = session.id.clone();

        if processed_checkout::Entity::find_by_id(session_id.clone())
            .one(&*self.db)
            .await?
            .is_some()
        {
            info!(session_id = %session_id, "checkout session already processed");
            return Ok(ReconcileOutcome::Duplicate { session_id });
        }

        if !session.is_paid() {
            info!(
                session_id = %session_id,
                payment_status = ?session.payment_status,
                "checkout session not paid yet, waiting for settlement"
            );
            return Ok(ReconcileOutcome::AwaitingPayment {
                session_id,
                payment_status: session.payment_status,
            });
        }

        let metadata = CheckoutMetadata::decode(&session.metadata)
            .map_err(|e| ServiceError::purchase_processing(PurchaseStage::Metadata, None, e))?;
        let buyer = match metadata.customer {
            Customer::Registered { user_id } => Some(
                user::Entity::find_by_id(user_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::purchase_processing(
                            PurchaseStage::Metadata,
                            None,
                            ServiceError::NotFound(format!("User {} not found", user_id)),
                        )
                    })?,
            ),
            Customer::Guest { .. } => None,
        };
        info!(
            session_id = %session_id,
            lines = metadata.items.len(),
            is_guest = metadata.is_guest(),
            "checkout metadata parsed"
        );

        let mut purchase_ids = Vec::with_capacity(metadata.items.len());
        for (index, item) in metadata.items.iter().enumerate() {
            let applied = self
                .apply_line(&session_id, index, item, &metadata)
                .await
                .map_err(|e| {
                    ServiceError::purchase_processing(
                        PurchaseStage::Items,
                        Some(item.record_id),
                        e,
                    )
                })?;
            if let Some(remaining) = applied.remaining {
                self.event_sender
                    .send_or_log(Event::InventoryChanged {
                        record_id: item.record_id,
                        quantity: remaining,
                    })
                    .await;
            }
            purchase_ids.push(applied.purchase_id);
        }
        info!(session_id = %session_id, "checkout lines applied");

        if let Some(coupon) = &metadata.coupon {
            // Payment is captured by now; a reused coupon is flagged, not refused.
            if !coupons::mark_used(&*self.db, &coupon.code).await? {
                counter!("recordstore_coupons.reuse_detected", 1);
                warn!(
                    session_id = %session_id,
                    code = %coupon.code,
                    "coupon was already used or no longer exists"
                );
            }
        }

        let order_number = generate_order_number();
        let line_count = i32::try_from(metadata.items.len()).unwrap_or(i32::MAX);
        let marker = processed_checkout::ActiveModel {
            session_id: Set(session_id.clone()),
            event_id: Set(envelope.id.clone()),
            order_number: Set(order_number.clone()),
            line_count: Set(line_count),
            processed_at: Set(Utc::now()),
        };
        if let Err(e) = marker.insert(&*self.db).await {
            if is_unique_violation(&e) {
                info!(session_id = %session_id, "checkout session completed by a concurrent delivery");
                return Ok(ReconcileOutcome::Duplicate { session_id });
            }
            return Err(e.into());
        }

        self.send_confirmation(&order_number, &metadata, buyer.as_ref())
            .await;

        if let Some(buyer) = &buyer {
            let record_ids = metadata.items.iter().map(|i| i.record_id).collect();
            match self.baskets.remove_purchased(buyer.id, record_ids).await {
                Ok(removed) => debug!(user_id = buyer.id, removed, "purchased lines removed from basket"),
                Err(e) => warn!(user_id = buyer.id, error = %e, "Failed to tidy basket after checkout"),
            }
            if let Err(e) = self.coupons.evaluate(buyer.id).await {
                warn!(user_id = buyer.id, error = %e, "Coupon evaluation failed");
            }
        }

        self.event_sender
            .send_or_log(Event::CheckoutReconciled {
                session_id: session_id.clone(),
                order_number: order_number.clone(),
                purchase_ids: purchase_ids.clone(),
            })
            .await;

        info!(session_id = %session_id, order_number = %order_number, "Checkout session reconciled");
        Ok(ReconcileOutcome::Processed {
            session_id,
            order_number,
            purchase_ids,
        })
    }

    /// Applies one line at most once.
    async fn apply_line(
        &self,
        session_id: &str,
        index: usize,
        item: &CheckoutLineItem,
        metadata: &CheckoutMetadata,
    ) -> Result<AppliedLine, ServiceError> {
        let line_index = i32::try_from(index)
            .map_err(|_| ServiceError::ValidationError("Too many checkout lines".to_string()))?;

        let txn = self.db.begin().await?;
        if let Some(existing) = purchases::find_line(&txn, session_id, line_index).await? {
            debug!(line_index, "line already applied");
            return Ok(AppliedLine {
                purchase_id: existing.id,
                remaining: None,
            });
        }

        inventory::ensure_available(&txn, item.record_id, item.quantity).await?;

        let inserted = purchases::record_purchase(
            &txn,
            NewPurchase {
                checkout_session_id: session_id.to_string(),
                line_index,
                user_id: metadata.user_id(),
                is_guest: metadata.is_guest(),
                record_id: item.record_id,
                quantity: item.quantity,
                unit_price_cents: item.charged_unit_price(),
            },
        )
        .await;
        let purchase = match inserted {
            Ok(purchase) => purchase,
            Err(e) if is_unique_violation(&e) => {
                drop(txn);
                let existing = purchases::find_line(&*self.db, session_id, line_index)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::ConcurrentModification(format!(
                            "Line {} of {} is being applied concurrently",
                            line_index, session_id
                        ))
                    })?;
                return Ok(AppliedLine {
                    purchase_id: existing.id,
                    remaining: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let remaining = inventory::reserve(&txn, item.record_id, item.quantity).await?;

        if let Some(contact) = metadata.guest_contact() {
            guest_contact_model(purchase.id, contact).insert(&txn).await?;
        }

        txn.commit().await?;
        debug!(line_index, purchase_id = purchase.id, remaining, "line applied");
        Ok(AppliedLine {
            purchase_id: purchase.id,
            remaining: Some(remaining),
        })
    }

    async fn send_confirmation(
        &self,
        order_number: &str,
        metadata: &CheckoutMetadata,
        buyer: Option<&user::Model>,
    ) {
        let (recipient_email, recipient_name) = match (buyer, metadata.guest_contact()) {
            (Some(user), _) => (user.email.clone(), Some(user.username.clone())),
            (None, Some(contact)) => (contact.email.clone(), Some(contact.full_name())),
            (None, None) => {
                debug!(order_number, "guest order without contact details, no confirmation sent");
                return;
            }
        };

        let lines: Vec<ConfirmationLine> = metadata
            .items
            .iter()
            .map(|item| {
                let unit = item.charged_unit_price();
                ConfirmationLine {
                    title: item.title.clone(),
                    artist: item.artist.clone(),
                    quantity: item.quantity,
                    unit_price: money::from_minor_units(unit),
                    line_total: money::from_minor_units(unit.saturating_mul(i64::from(item.quantity))),
                }
            })
            .collect();
        let total = lines.iter().map(|l| l.line_total).sum();

        let confirmation = OrderConfirmation {
            order_number: order_number.to_string(),
            recipient_email,
            recipient_name,
            is_guest: metadata.is_guest(),
            lines,
            total,
        };

        if let Err(e) = self.email.send_order_confirmation(confirmation).await {
            counter!("recordstore_notifications.failed", 1);
            warn!(order_number, error = %e, "Order confirmation not sent");
        }
    }
}

fn guest_contact_model(purchase_record_id: i64, contact: &GuestContact) -> guest_contact::ActiveModel {
    guest_contact::ActiveModel {
        purchase_record_id: Set(purchase_record_id),
        first_name: Set(contact.first_name.trim().to_string()),
        last_name: Set(contact.last_name.trim().to_string()),
        email: Set(contact.email.trim().to_string()),
        address: Set(contact.address.clone()),
        postal_code: Set(contact.postal_code.clone()),
        city: Set(contact.city.clone()),
        region: Set(contact.region.clone()),
        country: Set(contact.country.clone()),
        phone: Set(contact.phone.clone()),
        ..Default::default()
    }
}

/// `ORD-` followed by eight upper-case hex digits.
pub fn generate_order_number() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", simple[..8].to_ascii_uppercase())
}
