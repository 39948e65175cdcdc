//! Checkout session initiation: turns the client's basket snapshot into a
//! hosted payment session whose metadata carries the whole order.

use crate::{
    config::AppConfig,
    entities::{record, user},
    errors::ServiceError,
    events::{Event, EventSender},
    money,
    payments::{
        AppliedCoupon, CheckoutIntent, CheckoutLineItem, CheckoutMetadata, CreatedSession,
        Customer, GuestContact, PaymentGateway, ProviderLineItem, SessionStatus,
        SESSION_ID_PLACEHOLDER,
    },
    services::{coupons::CouponService, inventory},
};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{info, instrument, warn};
use validator::Validate;

fn default_is_guest() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItemInput {
    pub record_id: i64,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub condition: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    /// Display hint only; charged prices come from the catalog and the coupon.
    #[serde(default)]
    pub discounted_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutFlags {
    #[serde(default = "default_is_guest")]
    pub is_guest: bool,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl Default for CheckoutFlags {
    fn default() -> Self {
        Self {
            is_guest: true,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[validate(length(min = 1, message = "Checkout must contain at least one item"))]
    pub items: Vec<CheckoutItemInput>,
    #[serde(default)]
    pub metadata: CheckoutFlags,
    #[serde(default)]
    pub guest_details: Option<GuestContact>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    coupons: CouponService,
    event_sender: Arc<EventSender>,
    currency: String,
    max_items: usize,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponService,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            coupons,
            event_sender,
            currency: config.currency.clone(),
            max_items: config.max_checkout_items,
        }
    }

    /// Validates the order, pre-checks stock and opens a provider session.
    ///
    /// Nothing is reserved here; stock is taken once the payment completes.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create_session(
        &self,
        origin: &str,
        request: CreateCheckoutRequest,
    ) -> Result<CreatedSession, ServiceError> {
        request.validate()?;
        if request.items.len() > self.max_items {
            return Err(ServiceError::ValidationError(format!(
                "A checkout may contain at most {} items",
                self.max_items
            )));
        }
        let return_url = return_url_for(origin)?;

        let (customer, customer_email) = self.resolve_customer(&request).await?;
        let coupon = self
            .resolve_coupon(request.coupon_code.as_deref(), &customer)
            .await?;

        let catalog = self.precheck_stock(&request.items).await?;

        let mut items = Vec::with_capacity(request.items.len());
        for input in &request.items {
            let record = catalog.get(&input.record_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Record {} not found", input.record_id))
            })?;
            let unit_price = record.price_cents;
            if money::to_minor_units(input.unit_price).ok() != Some(unit_price) {
                warn!(
                    record_id = record.id,
                    submitted = %input.unit_price,
                    price_cents = unit_price,
                    "Submitted price differs from catalog, charging catalog price"
                );
            }
            let discounted_price = match &coupon {
                Some(c) => Some(money::apply_discount(unit_price, c.discount_percentage)?),
                None => None,
            };
            items.push(CheckoutLineItem {
                record_id: input.record_id,
                title: input.title.trim().to_string(),
                artist: input.artist.trim().to_string(),
                condition: input.condition.trim().to_string(),
                quantity: input.quantity,
                unit_price,
                discounted_price,
            });
        }

        let metadata = CheckoutMetadata {
            items,
            customer,
            coupon,
        };
        metadata.validate()?;

        let line_items = metadata
            .items
            .iter()
            .map(|item| ProviderLineItem {
                name: item.title.clone(),
                description: describe(item),
                unit_amount: item.charged_unit_price(),
                quantity: item.quantity,
            })
            .collect();

        let intent = CheckoutIntent {
            currency: self.currency.clone(),
            return_url,
            line_items,
            metadata: metadata.encode()?,
            customer_email,
        };

        let session = self.gateway.create_checkout_session(intent).await?;

        counter!("recordstore_checkout.sessions_created", 1);
        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                session_id: session.session_id.clone(),
                is_guest: metadata.is_guest(),
            })
            .await;

        info!(
            session_id = %session.session_id,
            is_guest = metadata.is_guest(),
            "Checkout session opened"
        );
        Ok(session)
    }

    /// Whether the provider reports the session as complete. Provider
    /// failures count as not complete.
    #[instrument(skip(self))]
    pub async fn verify_session(&self, session_id: &str) -> bool {
        match self.gateway.session_status(session_id.to_string()).await {
            Ok(status) => status == SessionStatus::Complete,
            Err(e) => {
                warn!(session_id, error = %e, "Session verification failed");
                false
            }
        }
    }

    async fn resolve_customer(
        &self,
        request: &CreateCheckoutRequest,
    ) -> Result<(Customer, Option<String>), ServiceError> {
        if request.metadata.is_guest {
            let contact = request.guest_details.clone();
            let email = contact
                .as_ref()
                .map(|c| c.email.trim().to_string())
                .filter(|e| !e.is_empty());
            return Ok((Customer::Guest { contact }, email));
        }

        let user_id = request.metadata.user_id.ok_or_else(|| {
            ServiceError::ValidationError("User id is required for registered checkouts".to_string())
        })?;
        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        Ok((Customer::Registered { user_id }, Some(user.email)))
    }

    async fn resolve_coupon(
        &self,
        code: Option<&str>,
        customer: &Customer,
    ) -> Result<Option<AppliedCoupon>, ServiceError> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        let coupon = self
            .coupons
            .validate(code)
            .await?
            .ok_or_else(|| ServiceError::ValidationError("Invalid or expired coupon".to_string()))?;

        if let Customer::Registered { user_id } = customer {
            if coupon.user_id != *user_id {
                return Err(ServiceError::ValidationError(
                    "Coupon does not belong to this user".to_string(),
                ));
            }
        }

        Ok(Some(AppliedCoupon {
            code: coupon.code,
            discount_percentage: u32::try_from(coupon.discount_percentage).unwrap_or(0),
        }))
    }

    /// Early rejection against live stock; lines of the same record are summed.
    /// Returns the catalog rows the order is priced from.
    async fn precheck_stock(
        &self,
        items: &[CheckoutItemInput],
    ) -> Result<BTreeMap<i64, record::Model>, ServiceError> {
        let mut wanted: BTreeMap<i64, i32> = BTreeMap::new();
        for item in items {
            let total = wanted.entry(item.record_id).or_default();
            *total = total.checked_add(item.quantity).ok_or_else(|| {
                ServiceError::ValidationError(format!("Quantity too large for '{}'", item.title))
            })?;
        }
        let mut catalog = BTreeMap::new();
        for (record_id, quantity) in wanted {
            let record = inventory::ensure_available(&*self.db, record_id, quantity).await?;
            catalog.insert(record_id, record);
        }
        Ok(catalog)
    }
}

fn describe(item: &CheckoutLineItem) -> String {
    match (item.artist.is_empty(), item.condition.is_empty()) {
        (false, false) => format!("{} - {}", item.artist, item.condition),
        (false, true) => item.artist.clone(),
        (true, false) => item.condition.clone(),
        (true, true) => item.title.clone(),
    }
}

fn return_url_for(origin: &str) -> Result<String, ServiceError> {
    let origin = origin.trim().trim_end_matches('/');
    if !(origin.starts_with("http://") || origin.starts_with("https://")) {
        return Err(ServiceError::ValidationError(format!(
            "Invalid origin '{}'",
            origin
        )));
    }
    Ok(format!(
        "{}/success?session_id={}",
        origin, SESSION_ID_PLACEHOLDER
    ))
}
