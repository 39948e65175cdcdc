//! Order snapshot carried through the payment provider.
//!
//! The provider keeps nothing about the order except a flat string map, so
//! the line items, the customer and the applied coupon are flattened into it
//! when the session is opened and rebuilt when the completion webhook arrives.
//! Provider metadata values are capped at [`METADATA_VALUE_LIMIT`] characters;
//! longer values are split over `key`, `key_1`, `key_2`, ... with the number of
//! parts stored under `key_parts`.

use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const METADATA_VALUE_LIMIT: usize = 500;

const KEY_ITEMS: &str = "items";
const KEY_IS_GUEST: &str = "isGuest";
const KEY_USER_ID: &str = "userId";
const KEY_GUEST_DETAILS: &str = "guestDetails";
const KEY_COUPON_CODE: &str = "couponCode";
const KEY_COUPON_DISCOUNT: &str = "couponDiscount";

/// One purchased line; prices are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLineItem {
    pub record_id: i64,
    pub title: String,
    pub artist: String,
    pub condition: String,
    pub quantity: i32,
    pub unit_price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discounted_price: Option<i64>,
}

impl CheckoutLineItem {
    /// What the customer is charged per unit.
    pub fn charged_unit_price(&self) -> i64 {
        self.discounted_price.unwrap_or(self.unit_price)
    }
}

/// Contact details supplied by a guest at checkout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestContact {
    #[serde(default, alias = "fname")]
    pub first_name: String,
    #[serde(default, alias = "lname")]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, alias = "phonenum", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl GuestContact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Customer {
    Guest { contact: Option<GuestContact> },
    Registered { user_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount_percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub items: Vec<CheckoutLineItem>,
    pub customer: Customer,
    pub coupon: Option<AppliedCoupon>,
}

impl CheckoutMetadata {
    pub fn is_guest(&self) -> bool {
        matches!(self.customer, Customer::Guest { .. })
    }

    pub fn user_id(&self) -> Option<i64> {
        match self.customer {
            Customer::Registered { user_id } => Some(user_id),
            Customer::Guest { .. } => None,
        }
    }

    pub fn guest_contact(&self) -> Option<&GuestContact> {
        match &self.customer {
            Customer::Guest { contact } => contact.as_ref(),
            Customer::Registered { .. } => None,
        }
    }

    /// Shape and range checks shared by session creation and reconciliation.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.items.is_empty() {
            return Err(invalid("Checkout must contain at least one item"));
        }

        for item in &self.items {
            if item.record_id <= 0 {
                return Err(invalid(format!("Invalid record id {}", item.record_id)));
            }
            if item.title.trim().is_empty() {
                return Err(invalid(format!(
                    "Title is required for record {}",
                    item.record_id
                )));
            }
            if item.quantity <= 0 {
                return Err(invalid(format!(
                    "Quantity must be greater than 0 for '{}'",
                    item.title
                )));
            }
            if item.unit_price <= 0 {
                return Err(invalid(format!("Price must be positive for '{}'", item.title)));
            }
            if let Some(discounted) = item.discounted_price {
                if discounted <= 0 || discounted > item.unit_price {
                    return Err(invalid(format!(
                        "Discounted price of '{}' must be between 1 and the unit price",
                        item.title
                    )));
                }
            }
        }

        match &self.customer {
            Customer::Registered { user_id } if *user_id <= 0 => {
                return Err(invalid(format!("Invalid user id {}", user_id)));
            }
            Customer::Guest {
                contact: Some(contact),
            } if !contact.email.contains('@') => {
                return Err(invalid("Guest email is required"));
            }
            _ => {}
        }

        if let Some(coupon) = &self.coupon {
            if coupon.code.trim().is_empty() {
                return Err(invalid("Coupon code must not be empty"));
            }
            if coupon.discount_percentage > 100 {
                return Err(invalid("Coupon discount must be between 0 and 100"));
            }
        }

        Ok(())
    }

    /// Flattens the snapshot into provider metadata.
    pub fn encode(&self) -> Result<BTreeMap<String, String>, ServiceError> {
        let mut map = BTreeMap::new();
        put_chunked(&mut map, KEY_ITEMS, serde_json::to_string(&self.items)?);

        match &self.customer {
            Customer::Guest { contact } => {
                map.insert(KEY_IS_GUEST.to_string(), "true".to_string());
                if let Some(contact) = contact {
                    put_chunked(&mut map, KEY_GUEST_DETAILS, serde_json::to_string(contact)?);
                }
            }
            Customer::Registered { user_id } => {
                map.insert(KEY_IS_GUEST.to_string(), "false".to_string());
                map.insert(KEY_USER_ID.to_string(), user_id.to_string());
            }
        }

        if let Some(coupon) = &self.coupon {
            map.insert(KEY_COUPON_CODE.to_string(), coupon.code.clone());
            map.insert(
                KEY_COUPON_DISCOUNT.to_string(),
                coupon.discount_percentage.to_string(),
            );
        }

        Ok(map)
    }

    /// Rebuilds and validates the snapshot from provider metadata.
    ///
    /// A missing `isGuest` means guest; only `false`, `0` and `no` select a
    /// registered customer, who must then carry a `userId`.
    pub fn decode(map: &BTreeMap<String, String>) -> Result<Self, ServiceError> {
        let items_json = take_chunked(map, KEY_ITEMS)?
            .ok_or_else(|| invalid("Checkout metadata has no items"))?;
        let items: Vec<CheckoutLineItem> = serde_json::from_str(&items_json)
            .map_err(|e| invalid(format!("Malformed items metadata: {}", e)))?;

        let is_guest = map
            .get(KEY_IS_GUEST)
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        let customer = if is_guest {
            let contact = match take_chunked(map, KEY_GUEST_DETAILS)? {
                Some(raw) if !raw.trim().is_empty() => Some(
                    serde_json::from_str::<GuestContact>(&raw)
                        .map_err(|e| invalid(format!("Malformed guest details: {}", e)))?,
                ),
                _ => None,
            };
            Customer::Guest { contact }
        } else {
            let raw = map
                .get(KEY_USER_ID)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| invalid("User id is required for registered checkouts"))?;
            let user_id = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid(format!("Invalid user id '{}'", raw)))?;
            Customer::Registered { user_id }
        };

        let coupon = match map.get(KEY_COUPON_CODE).filter(|c| !c.trim().is_empty()) {
            Some(code) => {
                let discount_percentage = map
                    .get(KEY_COUPON_DISCOUNT)
                    .ok_or_else(|| invalid("Coupon discount is missing"))?
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| invalid("Coupon discount must be between 0 and 100"))?;
                Some(AppliedCoupon {
                    code: code.trim().to_string(),
                    discount_percentage,
                })
            }
            None => None,
        };

        let metadata = Self {
            items,
            customer,
            coupon,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::ValidationError(message.into())
}

fn put_chunked(map: &mut BTreeMap<String, String>, key: &str, value: String) {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= METADATA_VALUE_LIMIT {
        map.insert(key.to_string(), value);
        return;
    }

    let parts: Vec<String> = chars
        .chunks(METADATA_VALUE_LIMIT)
        .map(|chunk| chunk.iter().collect())
        .collect();
    map.insert(format!("{}_parts", key), parts.len().to_string());
    for (index, part) in parts.into_iter().enumerate() {
        let part_key = if index == 0 {
            key.to_string()
        } else {
            format!("{}_{}", key, index)
        };
        map.insert(part_key, part);
    }
}

fn take_chunked(map: &BTreeMap<String, String>, key: &str) -> Result<Option<String>, ServiceError> {
    let Some(parts) = map.get(&format!("{}_parts", key)) else {
        return Ok(map.get(key).cloned());
    };

    let parts: usize = parts
        .trim()
        .parse()
        .map_err(|_| invalid(format!("Invalid part count for '{}'", key)))?;

    let mut value = String::new();
    for index in 0..parts {
        let part_key = if index == 0 {
            key.to_string()
        } else {
            format!("{}_{}", key, index)
        };
        let part = map
            .get(&part_key)
            .ok_or_else(|| invalid(format!("Missing metadata part '{}'", part_key)))?;
        value.push_str(part);
    }
    Ok(Some(value))
}
