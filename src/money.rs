//! Conversions between decimal prices and integer minor currency units.

use crate::errors::ServiceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Converts a positive decimal amount to cents, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Price must be positive, got {}",
            amount
        )));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("Price {} is out of range", amount)))
}

pub fn from_minor_units(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Price after taking `percentage` percent off, in cents. Never drops below one cent.
pub fn apply_discount(unit_cents: i64, percentage: u32) -> Result<i64, ServiceError> {
    let pct = i64::from(percentage.min(100));
    let discount = unit_cents
        .checked_mul(pct)
        .and_then(|scaled| scaled.checked_add(50))
        .map(|scaled| scaled / 100)
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Price {} is out of range", unit_cents))
        })?;
    Ok((unit_cents - discount).max(1))
}
