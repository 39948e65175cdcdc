//! Purchase ledger: append-only records of fulfilled checkout lines.

use crate::{
    entities::purchase_record::{self, PurchaseStatus},
    errors::ServiceError,
    money,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Fields of a purchase line about to be recorded
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub checkout_session_id: String,
    pub line_index: i32,
    pub user_id: Option<i64>,
    pub is_guest: bool,
    pub record_id: i64,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseSummary {
    pub id: i64,
    pub record_id: i64,
    pub quantity: i32,
    pub unit_price: rust_decimal::Decimal,
    pub total_amount: rust_decimal::Decimal,
    pub purchase_date: DateTime<Utc>,
    pub status: PurchaseStatus,
    pub is_guest: bool,
}

impl From<purchase_record::Model> for PurchaseSummary {
    fn from(model: purchase_record::Model) -> Self {
        Self {
            id: model.id,
            record_id: model.record_id,
            quantity: model.quantity,
            unit_price: money::from_minor_units(model.unit_price_cents),
            total_amount: money::from_minor_units(model.total_amount_cents),
            purchase_date: model.purchase_date,
            status: model.status,
            is_guest: model.is_guest,
        }
    }
}

/// Appends one COMPLETED purchase. Fails with a unique violation when the
/// `(session, line)` key was already recorded.
pub async fn record_purchase<C: ConnectionTrait>(
    conn: &C,
    purchase: NewPurchase,
) -> Result<purchase_record::Model, sea_orm::DbErr> {
    let total = purchase
        .unit_price_cents
        .checked_mul(i64::from(purchase.quantity))
        .ok_or_else(|| sea_orm::DbErr::Custom("purchase total overflows".to_string()))?;

    let model = purchase_record::ActiveModel {
        user_id: Set(purchase.user_id),
        is_guest: Set(purchase.is_guest),
        record_id: Set(purchase.record_id),
        quantity: Set(purchase.quantity),
        unit_price_cents: Set(purchase.unit_price_cents),
        total_amount_cents: Set(total),
        purchase_date: Set(Utc::now()),
        status: Set(PurchaseStatus::Completed),
        checkout_session_id: Set(purchase.checkout_session_id),
        line_index: Set(purchase.line_index),
        ..Default::default()
    };

    model.insert(conn).await
}

pub async fn find_line<C: ConnectionTrait>(
    conn: &C,
    session_id: &str,
    line_index: i32,
) -> Result<Option<purchase_record::Model>, ServiceError> {
    Ok(purchase_record::Entity::find()
        .filter(purchase_record::Column::CheckoutSessionId.eq(session_id))
        .filter(purchase_record::Column::LineIndex.eq(line_index))
        .one(conn)
        .await?)
}

/// Completed purchases of `user_id` dated at or after `since`.
pub async fn count_completed_since<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
    since: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    Ok(purchase_record::Entity::find()
        .filter(purchase_record::Column::UserId.eq(user_id))
        .filter(purchase_record::Column::Status.eq(PurchaseStatus::Completed))
        .filter(purchase_record::Column::PurchaseDate.gte(since))
        .count(conn)
        .await?)
}

#[derive(Clone)]
pub struct PurchaseService {
    db: Arc<DatabaseConnection>,
}

impl PurchaseService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Purchases of a registered user, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<PurchaseSummary>, ServiceError> {
        let rows = purchase_record::Entity::find()
            .filter(purchase_record::Column::UserId.eq(user_id))
            .order_by_desc(purchase_record::Column::PurchaseDate)
            .order_by_desc(purchase_record::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Every line recorded for a checkout session, in line order.
    #[instrument(skip(self))]
    pub async fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<purchase_record::Model>, ServiceError> {
        Ok(purchase_record::Entity::find()
            .filter(purchase_record::Column::CheckoutSessionId.eq(session_id))
            .order_by_asc(purchase_record::Column::LineIndex)
            .all(&*self.db)
            .await?)
    }
}
