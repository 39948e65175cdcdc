//! Inventory ledger.
//!
//! Available stock lives in `records.quantity`. Every decrement is a single
//! conditional `UPDATE` guarded by `quantity >= requested`, so the sufficiency
//! check is always evaluated against the live row by the database itself. The
//! free functions take any [`ConnectionTrait`] so they compose with a caller's
//! transaction.

use crate::{
    entities::record,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Live stock for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub record_id: i64,
    pub title: String,
    pub available_quantity: i32,
}

impl From<record::Model> for StockLevel {
    fn from(model: record::Model) -> Self {
        Self {
            record_id: model.id,
            title: model.title,
            available_quantity: model.quantity,
        }
    }
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be at least 1, got {}",
            quantity
        )));
    }
    Ok(())
}

async fn find_record<C: ConnectionTrait>(
    conn: &C,
    record_id: i64,
) -> Result<record::Model, ServiceError> {
    record::Entity::find_by_id(record_id)
        .one(conn)
        .await?
        .ok_or(ServiceError::RecordNotFound(record_id))
}

/// Read-only sufficiency check: succeeds when at least `quantity` units are
/// currently available. Nothing is held.
pub async fn ensure_available<C: ConnectionTrait>(
    conn: &C,
    record_id: i64,
    quantity: i32,
) -> Result<record::Model, ServiceError> {
    ensure_positive(quantity)?;
    let record = find_record(conn, record_id).await?;
    if record.quantity < quantity {
        return Err(ServiceError::InsufficientStock {
            title: record.title,
            requested: quantity,
            available: record.quantity,
        });
    }
    Ok(record)
}

/// Atomically takes `quantity` units of stock and returns what is left.
///
/// Concurrent callers are serialized by the row update; once stock runs out
/// the loser gets `InsufficientStock` carrying the value it lost against.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    record_id: i64,
    quantity: i32,
) -> Result<i32, ServiceError> {
    ensure_positive(quantity)?;

    let result = record::Entity::update_many()
        .col_expr(
            record::Column::Quantity,
            Expr::col(record::Column::Quantity).sub(quantity),
        )
        .col_expr(record::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(record::Column::Id.eq(record_id))
        .filter(record::Column::Quantity.gte(quantity))
        .exec(conn)
        .await?;

    let record = find_record(conn, record_id).await?;
    if result.rows_affected == 0 {
        counter!("recordstore_inventory.reserve_rejected", 1);
        return Err(ServiceError::InsufficientStock {
            title: record.title,
            requested: quantity,
            available: record.quantity,
        });
    }

    counter!("recordstore_inventory.reserved_units", quantity as u64);
    Ok(record.quantity)
}

/// Unconditionally returns `quantity` units to stock.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    record_id: i64,
    quantity: i32,
) -> Result<i32, ServiceError> {
    ensure_positive(quantity)?;

    let result = record::Entity::update_many()
        .col_expr(
            record::Column::Quantity,
            Expr::col(record::Column::Quantity).add(quantity),
        )
        .col_expr(record::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(record::Column::Id.eq(record_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::RecordNotFound(record_id));
    }

    Ok(find_record(conn, record_id).await?.quantity)
}

/// Service facade over the ledger for callers outside a transaction.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn stock(&self, record_id: i64) -> Result<StockLevel, ServiceError> {
        Ok(find_record(&*self.db, record_id).await?.into())
    }

    #[instrument(skip(self))]
    pub async fn reserve(&self, record_id: i64, quantity: i32) -> Result<i32, ServiceError> {
        match reserve(&*self.db, record_id, quantity).await {
            Ok(remaining) => {
                self.event_sender
                    .send_or_log(Event::InventoryChanged {
                        record_id,
                        quantity: remaining,
                    })
                    .await;
                Ok(remaining)
            }
            Err(e) => {
                warn!(record_id, quantity, error = %e, "reservation rejected");
                Err(e)
            }
        }
    }

    /// Restock or reversal of an earlier reservation.
    #[instrument(skip(self))]
    pub async fn release(&self, record_id: i64, quantity: i32) -> Result<StockLevel, ServiceError> {
        let remaining = release(&*self.db, record_id, quantity).await?;
        self.event_sender
            .send_or_log(Event::InventoryChanged {
                record_id,
                quantity: remaining,
            })
            .await;

        info!(record_id, quantity, remaining, "stock released");
        self.stock(record_id).await
    }
}
