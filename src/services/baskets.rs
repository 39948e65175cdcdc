use crate::{
    entities::{basket, basket_item, record},
    errors::ServiceError,
    events::{Event, EventSender},
    money,
    services::inventory,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Attempts made when a concurrent writer changes the same basket line.
const MAX_LINE_WRITE_ATTEMPTS: u32 = 3;

/// Basket service holding each user's intended purchases.
///
/// No stock is held while items sit in a basket. Adding or updating a line
/// only checks that the resulting absolute quantity is covered by the live
/// inventory; stock is taken exactly once, when the paid checkout is
/// reconciled.
///
/// `get` is observing and fails with `BasketNotFound`; `add_item` and `clear`
/// create the basket on demand.
#[derive(Clone)]
pub struct BasketService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// One line of a basket joined with its catalog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketLine {
    pub record_id: i64,
    pub title: String,
    pub artist: String,
    pub condition: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketView {
    pub id: i64,
    pub user_id: i64,
    pub items: Vec<BasketLine>,
    pub total_quantity: i32,
    pub total: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddToBasketInput {
    pub record_id: i64,
    pub quantity: i32,
}

/// Outcome of one attempt at writing a basket line.
enum LineWrite {
    Written(i32),
    Contended,
}

impl BasketService {
    /// Creates a new `BasketService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Event sender for publishing basket events
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's basket with record details.
    ///
    /// # Returns
    ///
    /// * `Ok(BasketView)` - Basket and its lines
    /// * `Err(ServiceError::BasketNotFound)` - The user never had a basket
    #[instrument(skip(self))]
    pub async fn get(&self, user_id: i64) -> Result<BasketView, ServiceError> {
        let basket = find_basket(&*self.db, user_id)
            .await?
            .ok_or(ServiceError::BasketNotFound(user_id))?;
        load_view(&*self.db, basket).await
    }

    /// Adds `quantity` units of a record to the user's basket.
    ///
    /// Creates the basket if it does not exist yet. When the record already has
    /// a line, the sum of the existing and requested quantity is what has to be
    /// covered by available stock.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the basket
    /// * `input` - Record and number of units to add
    ///
    /// # Returns
    ///
    /// * `Ok(BasketView)` - The updated basket
    /// * `Err(ServiceError::RecordNotFound)` - Unknown record
    /// * `Err(ServiceError::InsufficientStock)` - The new line total exceeds stock
    /// * `Err(ServiceError::ConcurrentModification)` - The line kept changing underneath
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: i64,
        input: AddToBasketInput,
    ) -> Result<BasketView, ServiceError> {
        validate_quantity(input.quantity)?;

        for attempt in 1..=MAX_LINE_WRITE_ATTEMPTS {
            let txn = self.db.begin().await?;
            let basket = find_or_create_basket(&txn, user_id).await?;

            let line = find_line(&txn, basket.id, input.record_id).await?;
            let current = line.as_ref().map_or(0, |l| l.quantity);
            let new_total = current.checked_add(input.quantity).ok_or_else(|| {
                ServiceError::ValidationError("Basket quantity is too large".to_string())
            })?;

            inventory::ensure_available(&txn, input.record_id, new_total).await?;

            let write = match line {
                Some(line) => compare_and_set_line(&txn, &line, new_total).await?,
                None => insert_line(&txn, basket.id, input.record_id, new_total).await?,
            };

            match write {
                LineWrite::Written(quantity) => {
                    touch_basket(&txn, basket.id).await?;
                    txn.commit().await?;

                    self.event_sender
                        .send_or_log(Event::BasketUpdated {
                            user_id,
                            record_id: input.record_id,
                            quantity,
                        })
                        .await;

                    info!(
                        "Added record {} x{} to basket of user {} (line now {})",
                        input.record_id, input.quantity, user_id, quantity
                    );
                    return load_view(&*self.db, basket).await;
                }
                LineWrite::Contended => {
                    debug!(attempt, user_id, record_id = input.record_id, "basket line contended");
                    // dropping the transaction rolls it back
                    drop(txn);
                }
            }
        }

        warn!(user_id, record_id = input.record_id, "giving up on contended basket line");
        Err(ServiceError::ConcurrentModification(format!(
            "Basket line for record {} of user {} was modified concurrently",
            input.record_id, user_id
        )))
    }

    /// Sets an existing line to an absolute quantity.
    ///
    /// Fails with `RecordNotInBasket` when the line is missing and with
    /// `InsufficientStock` when `new_quantity` exceeds what is available. In both
    /// cases nothing is written.
    #[instrument(skip(self))]
    pub async fn update_line_quantity(
        &self,
        user_id: i64,
        record_id: i64,
        new_quantity: i32,
    ) -> Result<BasketView, ServiceError> {
        validate_quantity(new_quantity)?;

        for attempt in 1..=MAX_LINE_WRITE_ATTEMPTS {
            let txn = self.db.begin().await?;
            let basket = find_basket(&txn, user_id)
                .await?
                .ok_or(ServiceError::BasketNotFound(user_id))?;
            let line = find_line(&txn, basket.id, record_id)
                .await?
                .ok_or(ServiceError::RecordNotInBasket { user_id, record_id })?;

            inventory::ensure_available(&txn, record_id, new_quantity).await?;

            match compare_and_set_line(&txn, &line, new_quantity).await? {
                LineWrite::Written(quantity) => {
                    touch_basket(&txn, basket.id).await?;
                    txn.commit().await?;

                    self.event_sender
                        .send_or_log(Event::BasketUpdated {
                            user_id,
                            record_id,
                            quantity,
                        })
                        .await;
                    return load_view(&*self.db, basket).await;
                }
                LineWrite::Contended => {
                    debug!(attempt, user_id, record_id, "basket line contended");
                    drop(txn);
                }
            }
        }

        Err(ServiceError::ConcurrentModification(format!(
            "Basket line for record {} of user {} was modified concurrently",
            record_id, user_id
        )))
    }

    /// Removes a line from the basket.
    #[instrument(skip(self))]
    pub async fn remove_line(&self, user_id: i64, record_id: i64) -> Result<BasketView, ServiceError> {
        let txn = self.db.begin().await?;
        let basket = find_basket(&txn, user_id)
            .await?
            .ok_or(ServiceError::BasketNotFound(user_id))?;

        let result = basket_item::Entity::delete_many()
            .filter(basket_item::Column::BasketId.eq(basket.id))
            .filter(basket_item::Column::RecordId.eq(record_id))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::RecordNotInBasket { user_id, record_id });
        }

        touch_basket(&txn, basket.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::BasketUpdated {
                user_id,
                record_id,
                quantity: 0,
            })
            .await;

        info!("Removed record {} from basket of user {}", record_id, user_id);
        load_view(&*self.db, basket).await
    }

    /// Empties the basket, creating an empty one if the user has none. Idempotent.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: i64) -> Result<BasketView, ServiceError> {
        let txn = self.db.begin().await?;
        let basket = find_or_create_basket(&txn, user_id).await?;
        basket_item::Entity::delete_many()
            .filter(basket_item::Column::BasketId.eq(basket.id))
            .exec(&txn)
            .await?;
        touch_basket(&txn, basket.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::BasketCleared(user_id))
            .await;

        info!("Cleared basket of user {}", user_id);
        load_view(&*self.db, basket).await
    }

    /// Drops the given records from the user's basket, if present.
    ///
    /// Used after a paid checkout so purchased lines do not linger. Lines added
    /// for other records in the meantime are kept. Returns the number of lines
    /// removed.
    #[instrument(skip(self))]
    pub async fn remove_purchased(
        &self,
        user_id: i64,
        record_ids: Vec<i64>,
    ) -> Result<u64, ServiceError> {
        let Some(basket) = find_basket(&*self.db, user_id).await? else {
            return Ok(0);
        };
        if record_ids.is_empty() {
            return Ok(0);
        }

        let result = basket_item::Entity::delete_many()
            .filter(basket_item::Column::BasketId.eq(basket.id))
            .filter(basket_item::Column::RecordId.is_in(record_ids))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            touch_basket(&*self.db, basket.id).await?;
            self.event_sender
                .send_or_log(Event::BasketCleared(user_id))
                .await;
        }
        Ok(result.rows_affected)
    }
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(
            "Quantity must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

async fn find_basket<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
) -> Result<Option<basket::Model>, ServiceError> {
    Ok(basket::Entity::find()
        .filter(basket::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

/// Insert-or-ignore on the unique `user_id`, then read back whichever row won.
async fn find_or_create_basket<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
) -> Result<basket::Model, ServiceError> {
    if let Some(existing) = find_basket(conn, user_id).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    basket::Entity::insert(basket::ActiveModel {
        user_id: Set(user_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(basket::Column::UserId)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    find_basket(conn, user_id).await?.ok_or_else(|| {
        ServiceError::InternalError(format!("Basket for user {} vanished after insert", user_id))
    })
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    basket_id: i64,
    record_id: i64,
) -> Result<Option<basket_item::Model>, ServiceError> {
    Ok(basket_item::Entity::find()
        .filter(basket_item::Column::BasketId.eq(basket_id))
        .filter(basket_item::Column::RecordId.eq(record_id))
        .one(conn)
        .await?)
}

/// Writes `quantity` only if the line still holds the value we read.
async fn compare_and_set_line<C: ConnectionTrait>(
    conn: &C,
    line: &basket_item::Model,
    quantity: i32,
) -> Result<LineWrite, ServiceError> {
    let result = basket_item::Entity::update_many()
        .col_expr(basket_item::Column::Quantity, Expr::value(quantity))
        .col_expr(basket_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(basket_item::Column::Id.eq(line.id))
        .filter(basket_item::Column::Quantity.eq(line.quantity))
        .exec(conn)
        .await?;

    Ok(if result.rows_affected == 1 {
        LineWrite::Written(quantity)
    } else {
        LineWrite::Contended
    })
}

async fn insert_line<C: ConnectionTrait>(
    conn: &C,
    basket_id: i64,
    record_id: i64,
    quantity: i32,
) -> Result<LineWrite, ServiceError> {
    let now = Utc::now();
    let insert = basket_item::Entity::insert(basket_item::ActiveModel {
        basket_id: Set(basket_id),
        record_id: Set(record_id),
        quantity: Set(quantity),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    })
    .exec_without_returning(conn)
    .await;

    match insert {
        Ok(_) => Ok(LineWrite::Written(quantity)),
        Err(e) if crate::db::is_unique_violation(&e) => Ok(LineWrite::Contended),
        Err(e) => Err(e.into()),
    }
}

async fn touch_basket<C: ConnectionTrait>(conn: &C, basket_id: i64) -> Result<(), ServiceError> {
    basket::Entity::update_many()
        .col_expr(basket::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(basket::Column::Id.eq(basket_id))
        .exec(conn)
        .await?;
    Ok(())
}

async fn load_view<C: ConnectionTrait>(
    conn: &C,
    basket: basket::Model,
) -> Result<BasketView, ServiceError> {
    let rows = basket_item::Entity::find()
        .filter(basket_item::Column::BasketId.eq(basket.id))
        .order_by_asc(basket_item::Column::Id)
        .find_also_related(record::Entity)
        .all(conn)
        .await?;

    let mut items = Vec::with_capacity(rows.len());
    for (line, record) in rows {
        let record = record.ok_or(ServiceError::RecordNotFound(line.record_id))?;
        let unit_price = money::from_minor_units(record.price_cents);
        items.push(BasketLine {
            record_id: line.record_id,
            title: record.title,
            artist: record.artist,
            condition: record.condition,
            quantity: line.quantity,
            unit_price,
            line_total: unit_price * Decimal::from(line.quantity),
        });
    }

    let updated_at = basket::Entity::find_by_id(basket.id)
        .one(conn)
        .await?
        .map_or(basket.updated_at, |b| b.updated_at);

    Ok(BasketView {
        id: basket.id,
        user_id: basket.user_id,
        total_quantity: items.iter().map(|l| l.quantity).sum(),
        total: items.iter().map(|l| l.line_total).sum(),
        items,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_quantities_are_invalid() {
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-2).is_err());
        assert!(validate_quantity(1).is_ok());
    }

    #[test]
    fn add_input_deserializes() {
        let input: AddToBasketInput =
            serde_json::from_str(r#"{"record_id": 7, "quantity": 3}"#).unwrap();
        assert_eq!(input.record_id, 7);
        assert_eq!(input.quantity, 3);
    }
}
