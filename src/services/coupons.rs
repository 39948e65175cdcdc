use crate::{
    config::AppConfig,
    entities::coupon,
    errors::ServiceError,
    events::{Event, EventSender},
    services::purchases,
};
use chrono::{DateTime, Duration, Months, Utc};
use metrics::counter;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const CODE_SUFFIX_LEN: usize = 8;
const MAX_CODE_ATTEMPTS: u32 = 3;

/// Parameters of the frequent shopper reward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponPolicy {
    pub window_days: i64,
    pub required_purchases: u64,
    pub discount_percentage: u32,
    pub code_prefix: String,
}

impl Default for CouponPolicy {
    fn default() -> Self {
        Self {
            window_days: 30,
            required_purchases: 3,
            discount_percentage: 30,
            code_prefix: "SPIN".to_string(),
        }
    }
}

impl From<&AppConfig> for CouponPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            window_days: cfg.coupon_purchase_window_days,
            required_purchases: cfg.coupon_required_purchases,
            discount_percentage: cfg.coupon_discount_percentage,
            code_prefix: cfg.coupon_code_prefix.clone(),
        }
    }
}

impl CouponPolicy {
    /// A purchase count earns a coupon when it is a positive multiple of the threshold.
    pub fn earns_coupon(&self, purchase_count: u64) -> bool {
        self.required_purchases > 0
            && purchase_count > 0
            && purchase_count % self.required_purchases == 0
    }
}

/// Random coupon code: the prefix followed by upper-case alphanumerics from the OS RNG.
pub fn generate_code(prefix: &str) -> String {
    let suffix: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(CODE_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("{}{}", prefix, suffix)
}

fn one_month_after(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(1))
        .unwrap_or_else(|| now + Duration::days(30))
}

/// Flips the coupon to used. Returns false when it was already used or does not exist.
pub async fn mark_used<C: ConnectionTrait>(conn: &C, code: &str) -> Result<bool, ServiceError> {
    let result = coupon::Entity::update_many()
        .col_expr(coupon::Column::IsUsed, Expr::value(true))
        .filter(coupon::Column::Code.eq(code))
        .filter(coupon::Column::IsUsed.eq(false))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    policy: CouponPolicy,
}

impl CouponService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        policy: CouponPolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            policy,
        }
    }

    /// Mints a frequent shopper coupon when the user qualifies.
    ///
    /// Returns `false` right away if the user still holds a redeemable coupon.
    /// Otherwise the completed purchases of the trailing window are counted and
    /// a coupon is issued when the count is a positive multiple of the
    /// threshold. Check and insert share one transaction; two evaluations for
    /// the same user can still both mint under READ COMMITTED isolation.
    #[instrument(skip(self))]
    pub async fn evaluate(&self, user_id: i64) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let holding = coupon::Entity::find()
            .filter(coupon::Column::UserId.eq(user_id))
            .filter(coupon::Column::IsUsed.eq(false))
            .filter(coupon::Column::ValidUntil.gt(now))
            .count(&txn)
            .await?;
        if holding > 0 {
            debug!(user_id, "user already holds a valid coupon");
            return Ok(false);
        }

        let since = now - Duration::days(self.policy.window_days);
        let purchases = purchases::count_completed_since(&txn, user_id, since).await?;
        if !self.policy.earns_coupon(purchases) {
            debug!(user_id, purchases, "no coupon earned");
            return Ok(false);
        }

        let mut issued = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code(&self.policy.code_prefix);
            let exists = coupon::Entity::find()
                .filter(coupon::Column::Code.eq(code.as_str()))
                .count(&txn)
                .await?
                > 0;
            if !exists {
                issued = Some(code);
                break;
            }
        }
        let code = issued.ok_or_else(|| {
            ServiceError::InternalError("Could not generate a unique coupon code".to_string())
        })?;

        let model = coupon::ActiveModel {
            user_id: Set(user_id),
            code: Set(code.clone()),
            discount_percentage: Set(self.policy.discount_percentage as i32),
            valid_until: Set(one_month_after(now)),
            is_used: Set(false),
            created_at: Set(now),
            ..Default::default()
        };
        model.insert(&txn).await?;
        txn.commit().await?;

        counter!("recordstore_coupons.issued", 1);
        self.event_sender
            .send_or_log(Event::CouponIssued {
                user_id,
                code: code.clone(),
            })
            .await;

        info!(user_id, purchases, "Issued frequent shopper coupon {}", code);
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?)
    }

    /// The coupon when it exists, is unused and has not expired.
    #[instrument(skip(self))]
    pub async fn validate(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        let now = Utc::now();
        Ok(self
            .find_by_code(code)
            .await?
            .filter(|c| c.is_redeemable_at(now)))
    }

    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::UserId.eq(user_id))
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn mark_used(&self, code: &str) -> Result<bool, ServiceError> {
        mark_used(&*self.db, code).await
    }
}
