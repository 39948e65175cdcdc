pub mod baskets;
pub mod common;
pub mod coupons;
pub mod health;
pub mod inventory;
pub mod payments;
pub mod purchases;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    notifications::EmailDispatcher,
    payments::PaymentGateway,
    services::{
        coupons::CouponPolicy, BasketService, CheckoutService, CouponService, InventoryService,
        PurchaseService, Reconciler,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub inventory: Arc<InventoryService>,
    pub baskets: Arc<BasketService>,
    pub purchases: Arc<PurchaseService>,
    pub coupons: Arc<CouponService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<Reconciler>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailDispatcher>,
        config: &AppConfig,
    ) -> Self {
        let inventory = InventoryService::new(db_pool.clone(), event_sender.clone());
        let baskets = BasketService::new(db_pool.clone(), event_sender.clone());
        let purchases = PurchaseService::new(db_pool.clone());
        let coupons = CouponService::new(
            db_pool.clone(),
            event_sender.clone(),
            CouponPolicy::from(config),
        );
        let checkout = CheckoutService::new(
            db_pool.clone(),
            gateway,
            coupons.clone(),
            event_sender.clone(),
            config,
        );
        let reconciler = Reconciler::new(
            db_pool,
            baskets.clone(),
            coupons.clone(),
            email,
            event_sender,
            config.payment_webhook_secret.clone(),
            config.payment_webhook_tolerance_secs.unsigned_abs(),
        );

        Self {
            inventory: Arc::new(inventory),
            baskets: Arc::new(baskets),
            purchases: Arc::new(purchases),
            coupons: Arc::new(coupons),
            checkout: Arc::new(checkout),
            reconciler: Arc::new(reconciler),
        }
    }
}
