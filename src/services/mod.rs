pub mod baskets;
pub mod checkout;
pub mod coupons;
pub mod inventory;
pub mod purchases;
pub mod reconciliation;

pub use baskets::BasketService;
pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use inventory::InventoryService;
pub use purchases::PurchaseService;
pub use reconciliation::{ReconcileOutcome, Reconciler};
