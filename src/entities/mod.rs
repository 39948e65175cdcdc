pub mod basket;
pub mod basket_item;
pub mod coupon;
pub mod guest_contact;
pub mod processed_checkout;
pub mod purchase_record;
pub mod record;
pub mod user;
