pub mod envelope;
pub mod signature;

pub use envelope::{
    CheckoutSessionObject, WebhookEnvelope, CHECKOUT_ASYNC_PAYMENT_SUCCEEDED, CHECKOUT_COMPLETED,
};
pub use signature::{sign, verify, SignatureError, SIGNATURE_HEADER};
