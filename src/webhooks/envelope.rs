use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
/// Sent later for delayed payment methods whose session completed unpaid.
pub const CHECKOUT_ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

const SETTLED_PAYMENT_STATUSES: [&str; 2] = ["paid", "no_payment_required"];

/// Provider event as delivered to the webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeData {
    pub object: serde_json::Value,
}

/// The `data.object` of a checkout session event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSessionObject {
    /// Whether the funds are settled. A missing status counts as unpaid.
    pub fn is_paid(&self) -> bool {
        self.payment_status
            .as_deref()
            .is_some_and(|s| SETTLED_PAYMENT_STATUSES.contains(&s))
    }
}

impl WebhookEnvelope {
    /// Events that may carry a session ready for fulfilment.
    pub fn is_checkout_settlement(&self) -> bool {
        self.event_type == CHECKOUT_COMPLETED || self.event_type == CHECKOUT_ASYNC_PAYMENT_SUCCEEDED
    }

    pub fn checkout_session(&self) -> Result<CheckoutSessionObject, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_checkout_completed_event() {
        let raw = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_1", "status": "complete", "metadata": {"isGuest": "true"}}}
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.is_checkout_settlement());
        let session = envelope.checkout_session().unwrap();
        assert_eq!(session.id, "cs_1");
        assert_eq!(session.metadata.get("isGuest").map(String::as_str), Some("true"));
        assert!(!session.is_paid());
    }

    #[test]
    fn only_settled_payment_statuses_are_paid() {
        let session = |status: Option<&str>| CheckoutSessionObject {
            id: "cs_1".into(),
            status: Some("complete".into()),
            payment_status: status.map(str::to_string),
            metadata: BTreeMap::new(),
        };
        assert!(session(Some("paid")).is_paid());
        assert!(session(Some("no_payment_required")).is_paid());
        assert!(!session(Some("unpaid")).is_paid());
        assert!(!session(None).is_paid());
    }

    #[test]
    fn async_payment_success_is_a_settlement() {
        let raw = r#"{"id": "evt_3", "type": "checkout.session.async_payment_succeeded", "data": {"object": {"id": "cs_1", "payment_status": "paid"}}}"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.is_checkout_settlement());
        assert!(envelope.checkout_session().unwrap().is_paid());
    }

    #[test]
    fn other_event_objects_need_not_be_sessions() {
        let raw = r#"{"id": "evt_2", "type": "charge.refunded", "data": {"object": {"amount": 100}}}"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        assert!(!envelope.is_checkout_settlement());
        assert!(envelope.checkout_session().is_err());
    }
}
