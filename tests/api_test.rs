mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{
    completed_event, guest_metadata, line, read_json, read_text, signature_for, TestApp, ORIGIN,
};
use recordstore_api::{
    entities::coupon,
    payments::{mock::MOCK_SESSION_ID, CheckoutMetadata, SessionStatus},
};
use rstest::rstest;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};

fn checkout_body(record_id: i64, unit_price: &str, quantity: i32) -> Value {
    json!({
        "items": [{
            "recordId": record_id,
            "title": "Kind of Blue",
            "artist": "Miles Davis",
            "condition": "Near Mint",
            "unitPrice": unit_price,
            "quantity": quantity,
        }],
        "metadata": { "isGuest": true },
        "guestDetails": {
            "fname": "Ada",
            "lname": "Lovelace",
            "email": "ada@example.com"
        }
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ok");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new().await;
    let response = app
        .request_with_headers(Method::GET, "/health", None, &[("x-request-id", "req-abc")])
        .await;
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-abc")
    );
}

#[tokio::test]
async fn basket_lifecycle_over_http() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2499, 3).await;

    let missing = app.request(Method::GET, "/api/v1/baskets/1", None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body = read_json(missing).await;
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["message"], "Basket not found for user 1");

    let added = app
        .request(
            Method::POST,
            "/api/v1/baskets/1/items",
            Some(json!({ "recordId": record.id, "quantity": 2 })),
        )
        .await;
    assert_eq!(added.status(), StatusCode::OK);
    let basket = read_json(added).await;
    assert_eq!(basket["items"][0]["record_id"], record.id);
    assert_eq!(basket["items"][0]["quantity"], 2);
    assert_eq!(basket["total"], "49.98");

    let too_many = app
        .request(
            Method::PUT,
            &format!("/api/v1/baskets/1/items/{}", record.id),
            Some(json!({ "quantity": 4 })),
        )
        .await;
    assert_eq!(too_many.status(), StatusCode::BAD_REQUEST);
    let message = read_json(too_many).await["message"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.contains("'Kind of Blue' is currently out of stock"));
    assert!(message.contains("Requested: 4, Available: 3"));

    let not_in_basket = app
        .request(Method::DELETE, "/api/v1/baskets/1/items/999", None)
        .await;
    assert_eq!(not_in_basket.status(), StatusCode::NOT_FOUND);

    let cleared = app.request(Method::DELETE, "/api/v1/baskets/1", None).await;
    assert_eq!(cleared.status(), StatusCode::OK);
    assert_eq!(read_json(cleared).await["items"], json!([]));
    assert_eq!(app.stock(record.id).await, 3);
}

#[rstest]
#[case(json!({ "recordId": 1, "quantity": 0 }))]
#[case(json!({ "recordId": 0, "quantity": 1 }))]
#[tokio::test]
async fn basket_add_rejects_invalid_input(#[case] body: Value) {
    let app = TestApp::new().await;
    let response = app
        .request(Method::POST, "/api/v1/baskets/1/items", Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inventory_stock_and_restock() {
    let app = TestApp::new().await;
    let record = app.seed_record("Blue Train", 1999, 1).await;

    let response = app
        .request(Method::GET, &format!("/api/v1/inventory/{}", record.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["available_quantity"], 1);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/inventory/{}/restock", record.id),
            Some(json!({ "quantity": 4 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["available_quantity"], 5);

    let unknown = app.request(Method::GET, "/api/v1/inventory/999", None).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn checkout_requires_origin() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2499, 3).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payment/create-checkout-session",
            Some(checkout_body(record.id, "24.99", 1)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await["message"],
        "Validation error: Origin header is required"
    );
    assert!(app.gateway.intents().await.is_empty());
}

#[tokio::test]
async fn guest_checkout_opens_a_session() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2499, 3).await;

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payment/create-checkout-session",
            Some(checkout_body(record.id, "24.99", 2)),
            &[("origin", ORIGIN)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = read_json(response).await;
    assert_eq!(session["sessionId"], MOCK_SESSION_ID);
    assert!(session["clientSecret"].as_str().is_some());

    let intents = app.gateway.intents().await;
    assert_eq!(intents.len(), 1);
    let intent = &intents[0];
    assert_eq!(
        intent.return_url,
        "http://localhost:3000/success?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(intent.currency, app.state.config.currency);
    assert_eq!(intent.customer_email.as_deref(), Some("ada@example.com"));
    assert_eq!(intent.line_items.len(), 1);
    assert_eq!(intent.line_items[0].name, "Kind of Blue");
    assert_eq!(intent.line_items[0].description, "Miles Davis - Near Mint");
    assert_eq!(intent.line_items[0].unit_amount, 2499);
    assert_eq!(intent.line_items[0].quantity, 2);

    // nothing is reserved until the payment completes
    assert_eq!(app.stock(record.id).await, 3);
}

#[tokio::test]
async fn registered_checkout_applies_coupon_server_side() {
    let app = TestApp::new().await;
    let user = app.seed_user("miles").await;
    let record = app.seed_record("Kind of Blue", 2000, 3).await;
    let now = Utc::now();
    coupon::ActiveModel {
        user_id: Set(user.id),
        code: Set("SPINAPITEST1".to_string()),
        discount_percentage: Set(30),
        valid_until: Set(now + Duration::days(7)),
        is_used: Set(false),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&*app.db)
    .await
    .unwrap();

    let mut body = checkout_body(record.id, "20.00", 1);
    body["metadata"] = json!({ "isGuest": false, "userId": user.id });
    body["couponCode"] = json!("SPINAPITEST1");
    body["items"][0]["discountedPrice"] = json!("1.00");

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payment/create-checkout-session",
            Some(body),
            &[("origin", ORIGIN)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let intent = &app.gateway.intents().await[0];
    assert_eq!(intent.line_items[0].unit_amount, 1400);
    assert_eq!(intent.customer_email.as_deref(), Some("miles@example.com"));
}

#[tokio::test]
async fn checkout_charges_catalog_price_not_submitted_price() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2999, 3).await;

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payment/create-checkout-session",
            Some(checkout_body(record.id, "0.01", 2)),
            &[("origin", ORIGIN)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let intent = &app.gateway.intents().await[0];
    assert_eq!(intent.line_items[0].unit_amount, 2999);
    assert_eq!(intent.line_items[0].quantity, 2);
    let metadata = CheckoutMetadata::decode(&intent.metadata).unwrap();
    assert_eq!(metadata.items[0].unit_price, 2999);
}

#[tokio::test]
async fn checkout_rejects_unknown_coupon_and_short_stock() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2499, 1).await;

    let mut body = checkout_body(record.id, "24.99", 1);
    body["couponCode"] = json!("SPINNOTREAL1");
    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payment/create-checkout-session",
            Some(body),
            &[("origin", ORIGIN)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await["message"],
        "Validation error: Invalid or expired coupon"
    );

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payment/create-checkout-session",
            Some(checkout_body(record.id, "24.99", 2)),
            &[("origin", ORIGIN)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.gateway.intents().await.is_empty());
}

#[tokio::test]
async fn gateway_failure_surfaces_as_server_error() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2499, 3).await;
    app.gateway
        .set_failure(Some("provider unavailable".to_string()))
        .await;

    let response = app
        .request_with_headers(
            Method::POST,
            "/api/v1/payment/create-checkout-session",
            Some(checkout_body(record.id, "24.99", 1)),
            &[("origin", ORIGIN)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[rstest]
#[case(SessionStatus::Complete, true)]
#[case(SessionStatus::Open, false)]
#[case(SessionStatus::Expired, false)]
#[tokio::test]
async fn verify_session_reflects_provider_status(
    #[case] status: SessionStatus,
    #[case] expected: bool,
) {
    let app = TestApp::new().await;
    app.gateway.set_status(status).await;

    let response = app
        .request(Method::POST, "/api/v1/payment/verify-session/cs_123", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["success"], expected);
}

#[tokio::test]
async fn verify_session_is_false_when_provider_fails() {
    let app = TestApp::new().await;
    app.gateway.set_failure(Some("timeout".to_string())).await;

    let response = app
        .request(Method::POST, "/api/v1/payment/verify-session/cs_123", None)
        .await;
    assert_eq!(read_json(response).await["success"], false);
}

#[tokio::test]
async fn webhook_responses() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2499, 2).await;
    let payload = completed_event("evt_http", "cs_http", &guest_metadata(vec![line(&record, 1)]));

    let response = app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_text(response).await, "Missing signature");

    let response = app.post_webhook(&payload, Some("t=1,v1=deadbeef")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let signature = signature_for(&payload);
    let response = app.post_webhook(&payload, Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_text(response).await,
        "Checkout session processed successfully"
    );

    let response = app.post_webhook(&payload, Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_text(response).await, "Webhook processed successfully");
    assert_eq!(app.stock(record.id).await, 1);
}

#[tokio::test]
async fn webhook_failure_is_a_server_error() {
    let app = TestApp::new().await;
    let record = app.seed_record("Kind of Blue", 2499, 0).await;
    let payload = completed_event("evt_fail", "cs_fail", &guest_metadata(vec![line(&record, 1)]));

    let response = app
        .post_webhook(&payload, Some(&signature_for(&payload)))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = read_text(response).await;
    assert!(text.starts_with("Webhook processing failed: Purchase failed during item processing"));
}

#[tokio::test]
async fn ignored_webhook_event_is_acknowledged() {
    let app = TestApp::new().await;
    let payload = json!({
        "id": "evt_x",
        "type": "customer.created",
        "data": { "object": {} }
    })
    .to_string();

    let response = app
        .post_webhook(&payload, Some(&signature_for(&payload)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_text(response).await, "Webhook processed successfully");
}

#[tokio::test]
async fn coupons_and_purchases_over_http() {
    let app = TestApp::new().await;
    let user = app.seed_user("cannonball").await;

    let response = app
        .request(Method::GET, "/api/v1/coupons/validate/SPINNOPE0000", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["message"], "Invalid or expired coupon");

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/coupons/evaluate/{}", user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["issued"], false);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/coupons/user/{}", user.id),
            None,
        )
        .await;
    assert_eq!(read_json(response).await, json!([]));

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/purchases/user/{}", user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!([]));
}
