#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use recordstore_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{record, user},
    events::{self, EventSender},
    notifications::{EmailDispatcher, NotificationError, OrderConfirmation},
    payments::{CheckoutLineItem, CheckoutMetadata, Customer, GuestContact, MockGateway},
    webhooks, AppState,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const ORIGIN: &str = "http://localhost:3000";

/// Email dispatcher that keeps every confirmation it is asked to send.
#[derive(Default)]
pub struct RecordingEmailDispatcher {
    sent: Mutex<Vec<OrderConfirmation>>,
    fail: Mutex<bool>,
}

impl RecordingEmailDispatcher {
    pub async fn sent(&self) -> Vec<OrderConfirmation> {
        self.sent.lock().await.clone()
    }

    pub async fn fail_with_error(&self, fail: bool) {
        *self.fail.lock().await = fail;
    }
}

#[async_trait]
impl EmailDispatcher for RecordingEmailDispatcher {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        if *self.fail.lock().await {
            return Err(NotificationError::SendFailed {
                recipient: confirmation.recipient_email,
                reason: "smtp unavailable".to_string(),
            });
        }
        self.sent.lock().await.push(confirmation);
        Ok(())
    }
}

fn test_config(database_url: String) -> AppConfig {
    AppConfig::new(
        database_url,
        WEBHOOK_SECRET.to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    )
}

/// Helper harness for spinning up an application state backed by SQLite.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<MockGateway>,
    pub emails: Arc<RecordingEmailDispatcher>,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: Option<TempDir>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller tweak the configuration.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = test_config("sqlite::memory:".to_string());
        // every pooled connection to sqlite::memory: is its own database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        tweak(&mut cfg);
        Self::build(cfg, None).await
    }

    /// Application over a temporary SQLite file shared by `connections`
    /// pooled connections, so concurrent callers really run in parallel.
    pub async fn with_file_database(connections: u32) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("recordstore.db").display()
        );
        let mut cfg = test_config(url);
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;
        Self::build(cfg, Some(dir)).await
    }

    async fn build(cfg: AppConfig, db_dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockGateway::default());
        let emails = Arc::new(RecordingEmailDispatcher::default());

        let state = AppState::new(
            db_arc.clone(),
            cfg,
            event_sender,
            gateway.clone(),
            emails.clone(),
        );
        let router = app_router(state.clone());

        Self {
            router,
            state,
            db: db_arc,
            gateway,
            emails,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    pub async fn seed_record(&self, title: &str, price_cents: i64, quantity: i32) -> record::Model {
        let now = Utc::now();
        record::ActiveModel {
            title: Set(title.to_string()),
            artist: Set("Various Artists".to_string()),
            condition: Set("Very Good".to_string()),
            price_cents: Set(price_cents),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed record")
    }

    pub async fn seed_user(&self, username: &str) -> user::Model {
        user::ActiveModel {
            username: Set(username.to_string()),
            email: Set(format!("{}@example.com", username)),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed user")
    }

    /// Live quantity of a record.
    pub async fn stock(&self, record_id: i64) -> i32 {
        record::Entity::find_by_id(record_id)
            .one(&*self.db)
            .await
            .expect("query record")
            .expect("record exists")
            .quantity
    }

    /// Send a JSON request through the full router.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router call")
    }

    /// Posts a raw webhook body with an optional `Stripe-Signature` header.
    pub async fn post_webhook(&self, payload: &str, signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payment/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        self.router
            .clone()
            .oneshot(
                builder
                    .body(Body::from(payload.to_string()))
                    .expect("build request"),
            )
            .await
            .expect("router call")
    }
}

/// A valid `Stripe-Signature` header for `payload` signed now.
pub fn signature_for(payload: &str) -> String {
    let timestamp = Utc::now().timestamp();
    format!(
        "t={},v1={}",
        timestamp,
        webhooks::sign(WEBHOOK_SECRET, timestamp, payload.as_bytes())
    )
}

pub fn line(record: &record::Model, quantity: i32) -> CheckoutLineItem {
    CheckoutLineItem {
        record_id: record.id,
        title: record.title.clone(),
        artist: record.artist.clone(),
        condition: record.condition.clone(),
        quantity,
        unit_price: record.price_cents,
        discounted_price: None,
    }
}

pub fn guest_contact() -> GuestContact {
    GuestContact {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        address: Some("1 Analytical Way".to_string()),
        postal_code: Some("1011AB".to_string()),
        city: Some("London".to_string()),
        region: None,
        country: Some("GB".to_string()),
        phone: None,
    }
}

pub fn guest_metadata(items: Vec<CheckoutLineItem>) -> CheckoutMetadata {
    CheckoutMetadata {
        items,
        customer: Customer::Guest {
            contact: Some(guest_contact()),
        },
        coupon: None,
    }
}

pub fn user_metadata(user_id: i64, items: Vec<CheckoutLineItem>) -> CheckoutMetadata {
    CheckoutMetadata {
        items,
        customer: Customer::Registered { user_id },
        coupon: None,
    }
}

/// Serialized `checkout.session.completed` event carrying `metadata`.
pub fn completed_event(event_id: &str, session_id: &str, metadata: &CheckoutMetadata) -> String {
    let metadata: BTreeMap<String, String> = metadata.encode().expect("encode metadata");
    event_with_metadata(event_id, session_id, metadata)
}

pub fn event_with_metadata(
    event_id: &str,
    session_id: &str,
    metadata: BTreeMap<String, String>,
) -> String {
    session_event("checkout.session.completed", event_id, session_id, "paid", metadata)
}

/// Checkout session event of any type with an explicit `payment_status`.
pub fn session_event(
    event_type: &str,
    event_id: &str,
    session_id: &str,
    payment_status: &str,
    metadata: BTreeMap<String, String>,
) -> String {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": session_id,
                "status": "complete",
                "payment_status": payment_status,
                "metadata": metadata,
            }
        }
    })
    .to_string()
}

pub async fn read_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn read_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}
