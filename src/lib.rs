//! Record store API library
//!
//! Baskets, checkout sessions and the reconciliation of paid checkouts into
//! purchase records and inventory debits.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod money;
pub mod notifications;
pub mod payments;
pub mod services;
pub mod webhooks;

use axum::{http::HeaderValue, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
        gateway: Arc<dyn payments::PaymentGateway>,
        email: Arc<dyn notifications::EmailDispatcher>,
    ) -> Self {
        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), gateway, email, &config);
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Versioned API surface, nested under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/baskets/:user_id", handlers::baskets::baskets_routes())
        .nest("/inventory", handlers::inventory::inventory_routes())
        .nest("/payment", handlers::payments::payment_routes())
        .nest("/purchases", handlers::purchases::purchases_routes())
        .nest("/coupons", handlers::coupons::coupons_routes())
}

fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        info!("Using permissive CORS because explicit origins were not configured");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Full application router with tracing, CORS and request ids applied.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::<AppState>::new()
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
