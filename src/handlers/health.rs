use crate::{db, errors::ServiceError, AppState};
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Readiness probe backed by a database ping
async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, ServiceError> {
    db::check_connection(&state.db).await?;
    Ok(Json(json!({ "status": "ok" })))
}
