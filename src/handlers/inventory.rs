use crate::handlers::common::{success_response, validate_input};
use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use validator::Validate;

pub fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/:record_id", get(get_stock))
        .route("/:record_id/restock", post(restock))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RestockRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Live available quantity of a record
async fn get_stock(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let stock = state.services.inventory.stock(record_id).await?;
    Ok(success_response(stock))
}

async fn restock(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
    Json(payload): Json<RestockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let stock = state
        .services
        .inventory
        .release(record_id, payload.quantity)
        .await?;
    Ok(success_response(stock))
}
