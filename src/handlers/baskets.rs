use crate::handlers::common::{success_response, validate_input};
use crate::{errors::ServiceError, services::baskets::AddToBasketInput, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use validator::Validate;

/// Creates the router for basket endpoints, nested under `/baskets/:user_id`
pub fn baskets_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_basket).delete(clear_basket))
        .route("/items", post(add_item))
        .route("/items/:record_id", put(update_item).delete(remove_item))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    #[serde(alias = "record_id")]
    #[validate(range(min = 1))]
    pub record_id: i64,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

async fn get_basket(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let basket = state.services.baskets.get(user_id).await?;
    Ok(success_response(basket))
}

async fn add_item(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let input = AddToBasketInput {
        record_id: payload.record_id,
        quantity: payload.quantity,
    };
    let basket = state.services.baskets.add_item(user_id, input).await?;
    Ok(success_response(basket))
}

async fn update_item(
    State(state): State<AppState>,
    Path((user_id, record_id)): Path<(i64, i64)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let basket = state
        .services
        .baskets
        .update_line_quantity(user_id, record_id, payload.quantity)
        .await?;
    Ok(success_response(basket))
}

async fn remove_item(
    State(state): State<AppState>,
    Path((user_id, record_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ServiceError> {
    let basket = state.services.baskets.remove_line(user_id, record_id).await?;
    Ok(success_response(basket))
}

async fn clear_basket(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let basket = state.services.baskets.clear(user_id).await?;
    Ok(success_response(basket))
}
