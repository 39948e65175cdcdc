use crate::handlers::common::success_response;
use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;

pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/user/:user_id", get(list_user_coupons))
        .route("/validate/:code", get(validate_coupon))
        .route("/evaluate/:user_id", post(evaluate_user))
}

async fn list_user_coupons(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupons = state.services.coupons.list_for_user(user_id).await?;
    Ok(success_response(coupons))
}

async fn validate_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupon = state
        .services
        .coupons
        .validate(code.trim())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Invalid or expired coupon".to_string()))?;
    Ok(success_response(coupon))
}

/// Issues a frequent shopper coupon when the user qualifies
async fn evaluate_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let issued = state.services.coupons.evaluate(user_id).await?;
    Ok(success_response(json!({ "issued": issued })))
}
