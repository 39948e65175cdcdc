use crate::handlers::common::success_response;
use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};

pub fn purchases_routes() -> Router<AppState> {
    Router::new().route("/user/:user_id", get(list_user_purchases))
}

async fn list_user_purchases(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let purchases = state.services.purchases.list_for_user(user_id).await?;
    Ok(success_response(purchases))
}
