use crate::handlers::common::success_response;
use crate::{
    errors::ServiceError,
    services::{checkout::CreateCheckoutRequest, ReconcileOutcome},
    webhooks::SIGNATURE_HEADER,
    AppState,
};
use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde_json::json;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/verify-session/:session_id", post(verify_session))
        .route("/webhook", post(payment_webhook))
}

/// Opens a hosted checkout session for the posted basket snapshot
async fn create_checkout_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ServiceError::ValidationError("Origin header is required".to_string()))?;

    let session = state
        .services
        .checkout
        .create_session(origin, payload)
        .await?;
    Ok(success_response(session))
}

async fn verify_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let success = state.services.checkout.verify_session(&session_id).await;
    success_response(json!({ "success": success }))
}

// POST /api/v1/payment/webhook
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.services.reconciler.reconcile(&body, signature).await {
        Ok(ReconcileOutcome::Processed { .. }) => {
            (StatusCode::OK, "Checkout session processed successfully").into_response()
        }
        Ok(ReconcileOutcome::Duplicate { .. })
        | Ok(ReconcileOutcome::AwaitingPayment { .. })
        | Ok(ReconcileOutcome::Ignored { .. }) => {
            (StatusCode::OK, "Webhook processed successfully").into_response()
        }
        Err(ServiceError::Unauthorized(message)) => {
            (StatusCode::UNAUTHORIZED, message).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Webhook processing failed: {}", e.response_message()),
        )
            .into_response(),
    }
}
