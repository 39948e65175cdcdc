use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use std::fmt;

fn current_request_id() -> Option<String> {
    crate::middleware_helpers::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error was produced
    pub timestamp: String,
}

/// Step of webhook reconciliation at which a purchase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStage {
    Metadata,
    Items,
}

impl fmt::Display for PurchaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseStage::Metadata => f.write_str("metadata parsing"),
            PurchaseStage::Items => f.write_str("item processing"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Basket not found for user {0}")]
    BasketNotFound(i64),

    #[error("Record not found with id {0}")]
    RecordNotFound(i64),

    #[error("Record {record_id} is not in the basket of user {user_id}")]
    RecordNotInBasket { user_id: i64, record_id: i64 },

    #[error("We're sorry, the record '{title}' is currently out of stock. Requested: {requested}, Available: {available}")]
    InsufficientStock {
        title: String,
        requested: i32,
        available: i32,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment processing error: {0}")]
    ProcessingError(String),

    #[error("Purchase processing failed during {stage}: {source}")]
    PurchaseProcessing {
        stage: PurchaseStage,
        record_id: Option<i64>,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps an error raised while reconciling a checkout.
    pub fn purchase_processing(
        stage: PurchaseStage,
        record_id: Option<i64>,
        source: ServiceError,
    ) -> Self {
        ServiceError::PurchaseProcessing {
            stage,
            record_id,
            source: Box::new(source),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_)
            | Self::BasketNotFound(_)
            | Self::RecordNotFound(_)
            | Self::RecordNotInBasket { .. } => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_)
            | Self::ProcessingError(_)
            | Self::PurchaseProcessing { .. }
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::NotFound(message) => message.clone(),
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::PurchaseProcessing {
                stage,
                record_id,
                source,
            } => {
                let detail = source.response_message();
                match record_id {
                    Some(id) => format!("Purchase failed during {} of record {}: {}", stage, id, detail),
                    None => format!("Purchase failed during {}: {}", stage, detail),
                }
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware_helpers::{scope_request_id, RequestId};
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response = scope_request_id(RequestId::new("req-123"), async {
            ServiceError::BasketNotFound(4).into_response()
        })
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.message, "Basket not found for user 4");
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::RecordNotInBasket {
                user_id: 1,
                record_id: 2
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::RecordNotFound(9).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                title: "Blue Train".into(),
                requested: 3,
                available: 1
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::ConcurrentModification("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ProcessingError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn out_of_stock_message_names_the_record() {
        let err = ServiceError::InsufficientStock {
            title: "Kind of Blue".into(),
            requested: 5,
            available: 2,
        };
        assert_eq!(
            err.response_message(),
            "We're sorry, the record 'Kind of Blue' is currently out of stock. Requested: 5, Available: 2"
        );
    }

    #[test]
    fn database_details_are_hidden() {
        let err = ServiceError::DatabaseError(DbErr::Custom("relation missing".into()));
        assert_eq!(err.response_message(), "Database error");

        let wrapped = ServiceError::purchase_processing(PurchaseStage::Items, Some(7), err);
        assert_eq!(
            wrapped.response_message(),
            "Purchase failed during item processing of record 7: Database error"
        );
        assert_eq!(wrapped.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
