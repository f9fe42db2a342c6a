use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by every HTTP route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable code, one per error kind
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// RFC 3339 timestamp when the error was produced
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error(
        "Insufficient stock for product {product_id} at location {location_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: Uuid,
        location_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid quantity: {0} (must be greater than zero)")]
    InvalidQuantity(i32),

    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a store error; used as `map_err(ServiceError::db_error)`.
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    /// Stable error code, independent of the message text.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyProcessed(_) => "already_processed",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::DatabaseError(_) => "storage_failure",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyProcessed(_) => StatusCode::CONFLICT,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidInput(_) | Self::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Storage and internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Storage failure".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::AlreadyProcessed("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                product_id: Uuid::nil(),
                location_id: Uuid::nil(),
                available: 1,
                requested: 2,
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidQuantity(0).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::db_error(DbErr::Custom("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn every_variant_has_a_distinct_code() {
        let errors = [
            ServiceError::NotFound("x".into()),
            ServiceError::AlreadyProcessed("x".into()),
            ServiceError::InsufficientStock {
                product_id: Uuid::nil(),
                location_id: Uuid::nil(),
                available: 0,
                requested: 1,
            },
            ServiceError::InvalidInput("x".into()),
            ServiceError::InvalidQuantity(-1),
            ServiceError::db_error(DbErr::Custom("x".into())),
            ServiceError::InternalError("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(ServiceError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn response_message_hides_storage_details() {
        assert_eq!(
            ServiceError::db_error(DbErr::Custom("connection reset by peer".into()))
                .response_message(),
            "Storage failure"
        );
        assert_eq!(
            ServiceError::NotFound("Request 42".into()).response_message(),
            "Not found: Request 42"
        );
    }

    #[tokio::test]
    async fn error_response_carries_code() {
        let response = ServiceError::AlreadyProcessed("request".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "already_processed");
        assert_eq!(payload.error, "Conflict");
    }
}
