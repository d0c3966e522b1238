//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use service::ServiceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Order or stock service error.
    Service(ServiceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(err) => service_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn service_error_to_response(err: ServiceError) -> (StatusCode, String) {
    let status = match &err {
        ServiceError::OrderNotFound(_) | ServiceError::SkuNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::CannotFulfill { .. } => StatusCode::PRECONDITION_FAILED,
        ServiceError::InvalidStatusTransition { .. } => StatusCode::CONFLICT,
        ServiceError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
        ServiceError::FailureNotRecorded { .. }
        | ServiceError::Producer(_)
        | ServiceError::Storage(_)
        | ServiceError::Serialization(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}
