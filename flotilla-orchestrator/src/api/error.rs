//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::ServiceError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Service(ServiceError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Service(err) => match err {
                ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
                ServiceError::Conflict { .. } | ServiceError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                ServiceError::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
                ServiceError::Provider(_) | ServiceError::Publish(_) => StatusCode::BAD_GATEWAY,
                ServiceError::TaskQueue(_) => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Unauthorized(msg) => msg,
            ApiError::Service(ServiceError::Store(err)) => {
                tracing::error!("Store error: {:?}", err);
                "Internal server error".to_string()
            }
            ApiError::Service(err) => {
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", err);
                }
                err.to_string()
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
