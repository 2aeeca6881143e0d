//! API error taxonomy with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::envelope::ApiResponse;

const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

/// API-level error type that maps to HTTP responses wrapped in the
/// failure envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Entity absent.
    #[error("{0}")]
    NotFound(String),

    /// Bad input shape, with one entry per offending field or item.
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<String>,
    },

    /// Duplicate unique key.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// A remote dependency could not be reached.
    #[error("{0}")]
    Unavailable(String),

    /// Anything else. The detail is logged, never returned.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Single-message validation error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::Validation {
            errors: vec![message.clone()],
            message,
        }
    }

    pub fn validation(message: impl Into<String>, errors: Vec<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, errors) = match self {
            ApiError::Validation { message, errors } => (message, errors),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal server error");
                (INTERNAL_ERROR_MESSAGE.to_string(), Vec::new())
            }
            other => {
                let message = other.to_string();
                (message.clone(), vec![message])
            }
        };

        let body: ApiResponse<()> = ApiResponse::failure(message, errors);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let (status, json) = body_json(ApiError::NotFound("Product 3 not found".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Product 3 not found");
    }

    #[tokio::test]
    async fn validation_keeps_per_item_errors() {
        let err = ApiError::validation(
            "Order rejected",
            vec!["a".to_string(), "b".to_string()],
        );
        let (status, json) = body_json(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn internal_hides_detail() {
        let (status, json) = body_json(ApiError::Internal("pool timed out".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["message"], INTERNAL_ERROR_MESSAGE);
        assert!(!json.to_string().contains("pool timed out"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Conflict("dup".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
