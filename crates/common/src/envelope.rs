//! Uniform response envelope shared by both HTTP surfaces.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_SUCCESS_MESSAGE: &str = "Operation completed successfully";

/// `{success, message, data, errors[], timestamp}` wrapper around every
/// response body, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::ok_with_message(data, DEFAULT_SUCCESS_MESSAGE)
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            errors,
            timestamp: Utc::now(),
        }
    }

    /// Unwraps the payload of a successful envelope.
    pub fn into_data(self) -> Option<T> {
        if self.success { self.data } else { None }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_shape() {
        let json = serde_json::to_value(ApiResponse::ok(5)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], DEFAULT_SUCCESS_MESSAGE);
        assert_eq!(json["data"], 5);
        assert_eq!(json["errors"], serde_json::json!([]));
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn failure_envelope_has_no_data() {
        let resp: ApiResponse<i32> =
            ApiResponse::failure("Order rejected", vec!["Product ID 9 not found".into()]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["errors"][0], "Product ID 9 not found");
        assert_eq!(resp.into_data(), None);
    }

    #[test]
    fn missing_errors_field_defaults_to_empty() {
        let raw = r#"{"success":true,"message":"ok","data":true,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let resp: ApiResponse<bool> = serde_json::from_str(raw).unwrap();
        assert!(resp.errors.is_empty());
        assert_eq!(resp.into_data(), Some(true));
    }
}
