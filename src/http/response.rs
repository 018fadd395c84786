//! Error to HTTP response mapping.
//!
//! # Design Decisions
//! - Upstream failures are 502, timeouts 504, missing upstreams 503
//! - Error bodies are JSON `{"error": "..."}`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::relay::RelayError;

impl RelayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::UnknownUpstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Connection(_) => StatusCode::BAD_GATEWAY,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Forward(_) => StatusCode::BAD_GATEWAY,
            RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
