//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::BridgeError;

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Structured context, `null` when there is none.
    pub details: Value,
}

/// [`BridgeError`] as an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError(pub BridgeError);

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.0 {
            BridgeError::Validation { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Auth => StatusCode::UNAUTHORIZED,
            BridgeError::PaperOnlyViolation { .. } => StatusCode::FORBIDDEN,
            BridgeError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Watchdog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body for the wrapped error.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let details = match &self.0 {
            BridgeError::Validation { field, .. } => json!({ "field": field }),
            BridgeError::PaperOnlyViolation { port } => json!({ "port": port }),
            err if err.is_retryable() => json!({ "retryable": true }),
            _ => Value::Null,
        };
        ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
            details,
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(BridgeError::validation("quantity", "must be positive"), StatusCode::BAD_REQUEST ; "validation")]
    #[test_case(BridgeError::Auth, StatusCode::UNAUTHORIZED ; "auth")]
    #[test_case(BridgeError::PaperOnlyViolation { port: 7496 }, StatusCode::FORBIDDEN ; "paper only")]
    #[test_case(BridgeError::Connection("refused".to_string()), StatusCode::SERVICE_UNAVAILABLE ; "connection")]
    #[test_case(BridgeError::Watchdog("timeout".to_string()), StatusCode::INTERNAL_SERVER_ERROR ; "watchdog")]
    fn status_mapping(err: BridgeError, expected: StatusCode) {
        assert_eq!(ApiError(err).status(), expected);
    }

    #[test]
    fn validation_body_names_field() {
        let body = ApiError(BridgeError::validation("stopPrice", "required")).body();
        assert_eq!(body.code, "VALIDATION_ERROR");
        assert_eq!(body.details["field"], "stopPrice");
        assert!(body.message.contains("stopPrice"));
    }

    #[test]
    fn only_connection_errors_are_marked_retryable() {
        let body = ApiError(BridgeError::Connection("refused".to_string())).body();
        assert_eq!(body.details["retryable"], true);

        let body = ApiError(BridgeError::Watchdog("timeout".to_string())).body();
        assert!(body.details.is_null());
    }
}
