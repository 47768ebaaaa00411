//! Auth Gate
//!
//! Shared-secret check on privileged routes. Runs before any handler, so a
//! rejected request never reaches the broker.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::BridgeError;
use crate::infrastructure::http::AppState;
use crate::infrastructure::http::error::ApiError;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `X-API-Key` is absent or does not match.
///
/// # Errors
///
/// Returns `401` with an `AUTH_ERROR` body.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(key) if state.secret.matches(key) => Ok(next.run(request).await),
        _ => {
            tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
            Err(BridgeError::Auth.into())
        }
    }
}
