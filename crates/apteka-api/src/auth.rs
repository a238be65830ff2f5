//! Bearer-token guard for protected routes.
//!
//! When a token is configured, `Authorization: Bearer <token>` must match
//! it exactly. Issuing tokens is left to whoever operates the deployment.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

/// Middleware that validates Bearer token authentication.
///
/// Passes everything through when `AppState.api_token` is `None`.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(req).await;
    };

    let Some(value) = req.headers().get("authorization") else {
        return ApiError::Unauthorized("Missing Authorization header".to_string()).into_response();
    };

    let Ok(value) = value.to_str() else {
        return ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
            .into_response();
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if token == expected => next.run(req).await,
        _ => {
            tracing::debug!("Rejected request with invalid bearer token");
            ApiError::Unauthorized("Invalid bearer token".to_string()).into_response()
        }
    }
}
