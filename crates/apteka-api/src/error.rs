//! API error types and JSON error response formatting.
//!
//! Every failure leaves the server as `{"error": code, "message": text}`
//! with a status that tells the caller whether retrying can help.

use apteka_chat::ChatError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "bad_gateway").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - malformed multipart body or invalid field.
    BadRequest(String),
    /// 401 - missing or wrong bearer token.
    Unauthorized(String),
    /// 429 - request rate exceeded.
    TooManyRequests(String),
    /// 500 - local failure.
    Internal(String),
    /// 502 - an external service failed or answered nonsense.
    BadGateway(String),
    /// 503 - an external service is throttling us.
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::Unauthorized(msg) => ("unauthorized", msg),
            ApiError::TooManyRequests(msg) => ("too_many_requests", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
            ApiError::BadGateway(msg) => ("bad_gateway", msg),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match &err {
            ChatError::EmptyAudio | ChatError::InvalidCoordinates(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ChatError::Llm(e) if e.is_rate_limited() => ApiError::ServiceUnavailable(err.to_string()),
            ChatError::Llm(_)
            | ChatError::MissingTranscription
            | ChatError::MissingCoordinates
            | ChatError::Index(_) => ApiError::BadGateway(err.to_string()),
            ChatError::Locator(_) | ChatError::Storage(_) => ApiError::Internal(err.to_string()),
        }
    }
}
