//! Apteka API crate - axum HTTP transport for the chat orchestrator.
//!
//! Accepts multipart turn submissions on `POST /chat`, reports liveness on
//! `GET /health`, and guards the chat route with an optional bearer token
//! and a per-second rate limit.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
