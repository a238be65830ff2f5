//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use apteka_chat::ChatOrchestrator;
use apteka_core::config::ServerConfig;

/// Shared application state.
///
/// All fields are cheap to clone across handler tasks.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Bearer token required on `/chat`. `None` disables the check.
    pub api_token: Option<String>,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
    pub rate_limit_per_sec: u64,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: ChatOrchestrator, server: &ServerConfig) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            api_token: server
                .api_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            max_upload_bytes: server.max_upload_bytes,
            rate_limit_per_sec: server.rate_limit_per_sec,
            start_time: Instant::now(),
        }
    }
}
