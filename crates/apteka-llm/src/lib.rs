//! Apteka LLM crate - boundary to the external language service.
//!
//! The service transcribes the caller's audio, picks one of the offered
//! tools (or answers directly), and phrases the final reply once a tool
//! result is sent back. This crate defines the request/response shapes,
//! the [`LanguageService`] trait, a scripted mock for tests, and a Gemini
//! REST client.

pub mod gemini;

use std::collections::VecDeque;
use std::sync::Mutex;

use apteka_core::types::Turn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use gemini::{GeminiClient, GeminiConfig};

// =============================================================================
// Errors
// =============================================================================

/// Failure talking to the language service.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("service returned HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("service returned no candidates")]
    EmptyResponse,

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LlmError {
    /// True for quota and rate-limit rejections.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::Status { code: 429, .. })
    }
}

// =============================================================================
// Request types
// =============================================================================

/// A callable operation offered to the service, with a JSON-schema-like
/// argument declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The current turn's input.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    Audio { mime_type: String, data: Vec<u8> },
    Text(String),
}

/// A structured call chosen by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl FunctionCall {
    /// String argument, or `None` when absent or not a string.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Numeric argument, accepting both JSON numbers and numeric strings.
    pub fn f64_arg(&self, key: &str) -> Option<f64> {
        match self.args.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Result of executing a [`FunctionCall`], sent back for answer generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call: FunctionCall,
    pub response: Value,
}

/// One exchange with the language service.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system_instruction: String,
    /// Prior text-only turns, oldest first.
    pub history: Vec<Turn>,
    pub input: UserInput,
    pub tools: Vec<ToolDeclaration>,
    /// Present on the second leg of a tool exchange.
    pub tool_result: Option<ToolResult>,
}

// =============================================================================
// Response types
// =============================================================================

/// Why the service stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Unspecified,
    Stop,
    MaxTokens,
    Safety,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" | "FINISH_REASON_UNSPECIFIED" => FinishReason::Unspecified,
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::MaxTokens,
            "SAFETY" => FinishReason::Safety,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// Normal completion. Anything else means the answer was cut or blocked.
    pub fn is_normal(&self) -> bool {
        matches!(self, FinishReason::Stop | FinishReason::Unspecified)
    }
}

/// Parsed reply from the service.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub function_call: Option<FunctionCall>,
    pub text: String,
    pub finish_reason: FinishReason,
}

impl LlmReply {
    /// A plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            function_call: None,
            text: text.into(),
            finish_reason: FinishReason::Stop,
        }
    }

    /// A tool call with the given arguments.
    pub fn call(name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            function_call: Some(FunctionCall {
                name: name.into(),
                args,
            }),
            text: String::new(),
            finish_reason: FinishReason::Stop,
        }
    }
}

// =============================================================================
// Trait
// =============================================================================

/// The external language service.
#[async_trait]
pub trait LanguageService: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmReply, LlmError>;
}

// =============================================================================
// Mock implementation
// =============================================================================

/// Scripted language service for tests.
///
/// Replies are returned in the order they were queued. Every request is
/// recorded so tests can inspect what the orchestrator sent.
#[derive(Debug, Default)]
pub struct MockLanguageService {
    replies: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLanguageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mock that replays `replies` in order.
    pub fn with_replies(replies: impl IntoIterator<Item = LlmReply>) -> Self {
        let mock = Self::new();
        for reply in replies {
            mock.push(Ok(reply));
        }
        mock
    }

    pub fn push(&self, reply: Result<LlmReply, LlmError>) {
        if let Ok(mut queue) = self.replies.lock() {
            queue.push_back(reply);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageService for MockLanguageService {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        self.requests
            .lock()
            .map_err(|e| LlmError::Internal(format!("requests lock poisoned: {}", e)))?
            .push(request.clone());

        let next = self
            .replies
            .lock()
            .map_err(|e| LlmError::Internal(format!("replies lock poisoned: {}", e)))?
            .pop_front();

        tracing::debug!(tools = request.tools.len(), "Mock language service called");
        next.unwrap_or(Err(LlmError::EmptyResponse))
    }
}

// =============================================================================
// Tests
// =============================================================================
