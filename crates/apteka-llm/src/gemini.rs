//! Gemini `generateContent` client.
//!
//! Speaks the v1beta REST API directly: audio goes up as base64 inline
//! data, tools as function declarations with automatic calling mode.

use std::time::Duration;

use apteka_core::config::LlmConfig;
use apteka_core::types::Role;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{FinishReason, FunctionCall, LanguageService, LlmError, LlmReply, LlmRequest, UserInput};

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl From<&LlmConfig> for GeminiConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        )
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        LlmError::Status {
            code: status.as_u16(),
            message: extract_error_message(body),
        }
    }
}

/// Build the JSON body for one `generateContent` call.
pub fn build_request_body(request: &LlmRequest) -> Value {
    let mut contents: Vec<Value> = request
        .history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": turn.text }] })
        })
        .collect();

    let input_part = match &request.input {
        UserInput::Audio { mime_type, data } => json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(data),
            }
        }),
        UserInput::Text(text) => json!({ "text": text }),
    };
    contents.push(json!({ "role": "user", "parts": [input_part] }));

    if let Some(result) = &request.tool_result {
        contents.push(json!({
            "role": "model",
            "parts": [{ "functionCall": { "name": result.call.name, "args": result.call.args } }]
        }));
        contents.push(json!({
            "role": "user",
            "parts": [{ "functionResponse": { "name": result.call.name, "response": result.response } }]
        }));
    }

    let mut body = json!({
        "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
        "contents": contents,
    });

    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
        body["toolConfig"] = json!({ "functionCallingConfig": { "mode": "AUTO" } });
    }

    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

/// Parse a `generateContent` response body into an [`LlmReply`].
///
/// Only the first candidate is considered. The first function call part
/// wins; text parts are concatenated.
pub fn parse_response(body: &str) -> Result<LlmReply, LlmError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Decode(e.to_string()))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;

    let finish_reason = FinishReason::parse(candidate.finish_reason.as_deref().unwrap_or(""));
    let mut function_call = None;
    let mut text = String::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if function_call.is_none() {
            function_call = part.function_call;
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
    }

    Ok(LlmReply {
        function_call,
        text: text.trim().to_string(),
        finish_reason,
    })
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl LanguageService for GeminiClient {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        let body = build_request_body(request);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Http(format!("failed to read Gemini response: {e}")))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Gemini returned an error status");
            return Err(Self::map_http_error(status, &text));
        }

        let reply = parse_response(&text)?;
        tracing::debug!(
            function = reply.function_call.as_ref().map(|c| c.name.as_str()),
            text_len = reply.text.len(),
            "Gemini reply received"
        );
        Ok(reply)
    }
}
