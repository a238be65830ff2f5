//! HTTP contract tests for the Gemini client against a local mock server.

use std::time::Duration;

use apteka_llm::{
    GeminiClient, GeminiConfig, LanguageService, LlmError, LlmRequest, ToolDeclaration, UserInput,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> GeminiClient {
    GeminiClient::new(GeminiConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        model: "gemini-test".to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn request() -> LlmRequest {
    LlmRequest {
        system_instruction: "sys".to_string(),
        history: vec![],
        input: UserInput::Text("аптека номер 5".to_string()),
        tools: vec![ToolDeclaration {
            name: "find_pharmacies".to_string(),
            description: "search".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }],
        tool_result: None,
    }
}

#[tokio::test]
async fn test_request_hits_model_endpoint_with_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "toolConfig": {"functionCallingConfig": {"mode": "AUTO"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {
                    "name": "find_pharmacies",
                    "args": {"user_query_transcription": "аптека номер 5", "pharmacy_number": "5"}
                }}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client(&server).generate(&request()).await.unwrap();
    let call = reply.function_call.unwrap();
    assert_eq!(call.name, "find_pharmacies");
    assert_eq!(call.str_arg("pharmacy_number"), Some("5"));
}

#[tokio::test]
async fn test_error_status_is_mapped() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Resource exhausted"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).generate(&request()).await.unwrap_err();
    match err {
        LlmError::Status { code, message } => {
            assert_eq!(code, 429);
            assert_eq!(message, "Resource exhausted");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_candidates_is_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let err = client(&server).generate(&request()).await.unwrap_err();
    assert!(matches!(err, LlmError::EmptyResponse));
}

#[tokio::test]
async fn test_unreachable_server_is_http_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = GeminiClient::new(GeminiConfig {
        base_url: uri,
        api_key: "k".to_string(),
        model: "m".to_string(),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let err = client.generate(&request()).await.unwrap_err();
    assert!(matches!(err, LlmError::Http(_)));
}
