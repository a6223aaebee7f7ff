mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{deps, FixedExecutor, Reply, ScriptedTransport};
use mockall::mock;
use parley_core::prompt::TOOL_FALLBACK_TEXT;
use parley_core::providers::{GeminiConfig, GeminiNativeProvider, LlmProvider};
use parley_core::runtime_config::{ChatRuntimeConfig, StaticRuntimeConfig};
use parley_core::tools::{ToolExecutionRequest, ToolExecutor, ToolMessage, ToolResult};
use parley_core::types::TranscriptLine;
use parley_core::{ChatInput, HealthStatus, InnerTaskInput, MotionId, ParleyError};
use serde_json::{json, Value};

mock! {
    pub Executor {}

    #[async_trait]
    impl ToolExecutor for Executor {
        async fn execute(&self, request: ToolExecutionRequest) -> ToolResult<Vec<ToolMessage>>;
    }
}

fn provider(transport: &Arc<ScriptedTransport>, executor: Arc<dyn ToolExecutor>) -> GeminiNativeProvider {
    let config = GeminiConfig::new("gemini-test", "k").with_base_url("http://gemini.local/v1beta/");
    GeminiNativeProvider::new(config, deps(Arc::clone(transport), executor))
}

fn text_response(text: &str) -> Value {
    json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
}

fn input() -> ChatInput {
    ChatInput::new("reception", "天気を教えて")
}

#[tokio::test]
async fn test_all_blocked_calls_fall_back_after_one_generate() {
    let transport = ScriptedTransport::new(vec![Reply::Json(
        200,
        json!({"functionCalls": [{"name": "do_bad", "args": {"x": 1}}]}),
    )]);
    let mut executor = MockExecutor::new();
    executor.expect_execute().never();
    let p = provider(&transport, Arc::new(executor));

    let res = p.chat_call(input()).await.unwrap();
    assert_eq!(res.assistant_text, TOOL_FALLBACK_TEXT);
    assert_eq!(res.tool_calls.len(), 1);
    assert_eq!(res.tool_calls[0].name(), "do_bad");
    assert_eq!(res.tool_calls[0].function.arguments, "{\"x\":1}");
    assert_eq!(transport.posts(), 1);
}

#[tokio::test]
async fn test_partially_blocked_round_sanitizes_and_answers_every_call() {
    let first = json!({"candidates": [{"content": {"role": "model", "parts": [
        {"functionCall": {"name": "get_weather", "args": {"location": "東京"}}},
        {"functionCall": {"name": "do_bad", "args": {}}},
    ]}}]});
    let transport = ScriptedTransport::new(vec![
        Reply::Json(200, first),
        Reply::Json(
            200,
            text_response(r#"{"assistant_text":"東京は晴れです","expression":"happy","motion_id":"idle"}"#),
        ),
    ]);
    let mut executor = MockExecutor::new();
    executor
        .expect_execute()
        .withf(|req| req.tool_calls.len() == 1 && req.tool_calls[0].name() == "get_weather")
        .times(1)
        .returning(|req| {
            Ok(vec![ToolMessage::new(
                req.tool_calls[0].id.clone(),
                r#"{"ok":true,"result":{"conditions":"快晴"}}"#,
            )])
        });
    let p = provider(&transport, Arc::new(executor));

    let res = p.chat_call(input()).await.unwrap();
    assert_eq!(res.assistant_text, "東京は晴れです");
    assert_eq!(res.motion_id, Some(MotionId::Idle));
    assert_eq!(res.tool_calls.len(), 2);
    assert_eq!(transport.posts(), 2);

    let contents = transport.body(1)["contents"].clone();
    let echoed = contents[1]["parts"].as_array().unwrap();
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed[0]["functionCall"]["name"], "get_weather");

    let responses = contents[2]["parts"].as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(
        responses[0]["functionResponse"]["response"]["result"]["conditions"],
        "快晴"
    );
    assert_eq!(
        responses[1]["functionResponse"]["response"]["error"]["code"],
        "tool_not_allowed"
    );
}

#[tokio::test]
async fn test_missing_model_turn_falls_back() {
    let transport = ScriptedTransport::new(vec![Reply::Json(
        200,
        json!({"functionCalls": [{"name": "get_weather", "args": {"location": "大阪"}}]}),
    )]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    let res = p.chat_call(input()).await.unwrap();
    assert_eq!(res.assistant_text, TOOL_FALLBACK_TEXT);
    assert_eq!(transport.posts(), 1);
}

#[tokio::test]
async fn test_repeated_tool_request_falls_back() {
    let call = json!({"candidates": [{"content": {"role": "model", "parts": [
        {"functionCall": {"name": "get_weather", "args": {"location": "福岡"}}}
    ]}}]});
    let transport = ScriptedTransport::new(vec![Reply::Json(200, call.clone()), Reply::Json(200, call)]);
    let executor = FixedExecutor::new(r#"{"ok":true}"#);
    let p = provider(&transport, executor.clone());
    let res = p.chat_call(input()).await.unwrap();
    assert_eq!(res.assistant_text, TOOL_FALLBACK_TEXT);
    assert_eq!(res.tool_calls[0].id, "call_1");
    assert_eq!(executor.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_status_is_retried_once() {
    let transport = ScriptedTransport::new(vec![
        Reply::Status(500),
        Reply::Json(200, text_response(r#"{"assistant_text":"はい"}"#)),
    ]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    let res = p.chat_call(input()).await.unwrap();
    assert_eq!(res.assistant_text, "はい");
    assert_eq!(transport.posts(), 2);

    let transport = ScriptedTransport::new(vec![Reply::Status(429), Reply::Status(503)]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    let err = p.chat_call(input()).await.unwrap_err();
    assert_eq!(err.http_status(), Some(503));
    assert!(err.to_string().contains("max_attempts=2"));
    assert_eq!(transport.posts(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let transport = ScriptedTransport::new(vec![Reply::Status(400), Reply::Status(400)]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    let err = p.chat_call(input()).await.unwrap_err();
    assert!(err.to_string().starts_with("HTTP 400"));
    assert_eq!(transport.posts(), 1);
}

#[tokio::test]
async fn test_request_shape() {
    let transport = ScriptedTransport::new(vec![Reply::Json(
        200,
        text_response(r#"{"assistant_text":"ok"}"#),
    )]);
    let mut d = deps(Arc::clone(&transport), FixedExecutor::new("{}"));
    d.runtime = Arc::new(StaticRuntimeConfig::new(ChatRuntimeConfig {
        persona_text: "テスト用ペルソナ".into(),
        max_output_chars: 240,
        max_output_tokens: Some(128),
    }));
    let p = GeminiNativeProvider::new(GeminiConfig::new("gemini-test", "secret key"), d);
    p.chat_call(input()).await.unwrap();

    let request = &transport.requests()[0];
    assert!(request
        .url
        .starts_with("https://generativelanguage.googleapis.com/v1beta/models/gemini-test:generateContent?key="));
    assert!(request.url.ends_with("key=secret+key"));
    let body = request.body.clone().unwrap();
    assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 128);
    assert!(body["generationConfig"]["responseSchema"]["properties"]["assistant_text"].is_object());
    assert_eq!(body["contents"][0]["role"], "user");
    assert!(body["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .starts_with("テスト用ペルソナ"));
    assert_eq!(
        body["tools"][0]["functionDeclarations"][0]["name"],
        "get_weather"
    );
}

#[tokio::test]
async fn test_session_summary_fails_fast_on_extra_keys() {
    let bad = r#"{"task":"session_summary","title":"t","summary_json":{"summary":"s","topics":[],"staff_notes":[]},"mood":"good"}"#;
    let transport = ScriptedTransport::new(vec![Reply::Json(200, text_response(bad))]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    let input = InnerTaskInput::SessionSummary {
        transcript: vec![TranscriptLine {
            role: "user".into(),
            text: "ありがとう".into(),
        }],
    };
    let err = p.inner_task_call(input).await.unwrap_err();
    assert!(matches!(err, ParleyError::Validation(_)), "{err}");
    assert_eq!(transport.posts(), 1);
    let body = transport.body(0);
    assert_eq!(
        body["generationConfig"]["responseSchema"]["properties"]["task"]["enum"][0],
        "session_summary"
    );
}

#[tokio::test(start_paused = true)]
async fn test_inner_task_hanging_upstream_hits_deadline() {
    let transport = ScriptedTransport::new(vec![Reply::Hang]);
    let mut config = GeminiConfig::new("gemini-test", "k").with_base_url("http://gemini.local/v1beta/");
    config.inner_task_timeout_ms = 100;
    let p = GeminiNativeProvider::new(config, deps(Arc::clone(&transport), FixedExecutor::new("{}")));

    let err = p
        .inner_task_call(InnerTaskInput::ConsentDecision {
            text: "はい、同意します".into(),
        })
        .await
        .unwrap_err();
    assert!(err.is_abort_like(), "{err}");
    assert_eq!(transport.posts(), 1);
}

#[tokio::test]
async fn test_memory_extract_returns_object_text() {
    let transport = ScriptedTransport::new(vec![Reply::Json(
        200,
        text_response(r#"{"task":"memory_extract","candidates":[{"key":"好きな食べ物","value":"ラーメン"}]}"#),
    )]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    let res = p
        .inner_task_call(InnerTaskInput::MemoryExtract {
            text: "ラーメンが好き".into(),
        })
        .await
        .unwrap();
    assert_eq!(res.task, "memory_extract");
    let v: Value = serde_json::from_str(&res.json_text).unwrap();
    assert_eq!(v["candidates"][0]["value"], "ラーメン");
}

#[tokio::test]
async fn test_streaming_is_unsupported() {
    let transport = ScriptedTransport::new(vec![]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    assert!(!p.supports_streaming());
    let err = p.chat_stream(input(), None).await.err().unwrap();
    assert!(matches!(err, ParleyError::Unsupported(_)));
    assert!(transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_uses_model_metadata_endpoint() {
    let transport = ScriptedTransport::new(vec![
        Reply::Json(200, json!({"name": "models/gemini-test"})),
        Reply::Status(404),
        Reply::Hang,
    ]);
    let p = provider(&transport, FixedExecutor::new("{}"));
    assert_eq!(p.health().await.status, HealthStatus::Ok);
    assert_eq!(p.health().await.status, HealthStatus::Unavailable);
    assert_eq!(p.health().await.status, HealthStatus::Unavailable);
    assert_eq!(
        transport.requests()[0].url,
        "http://gemini.local/v1beta/models/gemini-test?key=k"
    );
}
