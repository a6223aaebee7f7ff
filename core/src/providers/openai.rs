use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    finish_inner_task, millis, probe, run_tool_executor, send_json, tool_fallback, ChatStream,
    LlmProvider, ProviderDeps,
};
use crate::cancel::{run_cancellable, Deadline};
use crate::prompt::{
    chat_system_prompt, inner_task_instruction, openai_tools, stream_system_prompt, user_payload,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::runtime_config::ChatRuntimeConfig;
use crate::sse::sse_events_until;
use crate::structured::parse_chat_result;
use crate::tool_protocol::{
    coerce_openai_tool_calls, complete_tool_messages, openai_assistant_tool_message,
};
use crate::transport::HttpRequest;
use crate::types::{ChatInput, ChatResult, HealthReport, InnerTaskInput, InnerTaskResult};
use crate::{ParleyError, Result};

/// Data payload that ends a chat-completions stream
const DONE_SENTINEL: &str = "[DONE]";

/// Resolved settings for a chat-completions endpoint
#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub chat_timeout_ms: u64,
    pub inner_task_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub tool_timeout_ms: u64,
}

impl OpenAiCompatConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            chat_timeout_ms: 12_000,
            inner_task_timeout_ms: 4_000,
            health_timeout_ms: 800,
            tool_timeout_ms: 2_000,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl fmt::Debug for OpenAiCompatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chat_timeout_ms", &self.chat_timeout_ms)
            .field("inner_task_timeout_ms", &self.inner_task_timeout_ms)
            .field("health_timeout_ms", &self.health_timeout_ms)
            .field("tool_timeout_ms", &self.tool_timeout_ms)
            .finish()
    }
}

/// Provider for OpenAI-style `chat/completions` servers (local or hosted)
pub struct OpenAiCompatProvider {
    config: OpenAiCompatConfig,
    deps: ProviderDeps,
    retry: RetryPolicy,
}

impl OpenAiCompatProvider {
    pub fn new(mut config: OpenAiCompatConfig, deps: ProviderDeps) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            config,
            deps,
            retry: RetryPolicy::no_retry(),
        }
    }

    pub fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    fn chat_body(&self, messages: &[Value], runtime: &ChatRuntimeConfig) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "tools": openai_tools(),
        });
        if let Some(max) = runtime.max_output_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }

    async fn post_chat(&self, token: &CancellationToken, body: Value) -> Result<Value> {
        let request = self.authorize(HttpRequest::post_json(self.url("chat/completions"), body));
        let transport = Arc::clone(&self.deps.transport);
        let max_attempts = self.retry.max_attempts;
        with_retry(token, self.retry, |attempt| {
            let request = request.clone();
            let transport = Arc::clone(&transport);
            async move {
                debug!(target: "openai_provider", attempt, "POST chat/completions");
                send_json(
                    transport.as_ref(),
                    token,
                    request,
                    &format!("chat/completions failed (max_attempts={max_attempts})"),
                )
                .await
            }
        })
        .await
    }

    async fn run_chat(
        &self,
        token: &CancellationToken,
        runtime: &ChatRuntimeConfig,
        input: &ChatInput,
    ) -> Result<ChatResult> {
        let mut messages = vec![
            json!({"role": "system", "content": chat_system_prompt(&runtime.persona_text)}),
            json!({"role": "user", "content": user_payload(input)}),
        ];

        let first = self.post_chat(token, self.chat_body(&messages, runtime)).await?;
        let message = first_message(&first)?;
        let tool_calls = coerce_openai_tool_calls(message.get("tool_calls"));
        if tool_calls.is_empty() {
            return parse_chat_result(message_content(message)?, runtime.max_output_chars);
        }

        info!(target: "openai_provider", calls = tool_calls.len(), "Model requested tools");
        let tool_timeout = self.config.tool_timeout_ms.min(self.config.chat_timeout_ms);
        let results = run_tool_executor(&self.deps, token, &tool_calls, millis(tool_timeout)).await;

        messages.push(openai_assistant_tool_message(&tool_calls));
        for message in complete_tool_messages(&tool_calls, &results) {
            messages.push(serde_json::to_value(message)?);
        }

        let second = self.post_chat(token, self.chat_body(&messages, runtime)).await?;
        let message = first_message(&second)?;
        if !coerce_openai_tool_calls(message.get("tool_calls")).is_empty() {
            warn!(target: "openai_provider", "Follow-up turn requested tools again; using fallback");
            return Ok(tool_fallback(tool_calls));
        }

        let mut result = parse_chat_result(message_content(message)?, runtime.max_output_chars)?;
        result.tool_calls = tool_calls;
        Ok(result)
    }
}

fn first_message(response: &Value) -> Result<&Value> {
    response
        .pointer("/choices/0/message")
        .filter(|m| m.is_object())
        .ok_or_else(|| ParleyError::Protocol("response has no choices[0].message".into()))
}

fn message_content(message: &Value) -> Result<&str> {
    message
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| ParleyError::Protocol("message content is not a string".into()))
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    #[tracing::instrument(name = "openai_provider.chat_call", skip(self, input), fields(model = %self.config.model))]
    async fn chat_call(&self, input: ChatInput) -> Result<ChatResult> {
        let runtime = self.deps.runtime.load().await?;
        let deadline = Deadline::start(millis(self.config.chat_timeout_ms));
        let token = deadline.token().clone();
        run_cancellable(&token, self.run_chat(&token, &runtime, &input)).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    #[tracing::instrument(name = "openai_provider.chat_stream", skip(self, input, cancel), fields(model = %self.config.model))]
    async fn chat_stream(
        &self,
        input: ChatInput,
        cancel: Option<CancellationToken>,
    ) -> Result<ChatStream> {
        let runtime = self.deps.runtime.load().await?;
        let deadline = Deadline::with_parent(millis(self.config.chat_timeout_ms), cancel.as_ref());

        let mut body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": stream_system_prompt(&runtime.persona_text)},
                {"role": "user", "content": user_payload(&input)},
            ],
            "stream": true,
        });
        if let Some(max) = runtime.max_output_tokens {
            body["max_tokens"] = json!(max);
        }
        let request = self.authorize(HttpRequest::post_json(self.url("chat/completions"), body));

        let response = run_cancellable(deadline.token(), self.deps.transport.send(request))
            .await
            .map_err(|e| deadline.relabel(e))?;
        if !response.ok() {
            let status = response.status;
            let text = run_cancellable(deadline.token(), async { Ok(response.text().await) })
                .await
                .map_err(|e| deadline.relabel(e))?;
            return Err(ParleyError::Http {
                status,
                message: format!("chat/completions stream failed: {}", text.trim()),
            });
        }
        let reader = response
            .into_reader()
            .ok_or_else(|| ParleyError::Protocol("stream response has no body".into()))?;
        let mut events = sse_events_until(reader, deadline.token().clone(), |event| {
            event.trim() == DONE_SENTINEL
        });

        Ok(Box::pin(async_stream::stream! {
            // Keep the deadline alive for as long as the stream is polled.
            let deadline = deadline;
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err::<String, ParleyError>(deadline.relabel(e));
                        break;
                    }
                };
                match serde_json::from_str::<Value>(&event) {
                    Ok(chunk) => {
                        if let Some(delta) = chunk
                            .pointer("/choices/0/delta/content")
                            .and_then(Value::as_str)
                            .filter(|d| !d.is_empty())
                        {
                            yield Ok(delta.to_string());
                        }
                    }
                    Err(e) => {
                        debug!(target: "openai_provider", error = %e, "Skipping malformed stream event");
                    }
                }
            }
        }))
    }

    #[tracing::instrument(name = "openai_provider.inner_task_call", skip(self, input), fields(task = input.task_name()))]
    async fn inner_task_call(&self, input: InnerTaskInput) -> Result<InnerTaskResult> {
        let deadline = Deadline::start(millis(self.config.inner_task_timeout_ms));
        let token = deadline.token().clone();
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": inner_task_instruction(&input)},
                {"role": "user", "content": input.payload_json()},
            ],
        });
        let response = self.post_chat(&token, body).await?;
        let content = message_content(first_message(&response)?)?;
        finish_inner_task(&input, content, self.deps.masker.as_ref())
    }

    async fn health(&self) -> HealthReport {
        let request = self.authorize(HttpRequest::get(self.url("models")));
        probe(
            self.deps.transport.as_ref(),
            request,
            millis(self.config.health_timeout_ms),
            "openai_compat",
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        self.deps.runtime.close().await
    }
}
