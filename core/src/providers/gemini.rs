use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    finish_inner_task, millis, probe, run_tool_executor, send_json, tool_fallback, LlmProvider,
    ProviderDeps,
};
use crate::cancel::{run_cancellable, Deadline};
use crate::prompt::{
    chat_response_schema, chat_system_prompt, gemini_tools, inner_task_instruction,
    inner_task_schema, user_payload,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::runtime_config::ChatRuntimeConfig;
use crate::structured::parse_chat_result;
use crate::tool_protocol::{
    coerce_gemini_tool_calls, gemini_function_response_parts, gemini_model_turn, gemini_text,
    partition_by_allowlist, sanitize_model_turn,
};
use crate::tools::weather::WEATHER_TOOL_NAME;
use crate::transport::HttpRequest;
use crate::types::{ChatInput, ChatResult, HealthReport, InnerTaskInput, InnerTaskResult};
use crate::{ParleyError, Result};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Resolved settings for the Gemini `generateContent` API
#[derive(Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub chat_timeout_ms: u64,
    pub inner_task_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    /// Tool names that may actually be executed
    pub tool_allowlist: Vec<String>,
}

impl GeminiConfig {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            chat_timeout_ms: 12_000,
            inner_task_timeout_ms: 4_000,
            health_timeout_ms: 1_500,
            tool_timeout_ms: 2_000,
            tool_allowlist: vec![WEATHER_TOOL_NAME.to_string()],
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_allowlist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_allowlist = names.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("chat_timeout_ms", &self.chat_timeout_ms)
            .field("inner_task_timeout_ms", &self.inner_task_timeout_ms)
            .field("health_timeout_ms", &self.health_timeout_ms)
            .field("tool_timeout_ms", &self.tool_timeout_ms)
            .field("tool_allowlist", &self.tool_allowlist)
            .finish()
    }
}

/// Provider speaking Gemini's native `generateContent` wire format.
///
/// Tool calls are filtered through an allowlist before execution; every call
/// is retried once on 429 / 5xx.
pub struct GeminiNativeProvider {
    config: GeminiConfig,
    deps: ProviderDeps,
    retry: RetryPolicy,
}

impl GeminiNativeProvider {
    pub fn new(mut config: GeminiConfig, deps: ProviderDeps) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            config,
            deps,
            retry: RetryPolicy::transient(),
        }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn model_url(&self, suffix: &str) -> Result<String> {
        let base = format!(
            "{}/models/{}{}",
            self.config.base_url, self.config.model, suffix
        );
        reqwest::Url::parse_with_params(&base, &[("key", self.config.api_key.as_str())])
            .map(String::from)
            .map_err(|e| ParleyError::Config(format!("invalid Gemini URL: {e}")))
    }

    fn chat_body(&self, contents: &[Value], runtime: &ChatRuntimeConfig) -> Value {
        let mut generation = json!({
            "responseMimeType": "application/json",
            "responseSchema": chat_response_schema(),
        });
        if let Some(max) = runtime.max_output_tokens {
            generation["maxOutputTokens"] = json!(max);
        }
        json!({
            "systemInstruction": {"parts": [{"text": chat_system_prompt(&runtime.persona_text)}]},
            "contents": contents,
            "tools": gemini_tools(),
            "generationConfig": generation,
        })
    }

    async fn generate(&self, token: &CancellationToken, body: Value) -> Result<Value> {
        let request = HttpRequest::post_json(self.model_url(":generateContent")?, body);
        let transport = Arc::clone(&self.deps.transport);
        let max_attempts = self.retry.max_attempts;
        with_retry(token, self.retry, |attempt| {
            let request = request.clone();
            let transport = Arc::clone(&transport);
            async move {
                debug!(target: "gemini_provider", attempt, "POST generateContent");
                send_json(
                    transport.as_ref(),
                    token,
                    request,
                    &format!("generateContent failed (max_attempts={max_attempts})"),
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
        let allowlist = &self.config.tool_allowlist;
        let mut contents = vec![json!({
            "role": "user",
            "parts": [{"text": user_payload(input)}],
        })];

        let first = self.generate(token, self.chat_body(&contents, runtime)).await?;
        let tool_calls = coerce_gemini_tool_calls(&first);
        if tool_calls.is_empty() {
            return parse_chat_result(&response_text(&first)?, runtime.max_output_chars);
        }

        let (allowed, blocked) = partition_by_allowlist(&tool_calls, allowlist);
        if allowed.is_empty() {
            info!(target: "gemini_provider", blocked = blocked.len(), "All proposed tools are blocked; using fallback");
            return Ok(tool_fallback(tool_calls));
        }
        let Some(model_turn) = gemini_model_turn(&first) else {
            warn!(target: "gemini_provider", "Tool calls without a model turn; using fallback");
            return Ok(tool_fallback(tool_calls));
        };
        let echoed = if blocked.is_empty() {
            model_turn.clone()
        } else {
            debug!(target: "gemini_provider", blocked = blocked.len(), "Dropping blocked calls from echoed turn");
            sanitize_model_turn(model_turn, allowlist)
        };

        info!(target: "gemini_provider", calls = allowed.len(), "Executing allowed tools");
        let tool_timeout = self.config.tool_timeout_ms.min(self.config.chat_timeout_ms);
        let results = run_tool_executor(&self.deps, token, &allowed, millis(tool_timeout)).await;

        contents.push(echoed);
        contents.push(json!({
            "role": "user",
            "parts": gemini_function_response_parts(&tool_calls, allowlist, &results),
        }));

        let second = self.generate(token, self.chat_body(&contents, runtime)).await?;
        if !coerce_gemini_tool_calls(&second).is_empty() {
            warn!(target: "gemini_provider", "Follow-up turn requested tools again; using fallback");
            return Ok(tool_fallback(tool_calls));
        }

        let mut result = parse_chat_result(&response_text(&second)?, runtime.max_output_chars)?;
        result.tool_calls = tool_calls;
        Ok(result)
    }
}

fn response_text(response: &Value) -> Result<String> {
    gemini_text(response)
        .ok_or_else(|| ParleyError::Protocol("response has no candidate text".into()))
}

#[async_trait]
impl LlmProvider for GeminiNativeProvider {
    fn name(&self) -> &'static str {
        "gemini_native"
    }

    #[tracing::instrument(name = "gemini_provider.chat_call", skip(self, input), fields(model = %self.config.model))]
    async fn chat_call(&self, input: ChatInput) -> Result<ChatResult> {
        let runtime = self.deps.runtime.load().await?;
        let deadline = Deadline::start(millis(self.config.chat_timeout_ms));
        let token = deadline.token().clone();
        run_cancellable(&token, self.run_chat(&token, &runtime, &input)).await
    }

    #[tracing::instrument(name = "gemini_provider.inner_task_call", skip(self, input), fields(task = input.task_name()))]
    async fn inner_task_call(&self, input: InnerTaskInput) -> Result<InnerTaskResult> {
        let deadline = Deadline::start(millis(self.config.inner_task_timeout_ms));
        let token = deadline.token().clone();
        let body = json!({
            "systemInstruction": {"parts": [{"text": inner_task_instruction(&input)}]},
            "contents": [{"role": "user", "parts": [{"text": input.payload_json()}]}],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": inner_task_schema(&input),
            },
        });
        let response = self.generate(&token, body).await?;
        finish_inner_task(&input, &response_text(&response)?, self.deps.masker.as_ref())
    }

    async fn health(&self) -> HealthReport {
        let url = match self.model_url("") {
            Ok(url) => url,
            Err(e) => {
                debug!(target: "health", error = %e, "Cannot build Gemini health URL");
                return HealthReport::unavailable();
            }
        };
        probe(
            self.deps.transport.as_ref(),
            HttpRequest::get(url),
            millis(self.config.health_timeout_ms),
            "gemini_native",
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        self.deps.runtime.close().await
    }
}
