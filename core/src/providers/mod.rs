/// Backend implementations of the chat / inner-task / health contract
pub mod gemini;
pub mod openai;
pub mod stub;
pub mod unconfigured;

pub use gemini::{GeminiConfig, GeminiNativeProvider};
pub use openai::{OpenAiCompatConfig, OpenAiCompatProvider};
pub use stub::StubProvider;
pub use unconfigured::UnconfiguredProvider;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cancel::{run_cancellable, Deadline};
use crate::pii::PiiMasker;
use crate::prompt::TOOL_FALLBACK_TEXT;
use crate::runtime_config::RuntimeConfigSource;
use crate::structured::{extract_first_json_object_text, parse_and_normalize_session_summary};
use crate::tools::{ToolExecutionRequest, ToolExecutor, ToolMessage};
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{
    ChatInput, ChatResult, Expression, HealthReport, InnerTaskInput, InnerTaskResult, ToolCall,
};
use crate::{ParleyError, Result};

/// Incremental assistant text
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capability surface shared by every backend.
///
/// Each backend implements this independently; their tool-calling control
/// flows differ too much to share a base implementation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// One structured chat turn, including at most one tool round.
    async fn chat_call(&self, input: ChatInput) -> Result<ChatResult>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Plain-text streaming variant of `chat_call`.
    ///
    /// `cancel` is the caller's own signal; the provider's timeout applies too.
    async fn chat_stream(
        &self,
        _input: ChatInput,
        _cancel: Option<CancellationToken>,
    ) -> Result<ChatStream> {
        Err(ParleyError::Unsupported(format!(
            "{} does not support streaming",
            self.name()
        )))
    }

    async fn inner_task_call(&self, input: InnerTaskInput) -> Result<InnerTaskResult>;

    /// Never fails; any problem reads as `unavailable`.
    async fn health(&self) -> HealthReport;

    /// Release resources shared with the factory. Safe to call repeatedly.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Collaborators injected into every networked provider
#[derive(Clone)]
pub struct ProviderDeps {
    pub transport: Arc<dyn HttpTransport>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    pub runtime: Arc<dyn RuntimeConfigSource>,
    pub masker: Arc<dyn PiiMasker>,
}

pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Answer used when the tool protocol cannot complete
pub(crate) fn tool_fallback(tool_calls: Vec<ToolCall>) -> ChatResult {
    ChatResult {
        assistant_text: TOOL_FALLBACK_TEXT.to_string(),
        expression: Expression::Neutral,
        motion_id: None,
        tool_calls,
    }
}

/// Run the executor under its own deadline, linked to the turn's token.
///
/// Executor failures and timeouts are logged and yield no messages; the
/// follow-up turn then reports `{ok:false}` for every call.
pub(crate) async fn run_tool_executor(
    deps: &ProviderDeps,
    parent: &CancellationToken,
    calls: &[ToolCall],
    timeout: Duration,
) -> Vec<ToolMessage> {
    let deadline = Deadline::with_parent(timeout, Some(parent));
    let request = ToolExecutionRequest {
        tool_calls: calls.to_vec(),
        transport: Arc::clone(&deps.transport),
        timeout,
    };
    let executor = Arc::clone(&deps.tool_executor);
    let outcome = run_cancellable(deadline.token(), async move {
        executor
            .execute(request)
            .await
            .map_err(|e| ParleyError::Protocol(format!("tool executor failed: {e}")))
    })
    .await;
    match outcome {
        Ok(messages) => messages,
        Err(e) => {
            let e = deadline.relabel(e);
            warn!(target: "tool_round", error = %e, calls = calls.len(), "Tool execution failed");
            Vec::new()
        }
    }
}

/// Shape the model's inner-task text into a result.
///
/// `session_summary` is validated strictly and fails fast; other tasks return
/// the first JSON object in the text (or the trimmed text itself).
pub(crate) fn finish_inner_task(
    input: &InnerTaskInput,
    content: &str,
    masker: &dyn PiiMasker,
) -> Result<InnerTaskResult> {
    let json_text = match input {
        InnerTaskInput::SessionSummary { .. } => {
            let summary = parse_and_normalize_session_summary(content, masker)?;
            serde_json::to_string(&summary)?
        }
        _ => extract_first_json_object_text(content).unwrap_or_else(|| content.trim().to_string()),
    };
    Ok(InnerTaskResult {
        task: input.task_name().to_string(),
        json_text,
    })
}

/// Send `request` under `token` and decode a 2xx JSON body.
///
/// Non-2xx responses become `Http { status }` with `context` and a short body
/// excerpt in the message.
pub(crate) async fn send_json(
    transport: &dyn HttpTransport,
    token: &CancellationToken,
    request: HttpRequest,
    context: &str,
) -> Result<Value> {
    run_cancellable(token, async {
        let response = transport.send(request).await?;
        if !response.ok() {
            let status = response.status;
            let body = response.text().await;
            return Err(ParleyError::Http {
                status,
                message: format!("{context}: {}", excerpt(&body)),
            });
        }
        response.json().await
    })
    .await
}

/// Probe `request` under its own timeout; anything but a 2xx reads as unavailable.
pub(crate) async fn probe(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    timeout: Duration,
    target: &'static str,
) -> HealthReport {
    let deadline = Deadline::start(timeout);
    match run_cancellable(deadline.token(), transport.send(request)).await {
        Ok(response) if response.ok() => HealthReport::ok(),
        Ok(response) => {
            debug!(target: "health", provider = target, status = response.status, "Health probe returned non-2xx");
            HealthReport::unavailable()
        }
        Err(e) => {
            let e = deadline.relabel(e);
            debug!(target: "health", provider = target, error = %e, "Health probe failed");
            HealthReport::unavailable()
        }
    }
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX {
        format!("{}...", trimmed.chars().take(MAX).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
