use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{ChatStream, LlmProvider};
use crate::types::{
    ChatInput, ChatResult, Expression, HealthReport, InnerTaskInput, InnerTaskResult, MotionId,
};
use crate::{ParleyError, Result};

pub const STUB_REPLY: &str = "こんにちは！いまはテスト用の応答です。";

/// Offline provider with fixed answers and no I/O
#[derive(Debug, Clone, Default)]
pub struct StubProvider;

impl StubProvider {
    pub fn new() -> Self {
        Self
    }

    fn canned(input: &InnerTaskInput) -> serde_json::Value {
        match input {
            InnerTaskInput::ConsentDecision { .. } => json!({
                "task": "consent_decision",
                "decision": "unknown",
            }),
            InnerTaskInput::MemoryExtract { .. } => json!({
                "task": "memory_extract",
                "candidates": [],
            }),
            InnerTaskInput::SessionSummary { .. } => json!({
                "task": "session_summary",
                "title": "テスト会話",
                "summary_json": {
                    "summary": "テスト用の会話の要約です。",
                    "topics": ["テスト"],
                    "staff_notes": ["対応不要"],
                },
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn chat_call(&self, _input: ChatInput) -> Result<ChatResult> {
        Ok(ChatResult {
            assistant_text: STUB_REPLY.to_string(),
            expression: Expression::Happy,
            motion_id: Some(MotionId::Idle),
            tool_calls: Vec::new(),
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_stream(
        &self,
        _input: ChatInput,
        _cancel: Option<CancellationToken>,
    ) -> Result<ChatStream> {
        Ok(Box::pin(futures::stream::iter([Ok::<_, ParleyError>(
            STUB_REPLY.to_string(),
        )])))
    }

    async fn inner_task_call(&self, input: InnerTaskInput) -> Result<InnerTaskResult> {
        Ok(InnerTaskResult {
            task: input.task_name().to_string(),
            json_text: Self::canned(&input).to_string(),
        })
    }

    async fn health(&self) -> HealthReport {
        HealthReport::ok()
    }
}
